//! Field-pattern catalog.
//!
//! A static, ordered catalog mapping each canonical field to recognition
//! tokens, negative tokens, and a per-field score floor. The catalog is
//! deliberately table-driven so the matching rules stay auditable; the
//! scorer and the split detector both consult it.
//!
//! Canonical field names are language-neutral; Japanese and English
//! recognition tokens live only in the token tables.

/// Canonical field keys used across scorer, mapper, duplicate manager and
/// value assigner.
pub mod keys {
    pub const COMPANY_NAME: &str = "company_name";
    pub const COMPANY_NAME_KANA: &str = "company_name_kana";
    pub const FULL_NAME: &str = "full_name";
    pub const LAST_NAME: &str = "last_name";
    pub const FIRST_NAME: &str = "first_name";
    pub const FULL_NAME_KANA: &str = "full_name_kana";
    pub const LAST_NAME_KANA: &str = "last_name_kana";
    pub const FIRST_NAME_KANA: &str = "first_name_kana";
    pub const FULL_NAME_HIRAGANA: &str = "full_name_hiragana";
    pub const LAST_NAME_HIRAGANA: &str = "last_name_hiragana";
    pub const FIRST_NAME_HIRAGANA: &str = "first_name_hiragana";
    pub const EMAIL: &str = "email";
    pub const EMAIL_CONFIRM: &str = "email_confirm";
    pub const PHONE: &str = "phone";
    pub const PHONE_1: &str = "phone_1";
    pub const PHONE_2: &str = "phone_2";
    pub const PHONE_3: &str = "phone_3";
    pub const POSTAL_CODE: &str = "postal_code";
    pub const POSTAL_CODE_1: &str = "postal_code_1";
    pub const POSTAL_CODE_2: &str = "postal_code_2";
    pub const PREFECTURE: &str = "prefecture";
    pub const ADDRESS: &str = "address";
    /// Secondary free-form address lines mapped by context
    pub const ADDRESS_AUX: &str = "address_aux";
    pub const SUBJECT: &str = "subject";
    pub const MESSAGE: &str = "message";
    pub const DEPARTMENT: &str = "department";
    pub const POSITION: &str = "position";
    pub const WEBSITE_URL: &str = "website_url";
    pub const GENDER: &str = "gender";
}

/// One catalog row: how a canonical field is recognized.
#[derive(Debug, Clone)]
pub struct FieldPattern {
    pub key: &'static str,
    /// Substrings matched against name/id/class/placeholder/label/context
    pub tokens: &'static [&'static str],
    /// Disqualifying substrings
    pub negative_tokens: &'static [&'static str],
    /// Minimum accepted score for this field
    pub min_score: i32,
    /// Essential fields get deeper candidate ranking and required treatment
    pub essential: bool,
}

/// Tokens that mark a kana (katakana) reading field.
pub const KANA_INDICATORS: &[&str] =
    &["kana", "katakana", "furigana", "フリガナ", "カタカナ", "カナ"];

/// Tokens that mark a hiragana reading field.
pub const HIRAGANA_INDICATORS: &[&str] = &["hiragana", "ひらがな", "ふりがな"];

/// Company-ish "〜名" tokens that must never be read as person names.
pub const COMPANY_NAME_TOKENS: &[&str] = &[
    "社名",
    "会社名",
    "企業名",
    "法人名",
    "団体名",
    "組織名",
    "部署名",
    "学校名",
    "店舗名",
    "病院名",
    "施設名",
    "company name",
    "organization",
];

/// Email-confirmation markers (field key, attributes or labels).
pub const EMAIL_CONFIRM_TOKENS: &[&str] = &[
    "email_confirm",
    "mail_confirm",
    "email_confirmation",
    "confirm_email",
    "confirm_mail",
    "メール確認",
    "確認用メール",
    "email_check",
    "mail_check",
    "re_email",
    "re_mail",
    "再入力",
    "auto_email_confirm",
];

/// Default score floor when the catalog row does not override it.
pub const DEFAULT_MIN_SCORE: i32 = 70;

/// The ordered catalog. Order matters: earlier rows claim candidates first
/// when scores tie.
pub static CATALOG: &[FieldPattern] = &[
    FieldPattern {
        key: keys::EMAIL,
        tokens: &["email", "e-mail", "mail", "メール", "メールアドレス", "mail_address", "mailaddress"],
        negative_tokens: &["confirm", "確認", "再入力", "もう一度", "magazine", "メルマガ"],
        min_score: 60,
        essential: true,
    },
    FieldPattern {
        key: keys::MESSAGE,
        tokens: &[
            "お問い合わせ内容",
            "お問合せ内容",
            "お問い合わせ本文",
            "お問い合せ",
            "本文",
            "メッセージ",
            "message",
            "inquiry",
            "ご質問",
            "ご相談",
            "ご用件",
            "ご要望",
            "comment",
            "コメント",
            "詳細",
            "備考",
            "内容",
        ],
        negative_tokens: &["検索", "search"],
        min_score: 65,
        essential: true,
    },
    FieldPattern {
        key: keys::COMPANY_NAME,
        tokens: &[
            "会社名",
            "御社名",
            "貴社名",
            "社名",
            "企業名",
            "法人名",
            "団体名",
            "company",
            "corporate",
            "organization",
        ],
        negative_tokens: &["かな", "カナ", "ふりがな", "フリガナ", "kana", "furigana", "url", "ホームページ"],
        min_score: 78,
        essential: false,
    },
    FieldPattern {
        key: keys::COMPANY_NAME_KANA,
        tokens: &["会社名カナ", "会社名かな", "社名カナ", "company_kana", "corporate_kana"],
        negative_tokens: &[],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::FULL_NAME,
        tokens: &[
            "氏名",
            "お名前",
            "名前",
            "fullname",
            "full_name",
            "full-name",
            "your-name",
            "your_name",
            "担当者名",
            "ご担当者",
        ],
        negative_tokens: &[
            "会社",
            "社名",
            "企業",
            "法人",
            "かな",
            "カナ",
            "ふりがな",
            "フリガナ",
            "ひらがな",
            "kana",
            "furigana",
            "hiragana",
            "商品名",
        ],
        min_score: DEFAULT_MIN_SCORE,
        essential: true,
    },
    FieldPattern {
        key: keys::LAST_NAME,
        tokens: &[
            "姓",
            "苗字",
            "lastname",
            "last_name",
            "last-name",
            "last",
            "family_name",
            "family-name",
            "surname",
            "sei",
            "lname",
            "l_name",
        ],
        negative_tokens: &[
            "会社", "社名", "企業", "法人", "かな", "カナ", "フリガナ", "ふりがな", "ひらがな",
            "kana", "furigana", "hiragana", "katakana",
        ],
        min_score: 72,
        essential: false,
    },
    FieldPattern {
        key: keys::FIRST_NAME,
        tokens: &[
            "名",
            "firstname",
            "first_name",
            "first-name",
            "first",
            "given_name",
            "given-name",
            "forename",
            "mei",
            "fname",
            "f_name",
        ],
        negative_tokens: &[
            "会社", "社名", "企業", "法人", "団体", "組織", "部署", "学校", "店舗", "病院", "施設",
            "氏名", "名前", "件名", "題名", "かな", "カナ", "フリガナ", "ふりがな", "ひらがな",
            "kana", "furigana", "hiragana", "katakana",
        ],
        min_score: 72,
        essential: false,
    },
    FieldPattern {
        key: keys::FULL_NAME_KANA,
        tokens: &["フリガナ", "ふりがな", "カナ", "kana", "furigana"],
        negative_tokens: &["会社", "社名", "姓", "名", "sei", "mei", "ひらがな", "hiragana"],
        min_score: DEFAULT_MIN_SCORE,
        essential: true,
    },
    FieldPattern {
        key: keys::LAST_NAME_KANA,
        tokens: &["姓カナ", "セイ", "sei_kana", "last_name_kana", "lastname_kana", "kana_last"],
        negative_tokens: &["会社", "社名"],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::FIRST_NAME_KANA,
        tokens: &["名カナ", "メイ", "mei_kana", "first_name_kana", "firstname_kana", "kana_first"],
        negative_tokens: &["会社", "社名"],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::FULL_NAME_HIRAGANA,
        tokens: &["ひらがな", "hiragana"],
        negative_tokens: &["カナ", "カタカナ", "katakana"],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::LAST_NAME_HIRAGANA,
        tokens: &["姓ひらがな", "せい", "sei_hiragana"],
        negative_tokens: &[],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::FIRST_NAME_HIRAGANA,
        tokens: &["名ひらがな", "めい", "mei_hiragana"],
        negative_tokens: &[],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::PHONE_1,
        tokens: &["tel1", "tel_1", "tel-1", "phone1", "phone_1", "市外局番"],
        negative_tokens: &["fax"],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::PHONE_2,
        tokens: &["tel2", "tel_2", "tel-2", "phone2", "phone_2", "市内局番"],
        negative_tokens: &["fax"],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::PHONE_3,
        tokens: &["tel3", "tel_3", "tel-3", "phone3", "phone_3", "加入者番号"],
        negative_tokens: &["fax"],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::PHONE,
        tokens: &["電話番号", "電話", "tel", "phone", "telephone", "携帯", "mobile", "連絡先"],
        negative_tokens: &["fax", "ファックス", "ファクス"],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::POSTAL_CODE_1,
        tokens: &["zip1", "postcode1", "postal_code_1", "zip_first", "上3桁", "前3桁"],
        negative_tokens: &[],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::POSTAL_CODE_2,
        tokens: &["zip2", "postcode2", "postal_code_2", "zip_last", "下4桁", "後4桁"],
        negative_tokens: &[],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::POSTAL_CODE,
        tokens: &[
            "郵便番号",
            "郵便",
            "postal",
            "postalcode",
            "postal_code",
            "post_code",
            "post-code",
            "postcode",
            "zip",
            "zipcode",
            "zip_code",
            "zip-code",
            "〒",
            "yubin",
            "yuubin",
        ],
        negative_tokens: &["address", "addr", "住所"],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::PREFECTURE,
        tokens: &["都道府県", "prefecture", "pref"],
        negative_tokens: &["以下", "以降", "から", "まで", "を入力", "番地", "丁目"],
        min_score: 75,
        essential: false,
    },
    FieldPattern {
        key: keys::ADDRESS,
        tokens: &["住所", "所在地", "address", "addr", "番地", "市区町村"],
        negative_tokens: &["メール", "mail", "email", "郵便番号", "zip", "postal"],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::SUBJECT,
        tokens: &["件名", "題名", "subject", "タイトル", "title"],
        negative_tokens: &[],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::DEPARTMENT,
        tokens: &["部署", "部署名", "所属", "department", "division"],
        negative_tokens: &[],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::POSITION,
        tokens: &["役職", "肩書", "position", "job_title", "job-title"],
        negative_tokens: &[],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::WEBSITE_URL,
        tokens: &["url", "website", "web-site", "ホームページ", "サイト", "hp"],
        negative_tokens: &[],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
    FieldPattern {
        key: keys::GENDER,
        tokens: &["性別", "gender", "sex"],
        negative_tokens: &[],
        min_score: DEFAULT_MIN_SCORE,
        essential: false,
    },
];

/// Unified-field recognition patterns: a single input capturing a
/// multi-part value.
pub static UNIFIED_PATTERNS: &[(&str, &[&str])] = &[
    ("fullname", &["fullname", "full_name", "your-name", "your_name", "氏名", "お名前"]),
    ("kana_unified", &["kana", "furigana", "フリガナ", "カナ"]),
    ("hiragana_unified", &["hiragana", "ひらがな"]),
    ("phone_unified", &["電話番号", "telephone"]),
    ("postal_unified", &["郵便番号", "postalcode", "zipcode"]),
    ("address_unified", &["住所", "address"]),
];

/// Look up a catalog row by canonical key.
pub fn pattern_for(key: &str) -> Option<&'static FieldPattern> {
    CATALOG.iter().find(|p| p.key == key)
}

/// The score floor for a field, falling back to the global default.
pub fn min_score_for(key: &str) -> i32 {
    pattern_for(key).map(|p| p.min_score).unwrap_or(DEFAULT_MIN_SCORE)
}

/// Canonical keys of the essential fields.
pub fn essential_keys() -> Vec<&'static str> {
    CATALOG.iter().filter(|p| p.essential).map(|p| p.key).collect()
}

/// Whether a blob of attribute/label text carries a kana indicator.
pub fn has_kana_indicator(blob: &str) -> bool {
    let lower = blob.to_lowercase();
    KANA_INDICATORS.iter().any(|t| lower.contains(&t.to_lowercase()))
}

/// Whether a blob carries a hiragana indicator.
pub fn has_hiragana_indicator(blob: &str) -> bool {
    let lower = blob.to_lowercase();
    HIRAGANA_INDICATORS.iter().any(|t| lower.contains(&t.to_lowercase()))
}

/// Whether a blob names a company-like "〜名" entity.
pub fn has_company_token(blob: &str) -> bool {
    let lower = blob.to_lowercase();
    COMPANY_NAME_TOKENS.iter().any(|t| lower.contains(&t.to_lowercase()))
}

/// Whether a field name or attribute blob marks an email-confirmation input.
pub fn is_email_confirmation(blob: &str) -> bool {
    let lower = blob.to_lowercase();
    EMAIL_CONFIRM_TOKENS.iter().any(|t| lower.contains(&t.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_keys_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for p in CATALOG {
            assert!(seen.insert(p.key), "duplicate catalog key {}", p.key);
        }
    }

    #[test]
    fn test_min_score_overrides() {
        assert_eq!(min_score_for(keys::LAST_NAME), 72);
        assert_eq!(min_score_for(keys::COMPANY_NAME), 78);
        assert_eq!(min_score_for(keys::EMAIL), 60);
        assert_eq!(min_score_for(keys::SUBJECT), DEFAULT_MIN_SCORE);
    }

    #[test]
    fn test_essential_fields() {
        let essential = essential_keys();
        assert!(essential.contains(&keys::EMAIL));
        assert!(essential.contains(&keys::MESSAGE));
        assert!(essential.contains(&keys::FULL_NAME));
        assert!(essential.contains(&keys::FULL_NAME_KANA));
    }

    #[test]
    fn test_kana_and_company_guards() {
        assert!(has_kana_indicator("sei_kana"));
        assert!(has_kana_indicator("フリガナ"));
        assert!(!has_kana_indicator("last_name"));
        assert!(has_company_token("会社名"));
        assert!(!has_company_token("姓"));
    }

    #[test]
    fn test_email_confirmation_tokens() {
        assert!(is_email_confirmation("mail_confirm"));
        assert!(is_email_confirmation("確認用メールアドレス"));
        assert!(!is_email_confirmation("email"));
    }
}
