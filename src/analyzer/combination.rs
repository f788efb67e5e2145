//! Field combination rules.
//!
//! Combines split client data into unified values (full name, email, phone,
//! postal code, five-part address) and resolves canonical fields to client
//! values. Also decides katakana vs hiragana for unified reading fields.

use crate::analyzer::patterns::{self, keys};
use crate::config::{ClientInfo, TenantConfig};

/// Ideographic space used between Japanese name parts and before the
/// building line of an address.
pub const IDEOGRAPHIC_SPACE: char = '\u{3000}';

/// Kana script of a unified reading field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KanaKind {
    #[default]
    Katakana,
    Hiragana,
}

/// Legacy field names replaced by combinations.
pub fn deprecated_replacement(field: &str) -> Option<&'static str> {
    match field {
        "form_sender_name" => Some(keys::FULL_NAME),
        _ => None,
    }
}

fn join_some(parts: &[&str], separator: &str) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// `last + ideographic space + first`, tolerating a missing half.
pub fn full_name(client: &ClientInfo) -> String {
    join_some(
        &[&client.last_name, &client.first_name],
        &IDEOGRAPHIC_SPACE.to_string(),
    )
}

pub fn full_name_kana(client: &ClientInfo) -> String {
    join_some(
        &[&client.last_name_kana, &client.first_name_kana],
        &IDEOGRAPHIC_SPACE.to_string(),
    )
}

pub fn full_name_hiragana(client: &ClientInfo) -> String {
    join_some(
        &[&client.last_name_hiragana, &client.first_name_hiragana],
        &IDEOGRAPHIC_SPACE.to_string(),
    )
}

/// `local@domain`; empty when either half is missing.
pub fn email(client: &ClientInfo) -> String {
    let local = client.email_1.trim();
    let domain = client.email_2.trim();
    if local.is_empty() || domain.is_empty() {
        return String::new();
    }
    format!("{local}@{domain}")
}

/// Direct concatenation of the three phone parts.
pub fn phone(client: &ClientInfo) -> String {
    join_some(&[&client.phone_1, &client.phone_2, &client.phone_3], "")
}

/// Direct concatenation of the two postal parts.
pub fn postal_code(client: &ClientInfo) -> String {
    join_some(&[&client.postal_code_1, &client.postal_code_2], "")
}

/// Parts 1-4 concatenated, then an ideographic space before part 5.
pub fn address(client: &ClientInfo) -> String {
    let base = join_some(
        &[
            &client.address_1,
            &client.address_2,
            &client.address_3,
            &client.address_4,
        ],
        "",
    );
    let building = client.address_5.trim();
    if building.is_empty() {
        base
    } else {
        format!("{base}{IDEOGRAPHIC_SPACE}{building}")
    }
}

/// City-and-below composition (parts 2+3) for address-aux fields whose
/// context reads as the municipality line.
pub fn address_city(client: &ClientInfo) -> String {
    join_some(&[&client.address_2, &client.address_3], "")
}

/// Street/building composition (parts 4 + space + 5) for detail lines.
pub fn address_detail(client: &ClientInfo) -> String {
    let a4 = client.address_4.trim();
    let a5 = client.address_5.trim();
    if !a4.is_empty() && !a5.is_empty() {
        format!("{a4}{IDEOGRAPHIC_SPACE}{a5}")
    } else {
        format!("{a4}{a5}")
    }
}

/// The unified kana value for the detected script.
pub fn unified_kana(kind: KanaKind, client: &ClientInfo) -> String {
    match kind {
        KanaKind::Katakana => full_name_kana(client),
        KanaKind::Hiragana => full_name_hiragana(client),
    }
}

/// Decide katakana vs hiragana for a unified reading field from its
/// attribute/placeholder/context blob. Katakana is the default.
pub fn detect_kana_kind(blob: &str, placeholder: &str) -> KanaKind {
    let lower = blob.to_lowercase();
    if lower.contains("hiragana") || blob.contains("ひらがな") {
        return KanaKind::Hiragana;
    }
    if patterns::has_kana_indicator(blob) {
        // An explicit katakana cue outranks placeholder script sniffing.
        if lower.contains("katakana") || blob.contains("カタカナ") || blob.contains("フリガナ") {
            return KanaKind::Katakana;
        }
    }
    let has_hira = placeholder.chars().any(|c| ('ぁ'..='ゖ').contains(&c));
    let has_kata = placeholder
        .chars()
        .any(|c| ('ァ'..='ヺ').contains(&c) || c == 'ー');
    if has_hira && !has_kata {
        KanaKind::Hiragana
    } else {
        KanaKind::Katakana
    }
}

/// Resolve a canonical field to its client/targeting value. Combined fields
/// go through the combination rules; plain fields read the client record.
pub fn client_value(field: &str, tenant: &TenantConfig) -> String {
    let client = &tenant.client;
    let targeting = &tenant.targeting;
    if let Some(replacement) = deprecated_replacement(field) {
        return client_value(replacement, tenant);
    }
    match field {
        keys::COMPANY_NAME => client.company_name.clone(),
        keys::COMPANY_NAME_KANA => client.company_name_kana.clone(),
        keys::FULL_NAME => full_name(client),
        keys::LAST_NAME => client.last_name.clone(),
        keys::FIRST_NAME => client.first_name.clone(),
        keys::FULL_NAME_KANA => full_name_kana(client),
        keys::LAST_NAME_KANA => client.last_name_kana.clone(),
        keys::FIRST_NAME_KANA => client.first_name_kana.clone(),
        keys::FULL_NAME_HIRAGANA => full_name_hiragana(client),
        keys::LAST_NAME_HIRAGANA => client.last_name_hiragana.clone(),
        keys::FIRST_NAME_HIRAGANA => client.first_name_hiragana.clone(),
        keys::EMAIL | keys::EMAIL_CONFIRM => email(client),
        keys::PHONE => phone(client),
        keys::PHONE_1 => client.phone_1.clone(),
        keys::PHONE_2 => client.phone_2.clone(),
        keys::PHONE_3 => client.phone_3.clone(),
        keys::POSTAL_CODE => postal_code(client),
        keys::POSTAL_CODE_1 => client.postal_code_1.clone(),
        keys::POSTAL_CODE_2 => client.postal_code_2.clone(),
        // Prefecture is address part 1; empty defers to algorithmic select.
        keys::PREFECTURE => client.address_1.clone(),
        keys::ADDRESS => address(client),
        keys::SUBJECT => targeting.subject.clone(),
        keys::MESSAGE => targeting.message.clone(),
        keys::DEPARTMENT => client.department.clone(),
        keys::POSITION => client.position.clone(),
        keys::WEBSITE_URL => client.website_url.clone(),
        keys::GENDER => client.gender.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn client() -> ClientInfo {
        TenantConfig::sample().client
    }

    #[test]
    fn test_full_name_uses_ideographic_space() {
        assert_eq!(full_name(&client()), "山田\u{3000}太郎");
    }

    #[test]
    fn test_full_name_tolerates_missing_half() {
        let mut c = client();
        c.first_name.clear();
        assert_eq!(full_name(&c), "山田");
    }

    #[test]
    fn test_email_requires_both_halves() {
        assert_eq!(email(&client()), "t.yamada@example.co.jp");
        let mut c = client();
        c.email_2.clear();
        assert_eq!(email(&c), "");
    }

    #[test]
    fn test_phone_and_postal_concatenate() {
        assert_eq!(phone(&client()), "0368250324");
        assert_eq!(postal_code(&client()), "1600023");
    }

    #[test]
    fn test_address_space_before_building() {
        assert_eq!(address(&client()), "東京都新宿区西新宿3-3-13\u{3000}西新宿水間ビル6階");
        let mut c = client();
        c.address_5.clear();
        assert_eq!(address(&c), "東京都新宿区西新宿3-3-13");
    }

    #[test]
    fn test_address_city_and_detail_parts() {
        assert_eq!(address_city(&client()), "新宿区西新宿");
        assert_eq!(address_detail(&client()), "3-3-13\u{3000}西新宿水間ビル6階");
    }

    #[test]
    fn test_kana_kind_detection() {
        assert_eq!(detect_kana_kind("name_hiragana", ""), KanaKind::Hiragana);
        assert_eq!(detect_kana_kind("フリガナ", ""), KanaKind::Katakana);
        assert_eq!(detect_kana_kind("kana", "やまだ たろう"), KanaKind::Hiragana);
        assert_eq!(detect_kana_kind("kana", "ヤマダ タロウ"), KanaKind::Katakana);
        assert_eq!(detect_kana_kind("reading", ""), KanaKind::Katakana);
    }

    #[test]
    fn test_deprecated_field_redirects() {
        let tenant = TenantConfig::sample();
        assert_eq!(client_value("form_sender_name", &tenant), full_name(&tenant.client));
    }

    #[test]
    fn test_client_value_lookup() {
        let tenant = TenantConfig::sample();
        assert_eq!(client_value(keys::MESSAGE, &tenant), tenant.targeting.message);
        assert_eq!(client_value(keys::PREFECTURE, &tenant), "東京都");
        assert_eq!(client_value("unknown_field", &tenant), "");
    }
}
