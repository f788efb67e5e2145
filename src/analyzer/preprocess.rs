//! Pre-processing: unified-field detection, required-field analysis and
//! form-type classification, all pure over the harvested snapshot.

use crate::analyzer::patterns::UNIFIED_PATTERNS;
use crate::analyzer::structure::{ElementInfo, FormSnapshot};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static KANA_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|[_\-])(kana|furigana|hiragana|katakana)($|[_\-])").expect("invalid regex")
});

const LAST_NAME_TOKENS: &[&str] = &[
    "lastname", "last_name", "last-name", "last", "family-name", "family_name", "surname", "sei",
    "姓", "lname", "l_name",
];
const FIRST_NAME_TOKENS: &[&str] = &[
    "firstname", "first_name", "first-name", "first", "given-name", "given_name", "forename",
    "mei", "名", "fname", "f_name",
];

/// Whether the blob carries a reading-field indicator at a token boundary
/// (or a Japanese reading marker anywhere).
pub fn contains_reading_indicator(blob: &str) -> bool {
    if KANA_BOUNDARY.is_match(blob) {
        return true;
    }
    ["フリガナ", "カタカナ", "ひらがな", "ふりがな"]
        .iter()
        .any(|t| blob.contains(t))
}

/// Unified-field evidence for the mapper: which single-input multi-part
/// fields exist, and whether split name evidence suppresses them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedFieldInfo {
    pub detected: HashSet<String>,
    pub has_name_split_fields: bool,
    pub has_name_kana_split_fields: bool,
}

impl UnifiedFieldInfo {
    pub fn has(&self, key: &str) -> bool {
        self.detected.contains(key)
    }
}

/// Kanji split-name evidence: last and first tokens on different inputs,
/// with reading fields excluded.
fn detect_split_name_kanji(elements: &[ElementInfo]) -> bool {
    let mut last_ids = HashSet::new();
    let mut first_ids = HashSet::new();
    for el in elements {
        if !matches!(el.tag.as_str(), "input" | "textarea") {
            continue;
        }
        let blob = el.full_blob();
        if blob.is_empty() || contains_reading_indicator(&blob) {
            continue;
        }
        if LAST_NAME_TOKENS.iter().any(|t| blob.contains(&t.to_lowercase())) {
            last_ids.insert(el.index);
        }
        if FIRST_NAME_TOKENS.iter().any(|t| blob.contains(&t.to_lowercase())) {
            first_ids.insert(el.index);
        }
    }
    if last_ids.is_empty() || first_ids.is_empty() {
        return false;
    }
    last_ids.union(&first_ids).count() >= 2
}

/// Kana split-name evidence: reading indicator plus sei/mei cues on
/// different elements.
fn detect_split_name_kana(elements: &[ElementInfo]) -> bool {
    let mut last_ids = HashSet::new();
    let mut first_ids = HashSet::new();
    for el in elements {
        let raw = format!(
            "{} {} {} {} {} {}",
            el.name, el.id, el.class_name, el.placeholder, el.label_text, el.associated_text
        );
        if raw.is_empty() || !contains_reading_indicator(&raw) {
            continue;
        }
        if raw.contains("セイ") || raw.contains('姓') {
            last_ids.insert(el.index);
        }
        if raw.contains("メイ") || raw.contains('名') {
            first_ids.insert(el.index);
        }
    }
    if last_ids.is_empty() || first_ids.is_empty() {
        return false;
    }
    last_ids.union(&first_ids).count() >= 2
}

/// Detect unified fields, suppressing unified name/kana entries when split
/// evidence is present.
pub fn detect_unified_fields(elements: &[ElementInfo]) -> UnifiedFieldInfo {
    let mut info = UnifiedFieldInfo {
        has_name_split_fields: detect_split_name_kanji(elements),
        has_name_kana_split_fields: detect_split_name_kana(elements),
        ..Default::default()
    };
    for el in elements {
        let text = format!("{} {} {}", el.name, el.id, el.label_text).to_lowercase();
        for (key, tokens) in UNIFIED_PATTERNS {
            if info.detected.contains(*key) {
                continue;
            }
            if matches!(*key, "fullname" | "kana_unified" | "hiragana_unified")
                && (info.has_name_split_fields || info.has_name_kana_split_fields)
            {
                continue;
            }
            if tokens.iter().any(|t| text.contains(&t.to_lowercase())) {
                info.detected.insert((*key).to_string());
            }
        }
    }
    info
}

/// Required-field analysis over the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequiredAnalysis {
    pub total_inputs: usize,
    pub required_count: usize,
    /// name-or-id of each required control
    pub required_elements: Vec<RequiredElement>,
    /// No required markers anywhere: treat all core fields as required
    pub treat_all_as_required: bool,
}

/// Identity of one required control, enough to build a selector later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequiredElement {
    pub name: String,
    pub id: String,
    pub selector: String,
}

/// Analyze required markers; absent markers flip the treat-all flag.
pub fn analyze_required_fields(elements: &[ElementInfo]) -> RequiredAnalysis {
    let inputs: Vec<&ElementInfo> = elements.iter().filter(|e| e.is_fillable()).collect();
    let required: Vec<&&ElementInfo> = inputs.iter().filter(|e| e.required).collect();
    RequiredAnalysis {
        total_inputs: inputs.len(),
        required_count: required.len(),
        required_elements: required
            .iter()
            .map(|e| RequiredElement {
                name: e.name.clone(),
                id: e.id.clone(),
                selector: e.selector.clone(),
            })
            .collect(),
        treat_all_as_required: required.is_empty(),
    }
}

/// Form types the classifier distinguishes. Non-contact types short-circuit
/// parts of validation (no message body required).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormType {
    Contact,
    Search,
    Newsletter,
    Order,
    Feedback,
    Auth,
    Other,
}

impl FormType {
    /// Whether the type goes through full contact-form validation.
    pub fn requires_message(&self) -> bool {
        matches!(self, Self::Contact)
    }
}

/// Classification result with a 0-1 confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormTypeInfo {
    pub primary: FormType,
    pub confidence: f64,
}

const CONTACT_KW: &[&str] = &[
    "contact", "inquiry", "お問い合わせ", "問い合わせ", "お問合せ", "問合せ", "toiawase",
    "メッセージ", "本文", "内容",
];
const MESSAGE_KW: &[&str] =
    &["message", "本文", "ご用件", "ご質問", "ご相談", "お問い合わせ内容", "内容"];
const SEARCH_KW: &[&str] = &["search", "検索", "site-search", "cse"];
const NEWSLETTER_KW: &[&str] = &[
    "subscribe",
    "subscription",
    "newsletter",
    "mailchimp",
    "regist",
    "メルマガ",
    "購読",
    "登録",
    "解除",
];
const ORDER_KW: &[&str] = &["order", "checkout", "cart", "購入", "決済"];
const FEEDBACK_KW: &[&str] = &["feedback", "アンケート", "survey", "ご意見", "評価"];
const AUTH_KW: &[&str] = &[
    "login",
    "signin",
    "sign-in",
    "sign_in",
    "auth",
    "authentication",
    "ログイン",
    "サインイン",
    "パスワード",
    "認証",
    "二段階",
    "ワンタイム",
    "確認コード",
    "認証コード",
    "otp",
    "mfa",
];

/// Classify the form by weighted scoring over element counts and tokens.
pub fn detect_form_type(snapshot: &FormSnapshot) -> FormTypeInfo {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut tokens: Vec<String> = Vec::new();
    for el in &snapshot.elements {
        match (el.tag.as_str(), el.type_attr.as_str()) {
            ("textarea", _) => *counts.entry("textarea").or_default() += 1,
            ("select", _) => *counts.entry("select").or_default() += 1,
            ("input", "email") => *counts.entry("email").or_default() += 1,
            ("input", "search") => *counts.entry("search").or_default() += 1,
            ("input", "password") => *counts.entry("password").or_default() += 1,
            ("input", _) => *counts.entry("text").or_default() += 1,
            _ => {}
        }
        let blob = el.full_blob();
        if !blob.is_empty() {
            tokens.push(blob);
        }
    }
    let attr = snapshot.form_attr_text.to_lowercase();
    let total_inputs = snapshot.elements.iter().filter(|e| e.is_fillable()).count();
    let get = |k: &str| counts.get(k).copied().unwrap_or(0);
    let any_token = |keys: &[&str]| tokens.iter().any(|t| keys.iter().any(|k| t.contains(&k.to_lowercase())));
    let attr_has = |keys: &[&str]| keys.iter().any(|k| attr.contains(&k.to_lowercase()));

    let mut scores: HashMap<FormType, f64> = HashMap::new();
    let mut add = |t: FormType, v: f64| *scores.entry(t).or_default() += v;

    if get("textarea") > 0 {
        add(FormType::Contact, 3.0);
    }
    if any_token(CONTACT_KW) || any_token(MESSAGE_KW) || attr_has(CONTACT_KW) {
        add(FormType::Contact, 2.0);
    }
    if get("email") > 0 {
        add(FormType::Contact, 0.5);
    }

    if get("password") > 0 {
        add(FormType::Auth, 3.0);
    }
    if any_token(AUTH_KW) || attr_has(AUTH_KW) {
        add(FormType::Auth, 2.0);
    }

    if get("search") > 0 {
        add(FormType::Search, 2.5);
    }
    if tokens.iter().any(|t| t.split_whitespace().any(|w| w == "q") || t.contains("検索")) {
        add(FormType::Search, 1.5);
    }
    if attr_has(SEARCH_KW) {
        add(FormType::Search, 1.0);
    }

    if get("email") >= 1 && get("textarea") == 0 {
        if any_token(NEWSLETTER_KW) || attr_has(NEWSLETTER_KW) {
            add(FormType::Newsletter, 3.0);
        }
        if total_inputs <= 3 {
            add(FormType::Newsletter, 1.0);
        }
    }

    if any_token(ORDER_KW) || attr_has(ORDER_KW) {
        add(FormType::Order, 2.0);
    }
    if any_token(FEEDBACK_KW) || attr_has(FEEDBACK_KW) {
        add(FormType::Feedback, 2.0);
    }

    let (mut primary, mut top) = scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(t, s)| (*t, *s))
        .unwrap_or((FormType::Other, 0.0));

    // A "contact" call without a textarea or message token is suspect;
    // hand it to whichever secondary type has real evidence.
    if primary == FormType::Contact
        && get("textarea") == 0
        && !(any_token(MESSAGE_KW) || any_token(CONTACT_KW))
    {
        let newsletter = scores.get(&FormType::Newsletter).copied().unwrap_or(0.0);
        let search = scores.get(&FormType::Search).copied().unwrap_or(0.0);
        if newsletter >= 2.0 {
            primary = FormType::Newsletter;
            top = newsletter;
        } else if search >= 2.0 {
            primary = FormType::Search;
            top = search;
        } else {
            primary = FormType::Other;
            top = 0.0;
        }
    }

    // Auth needs positive evidence; an all-zero board never becomes auth.
    let auth = scores.get(&FormType::Auth).copied().unwrap_or(0.0);
    let others_max = scores
        .iter()
        .filter(|(t, _)| **t != FormType::Auth)
        .map(|(_, s)| *s)
        .fold(0.0_f64, f64::max);
    if auth > 0.0 && auth >= others_max {
        primary = FormType::Auth;
        top = auth;
    }

    FormTypeInfo {
        primary,
        confidence: (top / 5.0).clamp(0.0, 1.0),
    }
}

/// Progressive scroll is only worth it for long pages or element-heavy
/// forms; short pages skip it.
pub fn needs_progressive_scroll(
    page_height: f64,
    viewport_height: f64,
    form_element_count: usize,
) -> bool {
    if page_height <= viewport_height * 1.5 && form_element_count <= 10 {
        return false;
    }
    page_height > viewport_height * 2.0 || form_element_count > 10
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn input(name: &str, type_attr: &str) -> ElementInfo {
        ElementInfo {
            tag: "input".into(),
            type_attr: type_attr.into(),
            name: name.into(),
            selector: format!("input[name=\"{name}\"]"),
            visible: true,
            enabled: true,
            ..Default::default()
        }
    }

    fn textarea(name: &str) -> ElementInfo {
        ElementInfo {
            tag: "textarea".into(),
            name: name.into(),
            selector: format!("textarea[name=\"{name}\"]"),
            visible: true,
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_split_name_evidence_suppresses_unified() {
        let mut sei = input("sei", "text");
        sei.index = 0;
        let mut mei = input("mei", "text");
        mei.index = 1;
        let mut unified = input("your_name", "text");
        unified.index = 2;
        let info = detect_unified_fields(&[sei, mei, unified]);
        assert!(info.has_name_split_fields);
        assert!(!info.has("fullname"));
    }

    #[test]
    fn test_unified_fullname_detected_without_split() {
        let mut unified = input("your_name", "text");
        unified.index = 0;
        let info = detect_unified_fields(std::slice::from_ref(&unified));
        assert!(info.has("fullname"));
    }

    #[test]
    fn test_kana_elements_do_not_count_as_kanji_split() {
        let mut sei = input("sei_kana", "text");
        sei.index = 0;
        sei.placeholder = "セイ".into();
        let mut mei = input("mei_kana", "text");
        mei.index = 1;
        mei.placeholder = "メイ".into();
        assert!(!detect_split_name_kanji(&[sei.clone(), mei.clone()]));
        assert!(detect_split_name_kana(&[sei, mei]));
    }

    #[test]
    fn test_required_analysis_fallback() {
        let mut a = input("email", "email");
        a.required = true;
        let analysis = analyze_required_fields(&[a.clone(), input("name", "text")]);
        assert_eq!(analysis.required_count, 1);
        assert!(!analysis.treat_all_as_required);

        let analysis = analyze_required_fields(&[input("email", "email"), input("name", "text")]);
        assert!(analysis.treat_all_as_required);
    }

    #[test]
    fn test_contact_form_classification() {
        let snapshot = FormSnapshot {
            elements: vec![input("email", "email"), textarea("message")],
            ..Default::default()
        };
        let info = detect_form_type(&snapshot);
        assert_eq!(info.primary, FormType::Contact);
        assert!(info.primary.requires_message());
    }

    #[test]
    fn test_newsletter_form_classification() {
        let mut el = input("email", "email");
        el.label_text = "メルマガ登録".into();
        let snapshot = FormSnapshot {
            elements: vec![el],
            form_attr_text: "newsletter-signup".into(),
            ..Default::default()
        };
        assert_eq!(detect_form_type(&snapshot).primary, FormType::Newsletter);
    }

    #[test]
    fn test_auth_form_needs_evidence() {
        let snapshot = FormSnapshot {
            elements: vec![input("username", "text"), input("password", "password")],
            ..Default::default()
        };
        assert_eq!(detect_form_type(&snapshot).primary, FormType::Auth);

        let empty = FormSnapshot::default();
        assert_ne!(detect_form_type(&empty).primary, FormType::Auth);
    }

    #[test]
    fn test_scroll_decision() {
        assert!(!needs_progressive_scroll(1000.0, 800.0, 5));
        assert!(needs_progressive_scroll(3000.0, 800.0, 5));
        assert!(needs_progressive_scroll(1000.0, 800.0, 30));
    }
}
