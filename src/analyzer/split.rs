//! Split-field detection.
//!
//! Groups mapped fields by type (address/phone/name/name-kana/name-hiragana/
//! email/postal), recognizes the split pattern, and validates each group.
//! The go/no-go decision is input-order contiguity: members must occupy
//! consecutive indices in the form's input-only element order. Groups below
//! confidence 0.45 are rejected. Designer-intent wording picks the input
//! strategy (combine vs split).

use crate::analyzer::combination;
use crate::analyzer::context_text::ContextCandidate;
use crate::analyzer::patterns::{self, keys};
use crate::config::ClientInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Recognized split patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPattern {
    Address2Split,
    Address3Split,
    Address4Split,
    Phone2Split,
    Phone3Split,
    Name2Split,
    Email2Split,
    Postal2Split,
}

/// Field families the detector groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitFieldType {
    Address,
    Phone,
    Name,
    NameHiragana,
    NameKana,
    Email,
    PostalCode,
}

/// How the group should be filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputStrategy {
    /// Each member gets its own part
    Split,
    /// Members receive grouped/combined values
    Combine,
}

/// One member of a candidate group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitMember {
    pub field: String,
    pub selector: String,
    pub contexts: Vec<ContextCandidate>,
}

impl SplitMember {
    fn text_blob(&self) -> String {
        let mut blob = self.field.to_lowercase();
        for c in &self.contexts {
            blob.push(' ');
            blob.push_str(&c.text.to_lowercase());
        }
        blob
    }
}

/// A validated split group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitFieldGroup {
    pub pattern: SplitPattern,
    pub field_type: SplitFieldType,
    /// Members in input order
    pub members: Vec<SplitMember>,
    pub confidence: f64,
    pub sequence_valid: bool,
    pub strategy: InputStrategy,
    pub strategy_confidence: f64,
}

const CONFIDENCE_FLOOR: f64 = 0.45;

fn detection_keywords(field_type: SplitFieldType) -> &'static [&'static str] {
    match field_type {
        SplitFieldType::Address => {
            &["住所", "address", "所在地", "番地", "都道府県", "市区町村", "町名", "建物"]
        }
        // "番号" alone collides with postal/membership numbers.
        SplitFieldType::Phone => &["電話", "tel", "phone", "市外局番", "局番"],
        SplitFieldType::Name => &[
            "姓", "苗字", "last", "first", "family", "given", "lastname", "firstname",
            "family_name", "given_name",
        ],
        SplitFieldType::NameHiragana => &["ひらがな", "ふりがな", "hiragana", "せい", "めい"],
        SplitFieldType::NameKana => {
            &["カナ", "カタカナ", "フリガナ", "katakana", "kana", "セイ", "メイ"]
        }
        SplitFieldType::Email => &["email", "mail", "メール", "@"],
        SplitFieldType::PostalCode => &["郵便番号", "postal", "zip", "〒"],
    }
}

fn max_fields(field_type: SplitFieldType) -> usize {
    match field_type {
        SplitFieldType::Address => 5,
        SplitFieldType::Phone => 3,
        _ => 2,
    }
}

fn pattern_for_count(field_type: SplitFieldType, count: usize) -> Option<SplitPattern> {
    match (field_type, count) {
        (SplitFieldType::Address, 2) => Some(SplitPattern::Address2Split),
        (SplitFieldType::Address, 3) => Some(SplitPattern::Address3Split),
        (SplitFieldType::Address, 4..=5) => Some(SplitPattern::Address4Split),
        (SplitFieldType::Phone, 2) => Some(SplitPattern::Phone2Split),
        (SplitFieldType::Phone, 3) => Some(SplitPattern::Phone3Split),
        (SplitFieldType::Name, 2)
        | (SplitFieldType::NameHiragana, 2)
        | (SplitFieldType::NameKana, 2) => Some(SplitPattern::Name2Split),
        (SplitFieldType::Email, 2) => Some(SplitPattern::Email2Split),
        (SplitFieldType::PostalCode, 2) => Some(SplitPattern::Postal2Split),
        _ => None,
    }
}

/// Identify the family of a mapped canonical field, using its contexts to
/// veto company-name lookalikes.
pub fn identify_field_type(field: &str, contexts: &[ContextCandidate]) -> Option<SplitFieldType> {
    match field {
        keys::LAST_NAME | keys::FIRST_NAME => return Some(SplitFieldType::Name),
        keys::LAST_NAME_HIRAGANA | keys::FIRST_NAME_HIRAGANA => {
            return Some(SplitFieldType::NameHiragana)
        }
        keys::LAST_NAME_KANA | keys::FIRST_NAME_KANA => return Some(SplitFieldType::NameKana),
        keys::PHONE_1 | keys::PHONE_2 | keys::PHONE_3 | keys::PHONE => {
            return Some(SplitFieldType::Phone)
        }
        keys::POSTAL_CODE_1 | keys::POSTAL_CODE_2 | keys::POSTAL_CODE => {
            return Some(SplitFieldType::PostalCode)
        }
        keys::EMAIL => return Some(SplitFieldType::Email),
        keys::ADDRESS | keys::ADDRESS_AUX | keys::PREFECTURE => {
            return Some(SplitFieldType::Address)
        }
        _ => {}
    }
    let blob: String = std::iter::once(field.to_lowercase())
        .chain(contexts.iter().map(|c| c.text.to_lowercase()))
        .collect::<Vec<_>>()
        .join(" ");
    if patterns::has_company_token(&blob) {
        return None;
    }
    for field_type in [
        SplitFieldType::NameHiragana,
        SplitFieldType::NameKana,
        SplitFieldType::Name,
        SplitFieldType::Phone,
        SplitFieldType::PostalCode,
        SplitFieldType::Email,
        SplitFieldType::Address,
    ] {
        if detection_keywords(field_type)
            .iter()
            .any(|k| blob.contains(&k.to_lowercase()))
        {
            return Some(field_type);
        }
    }
    None
}

/// Input-order contiguity: every member selector must exist in the input
/// order and the indices must be strictly consecutive.
fn contiguous_in_input_order(members: &[SplitMember], input_order: &[&str]) -> bool {
    let mut indices = Vec::with_capacity(members.len());
    for m in members {
        match input_order.iter().position(|s| *s == m.selector) {
            Some(i) => indices.push(i),
            None => return false,
        }
    }
    indices.sort_unstable();
    indices.windows(2).all(|w| w[1] - w[0] == 1)
}

/// Type-specific label evidence: for names, the first member must read as
/// the family name and the second as the given name; company tokens veto.
fn type_sequence_valid(field_type: SplitFieldType, members: &[SplitMember]) -> bool {
    match field_type {
        SplitFieldType::Name | SplitFieldType::NameHiragana | SplitFieldType::NameKana => {
            if members.len() < 2 {
                return false;
            }
            let first_blob = members[0].text_blob();
            let second_blob = members[1].text_blob();
            if patterns::has_company_token(&first_blob) || patterns::has_company_token(&second_blob)
            {
                return false;
            }
            let mut surname: Vec<&str> =
                vec!["姓", "苗字", "せい", "last", "lastname", "family", "family_name", "surname"];
            let mut given: Vec<&str> =
                vec!["名", "めい", "first", "firstname", "given", "given_name", "forename"];
            if field_type != SplitFieldType::Name {
                surname.extend(["セイ", "sei"]);
                given.extend(["メイ", "mei"]);
            }
            let first_ok = surname.iter().any(|k| first_blob.contains(&k.to_lowercase()));
            let second_ok = given.iter().any(|k| second_blob.contains(&k.to_lowercase()));
            first_ok && second_ok
        }
        SplitFieldType::Address => {
            // The leading member should look like the prefecture line.
            members
                .first()
                .map(|m| {
                    let blob = m.text_blob();
                    ["都道府県", "prefecture", "県", "都", "府"]
                        .iter()
                        .any(|k| blob.contains(&k.to_lowercase()))
                })
                .unwrap_or(false)
        }
        SplitFieldType::Phone => members
            .first()
            .map(|m| {
                let blob = m.text_blob();
                ["市外局番", "area", "局番1", "tel1", "phone1", "tel_1"]
                    .iter()
                    .any(|k| blob.contains(&k.to_lowercase()))
            })
            .unwrap_or(false),
        _ => true,
    }
}

fn keyword_score(field_type: SplitFieldType, members: &[SplitMember]) -> f64 {
    let required = detection_keywords(field_type);
    if members.is_empty() {
        return 0.0;
    }
    let total: f64 = members
        .iter()
        .map(|m| {
            let blob = m.text_blob();
            let exact = required
                .iter()
                .filter(|k| blob.contains(&k.to_lowercase()))
                .count() as f64;
            let score = exact / required.len() as f64;
            if exact == 0.0 {
                0.25
            } else {
                score.min(1.0)
            }
        })
        .sum();
    total / members.len() as f64
}

fn context_quality(members: &[SplitMember], field_type: SplitFieldType) -> f64 {
    let required = detection_keywords(field_type);
    let total: f64 = members
        .iter()
        .map(|m| {
            if m.contexts.is_empty() {
                return 0.2;
            }
            m.contexts
                .iter()
                .map(|c| {
                    let text = c.text.to_lowercase();
                    let pattern_match = if required.iter().any(|k| text.contains(&k.to_lowercase()))
                    {
                        1.0
                    } else {
                        0.3
                    };
                    c.confidence * c.source.weight() * pattern_match
                })
                .fold(0.0_f64, f64::max)
        })
        .sum();
    if members.is_empty() {
        0.0
    } else {
        total / members.len() as f64
    }
}

/// Confidence: field-count fit + context quality + sequence validity +
/// keyword match, clamped and floored at 0.45.
fn pattern_confidence(
    field_type: SplitFieldType,
    members: &[SplitMember],
    sequence_valid: bool,
) -> f64 {
    let mut confidence: f64 = 0.35;
    let count = members.len();
    confidence += match (field_type, count) {
        (SplitFieldType::Address, 2) => 0.25,
        (SplitFieldType::Address, 3) => 0.20,
        (SplitFieldType::Address, 4) => 0.15,
        (SplitFieldType::Address, 5) => 0.10,
        (SplitFieldType::Address, _) => -0.10,
        (SplitFieldType::Phone, 3) => 0.30,
        (SplitFieldType::Phone, 2) => 0.20,
        (SplitFieldType::Phone, _) => -0.10,
        (_, 2) => 0.35,
        (_, 3) => 0.20,
        (_, 4) => 0.10,
        _ => -0.15,
    };
    confidence += context_quality(members, field_type) * 0.25;
    confidence += if sequence_valid { 0.15 } else { -0.25 };
    confidence += keyword_score(field_type, members) * 0.15;
    let clamped = confidence.clamp(0.0, 1.0);
    if clamped >= CONFIDENCE_FLOOR {
        clamped
    } else {
        0.0
    }
}

const SPLIT_INDICATORS: &[&str] = &[
    "それぞれ",
    "それぞれ入力",
    "各項目",
    "各フィールド",
    "各入力欄",
    "individually",
    "separately",
    "each field",
    "分けて入力",
    "個別に",
    "別々に",
];
const COMBINE_INDICATORS: &[&str] = &[
    "一度に",
    "一括で",
    "まとめて",
    "続けて入力",
    "連続して",
    "combined",
    "together",
    "as one",
    "ハイフンなし",
    "ハイフンを除く",
    "スペースなし",
    "連結して",
];
const UNIFIED_FIELD_HINTS: &[&str] = &[
    "フルネーム",
    "full name",
    "氏名",
    "お名前",
    "完全な住所",
    "full address",
    "住所全体",
    "電話番号全体",
    "phone number",
];

/// Pick the input strategy from designer-intent wording, unified hints and
/// field-family tendencies.
fn determine_strategy(
    field_type: SplitFieldType,
    members: &[SplitMember],
) -> (InputStrategy, f64) {
    let blob: String = members
        .iter()
        .map(|m| m.text_blob())
        .collect::<Vec<_>>()
        .join(" ");
    let mut split_score: f64 = 0.0;
    let mut combine_score: f64 = 0.0;
    if SPLIT_INDICATORS.iter().any(|k| blob.contains(&k.to_lowercase())) {
        split_score += 0.4;
    }
    if COMBINE_INDICATORS.iter().any(|k| blob.contains(&k.to_lowercase())) {
        combine_score += 0.4;
    }
    if UNIFIED_FIELD_HINTS.iter().any(|k| blob.contains(&k.to_lowercase())) {
        combine_score += 0.5;
    } else {
        split_score += 0.3;
    }
    match members.len() {
        n if n >= 3 => split_score += 0.2,
        2 => {
            split_score += 0.1;
            combine_score += 0.1;
        }
        _ => {}
    }
    let tendency_split = match field_type {
        SplitFieldType::Phone | SplitFieldType::Address => members.len() >= 3,
        SplitFieldType::Name | SplitFieldType::NameHiragana | SplitFieldType::NameKana => {
            members.len() != 2
        }
        SplitFieldType::Email => true,
        SplitFieldType::PostalCode => false,
    };
    if tendency_split {
        split_score += 0.2;
    } else {
        combine_score += 0.2;
    }
    if split_score > combine_score {
        (InputStrategy::Split, split_score.min(0.95))
    } else {
        (InputStrategy::Combine, combine_score.min(0.95))
    }
}

/// Detect split groups among the mapped fields. `input_order` is the
/// form's input-only selector order.
pub fn detect_split_groups(
    mappings: &[SplitMember],
    field_types: &HashMap<String, SplitFieldType>,
    input_order: &[&str],
) -> Vec<SplitFieldGroup> {
    let mut by_type: HashMap<SplitFieldType, Vec<SplitMember>> = HashMap::new();
    for m in mappings {
        if let Some(t) = field_types.get(&m.field) {
            by_type.entry(*t).or_default().push(m.clone());
        }
    }

    let mut groups = Vec::new();
    for (field_type, mut members) in by_type {
        if members.len() < 2 {
            continue;
        }
        if members.len() > max_fields(field_type) + 2 {
            continue;
        }
        // Members sort into input order before validation.
        members.sort_by_key(|m| {
            input_order
                .iter()
                .position(|s| *s == m.selector)
                .unwrap_or(usize::MAX)
        });
        let Some(pattern) = pattern_for_count(field_type, members.len()) else {
            continue;
        };
        let contiguous = contiguous_in_input_order(&members, input_order);
        let sequence_valid = contiguous && type_sequence_valid(field_type, &members);
        // Name splits are all-or-nothing on sequence evidence.
        if matches!(
            field_type,
            SplitFieldType::Name | SplitFieldType::NameHiragana | SplitFieldType::NameKana
        ) && !sequence_valid
        {
            continue;
        }
        if !contiguous {
            continue;
        }
        let confidence = pattern_confidence(field_type, &members, sequence_valid);
        if confidence < CONFIDENCE_FLOOR {
            continue;
        }
        let (strategy, strategy_confidence) = determine_strategy(field_type, &members);
        groups.push(SplitFieldGroup {
            pattern,
            field_type,
            members,
            confidence,
            sequence_valid,
            strategy,
            strategy_confidence,
        });
    }
    groups.sort_by_key(|g| {
        g.members
            .first()
            .and_then(|m| input_order.iter().position(|s| *s == m.selector))
            .unwrap_or(usize::MAX)
    });
    groups
}

/// Generate per-field values for the detected groups. A lone member of a
/// conceptually multipart family receives the full combined value.
pub fn generate_group_assignments(
    groups: &[SplitFieldGroup],
    client: &ClientInfo,
) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for group in groups {
        if group.members.len() == 1 {
            let value = match group.field_type {
                SplitFieldType::Phone => combination::phone(client),
                SplitFieldType::PostalCode => combination::postal_code(client),
                SplitFieldType::Address => combination::address(client),
                _ => continue,
            };
            out.insert(group.members[0].field.clone(), value);
            continue;
        }
        let parts: Vec<String> = match (group.field_type, group.strategy) {
            (SplitFieldType::Phone, InputStrategy::Split) => vec![
                client.phone_1.clone(),
                client.phone_2.clone(),
                client.phone_3.clone(),
            ],
            (SplitFieldType::Phone, InputStrategy::Combine) => match group.pattern {
                // [area+city][subscriber]
                SplitPattern::Phone2Split => vec![
                    format!("{}{}", client.phone_1.trim(), client.phone_2.trim()),
                    client.phone_3.clone(),
                ],
                _ => vec![
                    client.phone_1.clone(),
                    client.phone_2.clone(),
                    client.phone_3.clone(),
                ],
            },
            (SplitFieldType::PostalCode, _) => {
                vec![client.postal_code_1.clone(), client.postal_code_2.clone()]
            }
            (SplitFieldType::Email, _) => vec![client.email_1.clone(), client.email_2.clone()],
            (SplitFieldType::Name, _) => {
                vec![client.last_name.clone(), client.first_name.clone()]
            }
            (SplitFieldType::NameKana, _) => {
                vec![client.last_name_kana.clone(), client.first_name_kana.clone()]
            }
            (SplitFieldType::NameHiragana, _) => vec![
                client.last_name_hiragana.clone(),
                client.first_name_hiragana.clone(),
            ],
            (SplitFieldType::Address, _) => match group.pattern {
                // [1..4][5]
                SplitPattern::Address2Split => vec![
                    format!(
                        "{}{}{}{}",
                        client.address_1.trim(),
                        client.address_2.trim(),
                        client.address_3.trim(),
                        client.address_4.trim()
                    ),
                    client.address_5.clone(),
                ],
                // [1][2..4][5]
                SplitPattern::Address3Split => vec![
                    client.address_1.clone(),
                    format!(
                        "{}{}{}",
                        client.address_2.trim(),
                        client.address_3.trim(),
                        client.address_4.trim()
                    ),
                    client.address_5.clone(),
                ],
                // [1][2][3+4][5]
                _ => vec![
                    client.address_1.clone(),
                    client.address_2.clone(),
                    format!("{}{}", client.address_3.trim(), client.address_4.trim()),
                    client.address_5.clone(),
                ],
            },
        };
        for (member, part) in group.members.iter().zip(parts.iter()) {
            let value = part.trim();
            if !value.is_empty() {
                out.insert(member.field.clone(), value.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::context_text::ContextSource;
    use crate::config::TenantConfig;
    use pretty_assertions::assert_eq;

    fn member(field: &str, selector: &str, label: &str) -> SplitMember {
        SplitMember {
            field: field.into(),
            selector: selector.into(),
            contexts: vec![ContextCandidate {
                text: label.into(),
                source: ContextSource::Label,
                confidence: 1.0,
            }],
        }
    }

    fn phone_members() -> Vec<SplitMember> {
        vec![
            member(keys::PHONE_1, "input[name=\"tel1\"]", "電話番号（市外局番）"),
            member(keys::PHONE_2, "input[name=\"tel2\"]", "電話番号"),
            member(keys::PHONE_3, "input[name=\"tel3\"]", "電話番号"),
        ]
    }

    fn phone_types() -> HashMap<String, SplitFieldType> {
        [
            (keys::PHONE_1.to_string(), SplitFieldType::Phone),
            (keys::PHONE_2.to_string(), SplitFieldType::Phone),
            (keys::PHONE_3.to_string(), SplitFieldType::Phone),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_phone_three_split_detected() {
        let order = vec![
            "input[name=\"tel1\"]",
            "input[name=\"tel2\"]",
            "input[name=\"tel3\"]",
        ];
        let groups = detect_split_groups(&phone_members(), &phone_types(), &order);
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.pattern, SplitPattern::Phone3Split);
        assert!(g.confidence >= 0.45);
        assert_eq!(g.strategy, InputStrategy::Split);
    }

    #[test]
    fn test_non_contiguous_group_rejected() {
        // Another input sits between tel2 and tel3.
        let order = vec![
            "input[name=\"tel1\"]",
            "input[name=\"tel2\"]",
            "input[name=\"email\"]",
            "input[name=\"tel3\"]",
        ];
        let groups = detect_split_groups(&phone_members(), &phone_types(), &order);
        assert!(groups.is_empty());
    }

    #[test]
    fn test_name_split_requires_label_evidence() {
        let order = vec!["input[name=\"a\"]", "input[name=\"b\"]"];
        let members = vec![
            member(keys::LAST_NAME, "input[name=\"a\"]", "ご住所"),
            member(keys::FIRST_NAME, "input[name=\"b\"]", "建物名"),
        ];
        let types: HashMap<_, _> = [
            (keys::LAST_NAME.to_string(), SplitFieldType::Name),
            (keys::FIRST_NAME.to_string(), SplitFieldType::Name),
        ]
        .into_iter()
        .collect();
        assert!(detect_split_groups(&members, &types, &order).is_empty());

        let members = vec![
            member(keys::LAST_NAME, "input[name=\"a\"]", "姓"),
            member(keys::FIRST_NAME, "input[name=\"b\"]", "名"),
        ];
        let groups = detect_split_groups(&members, &types, &order);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].pattern, SplitPattern::Name2Split);
    }

    #[test]
    fn test_company_name_vetoes_name_split() {
        let order = vec!["input[name=\"a\"]", "input[name=\"b\"]"];
        let members = vec![
            member(keys::LAST_NAME, "input[name=\"a\"]", "会社名（姓）"),
            member(keys::FIRST_NAME, "input[name=\"b\"]", "名"),
        ];
        let types: HashMap<_, _> = [
            (keys::LAST_NAME.to_string(), SplitFieldType::Name),
            (keys::FIRST_NAME.to_string(), SplitFieldType::Name),
        ]
        .into_iter()
        .collect();
        assert!(detect_split_groups(&members, &types, &order).is_empty());
    }

    #[test]
    fn test_members_sorted_into_input_order() {
        let order = vec!["input[name=\"tel1\"]", "input[name=\"tel2\"]", "input[name=\"tel3\"]"];
        let mut members = phone_members();
        members.reverse();
        let groups = detect_split_groups(&members, &phone_types(), &order);
        assert_eq!(groups[0].members[0].field, keys::PHONE_1);
        assert_eq!(groups[0].members[2].field, keys::PHONE_3);
    }

    #[test]
    fn test_split_assignment_values() {
        let client = TenantConfig::sample().client;
        let order = vec!["input[name=\"tel1\"]", "input[name=\"tel2\"]", "input[name=\"tel3\"]"];
        let groups = detect_split_groups(&phone_members(), &phone_types(), &order);
        let values = generate_group_assignments(&groups, &client);
        assert_eq!(values[keys::PHONE_1], "03");
        assert_eq!(values[keys::PHONE_2], "6825");
        assert_eq!(values[keys::PHONE_3], "0324");
    }

    #[test]
    fn test_lone_multipart_field_gets_combined_value() {
        let client = TenantConfig::sample().client;
        let group = SplitFieldGroup {
            pattern: SplitPattern::Phone3Split,
            field_type: SplitFieldType::Phone,
            members: vec![member(keys::PHONE, "input[name=\"tel\"]", "電話番号")],
            confidence: 0.6,
            sequence_valid: true,
            strategy: InputStrategy::Combine,
            strategy_confidence: 0.5,
        };
        let values = generate_group_assignments(&[group], &client);
        assert_eq!(values[keys::PHONE], "0368250324");
    }

    #[test]
    fn test_identify_field_type() {
        assert_eq!(identify_field_type(keys::LAST_NAME, &[]), Some(SplitFieldType::Name));
        assert_eq!(identify_field_type(keys::EMAIL, &[]), Some(SplitFieldType::Email));
        assert_eq!(
            identify_field_type(keys::POSTAL_CODE_1, &[]),
            Some(SplitFieldType::PostalCode)
        );
        assert_eq!(identify_field_type(keys::COMPANY_NAME, &[]), None);
    }
}
