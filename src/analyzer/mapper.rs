//! Field mapping: best-candidate selection plus the name/kana/postal
//! post-processing passes.
//!
//! Every canonical field maps to at most one element. Candidates below the
//! per-field floor, flagged excluded, or already claimed never map. The
//! post passes clean up the classic failure modes: unified-vs-split name
//! duplication, reading-script mixups, swapped sei/mei pairs, and zip pairs
//! that deserve a postal split.

use crate::analyzer::context_text::{ContextCandidate, ContextIndex};
use crate::analyzer::patterns::{self, keys, CATALOG};
use crate::analyzer::preprocess::UnifiedFieldInfo;
use crate::analyzer::scorer::{rank_candidates, ScoreDetails, ScorerSettings};
use crate::analyzer::structure::{ElementInfo, FormSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Normalized input kind of a mapped control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Email,
    Tel,
    Url,
    Number,
    Password,
    Textarea,
    Select,
    Checkbox,
    Radio,
}

impl InputKind {
    pub fn from_element(el: &ElementInfo) -> Self {
        match el.tag.as_str() {
            "textarea" => Self::Textarea,
            "select" => Self::Select,
            _ => match el.type_attr.as_str() {
                "email" | "mail" => Self::Email,
                "tel" => Self::Tel,
                "url" => Self::Url,
                "number" => Self::Number,
                "password" => Self::Password,
                "checkbox" => Self::Checkbox,
                "radio" => Self::Radio,
                _ => Self::Text,
            },
        }
    }

    pub fn is_text_like(&self) -> bool {
        matches!(
            self,
            Self::Text | Self::Email | Self::Tel | Self::Url | Self::Number | Self::Password | Self::Textarea
        )
    }
}

/// Automatic handling directive carried on a mapping/assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoAction {
    Fill,
    SelectByAlgorithm,
    SelectIndex,
    CopyFrom,
    Default,
}

/// One canonical field mapped to a concrete element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field: String,
    pub element_index: usize,
    pub selector: String,
    pub input_kind: InputKind,
    pub score: i32,
    pub details: ScoreDetails,
    pub required: bool,
    pub name: String,
    pub id: String,
    pub class_name: String,
    pub placeholder: String,
    pub label_text: String,
    pub best_context: Option<String>,
    pub contexts: Vec<ContextCandidate>,
    /// Pre-computed value, filled by the assigner
    pub value: Option<String>,
    pub auto_action: Option<AutoAction>,
    pub copy_from: Option<String>,
    pub selected_index: Option<usize>,
}

impl FieldMapping {
    pub fn from_element(
        field: &str,
        el: &ElementInfo,
        details: ScoreDetails,
        contexts: &ContextIndex,
    ) -> Self {
        Self {
            field: field.to_string(),
            element_index: el.index,
            selector: el.selector.clone(),
            input_kind: InputKind::from_element(el),
            score: details.total,
            details,
            required: el.required,
            name: el.name.clone(),
            id: el.id.clone(),
            class_name: el.class_name.clone(),
            placeholder: el.placeholder.clone(),
            label_text: el.label_text.clone(),
            best_context: contexts.best_context(el.index).map(|s| s.to_string()),
            contexts: contexts.contexts(el.index).to_vec(),
            value: None,
            auto_action: None,
            copy_from: None,
            selected_index: None,
        }
    }

    /// name/id/class/selector joined, lowercased.
    pub fn attr_blob(&self) -> String {
        format!("{} {} {} {}", self.selector, self.name, self.id, self.class_name).to_lowercase()
    }
}

/// The mapping result keyed by canonical field.
pub type Mapping = HashMap<String, FieldMapping>;

/// Run the catalog over the classified elements and claim the best
/// candidate per field.
pub fn execute_field_mapping(
    snapshot: &FormSnapshot,
    contexts: &ContextIndex,
    unified: &UnifiedFieldInfo,
    settings: &ScorerSettings,
) -> Mapping {
    let mut mapping: Mapping = HashMap::new();
    let mut claimed: HashSet<usize> = HashSet::new();

    for pattern in CATALOG {
        // Split evidence suppresses the unified name variants up front.
        if pattern.key == keys::FULL_NAME && unified.has_name_split_fields {
            continue;
        }
        if matches!(pattern.key, keys::FULL_NAME_KANA | keys::FULL_NAME_HIRAGANA)
            && unified.has_name_kana_split_fields
        {
            continue;
        }
        // The per-field floor already encodes the global default.
        let floor = patterns::min_score_for(pattern.key);
        let ranked = rank_candidates(pattern, &snapshot.elements, contexts, settings);
        for candidate in ranked {
            if claimed.contains(&candidate.element_index) {
                continue;
            }
            if candidate.details.total < floor {
                break;
            }
            let el = &snapshot.elements[candidate.element_index];
            mapping.insert(
                pattern.key.to_string(),
                FieldMapping::from_element(pattern.key, el, candidate.details, contexts),
            );
            claimed.insert(candidate.element_index);
            break;
        }
    }
    mapping
}

/// Drop split last/first when a unified full name is mapped, and drop the
/// unified one when both splits are mapped (splits win).
pub fn reconcile_unified_and_split_names(mapping: &mut Mapping) {
    for (unified, last, first) in [
        (keys::FULL_NAME, keys::LAST_NAME, keys::FIRST_NAME),
        (keys::FULL_NAME_KANA, keys::LAST_NAME_KANA, keys::FIRST_NAME_KANA),
        (
            keys::FULL_NAME_HIRAGANA,
            keys::LAST_NAME_HIRAGANA,
            keys::FIRST_NAME_HIRAGANA,
        ),
    ] {
        if mapping.contains_key(last) && mapping.contains_key(first) {
            mapping.remove(unified);
        } else if mapping.contains_key(unified) {
            mapping.remove(last);
            mapping.remove(first);
        }
    }
}

const SUSPECT_NAME_CONTEXT: &[&str] = &[
    "住所",
    "マンション名",
    "建物名",
    "ふりがな",
    "フリガナ",
    "カナ",
    "かな",
    "ひらがな",
    "郵便",
    "郵便番号",
    "商品名",
    "部署",
    "部署名",
];
const SUSPECT_NAME_ATTRS: &[&str] = &["kana", "furigana", "katakana", "hiragana"];

/// Prune last/first mappings whose context or attributes read as something
/// other than a person-name input.
pub fn prune_suspect_name_mappings(mapping: &mut Mapping) {
    for key in [keys::LAST_NAME, keys::FIRST_NAME] {
        let Some(m) = mapping.get(key) else { continue };
        let ctx = m.best_context.clone().unwrap_or_default();
        let blob = m.attr_blob();
        let suspect = SUSPECT_NAME_CONTEXT.iter().any(|t| ctx.contains(t))
            || SUSPECT_NAME_ATTRS.iter().any(|t| blob.contains(t));
        if suspect {
            mapping.remove(key);
        }
    }
}

fn swap_fields(mapping: &mut Mapping, a: &str, b: &str) {
    if mapping.contains_key(a) && mapping.contains_key(b) {
        let mut ma = mapping.remove(a).unwrap();
        let mut mb = mapping.remove(b).unwrap();
        std::mem::swap(&mut ma.field, &mut mb.field);
        mapping.insert(a.to_string(), mb);
        mapping.insert(b.to_string(), ma);
    }
}

/// Correct swapped last/first pairs using attribute tokens, then context
/// text, then placeholders, covering kanji, katakana and hiragana variants.
pub fn fix_name_mapping_mismatch(mapping: &mut Mapping) {
    let blob = |key: &str, mapping: &Mapping| -> String {
        mapping.get(key).map(|m| m.attr_blob()).unwrap_or_default()
    };
    let ctx = |key: &str, mapping: &Mapping| -> String {
        mapping
            .get(key)
            .and_then(|m| m.best_context.clone())
            .unwrap_or_default()
            .to_lowercase()
    };
    let attr_mismatch = |sei: &str, mei: &str| -> bool {
        !sei.is_empty()
            && !mei.is_empty()
            && ((sei.contains("first") && mei.contains("last"))
                || (sei.contains("mei") && mei.contains("sei")))
    };

    // 1) Attribute-level mixups (sei holding first/mei tokens and vice versa)
    let sei_blob = blob(keys::LAST_NAME, mapping);
    let mei_blob = blob(keys::FIRST_NAME, mapping);
    if attr_mismatch(&sei_blob, &mei_blob) && !sei_blob.contains("kana") && !mei_blob.contains("kana")
    {
        swap_fields(mapping, keys::LAST_NAME, keys::FIRST_NAME);
    }

    // 2) Context/label mixups ("姓 / First Name" pairs)
    let sei_ctx = ctx(keys::LAST_NAME, mapping);
    let mei_ctx = ctx(keys::FIRST_NAME, mapping);
    if !sei_ctx.is_empty()
        && !mei_ctx.is_empty()
        && sei_ctx.contains("first")
        && mei_ctx.contains("last")
    {
        swap_fields(mapping, keys::LAST_NAME, keys::FIRST_NAME);
    }

    // 3) Kana attribute mixups
    let seik = blob(keys::LAST_NAME_KANA, mapping);
    let meik = blob(keys::FIRST_NAME_KANA, mapping);
    if !seik.is_empty()
        && !meik.is_empty()
        && seik.contains("mei")
        && meik.contains("sei")
        && seik.contains("kana")
        && meik.contains("kana")
    {
        swap_fields(mapping, keys::LAST_NAME_KANA, keys::FIRST_NAME_KANA);
    }
}

/// Placeholder-driven alignment: when both placeholders read as the other
/// side, swap. Applies to kanji, katakana and hiragana pairs.
pub fn align_names_by_placeholder(mapping: &mut Mapping) {
    let pl = |key: &str, mapping: &Mapping| -> String {
        mapping.get(key).map(|m| m.placeholder.clone()).unwrap_or_default()
    };
    let sei = pl(keys::LAST_NAME, mapping);
    let mei = pl(keys::FIRST_NAME, mapping);
    if !sei.is_empty() && !mei.is_empty() {
        let sei_l = sei.to_lowercase();
        let mei_l = mei.to_lowercase();
        let sei_has_mei = sei.contains('名') || sei_l.contains("first name") || sei_l.contains("given name");
        let mei_has_sei = mei.contains('姓') || mei_l.contains("last name") || mei_l.contains("family name");
        if sei_has_mei && mei_has_sei {
            swap_fields(mapping, keys::LAST_NAME, keys::FIRST_NAME);
        }
    }
    let seik = pl(keys::LAST_NAME_KANA, mapping);
    let meik = pl(keys::FIRST_NAME_KANA, mapping);
    if !seik.is_empty()
        && !meik.is_empty()
        && (seik.contains("メイ") || seik.contains('名'))
        && (meik.contains("セイ") || meik.contains('姓'))
    {
        swap_fields(mapping, keys::LAST_NAME_KANA, keys::FIRST_NAME_KANA);
    }
    let seih = pl(keys::LAST_NAME_HIRAGANA, mapping);
    let meih = pl(keys::FIRST_NAME_HIRAGANA, mapping);
    if !seih.is_empty()
        && !meih.is_empty()
        && (seih.contains("めい") || seih.contains('名'))
        && (meih.contains("せい") || meih.contains('姓'))
    {
        swap_fields(mapping, keys::LAST_NAME_HIRAGANA, keys::FIRST_NAME_HIRAGANA);
    }
}

fn reads_hiragana(m: &FieldMapping) -> bool {
    let blob = format!("{} {}", m.attr_blob(), m.placeholder);
    (blob.contains("ひらがな") || blob.contains("ふりがな") || blob.contains("hiragana"))
        && !(blob.contains("カナ") || blob.contains("カタカナ") || blob.contains("katakana"))
}

fn reads_katakana(m: &FieldMapping) -> bool {
    let blob = format!("{} {}", m.attr_blob(), m.placeholder);
    blob.contains("カナ") || blob.contains("カタカナ") || blob.contains("フリガナ") || blob.contains("katakana")
}

/// Relabel kana mappings whose attributes actually indicate hiragana (and
/// the reverse), then let a hiragana split pair suppress the unified kana.
pub fn normalize_kana_hiragana_fields(mapping: &mut Mapping) {
    for (kana_key, hira_key) in [
        (keys::LAST_NAME_KANA, keys::LAST_NAME_HIRAGANA),
        (keys::FIRST_NAME_KANA, keys::FIRST_NAME_HIRAGANA),
    ] {
        let kana_is_hira = mapping.get(kana_key).map(reads_hiragana).unwrap_or(false);
        if kana_is_hira && !mapping.contains_key(hira_key) {
            if let Some(mut m) = mapping.remove(kana_key) {
                m.field = hira_key.to_string();
                mapping.insert(hira_key.to_string(), m);
            }
        }
        let hira_is_kata = mapping.get(hira_key).map(reads_katakana).unwrap_or(false);
        if hira_is_kata && !mapping.contains_key(kana_key) {
            if let Some(mut m) = mapping.remove(hira_key) {
                m.field = kana_key.to_string();
                mapping.insert(kana_key.to_string(), m);
            }
        }
    }
    if mapping.contains_key(keys::LAST_NAME_HIRAGANA) && mapping.contains_key(keys::FIRST_NAME_HIRAGANA)
    {
        mapping.remove(keys::FULL_NAME_KANA);
    }
}

const POSTAL_PROMOTION_TOKENS: &[&str] = &[
    "zip",
    "zipcode",
    "zip_code",
    "zip-code",
    "postal",
    "postalcode",
    "postal_code",
    "post_code",
    "post-code",
    "postcode",
    "郵便",
    "郵便番号",
    "〒",
    "上3桁",
    "下4桁",
    "前3桁",
    "後4桁",
    "yubin",
    "yuubin",
];

/// Promote two near-consecutive zip-like text inputs (≤2 apart in input
/// order) to postal_code_1/2, only when at least one is required.
pub fn auto_promote_postal_split(
    mapping: &mut Mapping,
    snapshot: &FormSnapshot,
    contexts: &ContextIndex,
) {
    if mapping.contains_key(keys::POSTAL_CODE_1) && mapping.contains_key(keys::POSTAL_CODE_2) {
        return;
    }
    let input_order = snapshot.input_order();
    let mut candidates: Vec<(usize, &ElementInfo)> = Vec::new();
    for el in &snapshot.elements {
        if el.tag != "input" || !matches!(el.type_attr.as_str(), "" | "text" | "tel") {
            continue;
        }
        let Some(order_idx) = input_order.iter().position(|s| *s == el.selector) else {
            continue;
        };
        let blob = el.full_blob();
        let has_postal = POSTAL_PROMOTION_TOKENS
            .iter()
            .any(|t| blob.contains(&t.to_lowercase()));
        let address_like = ["address", "addr", "住所"].iter().any(|t| blob.contains(t)) && !has_postal;
        if has_postal && !address_like {
            candidates.push((order_idx, el));
        }
    }
    if candidates.len() < 2 {
        return;
    }
    candidates.sort_by_key(|(idx, _)| *idx);
    let pair = candidates
        .windows(2)
        .find(|w| w[1].0 - w[0].0 <= 2)
        .map(|w| (w[0].1, w[1].1));
    let Some((first, second)) = pair else { return };
    if !(first.required || second.required) {
        return;
    }
    // An existing unified postal mapping pointing at either member yields to
    // the split pair.
    if let Some(unified) = mapping.get(keys::POSTAL_CODE) {
        if unified.selector == first.selector || unified.selector == second.selector {
            mapping.remove(keys::POSTAL_CODE);
        }
    }
    for (key, el) in [(keys::POSTAL_CODE_1, first), (keys::POSTAL_CODE_2, second)] {
        mapping.insert(
            key.to_string(),
            FieldMapping::from_element(key, el, ScoreDetails::default(), contexts),
        );
    }
}

/// Remove mappings with negative scores or the excluded flag; downstream
/// code relies on this guarantee.
pub fn sanitize_mapping(mapping: &mut Mapping) {
    mapping.retain(|_, m| !m.details.excluded && m.score >= 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mapping_entry(field: &str, selector: &str) -> FieldMapping {
        FieldMapping {
            field: field.into(),
            element_index: 0,
            selector: selector.into(),
            input_kind: InputKind::Text,
            score: 80,
            details: ScoreDetails {
                total: 80,
                ..Default::default()
            },
            required: false,
            name: String::new(),
            id: String::new(),
            class_name: String::new(),
            placeholder: String::new(),
            label_text: String::new(),
            best_context: None,
            contexts: Vec::new(),
            value: None,
            auto_action: None,
            copy_from: None,
            selected_index: None,
        }
    }

    #[test]
    fn test_splits_win_over_unified() {
        let mut mapping: Mapping = HashMap::new();
        mapping.insert(keys::LAST_NAME.into(), mapping_entry(keys::LAST_NAME, "#sei"));
        mapping.insert(keys::FIRST_NAME.into(), mapping_entry(keys::FIRST_NAME, "#mei"));
        mapping.insert(keys::FULL_NAME.into(), mapping_entry(keys::FULL_NAME, "#name"));
        reconcile_unified_and_split_names(&mut mapping);
        assert!(!mapping.contains_key(keys::FULL_NAME));
        assert!(mapping.contains_key(keys::LAST_NAME));
    }

    #[test]
    fn test_unified_evicts_lone_split() {
        let mut mapping: Mapping = HashMap::new();
        mapping.insert(keys::FULL_NAME.into(), mapping_entry(keys::FULL_NAME, "#name"));
        mapping.insert(keys::LAST_NAME.into(), mapping_entry(keys::LAST_NAME, "#sei"));
        reconcile_unified_and_split_names(&mut mapping);
        assert!(mapping.contains_key(keys::FULL_NAME));
        assert!(!mapping.contains_key(keys::LAST_NAME));
    }

    #[test]
    fn test_suspect_name_context_pruned() {
        let mut mapping: Mapping = HashMap::new();
        let mut bad = mapping_entry(keys::FIRST_NAME, "#addr2");
        bad.best_context = Some("マンション名・部屋番号".into());
        mapping.insert(keys::FIRST_NAME.into(), bad);
        prune_suspect_name_mappings(&mut mapping);
        assert!(mapping.is_empty());
    }

    #[test]
    fn test_kana_attr_pruned_from_kanji_name() {
        let mut mapping: Mapping = HashMap::new();
        let mut bad = mapping_entry(keys::LAST_NAME, "#sei_kana");
        bad.name = "sei_kana".into();
        mapping.insert(keys::LAST_NAME.into(), bad);
        prune_suspect_name_mappings(&mut mapping);
        assert!(mapping.is_empty());
    }

    #[test]
    fn test_attr_swap_fix() {
        let mut mapping: Mapping = HashMap::new();
        let mut sei = mapping_entry(keys::LAST_NAME, "#mei");
        sei.name = "mei".into();
        let mut mei = mapping_entry(keys::FIRST_NAME, "#sei");
        mei.name = "sei".into();
        mapping.insert(keys::LAST_NAME.into(), sei);
        mapping.insert(keys::FIRST_NAME.into(), mei);
        fix_name_mapping_mismatch(&mut mapping);
        assert_eq!(mapping[keys::LAST_NAME].selector, "#sei");
        assert_eq!(mapping[keys::FIRST_NAME].selector, "#mei");
    }

    #[test]
    fn test_placeholder_swap_fix() {
        let mut mapping: Mapping = HashMap::new();
        let mut sei = mapping_entry(keys::LAST_NAME, "#a");
        sei.placeholder = "名（First Name）".into();
        let mut mei = mapping_entry(keys::FIRST_NAME, "#b");
        mei.placeholder = "姓（Last Name）".into();
        mapping.insert(keys::LAST_NAME.into(), sei);
        mapping.insert(keys::FIRST_NAME.into(), mei);
        align_names_by_placeholder(&mut mapping);
        assert_eq!(mapping[keys::LAST_NAME].selector, "#b");
        assert_eq!(mapping[keys::FIRST_NAME].selector, "#a");
    }

    #[test]
    fn test_kana_field_relabeled_hiragana() {
        let mut mapping: Mapping = HashMap::new();
        let mut kana = mapping_entry(keys::LAST_NAME_KANA, "#sei_hira");
        kana.placeholder = "ひらがなで入力".into();
        mapping.insert(keys::LAST_NAME_KANA.into(), kana);
        normalize_kana_hiragana_fields(&mut mapping);
        assert!(!mapping.contains_key(keys::LAST_NAME_KANA));
        assert!(mapping.contains_key(keys::LAST_NAME_HIRAGANA));
    }

    #[test]
    fn test_hiragana_split_suppresses_unified_kana() {
        let mut mapping: Mapping = HashMap::new();
        mapping.insert(
            keys::LAST_NAME_HIRAGANA.into(),
            mapping_entry(keys::LAST_NAME_HIRAGANA, "#a"),
        );
        mapping.insert(
            keys::FIRST_NAME_HIRAGANA.into(),
            mapping_entry(keys::FIRST_NAME_HIRAGANA, "#b"),
        );
        mapping.insert(
            keys::FULL_NAME_KANA.into(),
            mapping_entry(keys::FULL_NAME_KANA, "#c"),
        );
        normalize_kana_hiragana_fields(&mut mapping);
        assert!(!mapping.contains_key(keys::FULL_NAME_KANA));
    }

    fn zip_element(index: usize, name: &str, required: bool) -> ElementInfo {
        ElementInfo {
            index,
            tag: "input".into(),
            type_attr: "text".into(),
            name: name.into(),
            selector: format!("input[name=\"{name}\"]"),
            required,
            visible: true,
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_postal_promotion_requires_required_flag() {
        let snapshot = FormSnapshot {
            elements: vec![zip_element(0, "zip1", false), zip_element(1, "zip2", false)],
            ..Default::default()
        };
        let contexts = ContextIndex::build(&snapshot.elements);
        let mut mapping: Mapping = HashMap::new();
        auto_promote_postal_split(&mut mapping, &snapshot, &contexts);
        assert!(mapping.is_empty());

        let snapshot = FormSnapshot {
            elements: vec![zip_element(0, "zip1", true), zip_element(1, "zip2", false)],
            ..Default::default()
        };
        let contexts = ContextIndex::build(&snapshot.elements);
        auto_promote_postal_split(&mut mapping, &snapshot, &contexts);
        assert!(mapping.contains_key(keys::POSTAL_CODE_1));
        assert!(mapping.contains_key(keys::POSTAL_CODE_2));
    }

    #[test]
    fn test_postal_promotion_replaces_unified() {
        let snapshot = FormSnapshot {
            elements: vec![zip_element(0, "zip1", true), zip_element(1, "zip2", true)],
            ..Default::default()
        };
        let contexts = ContextIndex::build(&snapshot.elements);
        let mut mapping: Mapping = HashMap::new();
        mapping.insert(
            keys::POSTAL_CODE.into(),
            mapping_entry(keys::POSTAL_CODE, "input[name=\"zip1\"]"),
        );
        auto_promote_postal_split(&mut mapping, &snapshot, &contexts);
        assert!(!mapping.contains_key(keys::POSTAL_CODE));
        assert!(mapping.contains_key(keys::POSTAL_CODE_1));
    }

    #[test]
    fn test_sanitize_drops_excluded() {
        let mut mapping: Mapping = HashMap::new();
        let mut bad = mapping_entry(keys::EMAIL, "#x");
        bad.details.excluded = true;
        bad.score = -100;
        mapping.insert(keys::EMAIL.into(), bad);
        sanitize_mapping(&mut mapping);
        assert!(mapping.is_empty());
    }
}
