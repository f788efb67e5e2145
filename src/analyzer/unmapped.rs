//! Unmapped-element handling.
//!
//! After field mapping, the remaining controls get auto-handled
//! assignments: privacy/consent checkboxes, email-confirmation copies,
//! required radio groups, required selects, and labeled fullname/kana
//! containers. Required fullname/kana/email-confirm entries are promoted
//! back into the main mapping so validation recognizes them.

use crate::analyzer::context_text::ContextIndex;
use crate::analyzer::mapper::{AutoAction, FieldMapping, InputKind, Mapping};
use crate::analyzer::patterns::{self, keys};
use crate::analyzer::preprocess::RequiredAnalysis;
use crate::analyzer::scorer::ScoreDetails;
use crate::analyzer::structure::{ElementInfo, FormSnapshot};
use crate::config::ChoicePriorityConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One auto-generated assignment for an element the mapper left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoHandledEntry {
    /// Generated field name, e.g. `auto_privacy_checkbox_1`
    pub field: String,
    pub selector: String,
    pub element_index: usize,
    pub input_kind: InputKind,
    pub auto_action: AutoAction,
    pub copy_from: Option<String>,
    /// Pre-computed value; checkboxes/radios use "true"
    pub value: Option<String>,
    pub required: bool,
    /// Display text of the chosen option, for radio/select picks
    pub selected_option_text: Option<String>,
    pub selected_index: Option<usize>,
}

fn privacy_like(blob: &str, config: &ChoicePriorityConfig) -> bool {
    config.privacy_keywords.iter().any(|k| blob.contains(&k.to_lowercase()))
}

fn has_agree_token(blob: &str, config: &ChoicePriorityConfig) -> bool {
    config.agree_tokens.iter().any(|k| blob.contains(&k.to_lowercase()))
}

fn has_negative_token(blob: &str, config: &ChoicePriorityConfig) -> bool {
    config.negative_tokens.iter().any(|k| blob.contains(&k.to_lowercase()))
}

/// Keyword-priority choice: business keywords, then "other", then
/// contains-contact, finally the last option.
pub fn choose_priority_index(texts: &[String], config: &ChoicePriorityConfig) -> usize {
    let last_match = |keywords: &[String]| -> Option<usize> {
        texts
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                let lower = t.to_lowercase();
                keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
            })
            .map(|(i, _)| i)
            .next_back()
    };
    last_match(&config.primary_keywords)
        .or_else(|| last_match(&config.secondary_keywords))
        .or_else(|| last_match(&config.tertiary_keywords))
        .unwrap_or(texts.len().saturating_sub(1))
}

/// Sweep unclaimed elements into auto-handled assignments.
pub fn handle_unmapped_elements(
    snapshot: &FormSnapshot,
    contexts: &ContextIndex,
    mapping: &Mapping,
    required: &RequiredAnalysis,
    config: &ChoicePriorityConfig,
) -> Vec<AutoHandledEntry> {
    let claimed: HashSet<usize> = mapping.values().map(|m| m.element_index).collect();
    let mut entries = Vec::new();
    let mut counter = 0usize;
    let mut next_name = |prefix: &str| {
        counter += 1;
        format!("auto_{prefix}_{counter}")
    };

    // Radio groups keyed by name (fallback id/class) are handled as units.
    let mut radio_groups: HashMap<String, Vec<&ElementInfo>> = HashMap::new();

    for el in &snapshot.elements {
        if claimed.contains(&el.index) || !el.is_fillable() || !el.visible || !el.enabled {
            continue;
        }
        let blob = format!("{} {}", el.full_blob(), contexts.context_blob(el.index));
        let kind = InputKind::from_element(el);
        match kind {
            InputKind::Checkbox => {
                if privacy_like(&blob, config)
                    && (has_agree_token(&blob, config) || el.required)
                    && !has_negative_token(&blob, config)
                {
                    entries.push(AutoHandledEntry {
                        field: next_name("privacy_checkbox"),
                        selector: el.selector.clone(),
                        element_index: el.index,
                        input_kind: kind,
                        auto_action: AutoAction::Default,
                        copy_from: None,
                        value: Some("true".into()),
                        required: el.required,
                        selected_option_text: None,
                        selected_index: None,
                    });
                }
            }
            InputKind::Radio => {
                let key = if !el.name.is_empty() {
                    el.name.clone()
                } else if !el.id.is_empty() {
                    el.id.clone()
                } else {
                    el.class_name.clone()
                };
                radio_groups.entry(key).or_default().push(el);
            }
            InputKind::Select => {
                if el.required || required.treat_all_as_required {
                    entries.push(AutoHandledEntry {
                        field: next_name("required_select"),
                        selector: el.selector.clone(),
                        element_index: el.index,
                        input_kind: kind,
                        auto_action: AutoAction::SelectByAlgorithm,
                        copy_from: None,
                        value: None,
                        required: true,
                        selected_option_text: None,
                        selected_index: None,
                    });
                }
            }
            InputKind::Email | InputKind::Text => {
                if patterns::is_email_confirmation(&blob) && mapping.contains_key(keys::EMAIL) {
                    entries.push(AutoHandledEntry {
                        field: next_name("email_confirm"),
                        selector: el.selector.clone(),
                        element_index: el.index,
                        input_kind: kind,
                        auto_action: AutoAction::CopyFrom,
                        copy_from: Some(keys::EMAIL.to_string()),
                        value: None,
                        required: el.required,
                        selected_option_text: None,
                        selected_index: None,
                    });
                } else if kind == InputKind::Text {
                    // Labeled fullname/kana containers the scorer missed.
                    let label = el.label_text.to_lowercase();
                    let is_fullname = ["氏名", "お名前", "fullname", "full name"]
                        .iter()
                        .any(|t| label.contains(t));
                    let is_kana =
                        patterns::has_kana_indicator(&el.label_text) && !is_fullname;
                    if is_fullname {
                        entries.push(AutoHandledEntry {
                            field: next_name("fullname_label"),
                            selector: el.selector.clone(),
                            element_index: el.index,
                            input_kind: kind,
                            auto_action: AutoAction::Fill,
                            copy_from: None,
                            value: None,
                            required: el.required,
                            selected_option_text: None,
                            selected_index: None,
                        });
                    } else if is_kana {
                        entries.push(AutoHandledEntry {
                            field: next_name("unified_kana"),
                            selector: el.selector.clone(),
                            element_index: el.index,
                            input_kind: kind,
                            auto_action: AutoAction::Fill,
                            copy_from: None,
                            value: None,
                            required: el.required,
                            selected_option_text: None,
                            selected_index: None,
                        });
                    } else if el.required || required.treat_all_as_required {
                        entries.push(AutoHandledEntry {
                            field: next_name("required_text"),
                            selector: el.selector.clone(),
                            element_index: el.index,
                            input_kind: kind,
                            auto_action: AutoAction::Fill,
                            copy_from: None,
                            value: None,
                            required: true,
                            selected_option_text: None,
                            selected_index: None,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    // Required radio groups: one member chosen by keyword priority.
    for (_, members) in radio_groups {
        let group_required = members.iter().any(|el| el.required);
        if !(group_required || required.treat_all_as_required) {
            continue;
        }
        let texts: Vec<String> = members
            .iter()
            .map(|el| {
                let label = if !el.label_text.is_empty() {
                    el.label_text.clone()
                } else {
                    format!("{} {}", el.associated_text, el.nearby_text.join(" "))
                };
                label.to_lowercase()
            })
            .collect();
        let is_privacy = texts.iter().any(|t| privacy_like(t, config));
        let mut idx = choose_priority_index(&texts, config);
        if is_privacy {
            // Never auto-pick a marketing option inside a consent group.
            if has_negative_token(&texts[idx], config) {
                if let Some(safe) = texts.iter().position(|t| !has_negative_token(t, config)) {
                    idx = safe;
                }
            }
        }
        let chosen = members[idx];
        entries.push(AutoHandledEntry {
            field: next_name("required_radio"),
            selector: chosen.selector.clone(),
            element_index: chosen.index,
            input_kind: InputKind::Radio,
            auto_action: AutoAction::Default,
            copy_from: None,
            value: Some("true".into()),
            required: true,
            selected_option_text: Some(texts[idx].clone()),
            selected_index: Some(idx),
        });
    }

    entries.sort_by_key(|e| e.element_index);
    entries
}

/// Promote required fullname/kana/email-confirm entries into the main
/// mapping so downstream validation sees them. Returns the promoted
/// auto-handled field names; callers drop those entries.
pub fn promote_required_entries(
    entries: &[AutoHandledEntry],
    mapping: &mut Mapping,
    snapshot: &FormSnapshot,
    contexts: &ContextIndex,
) -> Vec<String> {
    let mut promoted = Vec::new();
    for entry in entries {
        let target_key = if entry.field.contains("fullname_label") {
            keys::FULL_NAME
        } else if entry.field.contains("unified_kana") {
            keys::FULL_NAME_KANA
        } else if entry.field.contains("email_confirm") {
            keys::EMAIL_CONFIRM
        } else {
            continue;
        };
        if !entry.required && target_key != keys::EMAIL_CONFIRM {
            continue;
        }
        if mapping.contains_key(target_key) {
            continue;
        }
        let Some(el) = snapshot.elements.get(entry.element_index) else {
            continue;
        };
        let mut m = FieldMapping::from_element(target_key, el, ScoreDetails::default(), contexts);
        m.auto_action = Some(entry.auto_action);
        m.copy_from = entry.copy_from.clone();
        mapping.insert(target_key.to_string(), m);
        promoted.push(entry.field.clone());
    }
    promoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> ChoicePriorityConfig {
        ChoicePriorityConfig::default()
    }

    fn element(index: usize, tag: &str, type_attr: &str, name: &str) -> ElementInfo {
        ElementInfo {
            index,
            tag: tag.into(),
            type_attr: type_attr.into(),
            name: name.into(),
            selector: format!("{tag}[name=\"{name}\"]"),
            visible: true,
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_privacy_checkbox_auto_checked() {
        let mut cb = element(0, "input", "checkbox", "privacy");
        cb.label_text = "プライバシーポリシーに同意する".into();
        let snapshot = FormSnapshot {
            elements: vec![cb],
            ..Default::default()
        };
        let contexts = ContextIndex::build(&snapshot.elements);
        let entries = handle_unmapped_elements(
            &snapshot,
            &contexts,
            &Mapping::new(),
            &RequiredAnalysis::default(),
            &config(),
        );
        assert_eq!(entries.len(), 1);
        assert!(entries[0].field.contains("privacy_checkbox"));
        assert_eq!(entries[0].value.as_deref(), Some("true"));
    }

    #[test]
    fn test_newsletter_checkbox_not_selected() {
        let mut cb = element(0, "input", "checkbox", "privacy_news");
        cb.label_text = "プライバシーポリシーに同意してメルマガを受け取る".into();
        let snapshot = FormSnapshot {
            elements: vec![cb],
            ..Default::default()
        };
        let contexts = ContextIndex::build(&snapshot.elements);
        let entries = handle_unmapped_elements(
            &snapshot,
            &contexts,
            &Mapping::new(),
            &RequiredAnalysis::default(),
            &config(),
        );
        assert!(entries.is_empty());
    }

    #[test]
    fn test_required_radio_group_chooses_business_option() {
        let mut a = element(0, "input", "radio", "topic");
        a.label_text = "資料請求".into();
        a.required = true;
        let mut b = element(1, "input", "radio", "topic");
        b.label_text = "営業のご提案".into();
        b.required = true;
        let mut c = element(2, "input", "radio", "topic");
        c.label_text = "その他".into();
        c.required = true;
        let snapshot = FormSnapshot {
            elements: vec![a, b, c],
            ..Default::default()
        };
        let contexts = ContextIndex::build(&snapshot.elements);
        let entries = handle_unmapped_elements(
            &snapshot,
            &contexts,
            &Mapping::new(),
            &RequiredAnalysis::default(),
            &config(),
        );
        let radio = entries.iter().find(|e| e.field.contains("required_radio")).unwrap();
        assert_eq!(radio.element_index, 1);
    }

    #[test]
    fn test_email_confirmation_copies_primary() {
        let mut confirm = element(1, "input", "text", "mail_confirm");
        confirm.label_text = "メールアドレス（確認用）".into();
        let snapshot = FormSnapshot {
            elements: vec![element(0, "input", "email", "email"), confirm],
            ..Default::default()
        };
        let contexts = ContextIndex::build(&snapshot.elements);
        let mut mapping = Mapping::new();
        mapping.insert(
            keys::EMAIL.to_string(),
            FieldMapping::from_element(
                keys::EMAIL,
                &snapshot.elements[0],
                ScoreDetails::default(),
                &contexts,
            ),
        );
        let entries = handle_unmapped_elements(
            &snapshot,
            &contexts,
            &mapping,
            &RequiredAnalysis::default(),
            &config(),
        );
        let confirm_entry = entries.iter().find(|e| e.field.contains("email_confirm")).unwrap();
        assert_eq!(confirm_entry.auto_action, AutoAction::CopyFrom);
        assert_eq!(confirm_entry.copy_from.as_deref(), Some(keys::EMAIL));

        // Promotion moves it into the mapping under the canonical key.
        let promoted = promote_required_entries(&entries, &mut mapping, &snapshot, &contexts);
        assert_eq!(promoted.len(), 1);
        assert!(mapping.contains_key(keys::EMAIL_CONFIRM));
    }

    #[test]
    fn test_required_select_gets_algorithm() {
        let mut select = element(0, "select", "", "pref");
        select.required = true;
        let snapshot = FormSnapshot {
            elements: vec![select],
            ..Default::default()
        };
        let contexts = ContextIndex::build(&snapshot.elements);
        let entries = handle_unmapped_elements(
            &snapshot,
            &contexts,
            &Mapping::new(),
            &RequiredAnalysis::default(),
            &config(),
        );
        assert_eq!(entries[0].auto_action, AutoAction::SelectByAlgorithm);
    }

    #[test]
    fn test_choose_priority_prefers_last_primary_match() {
        let texts = vec![
            "資料請求".to_string(),
            "営業のご提案".to_string(),
            "メールでの連絡".to_string(),
            "その他".to_string(),
        ];
        // Both 営業 and メール are primary; the last match wins.
        assert_eq!(choose_priority_index(&texts, &config()), 2);
    }

    #[test]
    fn test_required_fullname_promoted() {
        let mut input = element(0, "input", "text", "field_1");
        input.label_text = "氏名".into();
        input.required = true;
        let snapshot = FormSnapshot {
            elements: vec![input],
            ..Default::default()
        };
        let contexts = ContextIndex::build(&snapshot.elements);
        let mut mapping = Mapping::new();
        let entries = handle_unmapped_elements(
            &snapshot,
            &contexts,
            &mapping,
            &RequiredAnalysis::default(),
            &config(),
        );
        let promoted = promote_required_entries(&entries, &mut mapping, &snapshot, &contexts);
        assert_eq!(promoted.len(), 1);
        assert!(mapping.contains_key(keys::FULL_NAME));
    }
}
