//! Submit-button detection and classification.
//!
//! Analyzer-supplied buttons come first, then the configured keyword
//! selectors. Candidates with back/cancel/reset/search wording are
//! excluded, and the chosen button is classified as a confirmation step or
//! a final submit.

use crate::analyzer::structure::ButtonInfo;
use crate::config::SubmitKeywordsConfig;
use serde::{Deserialize, Serialize};

/// What a click on the button means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonCategory {
    /// "確認 / 次へ / confirm": leads to a review page
    Confirmation,
    /// "送信 / submit / 完了": submits for real
    Submit,
    Unknown,
}

/// Classify button wording. Confirmation keywords win: a button reading
/// "確認画面へ送信" is a confirmation step, not a final submit.
pub fn classify_button_text(text: &str, keywords: &SubmitKeywordsConfig) -> ButtonCategory {
    if text.trim().is_empty() {
        return ButtonCategory::Unknown;
    }
    let lower = text.to_lowercase();
    if keywords
        .confirmation
        .iter()
        .any(|k| lower.contains(&k.to_lowercase()))
    {
        return ButtonCategory::Confirmation;
    }
    if keywords
        .primary
        .iter()
        .chain(keywords.secondary.iter())
        .any(|k| lower.contains(&k.to_lowercase()))
    {
        return ButtonCategory::Submit;
    }
    ButtonCategory::Unknown
}

/// Whether the wording disqualifies the candidate entirely.
pub fn is_excluded(text: &str, keywords: &SubmitKeywordsConfig) -> bool {
    let lower = text.to_lowercase();
    keywords.exclude.iter().any(|k| lower.contains(&k.to_lowercase()))
}

/// An ordered, filtered submit candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitCandidate {
    pub selector: String,
    pub text: String,
    pub category: ButtonCategory,
    pub enabled: bool,
}

/// Produce the ordered candidate list from the analyzer's buttons.
/// Analyzer buttons keep their DOM order; invisible and excluded entries
/// drop out.
pub fn ordered_candidates(
    buttons: &[ButtonInfo],
    keywords: &SubmitKeywordsConfig,
) -> Vec<SubmitCandidate> {
    buttons
        .iter()
        .filter(|b| b.visible)
        .filter(|b| !is_excluded(&b.merged_text(), keywords))
        .map(|b| {
            let text = b.merged_text();
            SubmitCandidate {
                selector: b.selector.clone(),
                category: classify_button_text(&text, keywords),
                text,
                enabled: b.enabled,
            }
        })
        .collect()
}

/// Fallback CSS selectors used when the analyzer supplied no buttons.
pub fn fallback_selectors(keywords: &SubmitKeywordsConfig) -> Vec<String> {
    let mut selectors = vec![
        "form input[type=\"submit\"]".to_string(),
        "form button[type=\"submit\"]".to_string(),
        "form button".to_string(),
        "input[type=\"submit\"]".to_string(),
        "button[type=\"submit\"]".to_string(),
    ];
    for keyword in keywords
        .primary
        .iter()
        .chain(keywords.secondary.iter())
        .chain(keywords.confirmation.iter())
    {
        let escaped = keyword.replace('"', "\\\"");
        selectors.push(format!("input[value*=\"{escaped}\"]"));
    }
    selectors
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn keywords() -> SubmitKeywordsConfig {
        SubmitKeywordsConfig::default()
    }

    fn button(text: &str, visible: bool, enabled: bool) -> ButtonInfo {
        ButtonInfo {
            selector: format!("button:nth({text})"),
            tag: "button".into(),
            type_attr: "submit".into(),
            text: text.into(),
            visible,
            enabled,
            ..Default::default()
        }
    }

    #[test]
    fn test_confirmation_outranks_submit_wording() {
        assert_eq!(
            classify_button_text("確認画面へ送信", &keywords()),
            ButtonCategory::Confirmation
        );
        assert_eq!(classify_button_text("送信する", &keywords()), ButtonCategory::Submit);
        assert_eq!(classify_button_text("Next", &keywords()), ButtonCategory::Unknown);
    }

    #[test]
    fn test_exclusion_keywords() {
        assert!(is_excluded("前のページへ戻る", &keywords()));
        assert!(is_excluded("Search", &keywords()));
        assert!(!is_excluded("この内容で送信", &keywords()));
    }

    #[test]
    fn test_ordered_candidates_filter() {
        let buttons = vec![
            button("検索", true, true),
            button("確認", true, true),
            button("送信", false, true),
            button("送信する", true, false),
        ];
        let candidates = ordered_candidates(&buttons, &keywords());
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].category, ButtonCategory::Confirmation);
        assert_eq!(candidates[1].category, ButtonCategory::Submit);
        assert!(!candidates[1].enabled);
    }

    #[test]
    fn test_fallback_selectors_scope_form_first() {
        let selectors = fallback_selectors(&keywords());
        assert!(selectors[0].starts_with("form "));
        assert!(selectors.iter().any(|s| s.contains("送信")));
    }
}
