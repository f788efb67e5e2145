//! Element scoring against the field-pattern catalog.
//!
//! For each candidate control the scorer produces a total score plus the
//! per-signal breakdown. Disqualified elements carry an `excluded` flag and
//! a negative total; downstream code must drop those. Quick ranking bounds
//! the work per field to the top K candidates, with a deeper K for
//! essential fields.

use crate::analyzer::context_text::ContextIndex;
use crate::analyzer::patterns::{keys, FieldPattern};
use crate::analyzer::structure::ElementInfo;
use serde::{Deserialize, Serialize};

/// Scoring knobs. Values are calibrated so an attribute-token hit plus a
/// fitting tag lands at 80, comfortably above the default floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerSettings {
    pub min_score_threshold: i32,
    pub required_boost: i32,
    /// Stronger boost for required phone parts
    pub required_phone_boost: i32,
    pub quick_top_k: usize,
    pub quick_top_k_essential: usize,
    pub early_stop_score: i32,
}

impl Default for ScorerSettings {
    fn default() -> Self {
        Self {
            min_score_threshold: 70,
            required_boost: 40,
            required_phone_boost: 200,
            quick_top_k: 15,
            quick_top_k_essential: 25,
            early_stop_score: 95,
        }
    }
}

/// Per-signal score breakdown for one (element, field) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetails {
    pub total: i32,
    pub type_fit: i32,
    pub attr_hits: i32,
    pub label_score: i32,
    pub context_score: i32,
    pub required_bonus: i32,
    pub excluded: bool,
    pub matched_tokens: Vec<String>,
}

/// A scored candidate for one canonical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub element_index: usize,
    pub details: ScoreDetails,
}

/// How well the control's tag/type fits a canonical field. `None` means the
/// combination is disqualifying.
fn type_fit(key: &str, el: &ElementInfo) -> Option<i32> {
    let tag = el.tag.as_str();
    let typ = el.type_attr.as_str();
    let text_like = tag == "input" && matches!(typ, "" | "text");
    match key {
        keys::EMAIL | keys::EMAIL_CONFIRM => match (tag, typ) {
            ("input", "email") | ("input", "mail") => Some(50),
            _ if text_like => Some(20),
            _ => None,
        },
        keys::MESSAGE => match tag {
            "textarea" => Some(50),
            _ if text_like => Some(10),
            _ => None,
        },
        keys::PHONE | keys::PHONE_1 | keys::PHONE_2 | keys::PHONE_3 => match (tag, typ) {
            ("input", "tel") => Some(50),
            ("input", "number") => Some(25),
            _ if text_like => Some(20),
            _ => None,
        },
        keys::WEBSITE_URL => match (tag, typ) {
            ("input", "url") => Some(50),
            _ if text_like => Some(20),
            _ => None,
        },
        keys::POSTAL_CODE | keys::POSTAL_CODE_1 | keys::POSTAL_CODE_2 => match (tag, typ) {
            ("input", "tel") | ("input", "number") => Some(30),
            _ if text_like => Some(20),
            _ => None,
        },
        keys::GENDER => match (tag, typ) {
            ("select", _) | ("input", "radio") => Some(40),
            _ if text_like => Some(10),
            _ => None,
        },
        keys::PREFECTURE => match tag {
            "select" => Some(40),
            _ if text_like => Some(20),
            _ => None,
        },
        // Everything else wants a plain text input (or textarea for long
        // address lines).
        keys::ADDRESS | keys::ADDRESS_AUX => match tag {
            "textarea" => Some(15),
            _ if text_like => Some(20),
            _ => None,
        },
        _ => {
            if text_like {
                Some(20)
            } else {
                None
            }
        }
    }
}

/// Score a single element against one catalog row.
pub fn score_element(
    pattern: &FieldPattern,
    el: &ElementInfo,
    contexts: &ContextIndex,
    settings: &ScorerSettings,
) -> ScoreDetails {
    let mut details = ScoreDetails::default();

    if !el.visible || !el.enabled {
        details.excluded = true;
        details.total = -1;
        return details;
    }
    let Some(fit) = type_fit(pattern.key, el) else {
        details.excluded = true;
        details.total = -1;
        return details;
    };
    details.type_fit = fit;

    let attr_blob = el.attr_blob();
    let context_blob = contexts.context_blob(el.index);
    let full_blob = format!("{attr_blob} {context_blob}");

    // Negative tokens disqualify outright.
    for neg in pattern.negative_tokens {
        if full_blob.contains(&neg.to_lowercase()) {
            details.excluded = true;
            details.total = -100;
            return details;
        }
    }

    // Attribute-token hits, weighted by which attribute matched.
    let lower_name = el.name.to_lowercase();
    let lower_id = el.id.to_lowercase();
    let lower_class = el.class_name.to_lowercase();
    let lower_placeholder = el.placeholder.to_lowercase();
    let mut attr_hits = 0;
    for token in pattern.tokens {
        let t = token.to_lowercase();
        let mut hit = false;
        if lower_name.contains(&t) {
            attr_hits = attr_hits.max(30);
            hit = true;
        }
        if lower_id.contains(&t) {
            attr_hits = attr_hits.max(25);
            hit = true;
        }
        if lower_class.contains(&t) {
            attr_hits = attr_hits.max(20);
            hit = true;
        }
        if lower_placeholder.contains(&t) {
            attr_hits = attr_hits.max(15);
            hit = true;
        }
        if hit {
            details.matched_tokens.push(token.to_string());
        }
    }
    details.attr_hits = attr_hits;

    // Label and ranked context hits.
    let lower_label = el.label_text.to_lowercase();
    for token in pattern.tokens {
        let t = token.to_lowercase();
        if !lower_label.is_empty() && lower_label.contains(&t) {
            details.label_score = 40;
            if !details.matched_tokens.iter().any(|m| m == token) {
                details.matched_tokens.push(token.to_string());
            }
            break;
        }
    }
    if details.label_score == 0 {
        for candidate in contexts.contexts(el.index) {
            let text = candidate.text.to_lowercase();
            if pattern.tokens.iter().any(|t| text.contains(&t.to_lowercase())) {
                details.context_score = (candidate.confidence * 30.0).round() as i32;
                break;
            }
        }
    }

    // Required bonus; phone parts get the stronger boost so required split
    // phones survive weak labeling.
    if el.required {
        details.required_bonus = if matches!(
            pattern.key,
            keys::PHONE | keys::PHONE_1 | keys::PHONE_2 | keys::PHONE_3
        ) {
            settings.required_phone_boost
        } else {
            settings.required_boost
        };
    }

    // No recognition signal at all: the type fit alone is not a mapping.
    if details.attr_hits == 0 && details.label_score == 0 && details.context_score == 0 {
        details.total = 0;
        return details;
    }

    details.total = details.type_fit
        + details.attr_hits
        + details.label_score
        + details.context_score
        + details.required_bonus;
    details
}

/// Rank candidates for one field across all elements, dropping excluded and
/// zero-signal entries, bounded to the quick-rank K.
pub fn rank_candidates(
    pattern: &FieldPattern,
    elements: &[ElementInfo],
    contexts: &ContextIndex,
    settings: &ScorerSettings,
) -> Vec<ScoredCandidate> {
    let top_k = if pattern.essential {
        settings.quick_top_k_essential
    } else {
        settings.quick_top_k
    };
    let mut candidates: Vec<ScoredCandidate> = Vec::new();
    for el in elements {
        if !el.is_fillable() {
            continue;
        }
        let details = score_element(pattern, el, contexts, settings);
        if details.excluded || details.total <= 0 {
            continue;
        }
        candidates.push(ScoredCandidate {
            element_index: el.index,
            details,
        });
        // A near-perfect hit on an essential field ends the scan early.
        if pattern.essential
            && candidates
                .last()
                .map(|c| c.details.total >= settings.early_stop_score)
                .unwrap_or(false)
        {
            break;
        }
    }
    candidates.sort_by(|a, b| b.details.total.cmp(&a.details.total));
    candidates.truncate(top_k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::patterns::pattern_for;
    use pretty_assertions::assert_eq;

    fn email_input() -> ElementInfo {
        ElementInfo {
            index: 0,
            tag: "input".into(),
            type_attr: "email".into(),
            name: "email".into(),
            selector: "input[name=\"email\"]".into(),
            label_text: "メールアドレス".into(),
            visible: true,
            enabled: true,
            ..Default::default()
        }
    }

    fn scorer() -> ScorerSettings {
        ScorerSettings::default()
    }

    #[test]
    fn test_email_input_scores_high() {
        let el = email_input();
        let contexts = ContextIndex::build(std::slice::from_ref(&el));
        let details = score_element(pattern_for(keys::EMAIL).unwrap(), &el, &contexts, &scorer());
        assert!(!details.excluded);
        assert!(details.total >= 80, "total was {}", details.total);
        assert_eq!(details.type_fit, 50);
        assert_eq!(details.attr_hits, 30);
    }

    #[test]
    fn test_invisible_element_is_excluded() {
        let mut el = email_input();
        el.visible = false;
        let contexts = ContextIndex::build(std::slice::from_ref(&el));
        let details = score_element(pattern_for(keys::EMAIL).unwrap(), &el, &contexts, &scorer());
        assert!(details.excluded);
        assert!(details.total < 0);
    }

    #[test]
    fn test_negative_token_disqualifies() {
        let mut el = email_input();
        el.type_attr = "text".into();
        el.name = "email_confirm".into();
        let contexts = ContextIndex::build(std::slice::from_ref(&el));
        let details = score_element(pattern_for(keys::EMAIL).unwrap(), &el, &contexts, &scorer());
        assert!(details.excluded);
        assert_eq!(details.total, -100);
    }

    #[test]
    fn test_checkbox_never_matches_email() {
        let mut el = email_input();
        el.type_attr = "checkbox".into();
        let contexts = ContextIndex::build(std::slice::from_ref(&el));
        let details = score_element(pattern_for(keys::EMAIL).unwrap(), &el, &contexts, &scorer());
        assert!(details.excluded);
    }

    #[test]
    fn test_required_phone_gets_strong_boost() {
        let el = ElementInfo {
            index: 0,
            tag: "input".into(),
            type_attr: "tel".into(),
            name: "tel2".into(),
            required: true,
            visible: true,
            enabled: true,
            ..Default::default()
        };
        let contexts = ContextIndex::build(std::slice::from_ref(&el));
        let details = score_element(pattern_for(keys::PHONE_2).unwrap(), &el, &contexts, &scorer());
        assert_eq!(details.required_bonus, 200);
        assert!(details.total > 200);
    }

    #[test]
    fn test_no_signal_scores_zero() {
        let el = ElementInfo {
            index: 0,
            tag: "input".into(),
            type_attr: "text".into(),
            name: "field_7".into(),
            visible: true,
            enabled: true,
            ..Default::default()
        };
        let contexts = ContextIndex::build(std::slice::from_ref(&el));
        let details =
            score_element(pattern_for(keys::COMPANY_NAME).unwrap(), &el, &contexts, &scorer());
        assert_eq!(details.total, 0);
        assert!(!details.excluded);
    }

    #[test]
    fn test_rank_early_stops_on_strong_essential_hit() {
        let strong = email_input();
        let mut weak = email_input();
        weak.index = 1;
        weak.type_attr = "text".into();
        weak.label_text.clear();
        weak.name = "mail".into();
        weak.selector = "input[name=\"mail\"]".into();
        let elements = vec![strong, weak];
        let contexts = ContextIndex::build(&elements);
        let ranked = rank_candidates(
            pattern_for(keys::EMAIL).unwrap(),
            &elements,
            &contexts,
            &scorer(),
        );
        // The first element clears the early-stop score, so the scan ends
        // before the weaker candidate is evaluated.
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].element_index, 0);
    }

    #[test]
    fn test_rank_orders_weaker_candidates() {
        let mut a = email_input();
        a.type_attr = "text".into();
        a.label_text.clear();
        a.name = "mail".into();
        let mut b = a.clone();
        b.index = 1;
        b.name = "contact_mail".into();
        b.label_text = "メールアドレス".into();
        let elements = vec![a, b];
        let contexts = ContextIndex::build(&elements);
        let ranked = rank_candidates(
            pattern_for(keys::EMAIL).unwrap(),
            &elements,
            &contexts,
            &scorer(),
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].element_index, 1);
        assert!(ranked[0].details.total > ranked[1].details.total);
    }
}
