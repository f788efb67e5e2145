//! Final analysis validation.
//!
//! Contact-like forms must map a message body; email is required whenever
//! the DOM contains an email-capable input. Every planned assignment also
//! registers through the duplicate registry, whose complaints surface here.

use crate::analyzer::assigner::AssignmentPlan;
use crate::analyzer::duplicate::DuplicateRegistry;
use crate::analyzer::mapper::Mapping;
use crate::analyzer::patterns::keys;
use crate::analyzer::preprocess::FormTypeInfo;
use serde::{Deserialize, Serialize};

/// Validation outcome attached to the analysis result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<String>,
}

/// Sentinel registered for empty values so the duplicate registry can still
/// see the field claim.
const EMPTY_SENTINEL: &str = "_EMPTY_";

/// Validate the final plan against the mapping and form type.
pub fn validate_final_assignments(
    plan: &AssignmentPlan,
    mapping: &Mapping,
    form_type: &FormTypeInfo,
    dom_has_email: bool,
) -> ValidationResult {
    // Non-contact forms skip the contact requirements entirely.
    if !form_type.primary.requires_message() {
        return ValidationResult {
            is_valid: true,
            issues: Vec::new(),
        };
    }

    let mut issues = Vec::new();
    if !mapping.contains_key(keys::MESSAGE) {
        issues.push(format!("required field '{}' is missing", keys::MESSAGE));
    }
    // Mapping absence is the signal here; an assignment alone does not
    // excuse a missed email mapping.
    if dom_has_email && !mapping.contains_key(keys::EMAIL) {
        issues.push(format!(
            "required field '{}' is missing (email field exists in DOM)",
            keys::EMAIL
        ));
    }

    let mut registry = DuplicateRegistry::new();
    // Deterministic registration order keeps conflict resolution stable.
    let mut ordered: Vec<(&String, &crate::analyzer::assigner::AssignedInput)> =
        plan.iter().collect();
    ordered.sort_by_key(|(field, _)| field.as_str());
    for (field, assignment) in ordered {
        let value = if assignment.value.is_empty() {
            EMPTY_SENTINEL
        } else {
            assignment.value.as_str()
        };
        let score = mapping.get(field).map(|m| m.score).unwrap_or(0);
        let attr_blob = mapping.get(field).map(|m| m.attr_blob()).unwrap_or_default();
        if !registry.register(field, value, score, &attr_blob) {
            issues.push(format!("duplicate value rejected: {field}"));
        }
    }
    let (registry_ok, registry_issues) = registry.validate();
    if !registry_ok {
        issues.extend(registry_issues);
    }

    ValidationResult {
        is_valid: issues.is_empty(),
        issues,
    }
}

/// Message-absence classification support: distinguishes a form with no
/// textarea at all from a mapping failure.
pub fn message_issue_kind(issues: &[String], textarea_count: usize) -> Option<MessageIssue> {
    let missing = issues.iter().any(|i| i.contains(keys::MESSAGE));
    if !missing {
        return None;
    }
    Some(if textarea_count == 0 {
        MessageIssue::NoMessageArea
    } else {
        MessageIssue::MappingFailure
    })
}

/// Why the message body is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageIssue {
    /// The DOM has no textarea at all
    NoMessageArea,
    /// A textarea exists but mapping failed
    MappingFailure,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::assigner::AssignedInput;
    use crate::analyzer::mapper::{FieldMapping, InputKind};
    use crate::analyzer::preprocess::FormType;
    use crate::analyzer::scorer::ScoreDetails;
    use pretty_assertions::assert_eq;

    fn contact() -> FormTypeInfo {
        FormTypeInfo {
            primary: FormType::Contact,
            confidence: 0.8,
        }
    }

    fn mapping_with(fields: &[&str]) -> Mapping {
        let mut mapping = Mapping::new();
        for (i, f) in fields.iter().enumerate() {
            mapping.insert(
                f.to_string(),
                FieldMapping {
                    field: f.to_string(),
                    element_index: i,
                    selector: format!("#{f}"),
                    input_kind: InputKind::Text,
                    score: 80,
                    details: ScoreDetails::default(),
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
                },
            );
        }
        mapping
    }

    fn assignment(selector: &str, value: &str) -> AssignedInput {
        AssignedInput {
            selector: selector.into(),
            input_kind: InputKind::Text,
            value: value.into(),
            required: false,
            auto_action: None,
            copy_from: None,
            selected_index: None,
        }
    }

    #[test]
    fn test_contact_form_requires_message() {
        let result = validate_final_assignments(
            &AssignmentPlan::new(),
            &mapping_with(&[keys::EMAIL]),
            &contact(),
            false,
        );
        assert!(!result.is_valid);
        assert!(result.issues.iter().any(|i| i.contains(keys::MESSAGE)));
    }

    #[test]
    fn test_email_required_when_dom_has_email() {
        let result = validate_final_assignments(
            &AssignmentPlan::new(),
            &mapping_with(&[keys::MESSAGE]),
            &contact(),
            true,
        );
        assert!(result.issues.iter().any(|i| i.contains("email field exists")));
    }

    #[test]
    fn test_non_contact_form_short_circuits() {
        let info = FormTypeInfo {
            primary: FormType::Newsletter,
            confidence: 0.9,
        };
        let result =
            validate_final_assignments(&AssignmentPlan::new(), &Mapping::new(), &info, true);
        assert!(result.is_valid);
    }

    #[test]
    fn test_duplicate_value_surfaces() {
        let mapping = mapping_with(&[keys::MESSAGE, keys::EMAIL, keys::SUBJECT]);
        let mut plan = AssignmentPlan::new();
        plan.insert(keys::MESSAGE.to_string(), assignment("#message", "こんにちは"));
        plan.insert(keys::SUBJECT.to_string(), assignment("#subject", "こんにちは"));
        let result = validate_final_assignments(&plan, &mapping, &contact(), false);
        assert!(result.issues.iter().any(|i| i.contains("duplicate value rejected")));
    }

    #[test]
    fn test_message_issue_classification() {
        let issues = vec![format!("required field '{}' is missing", keys::MESSAGE)];
        assert_eq!(message_issue_kind(&issues, 0), Some(MessageIssue::NoMessageArea));
        assert_eq!(message_issue_kind(&issues, 1), Some(MessageIssue::MappingFailure));
        assert_eq!(message_issue_kind(&[], 0), None);
    }
}
