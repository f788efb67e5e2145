//! Duplicate-value prevention.
//!
//! Guarantees that each concrete value lands in at most one canonical field.
//! The single exception: an email-confirmation field may carry the same
//! value as the primary email. Conflicts resolve by field priority, ties by
//! element score; the loser is unregistered and rejected.

use crate::analyzer::patterns::{self, keys};
use std::collections::HashMap;

/// One registered assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAssignment {
    pub field: String,
    pub value: String,
    pub score: i32,
    /// Confirmation fields are non-primary
    pub is_primary: bool,
}

/// Field priority for duplicate resolution. Higher wins. Split phone parts
/// sit far below the unified phone so a collision always resolves to the
/// unified field.
fn field_priority(field: &str) -> i32 {
    match field {
        keys::EMAIL => 100,
        keys::MESSAGE => 95,
        keys::COMPANY_NAME => 90,
        keys::FULL_NAME => 85,
        keys::PHONE => 85,
        keys::LAST_NAME | keys::FIRST_NAME => 80,
        keys::SUBJECT => 75,
        keys::COMPANY_NAME_KANA => 70,
        keys::FULL_NAME_KANA => 70,
        keys::LAST_NAME_KANA | keys::FIRST_NAME_KANA => 65,
        keys::POSITION => 60,
        keys::DEPARTMENT => 55,
        keys::WEBSITE_URL => 50,
        keys::POSTAL_CODE_1 | keys::POSTAL_CODE_2 => 40,
        keys::ADDRESS => 35,
        keys::LAST_NAME_HIRAGANA | keys::FIRST_NAME_HIRAGANA => 30,
        keys::GENDER => 25,
        keys::PHONE_1 => 15,
        keys::PHONE_2 => 10,
        keys::PHONE_3 => 5,
        _ => 0,
    }
}

fn is_phone_group(field: &str) -> bool {
    matches!(field, keys::PHONE | keys::PHONE_1 | keys::PHONE_2 | keys::PHONE_3)
}

fn is_split_phone(field: &str) -> bool {
    matches!(field, keys::PHONE_1 | keys::PHONE_2 | keys::PHONE_3)
}

fn is_postal_group(field: &str) -> bool {
    matches!(field, keys::POSTAL_CODE_1 | keys::POSTAL_CODE_2)
}

/// Placeholder values (whitespace only, including the ideographic space)
/// register but stay out of the duplicate registry.
pub fn is_placeholder_value(value: &str) -> bool {
    value.replace('\u{3000}', "").trim().is_empty()
}

/// The duplicate-prevention registry.
#[derive(Debug, Default)]
pub struct DuplicateRegistry {
    assignments: HashMap<String, FieldAssignment>,
    /// value -> field names carrying it
    value_index: HashMap<String, Vec<String>>,
}

impl DuplicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an assignment. Returns false when the registry rejects it.
    pub fn register(&mut self, field: &str, value: &str, score: i32, attr_blob: &str) -> bool {
        if field.is_empty() || value.is_empty() {
            return false;
        }

        if is_placeholder_value(value) {
            self.remove(field);
            self.assignments.insert(
                field.to_string(),
                FieldAssignment {
                    field: field.to_string(),
                    value: value.to_string(),
                    score,
                    is_primary: true,
                },
            );
            return true;
        }

        if field == keys::EMAIL_CONFIRM || patterns::is_email_confirmation(attr_blob) {
            return self.register_email_confirmation(field, value, score);
        }

        if self.has_group_conflict(field, value) {
            return self.resolve_group_conflict(field, value, score);
        }

        if self.value_index.contains_key(value) {
            return self.resolve_duplicate(field, value, score);
        }

        self.insert(field, value, score, true);
        true
    }

    fn insert(&mut self, field: &str, value: &str, score: i32, is_primary: bool) {
        // Re-registration replaces the previous claim entirely.
        self.remove(field);
        self.assignments.insert(
            field.to_string(),
            FieldAssignment {
                field: field.to_string(),
                value: value.to_string(),
                score,
                is_primary,
            },
        );
        let entry = self.value_index.entry(value.to_string()).or_default();
        if !entry.iter().any(|f| f == field) {
            entry.push(field.to_string());
        }
    }

    fn remove(&mut self, field: &str) {
        if let Some(old) = self.assignments.remove(field) {
            if let Some(fields) = self.value_index.get_mut(&old.value) {
                fields.retain(|f| f != field);
                if fields.is_empty() {
                    self.value_index.remove(&old.value);
                }
            }
        }
    }

    /// Unified phone vs split phone parts are mutually exclusive; split
    /// parts coexist with each other. Postal parts conflict only when they
    /// would carry the same value.
    fn has_group_conflict(&self, field: &str, value: &str) -> bool {
        if is_phone_group(field) {
            let has_unified = self.assignments.contains_key(keys::PHONE);
            let has_split = self.assignments.keys().any(|f| is_split_phone(f));
            return (field == keys::PHONE && has_split)
                || (is_split_phone(field) && has_unified);
        }
        if is_postal_group(field) {
            return self
                .assignments
                .values()
                .any(|a| a.field != field && is_postal_group(&a.field) && a.value == value);
        }
        false
    }

    fn resolve_group_conflict(&mut self, field: &str, value: &str, score: i32) -> bool {
        let conflicting: Vec<String> = if is_phone_group(field) {
            if field == keys::PHONE {
                self.assignments
                    .keys()
                    .filter(|f| is_split_phone(f))
                    .cloned()
                    .collect()
            } else if self.assignments.contains_key(keys::PHONE) {
                vec![keys::PHONE.to_string()]
            } else {
                Vec::new()
            }
        } else {
            self.assignments
                .values()
                .filter(|a| a.field != field && is_postal_group(&a.field) && a.value == value)
                .map(|a| a.field.clone())
                .collect()
        };
        if conflicting.is_empty() {
            return false;
        }
        if self.best_field(field, score, &conflicting) == field {
            for loser in &conflicting {
                self.remove(loser);
            }
            self.insert(field, value, score, true);
            true
        } else {
            false
        }
    }

    fn register_email_confirmation(&mut self, field: &str, value: &str, score: i32) -> bool {
        // A confirmation may only mirror an already-registered primary email.
        let has_primary_email = self
            .value_index
            .get(value)
            .map(|fields| fields.iter().any(|f| f == keys::EMAIL))
            .unwrap_or(false);
        if !has_primary_email {
            return false;
        }
        self.insert(field, value, score, false);
        true
    }

    fn resolve_duplicate(&mut self, field: &str, value: &str, score: i32) -> bool {
        let existing: Vec<String> = self
            .value_index
            .get(value)
            .cloned()
            .unwrap_or_default();
        if self.best_field(field, score, &existing) == field {
            for loser in &existing {
                self.remove(loser);
            }
            self.insert(field, value, score, true);
            true
        } else {
            false
        }
    }

    fn best_field<'a>(&self, new_field: &'a str, new_score: i32, existing: &'a [String]) -> &'a str {
        let mut best = new_field;
        let mut best_priority = field_priority(new_field);
        let mut best_score = new_score;
        for field in existing {
            let Some(assignment) = self.assignments.get(field) else {
                continue;
            };
            let priority = field_priority(field);
            if priority > best_priority
                || (priority == best_priority && assignment.score > best_score)
            {
                best = field;
                best_priority = priority;
                best_score = assignment.score;
            }
        }
        best
    }

    pub fn assignment(&self, field: &str) -> Option<&FieldAssignment> {
        self.assignments.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.assignments.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn clear(&mut self) {
        self.assignments.clear();
        self.value_index.clear();
    }

    /// Validate the final state: every shared value must be the primary
    /// email plus confirmations, and phone/postal groups must stay
    /// value-disjoint.
    pub fn validate(&self) -> (bool, Vec<String>) {
        let mut issues = Vec::new();
        for (value, fields) in &self.value_index {
            if fields.len() <= 1 {
                continue;
            }
            let has_email_primary = fields.iter().any(|f| f == keys::EMAIL);
            let confirmation_count = fields
                .iter()
                .filter(|f| self.assignments.get(*f).map(|a| !a.is_primary).unwrap_or(false))
                .count();
            if !(has_email_primary && confirmation_count == fields.len() - 1) {
                issues.push(format!(
                    "value shared by {fields:?} is not an email confirmation pair ({} chars)",
                    value.chars().count()
                ));
            }
        }
        for (group_name, filter) in [
            ("phone", is_phone_group as fn(&str) -> bool),
            ("postal", is_postal_group as fn(&str) -> bool),
        ] {
            let mut seen: HashMap<&str, &str> = HashMap::new();
            for a in self.assignments.values().filter(|a| filter(&a.field)) {
                if is_placeholder_value(&a.value) {
                    continue;
                }
                if let Some(prev) = seen.insert(a.value.as_str(), a.field.as_str()) {
                    issues.push(format!(
                        "{group_name} group value duplicated across {prev} and {}",
                        a.field
                    ));
                }
            }
        }
        (issues.is_empty(), issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_registration() {
        let mut reg = DuplicateRegistry::new();
        assert!(reg.register(keys::EMAIL, "a@example.com", 90, ""));
        assert!(reg.contains(keys::EMAIL));
    }

    #[test]
    fn test_same_value_resolves_by_priority() {
        let mut reg = DuplicateRegistry::new();
        assert!(reg.register(keys::SUBJECT, "お問い合わせ", 80, ""));
        // Message outranks subject; subject loses its claim.
        assert!(reg.register(keys::MESSAGE, "お問い合わせ", 60, ""));
        assert!(reg.contains(keys::MESSAGE));
        assert!(!reg.contains(keys::SUBJECT));
    }

    #[test]
    fn test_lower_priority_rejected() {
        let mut reg = DuplicateRegistry::new();
        assert!(reg.register(keys::MESSAGE, "本文です", 60, ""));
        assert!(!reg.register(keys::SUBJECT, "本文です", 99, ""));
        assert!(reg.contains(keys::MESSAGE));
    }

    #[test]
    fn test_tie_breaks_by_score() {
        let mut reg = DuplicateRegistry::new();
        assert!(reg.register(keys::LAST_NAME, "山田", 90, ""));
        // first_name ties on priority but loses on score.
        assert!(!reg.register(keys::FIRST_NAME, "山田", 70, ""));
        assert!(reg.contains(keys::LAST_NAME));
    }

    #[test]
    fn test_email_confirmation_allowed_with_primary() {
        let mut reg = DuplicateRegistry::new();
        assert!(reg.register(keys::EMAIL, "a@example.com", 90, ""));
        assert!(reg.register(keys::EMAIL_CONFIRM, "a@example.com", 50, "mail_confirm"));
        let (ok, issues) = reg.validate();
        assert!(ok, "{issues:?}");
    }

    #[test]
    fn test_email_confirmation_without_primary_rejected() {
        let mut reg = DuplicateRegistry::new();
        assert!(!reg.register(keys::EMAIL_CONFIRM, "a@example.com", 50, "mail_confirm"));
    }

    #[test]
    fn test_unified_phone_wins_over_splits() {
        let mut reg = DuplicateRegistry::new();
        assert!(reg.register(keys::PHONE_1, "03", 100, ""));
        assert!(reg.register(keys::PHONE_2, "6825", 100, ""));
        // Unified phone outranks the split parts and evicts them.
        assert!(reg.register(keys::PHONE, "0368250324", 50, ""));
        assert!(reg.contains(keys::PHONE));
        assert!(!reg.contains(keys::PHONE_1));
        assert!(!reg.contains(keys::PHONE_2));
    }

    #[test]
    fn test_split_after_unified_rejected() {
        let mut reg = DuplicateRegistry::new();
        assert!(reg.register(keys::PHONE, "0368250324", 80, ""));
        assert!(!reg.register(keys::PHONE_1, "03", 100, ""));
    }

    #[test]
    fn test_split_phones_coexist() {
        let mut reg = DuplicateRegistry::new();
        assert!(reg.register(keys::PHONE_1, "03", 80, ""));
        assert!(reg.register(keys::PHONE_2, "6825", 80, ""));
        assert!(reg.register(keys::PHONE_3, "0324", 80, ""));
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn test_postal_same_value_conflicts() {
        let mut reg = DuplicateRegistry::new();
        assert!(reg.register(keys::POSTAL_CODE_1, "160", 80, ""));
        assert!(!reg.register(keys::POSTAL_CODE_2, "160", 70, ""));
        assert!(reg.register(keys::POSTAL_CODE_2, "0023", 70, ""));
    }

    #[test]
    fn test_placeholder_values_skip_registry() {
        let mut reg = DuplicateRegistry::new();
        assert!(reg.register(keys::LAST_NAME, "\u{3000}", 80, ""));
        assert!(reg.register(keys::FIRST_NAME, "\u{3000}", 80, ""));
        let (ok, _) = reg.validate();
        assert!(ok);
    }

    proptest::proptest! {
        /// Invariant: after arbitrary registrations, no non-placeholder
        /// value is shared unless it is the email + confirmation pair.
        #[test]
        fn prop_no_value_shared_outside_email_confirmation(
            ops in proptest::collection::vec(
                (0usize..8, "[a-c]{1,3}", 0i32..200),
                1..40,
            )
        ) {
            let fields = [
                keys::EMAIL,
                keys::MESSAGE,
                keys::COMPANY_NAME,
                keys::LAST_NAME,
                keys::FIRST_NAME,
                keys::PHONE,
                keys::PHONE_1,
                keys::SUBJECT,
            ];
            let mut reg = DuplicateRegistry::new();
            for (field_idx, value, score) in ops {
                let _ = reg.register(fields[field_idx], &value, score, "");
            }
            let (ok, issues) = reg.validate();
            proptest::prop_assert!(ok, "{issues:?}");
        }
    }
}
