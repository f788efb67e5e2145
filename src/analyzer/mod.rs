//! Rule-based form analysis.
//!
//! The analyzer consumes a harvested [`FormSnapshot`] and produces the full
//! input plan: canonical field mapping, auto-handled extras, split-group
//! reconciliation, per-field values and the final validation verdict. The
//! phases run in a fixed order over pure data; nothing here touches the
//! live browser.

pub mod assigner;
pub mod combination;
pub mod context_text;
pub mod duplicate;
pub mod mapper;
pub mod patterns;
pub mod preprocess;
pub mod scorer;
pub mod split;
pub mod structure;
pub mod unmapped;
pub mod validator;

pub use assigner::{AssignedInput, AssignmentPlan};
pub use mapper::{AutoAction, FieldMapping, InputKind, Mapping};
pub use structure::{ButtonInfo, ElementInfo, FormSnapshot};

use crate::analyzer::context_text::ContextIndex;
use crate::analyzer::preprocess::{FormTypeInfo, RequiredAnalysis, UnifiedFieldInfo};
use crate::analyzer::scorer::ScorerSettings;
use crate::analyzer::split::{SplitFieldGroup, SplitFieldType, SplitMember};
use crate::analyzer::unmapped::AutoHandledEntry;
use crate::analyzer::validator::ValidationResult;
use crate::config::{ChoicePriorityConfig, EarlyAbortConfig, TenantConfig};
use crate::detection::ProhibitionResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Analyzer settings: the scorer knobs plus structural thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub scorer: ScorerSettings,
    /// Structural-similarity threshold for parallel groups
    pub parallel_threshold: f64,
    pub choice_priority: ChoicePriorityConfig,
    /// Prohibition thresholds that cut analysis short
    pub early_abort: EarlyAbortConfig,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            scorer: ScorerSettings::default(),
            parallel_threshold: 0.8,
            choice_priority: ChoicePriorityConfig::default(),
            early_abort: EarlyAbortConfig::default(),
        }
    }
}

/// Everything the executor needs to fill and submit one form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub field_mapping: Mapping,
    pub auto_handled: Vec<AutoHandledEntry>,
    pub plan: AssignmentPlan,
    /// Submit candidates in DOM order, analyzer-scoped
    pub submit_buttons: Vec<ButtonInfo>,
    pub form_type: Option<FormTypeInfo>,
    pub required: RequiredAnalysis,
    pub unified: UnifiedFieldInfo,
    pub split_groups: Vec<SplitFieldGroup>,
    pub validation: ValidationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prohibition: Option<ProhibitionResult>,
    /// Element indices grouped by structural similarity
    pub parallel_groups: Vec<Vec<usize>>,
    pub table_kinds: Vec<structure::TableKind>,
    pub total_elements: usize,
    pub textarea_count: usize,
    pub dom_has_email: bool,
    /// Whether analysis was cut short by an early prohibition hit
    pub aborted_on_prohibition: bool,
}

impl AnalysisResult {
    /// An early-abort stub carrying only the prohibition evidence.
    pub fn prohibited(prohibition: ProhibitionResult) -> Self {
        Self {
            prohibition: Some(prohibition),
            aborted_on_prohibition: true,
            validation: ValidationResult {
                is_valid: true,
                issues: Vec::new(),
            },
            ..Default::default()
        }
    }

    /// JSON-safe projection for the submissions row: no element handles,
    /// no nested score details, bounded depth.
    pub fn storage_projection(&self) -> serde_json::Value {
        let fields: serde_json::Map<String, serde_json::Value> = self
            .field_mapping
            .iter()
            .map(|(k, m)| {
                (
                    k.clone(),
                    serde_json::json!({
                        "selector": m.selector,
                        "input_kind": m.input_kind,
                        "score": m.score,
                        "required": m.required,
                        "best_context": m.best_context,
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "fields": fields,
            "auto_handled": self.auto_handled.iter().map(|e| &e.field).collect::<Vec<_>>(),
            "form_type": self.form_type,
            "split_patterns": self.split_groups.iter().map(|g| g.pattern).collect::<Vec<_>>(),
            "total_elements": self.total_elements,
        })
    }
}

/// The rule-based analyzer.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedAnalyzer {
    pub settings: AnalysisSettings,
}

impl RuleBasedAnalyzer {
    pub fn new(settings: AnalysisSettings) -> Self {
        Self { settings }
    }

    /// Run the full analysis pipeline over a harvested snapshot.
    /// `prohibition` carries the pre-computed detector verdict; only a hit
    /// above the early-abort thresholds short-circuits analysis; weaker
    /// signals ride along as evidence.
    pub fn analyze(
        &self,
        snapshot: &FormSnapshot,
        prohibition: Option<ProhibitionResult>,
        tenant: &TenantConfig,
    ) -> AnalysisResult {
        if let Some(p) = &prohibition {
            if p.detected && p.should_abort(&self.settings.early_abort) {
                info!(level = %p.level, score = p.confidence_score, "prohibition detected before analysis");
                return AnalysisResult::prohibited(prohibition.unwrap());
            }
        }

        let contexts = ContextIndex::build(&snapshot.elements);
        let unified = preprocess::detect_unified_fields(&snapshot.elements);
        let form_type = preprocess::detect_form_type(snapshot);
        let required = preprocess::analyze_required_fields(&snapshot.elements);
        let parallel_groups =
            structure::detect_parallel_groups(&snapshot.elements, self.settings.parallel_threshold);
        let table_kinds = snapshot.table_kinds();
        debug!(
            elements = snapshot.elements.len(),
            form_type = ?form_type.primary,
            required = required.required_count,
            parallel_groups = parallel_groups.len(),
            tables = table_kinds.len(),
            "snapshot preprocessed"
        );

        // Mapping and the post passes.
        let mut mapping =
            mapper::execute_field_mapping(snapshot, &contexts, &unified, &self.settings.scorer);
        mapper::reconcile_unified_and_split_names(&mut mapping);
        mapper::prune_suspect_name_mappings(&mut mapping);
        mapper::fix_name_mapping_mismatch(&mut mapping);
        mapper::align_names_by_placeholder(&mut mapping);
        mapper::normalize_kana_hiragana_fields(&mut mapping);
        mapper::auto_promote_postal_split(&mut mapping, snapshot, &contexts);
        mapper::sanitize_mapping(&mut mapping);

        // Auto handling and promotion back into the mapping.
        let mut auto_handled = unmapped::handle_unmapped_elements(
            snapshot,
            &contexts,
            &mapping,
            &required,
            &self.settings.choice_priority,
        );
        let promoted =
            unmapped::promote_required_entries(&auto_handled, &mut mapping, snapshot, &contexts);
        auto_handled.retain(|e| !promoted.contains(&e.field));

        // Split detection over mapping + auto-handled, in input order.
        let input_order = snapshot.input_order();
        let mut members: Vec<SplitMember> = Vec::new();
        let mut member_types: HashMap<String, SplitFieldType> = HashMap::new();
        for (field, m) in &mapping {
            if let Some(t) = split::identify_field_type(field, &m.contexts) {
                members.push(SplitMember {
                    field: field.clone(),
                    selector: m.selector.clone(),
                    contexts: m.contexts.clone(),
                });
                member_types.insert(field.clone(), t);
            }
        }
        let split_groups = split::detect_split_groups(&members, &member_types, &input_order);
        let split_values = split::generate_group_assignments(&split_groups, &tenant.client);

        // Value assignment and validation.
        let plan = assigner::assign_input_values(
            &mapping,
            &auto_handled,
            &split_values,
            snapshot,
            &required,
            tenant,
        );
        let dom_has_email = snapshot.has_email_capable_input();
        let validation =
            validator::validate_final_assignments(&plan, &mapping, &form_type, dom_has_email);
        if !validation.is_valid {
            info!(issues = validation.issues.len(), "analysis validation flagged issues");
        }

        AnalysisResult {
            field_mapping: mapping,
            auto_handled,
            plan,
            submit_buttons: snapshot.buttons.clone(),
            form_type: Some(form_type),
            required,
            unified,
            split_groups,
            validation,
            prohibition,
            parallel_groups,
            table_kinds,
            total_elements: snapshot.elements.len(),
            textarea_count: snapshot.textarea_count(),
            dom_has_email,
            aborted_on_prohibition: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::patterns::keys;
    use crate::analyzer::structure::ElementInfo;
    use pretty_assertions::assert_eq;

    fn element(index: usize, tag: &str, type_attr: &str, name: &str) -> ElementInfo {
        ElementInfo {
            index,
            tag: tag.into(),
            type_attr: type_attr.into(),
            name: name.into(),
            selector: if tag == "input" {
                format!("input[name=\"{name}\"]")
            } else {
                format!("{tag}[name=\"{name}\"]")
            },
            visible: true,
            enabled: true,
            ..Default::default()
        }
    }

    /// Contact form with split name, unified email and a required textarea:
    /// the canonical end-to-end scenario.
    fn contact_snapshot() -> FormSnapshot {
        let mut sei = element(0, "input", "text", "sei");
        sei.label_text = "姓".into();
        let mut mei = element(1, "input", "text", "mei");
        mei.label_text = "名".into();
        let mut email = element(2, "input", "email", "email");
        email.label_text = "メールアドレス".into();
        let mut message = element(3, "textarea", "", "message");
        message.label_text = "お問い合わせ内容".into();
        message.required = true;
        FormSnapshot {
            url: "https://example.co.jp/contact".into(),
            has_form: true,
            elements: vec![sei, mei, email, message],
            ..Default::default()
        }
    }

    #[test]
    fn test_contact_form_end_to_end() {
        let analyzer = RuleBasedAnalyzer::default();
        let tenant = TenantConfig::sample();
        let result = analyzer.analyze(&contact_snapshot(), None, &tenant);

        assert!(result.field_mapping.contains_key(keys::LAST_NAME));
        assert!(result.field_mapping.contains_key(keys::FIRST_NAME));
        assert!(result.field_mapping.contains_key(keys::EMAIL));
        assert!(result.field_mapping.contains_key(keys::MESSAGE));
        // Unified full name must not appear next to the split pair.
        assert!(!result.field_mapping.contains_key(keys::FULL_NAME));

        assert_eq!(result.plan[keys::EMAIL].value, "t.yamada@example.co.jp");
        assert_eq!(result.plan[keys::LAST_NAME].value, "山田");
        assert_eq!(result.plan[keys::FIRST_NAME].value, "太郎");
        assert_eq!(result.plan[keys::MESSAGE].value, "ご連絡いたしました。");
        assert!(result.validation.is_valid, "{:?}", result.validation.issues);
    }

    #[test]
    fn test_name_split_group_detected() {
        let analyzer = RuleBasedAnalyzer::default();
        let tenant = TenantConfig::sample();
        let result = analyzer.analyze(&contact_snapshot(), None, &tenant);
        assert!(result
            .split_groups
            .iter()
            .any(|g| g.field_type == SplitFieldType::Name));
    }

    #[test]
    fn test_required_phone_split_filled() {
        let mut snapshot = contact_snapshot();
        for (i, name) in ["tel1", "tel2", "tel3"].iter().enumerate() {
            let mut el = element(4 + i, "input", "tel", name);
            el.required = true;
            el.label_text = if i == 0 {
                "電話番号（市外局番）".into()
            } else {
                "電話番号".into()
            };
            snapshot.elements.push(el);
        }
        let analyzer = RuleBasedAnalyzer::default();
        let result = analyzer.analyze(&snapshot, None, &TenantConfig::sample());
        assert_eq!(result.plan[keys::PHONE_1].value, "03");
        assert_eq!(result.plan[keys::PHONE_2].value, "6825");
        assert_eq!(result.plan[keys::PHONE_3].value, "0324");
        // The unified phone never coexists with filled splits.
        assert!(!result.plan.contains_key(keys::PHONE));
    }

    #[test]
    fn test_empty_snapshot_fails_validation() {
        let analyzer = RuleBasedAnalyzer::default();
        let snapshot = FormSnapshot {
            has_form: true,
            elements: vec![element(0, "input", "email", "email")],
            ..Default::default()
        };
        let result = analyzer.analyze(&snapshot, None, &TenantConfig::sample());
        // An email-only form is not a contact form; validation short-circuits.
        assert!(result.validation.is_valid);
    }

    #[test]
    fn test_strong_prohibition_short_circuits() {
        use crate::detection::{ConfidenceLevel, ProhibitionLevel, ProhibitionResult};
        let analyzer = RuleBasedAnalyzer::default();
        let strong = ProhibitionResult {
            detected: true,
            phrases: vec!["営業電話はお断りしております".into(), "勧誘はご遠慮ください".into()],
            confidence_level: ConfidenceLevel::High,
            confidence_score: 95.0,
            level: ProhibitionLevel::Strict,
            source: "targeted".into(),
        };
        let result =
            analyzer.analyze(&contact_snapshot(), Some(strong), &TenantConfig::sample());
        assert!(result.aborted_on_prohibition);
        assert!(result.field_mapping.is_empty());
    }

    #[test]
    fn test_weak_prohibition_rides_along() {
        use crate::detection::{ConfidenceLevel, ProhibitionLevel, ProhibitionResult};
        let analyzer = RuleBasedAnalyzer::default();
        let weak = ProhibitionResult {
            detected: true,
            phrases: vec!["営業目的の可能性".into()],
            confidence_level: ConfidenceLevel::VeryLow,
            confidence_score: 20.0,
            level: ProhibitionLevel::Weak,
            source: "fallback".into(),
        };
        let result = analyzer.analyze(&contact_snapshot(), Some(weak), &TenantConfig::sample());
        assert!(!result.aborted_on_prohibition);
        assert!(!result.field_mapping.is_empty());
        assert!(result.prohibition.is_some());
    }

    #[test]
    fn test_storage_projection_is_flat() {
        let analyzer = RuleBasedAnalyzer::default();
        let result = analyzer.analyze(&contact_snapshot(), None, &TenantConfig::sample());
        let projection = result.storage_projection();
        assert!(projection["fields"][keys::EMAIL]["selector"].is_string());
        assert!(projection["fields"][keys::EMAIL].get("contexts").is_none());
    }
}
