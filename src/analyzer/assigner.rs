//! Input-value assignment.
//!
//! Combines client data through the combination rules and applies the
//! field-specific synthesis: prefecture from address part 1, address-aux
//! resolution by context tokens, hyphen formatting driven by placeholders,
//! context-specific message templates, select-injection restrictions, and
//! the final name-value enforcement.

use crate::analyzer::combination::{self, KanaKind};
use crate::analyzer::mapper::{AutoAction, FieldMapping, InputKind, Mapping};
use crate::analyzer::patterns::keys;
use crate::analyzer::preprocess::RequiredAnalysis;
use crate::analyzer::structure::FormSnapshot;
use crate::analyzer::unmapped::AutoHandledEntry;
use crate::config::TenantConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

static EMAIL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]{2,}$").expect("invalid regex"));

static PHONE_PART_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:tel|phone)[^0-9]*([123])[^0-9]*$").expect("invalid regex"));

/// Ideographic space filler for required fields with no data.
const FILLER: &str = "\u{3000}";

/// One planned input operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedInput {
    pub selector: String,
    pub input_kind: InputKind,
    pub value: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_action: Option<AutoAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_index: Option<usize>,
}

/// The full assignment plan keyed by field name.
pub type AssignmentPlan = HashMap<String, AssignedInput>;

fn context_blob(m: &FieldMapping) -> String {
    format!(
        "{} {} {} {} {}",
        m.name,
        m.id,
        m.class_name,
        m.placeholder,
        m.best_context.as_deref().unwrap_or("")
    )
    .to_lowercase()
}

fn is_fax_field(field: &str, m: &FieldMapping) -> bool {
    field.to_lowercase().contains("fax") || m.selector.to_lowercase().contains("fax")
}

fn format_postal(value: &str, m: &FieldMapping) -> String {
    let digits = value.replace('-', "");
    let digits = digits.trim();
    let hint = format!("{} {}", m.placeholder, m.best_context.as_deref().unwrap_or(""));
    if digits.len() == 7 && (hint.contains('-') || hint.contains('〒')) {
        format!("{}-{}", &digits[..3], &digits[3..])
    } else {
        digits.to_string()
    }
}

fn format_phone(value: &str, m: &FieldMapping) -> String {
    let digits = value.replace('-', "");
    let digits = digits.trim();
    if m.placeholder.contains('-') && digits.chars().all(|c| c.is_ascii_digit()) {
        match digits.len() {
            10 => format!("{}-{}-{}", &digits[..2], &digits[2..6], &digits[6..]),
            11 => format!("{}-{}-{}", &digits[..3], &digits[3..7], &digits[7..]),
            _ => digits.to_string(),
        }
    } else {
        digits.to_string()
    }
}

/// Context-specific message bodies for non-generic contact forms. A
/// quotation form gets a short neutral sentence instead of the tenant pitch.
fn contextual_message(blob: &str, tenant: &TenantConfig) -> String {
    if ["査定", "買取", "買い取り"].iter().any(|k| blob.contains(k)) {
        return "査定のご相談です。詳細は追ってご連絡いたします。".into();
    }
    if ["見積", "お見積", "御見積"].iter().any(|k| blob.contains(k)) {
        return "お見積りのご相談です。詳細は追ってご連絡いたします。".into();
    }
    if ["修理", "修繕", "サポート"].iter().any(|k| blob.contains(k)) {
        return "修理・サポートに関するお問い合わせです。".into();
    }
    if ["予約", "来店予約", "アポイント"].iter().any(|k| blob.contains(k)) {
        return "予約に関するお問い合わせです。".into();
    }
    if ["採用", "応募", "エントリー"].iter().any(|k| blob.contains(k)) {
        return "採用に関するお問い合わせです。".into();
    }
    if ["estimate", "quotation"].iter().any(|k| blob.contains(k)) {
        return "Requesting a quotation. Details to follow.".into();
    }
    if ["repair", "support"].iter().any(|k| blob.contains(k)) {
        return "Requesting repair/support. We will share details.".into();
    }
    tenant.targeting.message.clone()
}

/// Resolve an address-aux field to the city line (parts 2+3) or the detail
/// line (4 + space + 5) by token evidence; ties go to the city line.
fn address_aux_value(blob: &str, tenant: &TenantConfig) -> String {
    const CITY_TOKENS: &[&str] =
        &["市区町村", "市区", "郡", "市", "city", "locality", "区", "町", "town"];
    const DETAIL_TOKENS: &[&str] = &[
        "番地",
        "丁目",
        "建物",
        "building",
        "マンション",
        "ビル",
        "部屋",
        "room",
        "apt",
        "apartment",
        "号室",
        "詳細",
        "addr2",
        "addr_2",
        "address2",
        "address_2",
        "address-line2",
        "addressline2",
        "line2",
        "line_2",
        "street2",
        "street",
    ];
    let hits = |tokens: &[&str]| tokens.iter().map(|t| blob.matches(t).count()).sum::<usize>();
    let city_hits = hits(CITY_TOKENS);
    let detail_hits = hits(DETAIL_TOKENS);
    let client = &tenant.client;
    if city_hits == 0 && detail_hits == 0 {
        return combination::address(client);
    }
    if city_hits >= detail_hits {
        let v = combination::address_city(client);
        if !v.is_empty() {
            return v;
        }
        combination::address_detail(client)
    } else {
        let v = combination::address_detail(client);
        if !v.is_empty() {
            return v;
        }
        combination::address_city(client)
    }
}

fn should_assign(field: &str, m: &FieldMapping, required: &RequiredAnalysis) -> bool {
    if is_fax_field(field, m) {
        return false;
    }
    if required.treat_all_as_required {
        return true;
    }
    const CORE: &[&str] = &[
        keys::SUBJECT,
        keys::MESSAGE,
        keys::EMAIL,
        keys::EMAIL_CONFIRM,
        keys::LAST_NAME,
        keys::FIRST_NAME,
        keys::FULL_NAME,
        keys::FULL_NAME_KANA,
        keys::LAST_NAME_KANA,
        keys::FIRST_NAME_KANA,
        keys::PHONE,
        keys::PHONE_1,
        keys::PHONE_2,
        keys::PHONE_3,
        keys::COMPANY_NAME,
        keys::POSTAL_CODE,
        keys::POSTAL_CODE_1,
        keys::POSTAL_CODE_2,
        keys::ADDRESS,
    ];
    CORE.contains(&field) || m.required
}

fn base_value(field: &str, m: &FieldMapping, tenant: &TenantConfig) -> String {
    match field {
        // Message and subject templates may carry {client.x}/{targeting.y}
        // placeholders.
        keys::MESSAGE => {
            crate::template::expand_placeholders(&contextual_message(&context_blob(m), tenant), tenant)
        }
        keys::SUBJECT => {
            crate::template::expand_placeholders(&tenant.targeting.subject, tenant)
        }
        keys::POSTAL_CODE => format_postal(&combination::postal_code(&tenant.client), m),
        keys::PHONE => format_phone(&combination::phone(&tenant.client), m),
        keys::PREFECTURE => tenant.client.address_1.trim().to_string(),
        keys::ADDRESS => combination::address(&tenant.client),
        keys::ADDRESS_AUX => address_aux_value(&context_blob(m), tenant),
        keys::FULL_NAME_KANA => {
            let kind = combination::detect_kana_kind(&context_blob(m), &m.placeholder);
            combination::unified_kana(kind, &tenant.client)
        }
        _ => combination::client_value(field, tenant),
    }
}

/// Blank auto-required text inputs that hang off an "other" radio choice:
/// planting dummy text next to an unselected reason field causes
/// validation noise on real sites.
fn linked_to_other_radio(
    entry: &AutoHandledEntry,
    snapshot: &FormSnapshot,
    planned_other_radios: &[usize],
) -> bool {
    let Some(el) = snapshot.elements.get(entry.element_index) else {
        return false;
    };
    let Some(bounds) = el.bounds else { return false };
    let center = bounds.y + bounds.height / 2.0;
    planned_other_radios.iter().any(|idx| {
        snapshot
            .elements
            .get(*idx)
            .and_then(|r| r.bounds)
            .map(|rb| ((rb.y + rb.height / 2.0) - center).abs() <= 320.0)
            .unwrap_or(false)
    })
}

/// Build the full assignment plan.
pub fn assign_input_values(
    mapping: &Mapping,
    auto_handled: &[AutoHandledEntry],
    split_values: &HashMap<String, String>,
    snapshot: &FormSnapshot,
    required: &RequiredAnalysis,
    tenant: &TenantConfig,
) -> AssignmentPlan {
    let mut plan: AssignmentPlan = HashMap::new();

    let planned_other_radios: Vec<usize> = auto_handled
        .iter()
        .filter(|e| e.input_kind == InputKind::Radio)
        .filter(|e| {
            e.selected_option_text
                .as_deref()
                .map(|t| t.contains("その他") || t.to_lowercase().contains("other"))
                .unwrap_or(false)
        })
        .map(|e| e.element_index)
        .collect();

    // 1) Mapped fields.
    for (field, m) in mapping {
        if !should_assign(field, m, required) {
            continue;
        }
        // Prefecture and address lines prefer context heuristics over the
        // split-group parts.
        let mut value = if field == keys::PREFECTURE || field.starts_with(keys::ADDRESS) {
            base_value(field, m, tenant)
        } else {
            match split_values.get(field) {
                Some(v) if !v.trim().is_empty() => v.clone(),
                _ => base_value(field, m, tenant),
            }
        };

        let mut auto_action = m.auto_action;
        if m.input_kind == InputKind::Select {
            // Only gender and prefecture may receive client values; every
            // other select defers to the algorithm.
            let allowed = matches!(field.as_str(), keys::GENDER | keys::PREFECTURE);
            if !allowed || value.trim().is_empty() {
                if !allowed {
                    value.clear();
                }
                auto_action = Some(AutoAction::SelectByAlgorithm);
            }
        }

        if value.trim().is_empty() && m.input_kind.is_text_like() {
            // Required fields get the ideographic-space filler; optional
            // ones stay empty and are skipped by the input handler.
            if m.required || required.treat_all_as_required {
                value = FILLER.to_string();
            }
        }

        plan.insert(
            field.clone(),
            AssignedInput {
                selector: m.selector.clone(),
                input_kind: m.input_kind,
                value,
                required: m.required,
                auto_action,
                copy_from: m.copy_from.clone(),
                selected_index: m.selected_index,
            },
        );
    }

    // 2) Auto-handled entries.
    for entry in auto_handled {
        let mut value = entry.value.clone().unwrap_or_default();
        match entry.auto_action {
            AutoAction::CopyFrom => {
                if let Some(src) = &entry.copy_from {
                    value = plan.get(src).map(|a| a.value.clone()).unwrap_or_default();
                }
            }
            AutoAction::Fill => {
                if entry.field.contains("fullname_label") {
                    value = combination::full_name(&tenant.client);
                } else if entry.field.contains("unified_kana") {
                    value = combination::unified_kana(KanaKind::Katakana, &tenant.client);
                } else if entry.field.contains("required_text") {
                    if linked_to_other_radio(entry, snapshot, &planned_other_radios) {
                        value = String::new();
                    } else {
                        value = rescue_text_value(entry, snapshot, tenant);
                    }
                }
            }
            _ => {}
        }
        plan.insert(
            entry.field.clone(),
            AssignedInput {
                selector: entry.selector.clone(),
                input_kind: entry.input_kind,
                value,
                required: entry.required,
                auto_action: Some(entry.auto_action),
                copy_from: entry.copy_from.clone(),
                selected_index: entry.selected_index,
            },
        );
    }

    rescue_required_phone_parts(&mut plan, required, tenant);
    patch_postal_single_field(&mut plan, tenant);
    patch_incomplete_email(&mut plan, tenant);
    enforce_name_values(&mut plan, mapping, tenant);
    drop_duplicate_selector_names(&mut plan);
    plan
}

/// Synthesize a value for a required text field the mapper never claimed,
/// from whatever its attributes and labels reveal. Free-form "reason"
/// fields stay blank.
fn rescue_text_value(
    entry: &AutoHandledEntry,
    snapshot: &FormSnapshot,
    tenant: &TenantConfig,
) -> String {
    let Some(el) = snapshot.elements.get(entry.element_index) else {
        return String::new();
    };
    let blob = el.full_blob();
    const REASON_TOKENS: &[&str] =
        &["その他の理由", "理由", "詳細", "備考", "remarks", "remark", "reason", "specify"];
    if REASON_TOKENS.iter().any(|t| blob.contains(t)) {
        return String::new();
    }
    if ["email", "e-mail", "メール"].iter().any(|t| blob.contains(t)) {
        return combination::email(&tenant.client);
    }
    if ["tel", "phone", "電話", "携帯"].iter().any(|t| blob.contains(t)) {
        return combination::phone(&tenant.client);
    }
    if ["お問い合わせ", "問合せ", "本文", "メッセージ", "message"]
        .iter()
        .any(|t| blob.contains(t))
    {
        return tenant.targeting.message.clone();
    }
    if ["件名", "subject"].iter().any(|t| blob.contains(t)) {
        return tenant.targeting.subject.clone();
    }
    if ["会社", "法人", "社名", "company", "corp"].iter().any(|t| blob.contains(t)) {
        return tenant.client.company_name.clone();
    }
    if ["郵便", "〒", "zip", "postal"].iter().any(|t| blob.contains(t)) {
        return combination::postal_code(&tenant.client);
    }
    if ["住所", "address", "市区町村", "番地", "建物"].iter().any(|t| blob.contains(t)) {
        return address_aux_value(&blob, tenant);
    }
    if entry.required {
        FILLER.to_string()
    } else {
        String::new()
    }
}

/// Required `tel2`/`tel3`-style fields found only in the required-analysis
/// metadata get their phone parts directly.
fn rescue_required_phone_parts(
    plan: &mut AssignmentPlan,
    required: &RequiredAnalysis,
    tenant: &TenantConfig,
) {
    for elem in &required.required_elements {
        let blob = format!("{} {}", elem.name, elem.id).to_lowercase();
        if !(blob.contains("tel") || blob.contains("phone")) {
            continue;
        }
        let Some(caps) = PHONE_PART_SUFFIX.captures(&blob) else {
            continue;
        };
        let part: u8 = caps[1].parse().unwrap_or(0);
        let value = match part {
            2 => tenant.client.phone_2.trim().to_string(),
            3 => tenant.client.phone_3.trim().to_string(),
            _ => continue,
        };
        if value.is_empty() || elem.selector.is_empty() {
            continue;
        }
        if plan.values().any(|a| a.selector == elem.selector) {
            continue;
        }
        plan.insert(
            format!("auto_phone_part_{part}"),
            AssignedInput {
                selector: elem.selector.clone(),
                input_kind: InputKind::Text,
                value,
                required: true,
                auto_action: Some(AutoAction::Fill),
                copy_from: None,
                selected_index: None,
            },
        );
    }
}

/// A lone postal_code_1 without its pair receives the full 7 digits.
fn patch_postal_single_field(plan: &mut AssignmentPlan, tenant: &TenantConfig) {
    if plan.contains_key(keys::POSTAL_CODE_2) {
        return;
    }
    if let Some(a) = plan.get_mut(keys::POSTAL_CODE_1) {
        if a.value.trim().is_empty() || a.value.trim().len() <= 3 {
            let combined = combination::postal_code(&tenant.client);
            if !combined.is_empty() {
                a.value = combined;
            }
        }
    }
}

/// An email value without a full `local@domain.tld` shape is replaced by
/// the combined address; confirmation copies re-sync afterwards.
fn patch_incomplete_email(plan: &mut AssignmentPlan, tenant: &TenantConfig) {
    let patched = {
        let Some(a) = plan.get_mut(keys::EMAIL) else { return };
        if !a.value.is_empty() && !EMAIL_SHAPE.is_match(&a.value) {
            let full = combination::email(&tenant.client);
            if EMAIL_SHAPE.is_match(&full) {
                a.value = full;
                true
            } else {
                false
            }
        } else {
            false
        }
    };
    if patched {
        let email_value = plan[keys::EMAIL].value.clone();
        for a in plan.values_mut() {
            if a.auto_action == Some(AutoAction::CopyFrom)
                && a.copy_from.as_deref() == Some(keys::EMAIL)
            {
                a.value = email_value.clone();
            }
        }
    }
}

/// Name values always come from client data; mapping-stage mixups must not
/// leak wrong names into the form.
fn enforce_name_values(plan: &mut AssignmentPlan, mapping: &Mapping, tenant: &TenantConfig) {
    // sei/mei selector swaps that survived the mapper get their values
    // exchanged here.
    let sel = |k: &str| {
        mapping
            .get(k)
            .map(|m| m.selector.to_lowercase())
            .unwrap_or_default()
    };
    let sei_sel = sel(keys::LAST_NAME);
    let mei_sel = sel(keys::FIRST_NAME);
    let crossed = !sei_sel.is_empty()
        && !mei_sel.is_empty()
        && ["mei", "first", "given"].iter().any(|t| sei_sel.contains(t))
        && ["sei", "last", "family"].iter().any(|t| mei_sel.contains(t))
        && !sei_sel.contains("kana")
        && !mei_sel.contains("kana");
    if crossed && plan.contains_key(keys::LAST_NAME) && plan.contains_key(keys::FIRST_NAME) {
        let a = plan[keys::LAST_NAME].value.clone();
        let b = plan[keys::FIRST_NAME].value.clone();
        plan.get_mut(keys::LAST_NAME).unwrap().value = b;
        plan.get_mut(keys::FIRST_NAME).unwrap().value = a;
    }
    let canonical = [
        (keys::LAST_NAME, tenant.client.last_name.clone()),
        (keys::FIRST_NAME, tenant.client.first_name.clone()),
        (keys::LAST_NAME_KANA, tenant.client.last_name_kana.clone()),
        (keys::FIRST_NAME_KANA, tenant.client.first_name_kana.clone()),
    ];
    for (key, value) in canonical {
        if value.is_empty() {
            continue;
        }
        if let Some(a) = plan.get_mut(key) {
            a.value = value;
        }
    }
}

/// When unified and split name entries ended up on the same selector, the
/// split entries yield.
fn drop_duplicate_selector_names(plan: &mut AssignmentPlan) {
    for unified in [keys::FULL_NAME_KANA, keys::FULL_NAME] {
        let Some(unified_sel) = plan.get(unified).map(|a| a.selector.clone()) else {
            continue;
        };
        for split_key in [keys::LAST_NAME, keys::FIRST_NAME] {
            let same = plan
                .get(split_key)
                .map(|a| a.selector == unified_sel)
                .unwrap_or(false);
            if same {
                plan.remove(split_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::scorer::ScoreDetails;
    use pretty_assertions::assert_eq;

    fn tenant() -> TenantConfig {
        TenantConfig::sample()
    }

    fn mapping_entry(field: &str, selector: &str, kind: InputKind) -> FieldMapping {
        FieldMapping {
            field: field.into(),
            element_index: 0,
            selector: selector.into(),
            input_kind: kind,
            score: 80,
            details: ScoreDetails::default(),
            required: true,
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

    fn plan_for(mapping: &Mapping) -> AssignmentPlan {
        assign_input_values(
            mapping,
            &[],
            &HashMap::new(),
            &FormSnapshot::default(),
            &RequiredAnalysis::default(),
            &tenant(),
        )
    }

    #[test]
    fn test_message_uses_tenant_template() {
        let mut mapping = Mapping::new();
        mapping.insert(
            keys::MESSAGE.into(),
            mapping_entry(keys::MESSAGE, "textarea[name=\"msg\"]", InputKind::Textarea),
        );
        let plan = plan_for(&mapping);
        assert_eq!(plan[keys::MESSAGE].value, tenant().targeting.message);
    }

    #[test]
    fn test_message_placeholders_expand() {
        let mut mapping = Mapping::new();
        mapping.insert(
            keys::MESSAGE.into(),
            mapping_entry(keys::MESSAGE, "textarea[name=\"msg\"]", InputKind::Textarea),
        );
        let mut tenant = tenant();
        tenant.targeting.message = "{client.company_name}の山田です。".into();
        let plan = assign_input_values(
            &mapping,
            &[],
            &HashMap::new(),
            &FormSnapshot::default(),
            &RequiredAnalysis::default(),
            &tenant,
        );
        assert_eq!(plan[keys::MESSAGE].value, "ニューリフィ株式会社の山田です。");
    }

    #[test]
    fn test_quotation_context_overrides_message() {
        let mut mapping = Mapping::new();
        let mut m = mapping_entry(keys::MESSAGE, "textarea[name=\"msg\"]", InputKind::Textarea);
        m.best_context = Some("お見積りフォーム".into());
        mapping.insert(keys::MESSAGE.into(), m);
        let plan = plan_for(&mapping);
        assert!(plan[keys::MESSAGE].value.contains("お見積り"));
    }

    #[test]
    fn test_postal_hyphen_follows_placeholder() {
        let mut mapping = Mapping::new();
        let mut m = mapping_entry(keys::POSTAL_CODE, "input[name=\"zip\"]", InputKind::Text);
        m.placeholder = "123-4567".into();
        mapping.insert(keys::POSTAL_CODE.into(), m);
        let plan = plan_for(&mapping);
        assert_eq!(plan[keys::POSTAL_CODE].value, "160-0023");

        let mut mapping = Mapping::new();
        mapping.insert(
            keys::POSTAL_CODE.into(),
            mapping_entry(keys::POSTAL_CODE, "input[name=\"zip\"]", InputKind::Text),
        );
        let plan = plan_for(&mapping);
        assert_eq!(plan[keys::POSTAL_CODE].value, "1600023");
    }

    #[test]
    fn test_select_injection_restricted() {
        let mut mapping = Mapping::new();
        mapping.insert(
            keys::DEPARTMENT.into(),
            mapping_entry(keys::DEPARTMENT, "select[name=\"dep\"]", InputKind::Select),
        );
        mapping.insert(
            keys::GENDER.into(),
            mapping_entry(keys::GENDER, "select[name=\"gender\"]", InputKind::Select),
        );
        let plan = plan_for(&mapping);
        assert_eq!(plan[keys::DEPARTMENT].value, "");
        assert_eq!(
            plan[keys::DEPARTMENT].auto_action,
            Some(AutoAction::SelectByAlgorithm)
        );
        assert_eq!(plan[keys::GENDER].value, "男性");
        assert_eq!(plan[keys::GENDER].auto_action, None);
    }

    #[test]
    fn test_prefecture_from_address_part_one() {
        let mut mapping = Mapping::new();
        mapping.insert(
            keys::PREFECTURE.into(),
            mapping_entry(keys::PREFECTURE, "select[name=\"pref\"]", InputKind::Select),
        );
        let plan = plan_for(&mapping);
        assert_eq!(plan[keys::PREFECTURE].value, "東京都");
    }

    #[test]
    fn test_fax_fields_skipped() {
        let mut mapping = Mapping::new();
        mapping.insert(
            keys::PHONE.into(),
            mapping_entry(keys::PHONE, "input[name=\"fax\"]", InputKind::Text),
        );
        let plan = plan_for(&mapping);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_incomplete_email_patched_and_confirm_synced() {
        let mut mapping = Mapping::new();
        mapping.insert(
            keys::EMAIL.into(),
            mapping_entry(keys::EMAIL, "input[name=\"mail\"]", InputKind::Email),
        );
        let mut confirm =
            mapping_entry(keys::EMAIL_CONFIRM, "input[name=\"mail2\"]", InputKind::Email);
        confirm.auto_action = Some(AutoAction::CopyFrom);
        confirm.copy_from = Some(keys::EMAIL.to_string());
        mapping.insert(keys::EMAIL_CONFIRM.into(), confirm);

        let mut split_values = HashMap::new();
        // A split-detector slip assigned only the local part.
        split_values.insert(keys::EMAIL.to_string(), "t.yamada".to_string());
        let plan = assign_input_values(
            &mapping,
            &[],
            &split_values,
            &FormSnapshot::default(),
            &RequiredAnalysis::default(),
            &tenant(),
        );
        assert_eq!(plan[keys::EMAIL].value, "t.yamada@example.co.jp");
    }

    #[test]
    fn test_name_values_enforced_from_client() {
        let mut mapping = Mapping::new();
        mapping.insert(
            keys::LAST_NAME.into(),
            mapping_entry(keys::LAST_NAME, "input[name=\"sei\"]", InputKind::Text),
        );
        let mut split_values = HashMap::new();
        split_values.insert(keys::LAST_NAME.to_string(), "誤った値".to_string());
        let plan = assign_input_values(
            &mapping,
            &[],
            &split_values,
            &FormSnapshot::default(),
            &RequiredAnalysis::default(),
            &tenant(),
        );
        assert_eq!(plan[keys::LAST_NAME].value, "山田");
    }

    #[test]
    fn test_required_phone_part_rescue() {
        let required = RequiredAnalysis {
            required_elements: vec![crate::analyzer::preprocess::RequiredElement {
                name: "tel2".into(),
                id: String::new(),
                selector: "input[name=\"tel2\"]".into(),
            }],
            ..Default::default()
        };
        let plan = assign_input_values(
            &Mapping::new(),
            &[],
            &HashMap::new(),
            &FormSnapshot::default(),
            &required,
            &tenant(),
        );
        assert_eq!(plan["auto_phone_part_2"].value, "6825");
    }

    #[test]
    fn test_split_values_take_precedence() {
        let mut mapping = Mapping::new();
        mapping.insert(
            keys::PHONE_1.into(),
            mapping_entry(keys::PHONE_1, "input[name=\"tel1\"]", InputKind::Text),
        );
        let mut split_values = HashMap::new();
        split_values.insert(keys::PHONE_1.to_string(), "03".to_string());
        let plan = assign_input_values(
            &mapping,
            &[],
            &split_values,
            &FormSnapshot::default(),
            &RequiredAnalysis::default(),
            &tenant(),
        );
        assert_eq!(plan[keys::PHONE_1].value, "03");
    }

    #[test]
    fn test_required_empty_text_gets_filler() {
        let mut mapping = Mapping::new();
        let mut m = mapping_entry(keys::DEPARTMENT, "input[name=\"dep\"]", InputKind::Text);
        m.required = true;
        mapping.insert(keys::DEPARTMENT.into(), m);
        let mut tenant = tenant();
        tenant.client.department.clear();
        let plan = assign_input_values(
            &mapping,
            &[],
            &HashMap::new(),
            &FormSnapshot::default(),
            &RequiredAnalysis::default(),
            &tenant,
        );
        assert_eq!(plan[keys::DEPARTMENT].value, FILLER);
    }
}
