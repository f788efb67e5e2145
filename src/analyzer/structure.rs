//! Form structure types and analysis.
//!
//! The browser layer harvests the page into a `FormSnapshot` in one JS pass;
//! everything here is pure Rust over that snapshot. When no `<form>` exists
//! the structure is empty by design: field mapping never scans outside a
//! form boundary (only the prohibition detector may).

use serde::{Deserialize, Serialize};

/// Bounding box in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One `<option>` of a select element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionInfo {
    pub text: String,
    pub value: String,
}

/// Parent element summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParentInfo {
    pub tag: String,
    pub class_name: String,
    pub id: String,
    /// Truncated text content
    pub text: String,
}

/// Detailed record of one form control, harvested in DOM order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Index in the harvested DOM order (all controls)
    pub index: usize,
    pub tag: String,
    /// The `type` attribute, lowercased; empty when absent
    pub type_attr: String,
    pub name: String,
    pub id: String,
    pub class_name: String,
    pub placeholder: String,
    /// Stable selector (id > name+type > name > tag+type)
    pub selector: String,
    pub required: bool,
    pub visible: bool,
    pub enabled: bool,
    pub checked: bool,
    #[serde(default)]
    pub bounds: Option<Bounds>,
    /// Label via `for=`, ancestor label, or aria-labelledby
    pub label_text: String,
    /// Parent text minus the input's own value
    pub associated_text: String,
    /// Short texts from nearby siblings
    #[serde(default)]
    pub nearby_text: Vec<String>,
    #[serde(default)]
    pub parent: Option<ParentInfo>,
    /// Select options, present for `<select>` only
    #[serde(default)]
    pub options: Vec<OptionInfo>,
    /// Header text of the containing table cell's column, if any
    #[serde(default)]
    pub table_header: String,
}

impl ElementInfo {
    /// All attribute-ish text joined for token matching, lowercased.
    pub fn attr_blob(&self) -> String {
        format!("{} {} {} {}", self.name, self.id, self.class_name, self.placeholder)
            .to_lowercase()
    }

    /// Attribute and text context joined, lowercased.
    pub fn full_blob(&self) -> String {
        format!(
            "{} {} {} {} {} {} {}",
            self.name,
            self.id,
            self.class_name,
            self.placeholder,
            self.label_text,
            self.associated_text,
            self.nearby_text.join(" ")
        )
        .to_lowercase()
    }

    /// Whether this is a fillable input (not hidden/submit/button/image).
    pub fn is_fillable(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea" | "select")
            && !matches!(self.type_attr.as_str(), "hidden" | "submit" | "image" | "button")
    }
}

/// Submit-button candidate harvested alongside the form controls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ButtonInfo {
    pub selector: String,
    pub tag: String,
    pub type_attr: String,
    pub text: String,
    pub value: String,
    pub aria_label: String,
    pub visible: bool,
    pub enabled: bool,
}

impl ButtonInfo {
    /// Text, value and aria-label merged for keyword checks.
    pub fn merged_text(&self) -> String {
        format!("{} {} {}", self.text, self.value, self.aria_label)
            .trim()
            .to_string()
    }
}

/// Per-form counters used to pick the primary form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormCandidate {
    pub index: usize,
    pub email_inputs: usize,
    pub text_inputs: usize,
    pub textareas: usize,
    pub selects: usize,
    pub search_inputs: usize,
    pub hidden_inputs: usize,
    pub submit_controls: usize,
    pub required_count: usize,
    /// action + class + id + role, lowercased
    pub attr_text: String,
    /// First button text
    pub button_text: String,
    pub visible: bool,
}

/// Table classification by form-element-to-cell ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    FormTable,
    DataTable,
    LayoutTable,
}

/// Per-table counters for table classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableStat {
    pub total_cells: usize,
    pub form_controls: usize,
    pub class_and_id: String,
}

/// The harvested page, scoped to the chosen primary form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormSnapshot {
    pub url: String,
    pub has_form: bool,
    /// action/id/class/role of the chosen form
    pub form_attr_text: String,
    #[serde(default)]
    pub form_bounds: Option<Bounds>,
    /// Controls inside the form, DOM order
    pub elements: Vec<ElementInfo>,
    /// Submit candidates inside the form, DOM order
    #[serde(default)]
    pub buttons: Vec<ButtonInfo>,
    /// Tables inside the form
    #[serde(default)]
    pub tables: Vec<TableStat>,
    /// Whether the analysis ran inside a child frame
    #[serde(default)]
    pub in_iframe: bool,
}

impl FormSnapshot {
    /// Selectors of fillable inputs in DOM order. This is the "input-only
    /// order" the split detector validates contiguity against.
    pub fn input_order(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter(|e| e.is_fillable())
            .map(|e| e.selector.as_str())
            .collect()
    }

    /// Index of a selector in the input-only order.
    pub fn input_order_index(&self, selector: &str) -> Option<usize> {
        self.input_order().iter().position(|s| *s == selector)
    }

    pub fn textarea_count(&self) -> usize {
        self.elements.iter().filter(|e| e.tag == "textarea").count()
    }

    /// Classification of every table inside the form.
    pub fn table_kinds(&self) -> Vec<TableKind> {
        self.tables
            .iter()
            .map(|t| classify_table(t.total_cells, t.form_controls, &t.class_and_id))
            .collect()
    }

    /// Whether the DOM contains any email-capable input: an `email`-typed
    /// input, or a text input whose attributes/label carry email tokens.
    pub fn has_email_capable_input(&self) -> bool {
        self.elements.iter().any(|e| {
            if e.tag != "input" {
                return false;
            }
            match e.type_attr.as_str() {
                "email" | "mail" => true,
                "" | "text" => {
                    let blob = e.full_blob();
                    ["email", "e-mail", "メール"].iter().any(|t| blob.contains(t))
                        || blob.contains("mail ")
                        || blob.ends_with("mail")
                }
                _ => false,
            }
        })
    }
}

/// Weights for scoring candidate forms; a strong textarea/email presence
/// marks a contact form, search and unsubscribe tokens disqualify.
const CONTACT_KEYWORDS: &[&str] =
    &["contact", "inquiry", "お問い合わせ", "問い合わせ", "toiawase", "お問合せ", "問合せ"];
const NEGATIVE_KEYWORDS: &[&str] =
    &["search", "order", "checkout", "cart", "unsubscribe", "解除", "配信停止", "退会", "削除"];

/// Score one candidate form.
pub fn score_form_candidate(c: &FormCandidate) -> f64 {
    let mut score = 0.0;
    score += c.email_inputs as f64 * 3.0;
    score += c.textareas as f64 * 3.5;
    score += c.text_inputs as f64 * 1.5;
    score += c.selects as f64 * 1.0;
    score += (c.submit_controls.min(3)) as f64 * 0.2;
    score -= c.search_inputs as f64 * 2.0;
    score -= (c.hidden_inputs.min(10)) as f64 * 0.05;

    let meta = format!("{} {}", c.attr_text, c.button_text).to_lowercase();
    if CONTACT_KEYWORDS.iter().any(|k| meta.contains(k)) {
        score += 5.0;
    }
    if meta.contains("subscribe") || meta.contains("登録") {
        score += 2.0;
    }
    if NEGATIVE_KEYWORDS.iter().any(|k| meta.contains(k)) {
        score -= 6.0;
    }
    score += (c.required_count as f64 * 0.5).min(5.0);

    if !c.visible {
        score *= 0.1;
    }
    score
}

/// Pick the primary form among candidates; None when the page has no form.
pub fn select_primary_form(candidates: &[FormCandidate]) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    if candidates.len() == 1 {
        return Some(candidates[0].index);
    }
    candidates
        .iter()
        .map(|c| (c.index, score_form_candidate(c)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx)
}

/// Structural similarity between two controls (0-1). Same tag, same type,
/// same parent tag and overlapping classes mark members of a parallel group.
pub fn structure_similarity(a: &ElementInfo, b: &ElementInfo) -> f64 {
    let mut score = 0.0;
    if a.tag == b.tag {
        score += 0.3;
    }
    if a.type_attr == b.type_attr {
        score += 0.2;
    }
    match (&a.parent, &b.parent) {
        (Some(pa), Some(pb)) if pa.tag == pb.tag => score += 0.3,
        _ => {}
    }
    let ca: std::collections::HashSet<&str> = a.class_name.split_whitespace().collect();
    let cb: std::collections::HashSet<&str> = b.class_name.split_whitespace().collect();
    if !ca.is_empty() && !cb.is_empty() {
        let inter = ca.intersection(&cb).count() as f64;
        let union = ca.union(&cb).count() as f64;
        score += (inter / union) * 0.2;
    }
    score
}

/// Detect parallel groups: runs of structurally similar controls above the
/// threshold. Each group has at least two members.
pub fn detect_parallel_groups(elements: &[ElementInfo], threshold: f64) -> Vec<Vec<usize>> {
    let mut groups = Vec::new();
    let mut used = vec![false; elements.len()];
    for (i, a) in elements.iter().enumerate() {
        if used[i] {
            continue;
        }
        let mut group = vec![i];
        for (j, b) in elements.iter().enumerate().skip(i + 1) {
            if used[j] {
                continue;
            }
            if structure_similarity(a, b) >= threshold {
                group.push(j);
            }
        }
        if group.len() >= 2 {
            for &idx in &group {
                used[idx] = true;
            }
            groups.push(group);
        }
    }
    groups
}

/// Classify a table by its form-element-to-cell ratio and naming.
pub fn classify_table(total_cells: usize, form_elements: usize, class_and_id: &str) -> TableKind {
    if total_cells == 0 {
        return TableKind::LayoutTable;
    }
    if form_elements > 0 {
        return TableKind::FormTable;
    }
    let lower = class_and_id.to_lowercase();
    if ["layout", "design", "style", "container"].iter().any(|k| lower.contains(k)) {
        TableKind::LayoutTable
    } else {
        TableKind::DataTable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn contact_form() -> FormCandidate {
        FormCandidate {
            index: 0,
            email_inputs: 1,
            text_inputs: 4,
            textareas: 1,
            selects: 1,
            submit_controls: 1,
            required_count: 3,
            attr_text: "contact-form".into(),
            visible: true,
            ..Default::default()
        }
    }

    fn search_form() -> FormCandidate {
        FormCandidate {
            index: 1,
            text_inputs: 1,
            search_inputs: 1,
            submit_controls: 1,
            attr_text: "global-search".into(),
            visible: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_contact_form_beats_search_form() {
        let picked = select_primary_form(&[search_form(), contact_form()]);
        assert_eq!(picked, Some(0));
    }

    #[test]
    fn test_invisible_form_is_penalized() {
        let mut hidden = contact_form();
        hidden.visible = false;
        hidden.index = 0;
        let mut modest = search_form();
        modest.attr_text = "entry".into();
        modest.search_inputs = 0;
        modest.text_inputs = 3;
        modest.selects = 1;
        modest.index = 1;
        assert_eq!(select_primary_form(&[hidden, modest]), Some(1));
    }

    #[test]
    fn test_unsubscribe_form_strongly_negative() {
        let mut unsub = contact_form();
        unsub.attr_text = "newsletter unsubscribe".into();
        assert!(score_form_candidate(&unsub) < score_form_candidate(&contact_form()));
    }

    #[test]
    fn test_no_form_returns_none() {
        assert_eq!(select_primary_form(&[]), None);
    }

    fn text_input(idx: usize, name: &str, class_name: &str) -> ElementInfo {
        ElementInfo {
            index: idx,
            tag: "input".into(),
            type_attr: "text".into(),
            name: name.into(),
            selector: format!("input[name=\"{name}\"]"),
            class_name: class_name.into(),
            visible: true,
            enabled: true,
            parent: Some(ParentInfo {
                tag: "td".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parallel_group_detection() {
        let elements = vec![
            text_input(0, "tel1", "part"),
            text_input(1, "tel2", "part"),
            text_input(2, "tel3", "part"),
            ElementInfo {
                index: 3,
                tag: "textarea".into(),
                selector: "textarea[name=\"msg\"]".into(),
                visible: true,
                enabled: true,
                ..Default::default()
            },
        ];
        let groups = detect_parallel_groups(&elements, 0.8);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0], vec![0, 1, 2]);
    }

    #[test]
    fn test_input_order_skips_hidden_and_buttons() {
        let snapshot = FormSnapshot {
            elements: vec![
                ElementInfo {
                    tag: "input".into(),
                    type_attr: "hidden".into(),
                    selector: "input[name=\"csrf\"]".into(),
                    ..Default::default()
                },
                text_input(1, "sei", ""),
                text_input(2, "mei", ""),
            ],
            ..Default::default()
        };
        assert_eq!(
            snapshot.input_order(),
            vec!["input[name=\"sei\"]", "input[name=\"mei\"]"]
        );
        assert_eq!(snapshot.input_order_index("input[name=\"mei\"]"), Some(1));
    }

    #[test]
    fn test_email_capable_detection() {
        let mut snapshot = FormSnapshot::default();
        snapshot.elements.push(ElementInfo {
            tag: "input".into(),
            type_attr: "text".into(),
            name: "your_mail".into(),
            ..Default::default()
        });
        assert!(snapshot.has_email_capable_input());
        snapshot.elements[0].name = "zipcode".into();
        snapshot.elements[0].type_attr = "checkbox".into();
        assert!(!snapshot.has_email_capable_input());
    }

    #[test]
    fn test_table_classification() {
        assert_eq!(classify_table(10, 4, "entry"), TableKind::FormTable);
        assert_eq!(classify_table(10, 0, "pricing"), TableKind::DataTable);
        assert_eq!(classify_table(10, 0, "layout-grid"), TableKind::LayoutTable);
        assert_eq!(classify_table(0, 0, ""), TableKind::LayoutTable);
    }
}
