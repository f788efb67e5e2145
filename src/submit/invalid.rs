//! Invalid/required field inspection and the retry-fill planner.
//!
//! After a failed judgment, the page is scanned for controls that are
//! still invalid or required-and-empty. Fields filled on the first pass
//! are excluded; the remainder get safe defaults: checkbox groups by the
//! keyword-priority rules, selects by their first valid option, text by
//! hint-driven synthesis.

use crate::analyzer::assigner::AssignedInput;
use crate::analyzer::combination;
use crate::analyzer::mapper::{AutoAction, InputKind};
use crate::analyzer::unmapped::choose_priority_index;
use crate::browser::PageHandle;
use crate::config::{ChoicePriorityConfig, TenantConfig};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Scans form controls for HTML5/ARIA validation failures and empty
/// required fields, returning selector + normalized type + short hint.
const INVALID_FIELDS_SCRIPT: &str = r#"
const OUT = [];
const ctrls = Array.from(document.querySelectorAll('form input, form textarea, form select'));
const isVisible = (el) => !!el.offsetParent && getComputedStyle(el).visibility !== 'hidden';
const buildSelector = (el) => {
  const id = el.getAttribute('id');
  if (id) return `[id="${CSS.escape(id)}"]`;
  const name = el.getAttribute('name');
  const tag = (el.tagName || 'input').toLowerCase();
  const type = (el.getAttribute('type') || '').toLowerCase();
  if (name && type) return `${tag}[name="${name}"][type="${type}"]`;
  if (name) return `${tag}[name="${name}"]`;
  return tag;
};
const hintFor = (el) => {
  const id = el.getAttribute('id');
  if (id) {
    try {
      const l = document.querySelector(`label[for="${CSS.escape(id)}"]`);
      if (l && l.innerText) return l.innerText.trim();
    } catch (e) {}
  }
  const parent = el.closest('label');
  if (parent && parent.innerText) return parent.innerText.trim();
  return (el.getAttribute('placeholder') || el.getAttribute('aria-label') ||
          el.getAttribute('name') || el.getAttribute('id') || '').trim();
};
const normalizeType = (el) => {
  const tag = (el.tagName || '').toLowerCase();
  if (tag === 'textarea') return 'textarea';
  if (tag === 'select') return 'select';
  const type = (el.getAttribute('type') || 'text').toLowerCase();
  return ['email', 'tel', 'url', 'radio', 'checkbox', 'password', 'number'].includes(type) ? type : 'text';
};
const isInvalid = (el) => {
  try { if (typeof el.checkValidity === 'function' && !el.checkValidity()) return true; } catch (e) {}
  if ((el.getAttribute('aria-invalid') || '').toLowerCase() === 'true') return true;
  const required = el.hasAttribute('required') || (el.getAttribute('aria-required') || '').toLowerCase() === 'true';
  if (!required) return false;
  const tag = (el.tagName || '').toLowerCase();
  if (tag === 'input' && (el.type === 'checkbox' || el.type === 'radio')) return !el.checked;
  return !(el.value || '').trim();
};
const firstValidOption = (el) => {
  const skip = ['選択してください', '選択して下さい', 'お選びください', 'please select', '--', '-', 'none', 'なし', '未選択'];
  for (const o of Array.from(el.options || [])) {
    const text = (o.textContent || '').trim();
    const value = (o.value || '').trim();
    if (!text && !value) continue;
    if (skip.some(s => text.toLowerCase().includes(s))) continue;
    return { value, text };
  }
  return null;
};
for (const el of ctrls) {
  try {
    if (!isVisible(el) || el.disabled) continue;
    if (!isInvalid(el)) continue;
    const entry = {
      selector: buildSelector(el),
      input_type: normalizeType(el),
      hint: hintFor(el).slice(0, 30),
      reason: (el.validationMessage || '').trim() || 'required',
      meta: {
        name: el.getAttribute('name') || '',
        id: el.getAttribute('id') || '',
        class: el.getAttribute('class') || ''
      }
    };
    if (entry.input_type === 'select') {
      const fo = firstValidOption(el);
      if (fo) entry.select_first_option = fo;
    }
    OUT.push(entry);
  } catch (e) {}
}
return OUT;
"#;

/// Attribute identity of an invalid control, value-free.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidMeta {
    pub name: String,
    pub id: String,
    pub class: String,
}

/// One invalid/required control found after a failed judgment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidField {
    pub selector: String,
    pub input_type: String,
    pub hint: String,
    pub reason: String,
    pub meta: InvalidMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select_first_option: Option<SelectOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectOption {
    pub value: String,
    pub text: String,
}

/// Run the inspector in the current frame context.
pub async fn detect_invalid_required_fields(page: &PageHandle) -> Result<Vec<InvalidField>> {
    let ret = page.driver().execute(INVALID_FIELDS_SCRIPT, Vec::new()).await?;
    Ok(serde_json::from_value(ret.json().clone()).unwrap_or_default())
}

fn text_blob(entry: &InvalidField) -> String {
    let base = if entry.hint.is_empty() {
        format!("{} {} {}", entry.meta.name, entry.meta.id, entry.meta.class)
    } else {
        entry.hint.clone()
    };
    base.to_lowercase()
}

/// Synthesize a safe value for a non-choice invalid field from its hint.
fn rescue_value(entry: &InvalidField, tenant: &TenantConfig) -> String {
    let blob = format!("{} {}", text_blob(entry), entry.input_type);
    if entry.input_type == "email" || ["email", "e-mail", "メール"].iter().any(|t| blob.contains(t))
    {
        return combination::email(&tenant.client);
    }
    if entry.input_type == "tel" || ["tel", "phone", "電話"].iter().any(|t| blob.contains(t)) {
        return combination::phone(&tenant.client);
    }
    if entry.input_type == "textarea"
        || ["お問い合わせ", "問合せ", "内容", "本文", "メッセージ", "message"]
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
    if ["住所", "address"].iter().any(|t| blob.contains(t)) {
        return combination::address(&tenant.client);
    }
    if ["郵便", "〒", "zip"].iter().any(|t| blob.contains(t)) {
        return combination::postal_code(&tenant.client);
    }
    String::new()
}

/// Plan retry fills for the invalid fields that were not filled on the
/// first pass. Returns (label, assignment) pairs in a stable order.
pub fn plan_retry_fills(
    invalids: &[InvalidField],
    initially_filled: &HashSet<String>,
    config: &ChoicePriorityConfig,
    tenant: &TenantConfig,
) -> Vec<(String, AssignedInput)> {
    let pending: Vec<&InvalidField> = invalids
        .iter()
        .filter(|f| !initially_filled.contains(&f.selector))
        .collect();
    let mut out: Vec<(String, AssignedInput)> = Vec::new();

    // Checkbox groups keyed by name > id > class.
    let mut groups: HashMap<String, Vec<&InvalidField>> = HashMap::new();
    for entry in pending.iter().filter(|f| f.input_type == "checkbox") {
        let key = if !entry.meta.name.is_empty() {
            entry.meta.name.clone()
        } else if !entry.meta.id.is_empty() {
            entry.meta.id.clone()
        } else if !entry.meta.class.is_empty() {
            entry.meta.class.clone()
        } else {
            format!("cb:{}", entry.selector)
        };
        groups.entry(key).or_default().push(entry);
    }
    let mut group_keys: Vec<&String> = groups.keys().collect();
    group_keys.sort();
    for key in group_keys {
        let members = &groups[key];
        let texts: Vec<String> = members.iter().map(|m| text_blob(m)).collect();
        let is_privacy = texts.iter().any(|t| {
            config.privacy_keywords.iter().any(|k| t.contains(&k.to_lowercase()))
        });
        let negative = |t: &str| config.negative_tokens.iter().any(|k| t.contains(&k.to_lowercase()));

        let mut targets: Vec<usize> = Vec::new();
        if config.select_all_when_group_required && members.len() > 1 {
            for (i, t) in texts.iter().enumerate() {
                if is_privacy && negative(t) {
                    continue;
                }
                targets.push(i);
            }
        } else if is_privacy {
            let agree = texts.iter().position(|t| {
                config.agree_tokens.iter().any(|k| t.contains(&k.to_lowercase())) && !negative(t)
            });
            targets.push(agree.unwrap_or_else(|| choose_priority_index(&texts, config)));
        } else {
            targets.push(choose_priority_index(&texts, config));
        }
        targets.dedup();
        targets.truncate(config.max_group_select.max(1));
        for idx in targets {
            let entry = members[idx];
            out.push((
                format!("retry_checkbox:{}", entry.selector),
                AssignedInput {
                    selector: entry.selector.clone(),
                    input_kind: InputKind::Checkbox,
                    value: "true".into(),
                    required: true,
                    auto_action: Some(AutoAction::Default),
                    copy_from: None,
                    selected_index: None,
                },
            ));
        }
    }

    // Everything else: select / radio / text-like defaults.
    for entry in pending.iter().filter(|f| f.input_type != "checkbox") {
        let (kind, value, auto_action) = match entry.input_type.as_str() {
            "select" => {
                let Some(option) = &entry.select_first_option else {
                    continue;
                };
                let value = if option.value.is_empty() {
                    option.text.clone()
                } else {
                    option.value.clone()
                };
                (InputKind::Select, value, None)
            }
            "radio" => (InputKind::Radio, "true".to_string(), Some(AutoAction::Default)),
            "textarea" => {
                let v = rescue_value(entry, tenant);
                (
                    InputKind::Textarea,
                    if v.is_empty() { "ー".to_string() } else { v },
                    None,
                )
            }
            other => {
                let v = rescue_value(entry, tenant);
                let kind = match other {
                    "email" => InputKind::Email,
                    "tel" => InputKind::Tel,
                    "url" => InputKind::Url,
                    "number" => InputKind::Number,
                    _ => InputKind::Text,
                };
                (kind, if v.is_empty() { "ー".to_string() } else { v }, None)
            }
        };
        out.push((
            format!("retry_{}:{}", entry.input_type, entry.selector),
            AssignedInput {
                selector: entry.selector.clone(),
                input_kind: kind,
                value,
                required: true,
                auto_action,
                copy_from: None,
                selected_index: None,
            },
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tenant() -> TenantConfig {
        TenantConfig::sample()
    }

    fn config() -> ChoicePriorityConfig {
        ChoicePriorityConfig::default()
    }

    fn invalid(selector: &str, input_type: &str, hint: &str, name: &str) -> InvalidField {
        InvalidField {
            selector: selector.into(),
            input_type: input_type.into(),
            hint: hint.into(),
            reason: "required".into(),
            meta: InvalidMeta {
                name: name.into(),
                ..Default::default()
            },
            select_first_option: None,
        }
    }

    #[test]
    fn test_initially_filled_excluded() {
        let invalids = vec![invalid("#email", "email", "メールアドレス", "email")];
        let filled: HashSet<String> = ["#email".to_string()].into_iter().collect();
        assert!(plan_retry_fills(&invalids, &filled, &config(), &tenant()).is_empty());
    }

    #[test]
    fn test_checkbox_group_select_all() {
        let invalids = vec![
            invalid("#a", "checkbox", "資料請求", "topics"),
            invalid("#b", "checkbox", "営業のご提案", "topics"),
        ];
        let plan = plan_retry_fills(&invalids, &HashSet::new(), &config(), &tenant());
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_privacy_group_skips_newsletter() {
        let invalids = vec![
            invalid("#agree", "checkbox", "プライバシーポリシーに同意", "consent"),
            invalid("#news", "checkbox", "メルマガを受け取る", "consent"),
        ];
        let plan = plan_retry_fills(&invalids, &HashSet::new(), &config(), &tenant());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].1.selector, "#agree");
    }

    #[test]
    fn test_select_uses_first_valid_option() {
        let mut entry = invalid("#pref", "select", "都道府県", "pref");
        entry.select_first_option = Some(SelectOption {
            value: "tokyo".into(),
            text: "東京都".into(),
        });
        let plan = plan_retry_fills(&[entry], &HashSet::new(), &config(), &tenant());
        assert_eq!(plan[0].1.value, "tokyo");

        // No usable option: the select is skipped entirely.
        let entry = invalid("#pref", "select", "都道府県", "pref");
        assert!(plan_retry_fills(&[entry], &HashSet::new(), &config(), &tenant()).is_empty());
    }

    #[test]
    fn test_text_hint_synthesis_and_fallback() {
        let invalids = vec![
            invalid("#tel", "tel", "電話番号", "tel"),
            invalid("#x", "text", "ご要望など", "free_field"),
        ];
        let plan = plan_retry_fills(&invalids, &HashSet::new(), &config(), &tenant());
        let tel = plan.iter().find(|(l, _)| l.contains("#tel")).unwrap();
        assert_eq!(tel.1.value, "0368250324");
        let free = plan.iter().find(|(l, _)| l.contains("#x")).unwrap();
        assert_eq!(free.1.value, "ー");
    }

    #[test]
    fn test_radio_checked_by_default() {
        let plan = plan_retry_fills(
            &[invalid("#r", "radio", "その他", "kind")],
            &HashSet::new(),
            &config(),
            &tenant(),
        );
        assert_eq!(plan[0].1.input_kind, InputKind::Radio);
        assert_eq!(plan[0].1.value, "true");
    }
}
