//! Form input execution.
//!
//! Fills one planned assignment at a time against the live page: text-like
//! controls fill then verify by reading back; selects run the auto-action
//! directives then value, label, and finally the three-stage keyword
//! algorithm; checkboxes walk a fallback chain ending in a JS `checked=`
//! write with synthetic events.

use crate::analyzer::assigner::AssignedInput;
use crate::analyzer::mapper::{AutoAction, InputKind};
use crate::browser::PageHandle;
use crate::error::Result;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use thirtyfour::prelude::*;
use tracing::{debug, warn};

/// Three-stage select algorithm, executed in page context so option
/// enumeration costs one round-trip. Returns the chosen index or -1.
const SELECT_ALGORITHM_SCRIPT: &str = r#"
const el = document.querySelector(arguments[0]);
if (!el || !el.options) return -1;
const texts = Array.from(el.options).map(o => ((o.textContent || '').trim()));
const values = Array.from(el.options).map(o => (o.value || '').trim());
const pri1 = ['営業', '提案', 'メール', 'contact', 'inquiry', '問合せ', 'お問い合わせ'];
const pri2 = ['その他', 'other', '該当なし', '該当しない', 'not applicable', 'n/a'];
const placeholders = ['選択してください', '選択して下さい', 'お選びください', 'お選び下さい',
                      'please select', 'select', 'choose', '未選択', '未定'];
const lastMatch = (keys) => {
  let found = -1;
  texts.forEach((t, i) => {
    if (keys.some(k => t.toLowerCase().includes(k.toLowerCase()))) found = i;
  });
  return found;
};
let idx = lastMatch(pri1);
if (idx < 0) idx = lastMatch(pri2);
if (idx < 0) {
  const last = texts.length - 1;
  if (last >= 0 && (texts[last] || values[last])) idx = last;
}
if (idx < 0) {
  for (let i = 0; i < texts.length; i++) {
    if (!(texts[i] || values[i])) continue;
    if (placeholders.some(p => texts[i].toLowerCase().includes(p))) continue;
    idx = i;
    break;
  }
}
if (idx < 0) return -1;
el.selectedIndex = idx;
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
return idx;
"#;

const SELECT_BY_INDEX_SCRIPT: &str = r#"
const el = document.querySelector(arguments[0]);
if (!el || !el.options || arguments[1] < 0 || arguments[1] >= el.options.length) return false;
el.selectedIndex = arguments[1];
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
return true;
"#;

const SELECT_BY_VALUE_OR_LABEL_SCRIPT: &str = r#"
const el = document.querySelector(arguments[0]);
if (!el || !el.options) return false;
const wanted = arguments[1];
let idx = Array.from(el.options).findIndex(o => (o.value || '') === wanted);
if (idx < 0) idx = Array.from(el.options).findIndex(o => ((o.textContent || '').trim()) === wanted);
if (idx < 0) return false;
el.selectedIndex = idx;
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
return true;
"#;

const CHECKBOX_JS_FALLBACK_SCRIPT: &str = r#"
const el = document.querySelector(arguments[0]);
if (!el) return false;
el.checked = !!arguments[1];
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
return el.checked === !!arguments[1];
"#;

const LABEL_CLICK_SCRIPT: &str = r#"
const el = document.querySelector(arguments[0]);
if (!el) return false;
const id = el.getAttribute('id');
if (id) {
  const label = document.querySelector(`label[for="${CSS.escape(id)}"]`);
  if (label) { label.scrollIntoView({ block: 'center' }); label.click(); return true; }
}
const parent = el.closest('label');
if (parent) { parent.scrollIntoView({ block: 'center' }); parent.click(); return true; }
return false;
"#;

/// Executes planned assignments and tracks what was actually filled.
pub struct FormInputHandler {
    post_input_delay: Duration,
    /// Selectors filled on the first pass; the retry path skips these
    filled_selectors: HashSet<String>,
}

impl FormInputHandler {
    pub fn new(post_input_delay_ms: u64) -> Self {
        Self {
            post_input_delay: Duration::from_millis(post_input_delay_ms),
            filled_selectors: HashSet::new(),
        }
    }

    pub fn filled_selectors(&self) -> &HashSet<String> {
        &self.filled_selectors
    }

    /// Fill one field; returns true when the write verified.
    pub async fn fill_field(
        &mut self,
        page: &PageHandle,
        field: &str,
        assignment: &AssignedInput,
    ) -> Result<bool> {
        let kind = assignment.input_kind;
        // Text-like fields without a value are skipped; choice controls
        // proceed (the algorithm or the check itself supplies the action).
        if kind.is_text_like() && assignment.value.trim().is_empty() {
            debug!(field, "skipping empty text assignment");
            return Ok(false);
        }
        let ok = match kind {
            InputKind::Select => self.fill_select(page, assignment).await?,
            InputKind::Checkbox => self.fill_checkbox(page, assignment).await?,
            InputKind::Radio => self.fill_radio(page, assignment).await?,
            _ => self.fill_text_like(page, assignment).await?,
        };
        if ok {
            tokio::time::sleep(self.post_input_delay).await;
            let verified = self.verify(page, assignment).await.unwrap_or(false);
            if verified {
                self.filled_selectors.insert(assignment.selector.clone());
                return Ok(true);
            }
            warn!(field, "fill verification failed");
            return Ok(false);
        }
        Ok(false)
    }

    async fn find(&self, page: &PageHandle, selector: &str) -> Result<Option<WebElement>> {
        match page.driver().find(By::Css(selector)).await {
            Ok(el) => Ok(Some(el)),
            Err(_) => Ok(None),
        }
    }

    async fn fill_text_like(&self, page: &PageHandle, a: &AssignedInput) -> Result<bool> {
        let Some(el) = self.find(page, &a.selector).await? else {
            warn!(selector = %a.selector, "element not found");
            return Ok(false);
        };
        el.clear().await.ok();
        el.send_keys(&a.value).await?;
        Ok(true)
    }

    async fn fill_select(&self, page: &PageHandle, a: &AssignedInput) -> Result<bool> {
        match a.auto_action {
            Some(AutoAction::SelectIndex) => {
                if let Some(idx) = a.selected_index {
                    let ret = page
                        .driver()
                        .execute(
                            SELECT_BY_INDEX_SCRIPT,
                            vec![json!(a.selector), json!(idx)],
                        )
                        .await?;
                    if ret.json().as_bool().unwrap_or(false) {
                        return Ok(true);
                    }
                }
            }
            Some(AutoAction::SelectByAlgorithm) => {
                return self.select_by_algorithm(page, &a.selector).await;
            }
            _ => {}
        }
        if !a.value.trim().is_empty() {
            let ret = page
                .driver()
                .execute(
                    SELECT_BY_VALUE_OR_LABEL_SCRIPT,
                    vec![json!(a.selector), json!(a.value)],
                )
                .await?;
            if ret.json().as_bool().unwrap_or(false) {
                return Ok(true);
            }
        }
        self.select_by_algorithm(page, &a.selector).await
    }

    async fn select_by_algorithm(&self, page: &PageHandle, selector: &str) -> Result<bool> {
        let ret = page
            .driver()
            .execute(SELECT_ALGORITHM_SCRIPT, vec![json!(selector)])
            .await?;
        Ok(ret.json().as_i64().unwrap_or(-1) >= 0)
    }

    async fn fill_checkbox(&self, page: &PageHandle, a: &AssignedInput) -> Result<bool> {
        let want_checked = !matches!(a.value.to_lowercase().as_str(), "false" | "0" | "no" | "");
        if let Some(el) = self.find(page, &a.selector).await? {
            el.scroll_into_view().await.ok();
            let click_result = if want_checked {
                el.click().await
            } else {
                // Unchecking only needs a click when currently checked.
                match el.is_selected().await {
                    Ok(true) => el.click().await,
                    _ => Ok(()),
                }
            };
            if click_result.is_ok() {
                if let Ok(state) = el.is_selected().await {
                    if state == want_checked {
                        return Ok(true);
                    }
                }
            }
        }
        // Fallback 1: label[for=] / closest label click.
        let label_ret = page
            .driver()
            .execute(LABEL_CLICK_SCRIPT, vec![json!(a.selector)])
            .await;
        if label_ret.is_ok() {
            if let Some(el) = self.find(page, &a.selector).await? {
                if el.is_selected().await.unwrap_or(false) == want_checked {
                    return Ok(true);
                }
            }
        }
        // Fallback 2: JS checked write + synthetic events.
        let ret = page
            .driver()
            .execute(
                CHECKBOX_JS_FALLBACK_SCRIPT,
                vec![json!(a.selector), json!(want_checked)],
            )
            .await?;
        Ok(ret.json().as_bool().unwrap_or(false))
    }

    async fn fill_radio(&self, page: &PageHandle, a: &AssignedInput) -> Result<bool> {
        let Some(el) = self.find(page, &a.selector).await? else {
            return Ok(false);
        };
        el.scroll_into_view().await.ok();
        if el.click().await.is_err() {
            let ret = page
                .driver()
                .execute(
                    CHECKBOX_JS_FALLBACK_SCRIPT,
                    vec![json!(a.selector), json!(true)],
                )
                .await?;
            return Ok(ret.json().as_bool().unwrap_or(false));
        }
        Ok(true)
    }

    async fn verify(&self, page: &PageHandle, a: &AssignedInput) -> Result<bool> {
        match a.input_kind {
            InputKind::Checkbox | InputKind::Radio => {
                let Some(el) = self.find(page, &a.selector).await? else {
                    return Ok(false);
                };
                let want = !matches!(a.value.to_lowercase().as_str(), "false" | "0" | "no" | "");
                Ok(el.is_selected().await.unwrap_or(false) == want)
            }
            InputKind::Select => {
                let ret = page
                    .driver()
                    .execute(
                        "const el = document.querySelector(arguments[0]); \
                         return el ? el.selectedIndex >= 0 && (el.value || '').length >= 0 : false;",
                        vec![json!(a.selector)],
                    )
                    .await?;
                Ok(ret.json().as_bool().unwrap_or(false))
            }
            _ => {
                let ret = page
                    .driver()
                    .execute(
                        "const el = document.querySelector(arguments[0]); \
                         return el ? (el.value || '') : null;",
                        vec![json!(a.selector)],
                    )
                    .await?;
                match ret.json() {
                    Value::String(actual) => Ok(actual.contains(a.value.trim())),
                    _ => Ok(false),
                }
            }
        }
    }
}
