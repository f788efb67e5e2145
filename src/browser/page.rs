//! Page driving: snapshot harvests and the response recorder.
//!
//! The DOM is read in single JS passes that return JSON matching the
//! snapshot types, so every heuristic downstream stays pure. Element
//! handles never leave this module.

use crate::analyzer::structure::{FormCandidate, FormSnapshot};
use crate::detection::bot::{BotProbe, BOT_PROBE_SCRIPT};
use crate::detection::prohibition::TARGETED_TEXTS_SCRIPT;
use crate::error::{Error, Result};
use crate::judge::success::PageState;
use serde_json::Value;
use std::time::Duration;
use thirtyfour::prelude::*;
use tracing::debug;

/// Lists candidate forms with the counters the primary-form scorer needs.
const FORM_CANDIDATES_SCRIPT: &str = r#"
return Array.from(document.querySelectorAll('form')).map((f, index) => {
  const style = getComputedStyle(f);
  const btn = f.querySelector('button, input[type="submit"]');
  return {
    index,
    email_inputs: f.querySelectorAll('input[type="email"], input[type="mail"]').length,
    text_inputs: f.querySelectorAll('input[type="text"], input[type="tel"], input[type="url"], input[type="number"], input:not([type])').length,
    textareas: f.querySelectorAll('textarea').length,
    selects: f.querySelectorAll('select').length,
    search_inputs: f.querySelectorAll('input[type="search"]').length,
    hidden_inputs: f.querySelectorAll('input[type="hidden"]').length,
    submit_controls: f.querySelectorAll('input[type="submit"], button[type="submit"], button').length,
    required_count: f.querySelectorAll('[required], [aria-required="true"], .wpcf7-validates-as-required').length,
    attr_text: ((f.getAttribute('action') || '') + ' ' + (f.className || '') + ' ' + (f.id || '') + ' ' + (f.getAttribute('role') || '')).toLowerCase(),
    button_text: btn ? (btn.innerText || btn.value || '') : '',
    visible: style.display !== 'none' && style.visibility !== 'hidden'
  };
});
"#;

/// Harvests the chosen form's controls and submit candidates in DOM order.
/// `arguments[0]` is the form index.
const FORM_HARVEST_SCRIPT: &str = r#"
const formIndex = arguments[0];
const form = document.querySelectorAll('form')[formIndex];
if (!form) return null;

const esc = (s) => (s || '').replace(/\\/g, '\\\\').replace(/"/g, '\\"');
const selectorFor = (el) => {
  const id = el.getAttribute('id');
  if (id) return `[id="${esc(id)}"]`;
  const name = el.getAttribute('name');
  const tag = (el.tagName || 'input').toLowerCase();
  const type = el.getAttribute('type');
  if (name && type) return `${tag}[name="${esc(name)}"][type="${esc(type)}"]`;
  if (name) return `${tag}[name="${esc(name)}"]`;
  if (tag === 'input' && type) return `${tag}[type="${esc(type)}"]`;
  return tag;
};
const labelFor = (el) => {
  const id = el.getAttribute('id');
  if (id) {
    try {
      const l = document.querySelector(`label[for="${CSS.escape(id)}"]`);
      if (l && l.textContent) return l.textContent.trim();
    } catch (e) {}
  }
  const parentLabel = el.closest('label');
  if (parentLabel && parentLabel.textContent) return parentLabel.textContent.trim();
  const labelledby = (el.getAttribute('aria-labelledby') || '').split(/\s+/)[0];
  if (labelledby) {
    const l = document.getElementById(labelledby);
    if (l && l.textContent) return l.textContent.trim();
  }
  return '';
};
const tableHeaderFor = (el) => {
  const cell = el.closest('td, th');
  if (!cell) return '';
  const row = cell.closest('tr');
  if (!row) return '';
  const th = row.querySelector('th');
  if (th && th !== cell && th.textContent) return th.textContent.trim();
  const table = cell.closest('table');
  if (!table) return '';
  const idx = Array.prototype.indexOf.call(row.cells, cell);
  const headRow = table.querySelector('tr');
  if (headRow && headRow !== row && headRow.cells[idx] && headRow.cells[idx].textContent) {
    return headRow.cells[idx].textContent.trim();
  }
  return '';
};
const nearbyTexts = (el) => {
  const out = [];
  let sib = el.previousElementSibling;
  let count = 0;
  while (sib && count < 3) {
    const t = (sib.textContent || '').trim();
    if (t && t.length < 100) out.push(t);
    sib = sib.previousElementSibling;
    count++;
  }
  sib = el.nextElementSibling;
  count = 0;
  while (sib && count < 2) {
    const t = (sib.textContent || '').trim();
    if (t && t.length < 100) out.push(t);
    sib = sib.nextElementSibling;
    count++;
  }
  return out;
};

const controls = form.querySelectorAll('input, textarea, select');
const elements = [];
let index = 0;
for (const el of controls) {
  const tag = (el.tagName || '').toLowerCase();
  const type = (el.getAttribute('type') || '').toLowerCase();
  const rect = el.getBoundingClientRect();
  const style = getComputedStyle(el);
  const visible = style.display !== 'none' && style.visibility !== 'hidden' && rect.width > 0 && rect.height > 0;
  const parent = el.parentElement;
  const ownValue = tag === 'input' ? (el.value || '') : (tag === 'textarea' ? (el.textContent || '') : '');
  let associated = parent ? (parent.textContent || '').trim() : '';
  if (associated && ownValue) associated = associated.replace(ownValue, '').trim();
  const record = {
    index,
    tag,
    type_attr: type,
    name: el.getAttribute('name') || '',
    id: el.getAttribute('id') || '',
    class_name: el.className || '',
    placeholder: el.getAttribute('placeholder') || '',
    selector: selectorFor(el),
    required: el.hasAttribute('required') || (el.getAttribute('aria-required') || '').toLowerCase() === 'true',
    visible,
    enabled: !el.disabled,
    checked: !!el.checked,
    bounds: { x: rect.x + window.scrollX, y: rect.y + window.scrollY, width: rect.width, height: rect.height },
    label_text: labelFor(el),
    associated_text: associated.slice(0, 300),
    nearby_text: nearbyTexts(el),
    parent: parent ? {
      tag: (parent.tagName || '').toLowerCase(),
      class_name: parent.className || '',
      id: parent.id || '',
      text: (parent.textContent || '').trim().slice(0, 200)
    } : null,
    options: tag === 'select'
      ? Array.from(el.options).map(o => ({ text: (o.textContent || '').trim(), value: o.value || '' }))
      : [],
    table_header: tableHeaderFor(el)
  };
  elements.push(record);
  index++;
}

const buttons = [];
for (const el of form.querySelectorAll('button, input[type="submit"], input[type="image"], [role="button"]')) {
  const style = getComputedStyle(el);
  const rect = el.getBoundingClientRect();
  buttons.push({
    selector: selectorFor(el),
    tag: (el.tagName || '').toLowerCase(),
    type_attr: (el.getAttribute('type') || '').toLowerCase(),
    text: (el.innerText || '').trim(),
    value: el.value || '',
    aria_label: el.getAttribute('aria-label') || '',
    visible: style.display !== 'none' && style.visibility !== 'hidden' && rect.width > 0,
    enabled: !el.disabled && (el.getAttribute('aria-disabled') || '') !== 'true'
  });
}

const tables = Array.from(form.querySelectorAll('table')).map(t => ({
  total_cells: t.querySelectorAll('td, th').length,
  form_controls: t.querySelectorAll('input, textarea, select').length,
  class_and_id: ((t.className || '') + ' ' + (t.id || '')).trim()
}));

const formRect = form.getBoundingClientRect();
return {
  url: location.href,
  has_form: true,
  tables,
  form_attr_text: ((form.getAttribute('action') || '') + ' ' + (form.className || '') + ' ' + (form.id || '') + ' ' + (form.getAttribute('role') || '')).toLowerCase(),
  form_bounds: { x: formRect.x + window.scrollX, y: formRect.y + window.scrollY, width: formRect.width, height: formRect.height },
  elements,
  buttons,
  in_iframe: window !== window.top
};
"#;

/// Harvests the judge's page state in one pass.
const PAGE_STATE_SCRIPT: &str = r#"
const visible = (el) => {
  const s = getComputedStyle(el);
  const r = el.getBoundingClientRect();
  return s.display !== 'none' && s.visibility !== 'hidden' && r.width > 0;
};
const errorTexts = [];
for (const sel of ['.error', '.alert-danger', '.alert-error', '.is-error', '.invalid',
                   '[aria-invalid="true"]', '[role="alert"]', '[data-error]', '.field-error']) {
  for (const el of document.querySelectorAll(sel)) {
    if (visible(el)) {
      const t = (el.innerText || '').trim();
      if (t) errorTexts.push(t.slice(0, 200));
    }
  }
}
const siblings = [];
for (const container of document.querySelectorAll('form, .form, #form, .contact, .inquiry, .contact-form')) {
  for (const el of container.querySelectorAll('.success, .complete, .thanks, .message, .alert, .notification, .confirmation, .result, .status')) {
    if (visible(el)) {
      siblings.push({
        classes: el.className || '',
        id: el.id || '',
        text: (el.innerText || '').trim().slice(0, 200)
      });
    }
  }
}
const alerts = [];
for (const el of document.querySelectorAll('[role="alert"], .alert, .dialog, .modal, .popup')) {
  if (visible(el)) {
    const t = (el.innerText || '').trim();
    if (t) alerts.push(t.slice(0, 200));
  }
}
let submitCount = 0;
for (const el of document.querySelectorAll('input[type="submit"], button[type="submit"], button')) {
  if (visible(el)) submitCount++;
}
return {
  url: location.href,
  title: document.title,
  body_text: document.body ? document.body.innerText.slice(0, 20000) : '',
  form_count: document.querySelectorAll('form').length,
  form_input_count: document.querySelectorAll('form input, form textarea, form select').length,
  visible_submit_count: submitCount,
  visible_error_texts: errorTexts.slice(0, 20),
  sibling_hits: siblings.slice(0, 20),
  disabled_control_count: document.querySelectorAll('form input:disabled, form textarea:disabled, form select:disabled, form button:disabled').length,
  alert_texts: alerts.slice(0, 10),
  js_error_elements: document.querySelectorAll('.js-error, .javascript-error, [data-error], .error-message').length,
  responses: (window.__ff_responses || []).slice(0, 100)
};
"#;

/// Monkey-patches fetch/XHR so the judge can read response statuses back.
/// Installed before the submit click; WebDriver has no network event
/// stream, so the page records its own traffic.
const RESPONSE_RECORDER_SCRIPT: &str = r#"
if (!window.__ff_responses) {
  window.__ff_responses = [];
  const push = (url, status) => {
    try { window.__ff_responses.push({ url: String(url).slice(0, 300), status: status|0 }); } catch (e) {}
  };
  const origFetch = window.fetch;
  if (origFetch) {
    window.fetch = function(...args) {
      return origFetch.apply(this, args).then(res => { push(res.url, res.status); return res; });
    };
  }
  const origOpen = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function(method, url, ...rest) {
    this.addEventListener('loadend', () => push(url, this.status));
    return origOpen.call(this, method, url, ...rest);
  };
}
"#;

/// Clicks a reject button on common consent banners, if one is visible.
const BANNER_REJECT_SCRIPT: &str = r#"
const tokens = ['同意しない', '拒否', '拒否する', 'reject all', 'reject', 'decline', 'deny', '必要なもののみ'];
for (const el of document.querySelectorAll('button, [role="button"], a')) {
  const t = ((el.innerText || '') + ' ' + (el.getAttribute('aria-label') || '')).toLowerCase().trim();
  if (!t) continue;
  if (tokens.some(k => t.includes(k))) {
    const s = getComputedStyle(el);
    if (s.display !== 'none' && s.visibility !== 'hidden') {
      el.click();
      return true;
    }
  }
}
return false;
"#;

/// A live page bound to one WebDriver session. The worker keeps one of
/// these per company and always closes it on exit paths.
pub struct PageHandle {
    driver: WebDriver,
    in_iframe: bool,
}

impl PageHandle {
    pub fn new(driver: WebDriver) -> Self {
        Self {
            driver,
            in_iframe: false,
        }
    }

    pub fn driver(&self) -> &WebDriver {
        &self.driver
    }

    /// Navigate with a bounded page-load timeout.
    pub async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        self.driver.set_page_load_timeout(timeout).await?;
        self.driver.goto(url).await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String> {
        Ok(self.driver.current_url().await?.to_string())
    }

    pub async fn title(&self) -> Result<String> {
        Ok(self.driver.title().await?)
    }

    pub async fn page_source(&self) -> Result<String> {
        Ok(self.driver.source().await?)
    }

    async fn eval(&self, script: &str) -> Result<Value> {
        let ret = self.driver.execute(script, Vec::new()).await?;
        Ok(ret.json().clone())
    }

    async fn eval_with_args(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        let ret = self.driver.execute(script, args).await?;
        Ok(ret.json().clone())
    }

    /// Count forms in the current document context.
    pub async fn form_count(&self) -> Result<usize> {
        let v = self.eval("return document.querySelectorAll('form').length;").await?;
        Ok(v.as_u64().unwrap_or(0) as usize)
    }

    /// Whether the page carries a known dynamic-form embed that may load
    /// its form late.
    pub async fn has_dynamic_form_embed(&self) -> Result<bool> {
        let v = self
            .eval(
                "return Array.from(document.querySelectorAll('script')).some(s => s.src && \
                 (s.src.includes('hsforms.net') || s.src.includes('hubspot')));",
            )
            .await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    /// Switch into the first child frame that contains a form. Returns true
    /// when a frame was entered; the handle stays in that frame context.
    pub async fn enter_form_frame(&mut self) -> Result<bool> {
        if self.form_count().await? > 0 {
            return Ok(false);
        }
        let iframes = self.driver.find_all(By::Tag("iframe")).await?;
        for (i, _) in iframes.iter().enumerate() {
            // Re-query per iteration; entering frames invalidates handles.
            let frames = self.driver.find_all(By::Tag("iframe")).await?;
            let Some(frame) = frames.into_iter().nth(i) else { break };
            if frame.clone().enter_frame().await.is_err() {
                continue;
            }
            if self.form_count().await.unwrap_or(0) > 0 {
                self.in_iframe = true;
                debug!(frame = i, "form found inside iframe");
                return Ok(true);
            }
            self.driver.enter_default_frame().await?;
        }
        self.driver.enter_default_frame().await?;
        Ok(false)
    }

    /// Return to the top document (used when a confirmation navigation
    /// detaches the previously selected frame).
    pub async fn exit_to_main_frame(&mut self) -> Result<()> {
        self.driver.enter_default_frame().await?;
        self.in_iframe = false;
        Ok(())
    }

    /// Re-select the frame context after a navigation: prefer a
    /// form-bearing iframe, fall back to the main page.
    pub async fn reselect_form_frame(&mut self) -> Result<()> {
        self.exit_to_main_frame().await?;
        let _ = self.enter_form_frame().await;
        Ok(())
    }

    pub fn in_iframe(&self) -> bool {
        self.in_iframe
    }

    /// List candidate forms for primary-form selection.
    pub async fn form_candidates(&self) -> Result<Vec<FormCandidate>> {
        let v = self.eval(FORM_CANDIDATES_SCRIPT).await?;
        Ok(serde_json::from_value(v)?)
    }

    /// Harvest the full form snapshot for the chosen form index.
    pub async fn harvest_form(&self, form_index: usize) -> Result<FormSnapshot> {
        let v = self
            .eval_with_args(FORM_HARVEST_SCRIPT, vec![Value::from(form_index)])
            .await?;
        if v.is_null() {
            return Err(Error::Analysis("form disappeared during harvest".into()));
        }
        Ok(serde_json::from_value(v)?)
    }

    /// Harvest the judge's page state, including the bot probe and the
    /// recorded responses.
    pub async fn harvest_page_state(&self) -> Result<PageState> {
        let v = self.eval(PAGE_STATE_SCRIPT).await?;
        let mut state: PageState = serde_json::from_value(v)?;
        state.bot_probe = self.bot_probe().await?;
        Ok(state)
    }

    pub async fn bot_probe(&self) -> Result<BotProbe> {
        let v = self.eval(BOT_PROBE_SCRIPT).await?;
        Ok(serde_json::from_value(v)?)
    }

    /// Semantic-element texts for the prohibition detector.
    pub async fn targeted_texts(&self) -> Result<Vec<String>> {
        let v = self.eval(TARGETED_TEXTS_SCRIPT).await?;
        Ok(serde_json::from_value(v)?)
    }

    /// Install the fetch/XHR response recorder.
    pub async fn install_response_recorder(&self) -> Result<()> {
        self.driver.execute(RESPONSE_RECORDER_SCRIPT, Vec::new()).await?;
        Ok(())
    }

    /// Auto-reject a visible consent banner, bounded to one attempt.
    pub async fn try_reject_banner(&self) -> Result<bool> {
        let v = self.eval(BANNER_REJECT_SCRIPT).await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    /// Page height and viewport height, for the scroll-necessity decision.
    pub async fn page_metrics(&self) -> Result<(f64, f64)> {
        let metrics = self
            .eval("return { height: document.body.scrollHeight, viewport: window.innerHeight };")
            .await?;
        Ok((
            metrics["height"].as_f64().unwrap_or(0.0),
            metrics["viewport"].as_f64().unwrap_or(800.0),
        ))
    }

    /// Progressive scroll through the page, then back to the top.
    pub async fn progressive_scroll(&self) -> Result<()> {
        let (height, viewport) = self.page_metrics().await?;
        let step = (viewport * 0.75).max(1.0);
        let mut position = 0.0;
        while position < height + step {
            self.eval_with_args("window.scrollTo(0, arguments[0]);", vec![Value::from(position)])
                .await?;
            tokio::time::sleep(Duration::from_millis(300)).await;
            position += step;
        }
        self.eval("window.scrollTo(0, 0);").await?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    }

    /// Bounded network-idle approximation: wait until the DOM ready state
    /// is complete and the resource count stops growing.
    pub async fn wait_for_quiet(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut last_count: i64 = -1;
        loop {
            let v = self
                .eval(
                    "return { ready: document.readyState, resources: performance.getEntriesByType('resource').length };",
                )
                .await?;
            let ready = v["ready"].as_str().unwrap_or("") == "complete";
            let count = v["resources"].as_i64().unwrap_or(0);
            if ready && count == last_count {
                return Ok(());
            }
            last_count = count;
            if tokio::time::Instant::now() >= deadline {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}
