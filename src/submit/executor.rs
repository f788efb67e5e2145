//! The submission state machine.
//!
//! ANALYZE → FILL → DETECT_BOT_PRE → CLICK_SUBMIT →
//! (CONFIRMATION_PAGE | WAIT_RESULT) → JUDGE → (RETRY_INVALID once) → DONE.
//! The judge always initializes before the click so it can snapshot the
//! pre-submission state; retries are capped at exactly one per company.

use crate::analyzer::AnalysisResult;
use crate::browser::PageHandle;
use crate::config::{TenantConfig, WorkerConfig};
use crate::detection::bot::BotDetector;
use crate::error::{ErrorClassifier, ErrorCode, Result};
use crate::judge::success::{PageState, PreSubmissionState};
use crate::judge::{JudgeVerdict, JudgmentTracer, SuccessJudge};
use crate::submit::buttons::{self, ButtonCategory, SubmitCandidate};
use crate::submit::input::FormInputHandler;
use crate::submit::invalid::{detect_invalid_required_fields, plan_retry_fills};
use serde_json::json;
use std::time::Duration;
use thirtyfour::prelude::*;
use tracing::{debug, info, warn};

/// Metadata about the single retry pass, persisted as evidence.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RetryMeta {
    pub attempted: bool,
    pub invalid_count: usize,
    pub filled_count: usize,
    pub succeeded: bool,
}

/// Outcome of the whole submission attempt.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubmissionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<JudgeVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub error_message: String,
    pub bot_detected: bool,
    pub original_url: String,
    pub final_url: String,
    pub filled_fields: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryMeta>,
    /// Sanitized page snippet for evidence
    pub page_snippet: String,
    /// Highest-priority HTTP error status seen by the response recorder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl SubmissionOutcome {
    fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            verdict: None,
            error_code: Some(code),
            error_message: message.into(),
            bot_detected: false,
            original_url: String::new(),
            final_url: String::new(),
            filled_fields: 0,
            retry: None,
            page_snippet: String::new(),
            http_status: None,
        }
    }
}

/// Drives fill + submit + judge for one analyzed form.
pub struct SubmissionExecutor<'a> {
    config: &'a WorkerConfig,
    tenant: &'a TenantConfig,
    bot_detector: BotDetector,
}

impl<'a> SubmissionExecutor<'a> {
    pub fn new(config: &'a WorkerConfig, tenant: &'a TenantConfig) -> Self {
        Self {
            config,
            tenant,
            bot_detector: BotDetector::new(),
        }
    }

    /// Fill every planned assignment. Returns the number of verified fills.
    pub async fn fill_form(
        &self,
        page: &PageHandle,
        analysis: &AnalysisResult,
        handler: &mut FormInputHandler,
    ) -> Result<usize> {
        let mut filled = 0usize;
        // Stable order: mapped fields first (sorted), then auto-handled.
        let mut fields: Vec<&String> = analysis.plan.keys().collect();
        fields.sort();
        for field in fields {
            let assignment = &analysis.plan[field];
            match handler.fill_field(page, field, assignment).await {
                Ok(true) => filled += 1,
                Ok(false) => {}
                Err(e) => warn!(field = %field, "fill error: {e}"),
            }
        }
        Ok(filled)
    }

    /// Run the post-fill submission flow to a final outcome.
    pub async fn submit_and_judge(
        &self,
        page: &mut PageHandle,
        analysis: &AnalysisResult,
        handler: &FormInputHandler,
    ) -> Result<SubmissionOutcome> {
        let original_url = page.current_url().await?;
        // Verified fills from the first pass, carried into every outcome.
        let filled_fields = handler.filled_selectors().len();

        // Locate the submit button: analyzer candidates first.
        let candidates = buttons::ordered_candidates(
            &analysis.submit_buttons,
            &self.config.submit_keywords,
        );
        let chosen = match self.resolve_submit_button(page, &candidates).await? {
            Some(c) => c,
            None => {
                // No button anywhere: check for a bot wall before giving up.
                let probe = page.bot_probe().await.unwrap_or_default();
                if let Some(kind) = self.bot_detector.detect(&probe) {
                    let mut outcome = SubmissionOutcome::failed(
                        ErrorCode::BotDetected,
                        format!("bot protection detected (no submit found): {kind}"),
                    );
                    outcome.bot_detected = true;
                    outcome.original_url = original_url;
                    outcome.filled_fields = filled_fields;
                    return Ok(outcome);
                }
                let mut outcome =
                    SubmissionOutcome::failed(ErrorCode::NoFormFound, "submit button not found");
                outcome.original_url = original_url;
                outcome.filled_fields = filled_fields;
                return Ok(outcome);
            }
        };
        debug!(selector = %chosen.selector, category = ?chosen.category, "submit button chosen");

        // The judge snapshots pre-state before any click.
        let pre = PreSubmissionState {
            url: original_url.clone(),
            form_element_count: analysis.total_elements,
            prohibition: analysis.prohibition.clone(),
        };
        let judge = SuccessJudge::new(pre);
        let mut tracer = JudgmentTracer::new(&original_url);
        page.install_response_recorder().await.ok();

        if !self.click_with_fallbacks(page, &chosen.selector).await {
            let probe = page.bot_probe().await.unwrap_or_default();
            let bot = self.bot_detector.detect(&probe).is_some();
            let mut outcome =
                SubmissionOutcome::failed(ErrorCode::SubmissionError, "submit click failed");
            outcome.bot_detected = bot;
            if bot {
                outcome.error_code = Some(ErrorCode::BotDetected);
            }
            outcome.original_url = original_url;
            outcome.filled_fields = filled_fields;
            return Ok(outcome);
        }

        if chosen.category == ButtonCategory::Confirmation {
            self.handle_confirmation_page(page).await?;
        } else {
            tokio::time::sleep(Duration::from_secs(3)).await;
            page.wait_for_quiet(Duration::from_secs(10)).await.ok();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let state = page.harvest_page_state().await.unwrap_or_default();
        let verdict = judge.judge(&state, &mut tracer);
        if verdict.success {
            info!(stage = verdict.stage, "submission judged successful");
            return Ok(self.outcome_from_verdict(verdict, original_url, &state, filled_fields, None));
        }

        // One retry when required/invalid fields remain that the first
        // pass never touched.
        let invalids = detect_invalid_required_fields(page).await.unwrap_or_default();
        let retry_plan = plan_retry_fills(
            &invalids,
            handler.filled_selectors(),
            &self.config.choice_priority,
            self.tenant,
        );
        if retry_plan.is_empty() {
            return Ok(self.outcome_from_verdict(verdict, original_url, &state, filled_fields, None));
        }
        info!(fields = retry_plan.len(), "retrying with safe defaults for invalid fields");
        let mut retry_handler =
            FormInputHandler::new(self.config.timeouts.post_input_delay_ms);
        let mut retry_meta = RetryMeta {
            attempted: true,
            invalid_count: invalids.len(),
            ..Default::default()
        };
        for (label, assignment) in &retry_plan {
            if retry_handler
                .fill_field(page, label, assignment)
                .await
                .unwrap_or(false)
            {
                retry_meta.filled_count += 1;
            }
        }

        self.click_with_fallbacks(page, &chosen.selector).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        page.wait_for_quiet(Duration::from_secs(8)).await.ok();

        let retry_state = page.harvest_page_state().await.unwrap_or_default();
        let mut retry_tracer = JudgmentTracer::new(&original_url);
        let retry_verdict = judge.judge(&retry_state, &mut retry_tracer);
        retry_meta.succeeded = retry_verdict.success;
        // Retry fills count toward the total the evidence reports.
        let total_filled = filled_fields + retry_meta.filled_count;
        Ok(self.outcome_from_verdict(
            retry_verdict,
            original_url,
            &retry_state,
            total_filled,
            Some(retry_meta),
        ))
    }

    fn outcome_from_verdict(
        &self,
        verdict: JudgeVerdict,
        original_url: String,
        state: &PageState,
        filled_fields: usize,
        retry: Option<RetryMeta>,
    ) -> SubmissionOutcome {
        let sanitizer = crate::sanitize::Sanitizer::new();
        let error_code = if verdict.success {
            None
        } else if verdict.prohibition.is_some() {
            Some(ErrorCode::ProhibitionDetected)
        } else if verdict.bot_detected {
            Some(ErrorCode::BotDetected)
        } else {
            Some(ErrorClassifier::classify_submission(
                verdict.error_family.map(|f| f.as_str()),
                &verdict.message,
                &state.body_text,
            ))
        };
        SubmissionOutcome {
            success: verdict.success,
            bot_detected: verdict.bot_detected,
            error_message: if verdict.success { String::new() } else { verdict.message.clone() },
            error_code,
            final_url: verdict.final_url.clone(),
            original_url,
            filled_fields,
            retry,
            page_snippet: sanitizer.sanitize_snippet(&state.body_text, 600),
            http_status: SuccessJudge::primary_http_status(&state.responses),
            verdict: Some(verdict),
        }
    }

    /// Find the first workable submit button: analyzer candidates, then the
    /// configured fallback selectors. Includes the bounded enable-wait and
    /// the guarded force-enable.
    async fn resolve_submit_button(
        &self,
        page: &PageHandle,
        candidates: &[SubmitCandidate],
    ) -> Result<Option<SubmitCandidate>> {
        for candidate in candidates {
            if self.ensure_clickable(page, &candidate.selector).await? {
                return Ok(Some(candidate.clone()));
            }
        }
        // Fallback: configured selectors, classifying from live text.
        for selector in buttons::fallback_selectors(&self.config.submit_keywords) {
            let Ok(el) = page.driver().find(By::Css(&selector)).await else {
                continue;
            };
            if !el.is_displayed().await.unwrap_or(false) {
                continue;
            }
            let text = el.text().await.unwrap_or_default();
            let value = el.attr("value").await.ok().flatten().unwrap_or_default();
            let merged = format!("{text} {value}");
            if buttons::is_excluded(&merged, &self.config.submit_keywords) {
                continue;
            }
            if !self.ensure_clickable(page, &selector).await? {
                continue;
            }
            return Ok(Some(SubmitCandidate {
                selector,
                category: buttons::classify_button_text(&merged, &self.config.submit_keywords),
                text: merged,
                enabled: true,
            }));
        }
        Ok(None)
    }

    /// Wait briefly for the button to enable; when it stays disabled and
    /// no bot guard is present, force-enable exactly once. Still-disabled
    /// buttons abort the attempt.
    async fn ensure_clickable(&self, page: &PageHandle, selector: &str) -> Result<bool> {
        let Ok(el) = page.driver().find(By::Css(selector)).await else {
            return Ok(false);
        };
        if !el.is_displayed().await.unwrap_or(false) {
            return Ok(false);
        }
        if el.is_enabled().await.unwrap_or(false) {
            return Ok(true);
        }
        // Bounded enable-wait: required-field reflection can lag input.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(7);
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if el.is_enabled().await.unwrap_or(false) {
                return Ok(true);
            }
        }
        // Last resort, never under a bot guard.
        let probe = page.bot_probe().await.unwrap_or_default();
        if self.bot_detector.detect(&probe).is_some()
            || probe.recaptcha_badges > 0
            || probe.recaptcha_response_fields > 0
        {
            warn!(selector, "submit stays disabled under bot guard; aborting");
            return Ok(false);
        }
        warn!(selector, "submit disabled; attempting a single force-enable");
        let _ = page
            .driver()
            .execute(
                "const el = document.querySelector(arguments[0]); \
                 if (el) { el.disabled = false; el.removeAttribute('disabled'); \
                 el.classList.remove('disabled'); }",
                vec![json!(selector)],
            )
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(el.is_enabled().await.unwrap_or(false))
    }

    /// Click fallbacks: scroll-into-view → native click → JS click →
    /// `form.requestSubmit` → focus + Enter.
    async fn click_with_fallbacks(&self, page: &PageHandle, selector: &str) -> bool {
        if let Ok(el) = page.driver().find(By::Css(selector)).await {
            el.scroll_into_view().await.ok();
            if el.click().await.is_ok() {
                return true;
            }
            let js_click = page
                .driver()
                .execute(
                    "const el = document.querySelector(arguments[0]); if (el) { el.click(); return true; } return false;",
                    vec![json!(selector)],
                )
                .await;
            if js_click
                .map(|r| r.json().as_bool().unwrap_or(false))
                .unwrap_or(false)
            {
                return true;
            }
            let request_submit = page
                .driver()
                .execute(
                    "const el = document.querySelector(arguments[0]); \
                     const f = el ? el.closest('form') : document.querySelector('form'); \
                     if (f && f.requestSubmit) { f.requestSubmit(el || undefined); return true; } \
                     if (f) { f.submit(); return true; } return false;",
                    vec![json!(selector)],
                )
                .await;
            if request_submit
                .map(|r| r.json().as_bool().unwrap_or(false))
                .unwrap_or(false)
            {
                return true;
            }
            // WebDriver Enter key codepoint.
            if el.focus().await.is_ok() && el.send_keys("\u{e007}").await.is_ok() {
                return true;
            }
        }
        false
    }

    /// The confirmation-page path: wait for the review page, re-select the
    /// form frame (the input-page iframe may have detached), ensure the
    /// consent checkbox near the final button, find and click the final
    /// submit, auto-accept one dialog.
    async fn handle_confirmation_page(&self, page: &mut PageHandle) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3)).await;
        page.wait_for_quiet(Duration::from_secs(8)).await.ok();
        page.reselect_form_frame().await?;

        let Some(selector) = self.find_final_submit(page).await? else {
            warn!("no final submit button on confirmation page");
            return Ok(());
        };
        self.ensure_consent_near(page, &selector).await;
        self.click_with_fallbacks(page, &selector).await;

        // One dialog auto-accept, then the configured extra wait.
        let _ = page.driver().accept_alert().await;
        let extra = Duration::from_millis(self.config.confirmation_extra_wait_ms.min(20_000));
        tokio::time::sleep(Duration::from_secs(3) + extra).await;
        page.wait_for_quiet(Duration::from_secs(12)).await.ok();
        Ok(())
    }

    /// Find the final-submit button by keyword, scoped to a form first and
    /// excluding the configured negatives.
    async fn find_final_submit(&self, page: &PageHandle) -> Result<Option<String>> {
        let ret = page
            .driver()
            .execute(
                r#"
                const keywords = arguments[0];
                const excludes = arguments[1];
                const esc = (s) => (s || '').replace(/\\/g, '\\\\').replace(/"/g, '\\"');
                const selectorFor = (el) => {
                  const id = el.getAttribute('id');
                  if (id) return `[id="${esc(id)}"]`;
                  const name = el.getAttribute('name');
                  const tag = (el.tagName || 'button').toLowerCase();
                  if (name) return `${tag}[name="${esc(name)}"]`;
                  return null;
                };
                const textOf = (el) =>
                  ((el.innerText || '') + ' ' + (el.value || '') + ' ' + (el.getAttribute('aria-label') || '')).toLowerCase();
                const visible = (el) => {
                  const s = getComputedStyle(el);
                  const r = el.getBoundingClientRect();
                  return s.display !== 'none' && s.visibility !== 'hidden' && r.width > 0;
                };
                const scopes = [
                  'form button, form input[type="submit"], form input[type="image"], form [role="button"]',
                  'button, input[type="submit"], [role="button"]'
                ];
                for (const scope of scopes) {
                  for (const kw of keywords) {
                    for (const el of document.querySelectorAll(scope)) {
                      if (!visible(el)) continue;
                      const text = textOf(el);
                      if (!text.includes(kw.toLowerCase())) continue;
                      if (excludes.some(x => text.includes(x.toLowerCase()))) continue;
                      if (scope.startsWith('button') && !el.closest('form')) continue;
                      const sel = selectorFor(el);
                      if (sel) return sel;
                      el.setAttribute('data-ff-final', '1');
                      return '[data-ff-final="1"]';
                    }
                  }
                }
                return null;
                "#,
                vec![
                    json!(self.config.submit_keywords.final_submit),
                    json!(self.config.submit_keywords.exclude),
                ],
            )
            .await?;
        Ok(ret.json().as_str().map(|s| s.to_string()))
    }

    /// Check the agree checkbox nearest the final button, when one sits
    /// within reach and is still unchecked.
    async fn ensure_consent_near(&self, page: &PageHandle, button_selector: &str) {
        let _ = page
            .driver()
            .execute(
                r#"
                const btn = document.querySelector(arguments[0]);
                if (!btn) return false;
                const rect = btn.getBoundingClientRect();
                let best = null;
                let bestDistance = 400;
                for (const cb of document.querySelectorAll('input[type="checkbox"]')) {
                  if (cb.checked) continue;
                  const r = cb.getBoundingClientRect();
                  const distance = Math.abs((r.top + r.bottom) / 2 - (rect.top + rect.bottom) / 2);
                  if (distance < bestDistance) { best = cb; bestDistance = distance; }
                }
                if (!best) return false;
                best.checked = true;
                best.dispatchEvent(new Event('input', { bubbles: true }));
                best.dispatchEvent(new Event('change', { bubbles: true }));
                return true;
                "#,
                vec![json!(button_selector)],
            )
            .await;
    }
}
