//! Per-company worker runtime.
//!
//! A worker owns one browser session and processes exactly one company at a
//! time: precondition gates, navigation, analysis, fill, submit, judge,
//! and the mark-done round trip. A hard watchdog bounds the whole task and
//! relaunches the browser on expiry; inner-step timeouts flow into the
//! standard recovery classifier instead.

use crate::analyzer::structure::{self, FormSnapshot};
use crate::analyzer::RuleBasedAnalyzer;
use crate::browser::{BrowserManager, PageHandle};
use crate::config::RunnerConfig;
use crate::detection::{ProhibitionCache, ProhibitionDetector};
use crate::error::{Error, ErrorClassifier, ErrorCode, RecoveryAction, Result};
use crate::judge::JudgeVerdict;
use crate::queue::rpc::{ClassifyDetail, QueueClient, SubmissionRecord};
use crate::sanitize::Sanitizer;
use crate::submit::executor::{RetryMeta, SubmissionExecutor};
use crate::submit::input::FormInputHandler;
use crate::timeutil;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the worker decided about one claim.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// A submissions row was written via mark-done
    Completed { success: bool, code: Option<ErrorCode> },
    /// The claim was left assigned for stale-requeue (fail-closed paths)
    Abandoned,
    /// Graceful shutdown interrupted the company
    Shutdown,
}

/// Everything mark-done needs about one company attempt.
#[derive(Debug, Default)]
struct CompanyResult {
    success: bool,
    code: Option<ErrorCode>,
    message: String,
    bot_detected: bool,
    verdict: Option<JudgeVerdict>,
    retry: Option<RetryMeta>,
    original_url: String,
    final_url: String,
    page_snippet: String,
    http_status: Option<u16>,
    /// Verified fills, first pass plus retry
    filled_fields: usize,
    field_mapping: Option<Value>,
    prohibition_meta: Option<Value>,
    /// Company-row mutations decided by the outcome
    set_prohibition_flag: bool,
    set_black_flag: bool,
}

impl CompanyResult {
    fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            ..Default::default()
        }
    }
}

/// The per-worker runtime.
pub struct FormWorker {
    pub worker_id: usize,
    config: Arc<RunnerConfig>,
    queue: Arc<QueueClient>,
    browser: BrowserManager,
    analyzer: RuleBasedAnalyzer,
    prohibition_cache: Arc<ProhibitionCache>,
    detector: ProhibitionDetector,
    sanitizer: Sanitizer,
}

impl FormWorker {
    pub fn new(
        worker_id: usize,
        config: Arc<RunnerConfig>,
        queue: Arc<QueueClient>,
        prohibition_cache: Arc<ProhibitionCache>,
    ) -> Self {
        let browser = BrowserManager::new(
            worker_id,
            config.worker.browser.clone(),
            config.headless.resolve(),
        );
        let analyzer = RuleBasedAnalyzer::new(crate::analyzer::AnalysisSettings {
            choice_priority: config.worker.choice_priority.clone(),
            early_abort: config.worker.detectors.early_abort.clone(),
            ..Default::default()
        });
        Self {
            worker_id,
            config,
            queue,
            browser,
            analyzer,
            prohibition_cache,
            detector: ProhibitionDetector::new(),
            sanitizer: Sanitizer::new(),
        }
    }

    pub async fn startup(&self) -> Result<()> {
        self.browser.launch().await
    }

    pub async fn shutdown(&self) {
        self.browser.close().await;
    }

    /// Process one claimed company end-to-end. Lifecycle logs are the only
    /// INFO-level output here.
    pub async fn process_company(&self, company_id: i64) -> WorkerOutcome {
        info!(worker = self.worker_id, company_id, "process_start");
        let outcome = self.process_company_inner(company_id).await;
        match &outcome {
            WorkerOutcome::Completed { success, code } => {
                info!(
                    worker = self.worker_id,
                    company_id,
                    success,
                    code = code.map(|c| c.as_str()).unwrap_or("SUCCESS"),
                    "process_done"
                );
            }
            WorkerOutcome::Abandoned => {
                warn!(worker = self.worker_id, company_id, "process_done code=ABANDONED");
            }
            WorkerOutcome::Shutdown => {
                info!(worker = self.worker_id, company_id, "process_done code=SHUTDOWN_REQUESTED");
            }
        }
        outcome
    }

    async fn process_company_inner(&self, company_id: i64) -> WorkerOutcome {
        // Precondition gates that do not need the browser.
        let company = match self.queue.fetch_company(company_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                return self
                    .finalize(company_id, CompanyResult::failed(ErrorCode::NotFound, "company row missing"))
                    .await;
            }
            Err(e) => {
                warn!(company_id, "company fetch failed; leaving claim for stale requeue: {e}");
                return WorkerOutcome::Abandoned;
            }
        };
        let Some(form_url) = company.form_url.clone().filter(|u| !u.trim().is_empty()) else {
            return self
                .finalize(company_id, CompanyResult::failed(ErrorCode::NoFormUrl, "missing form_url"))
                .await;
        };
        if company.black.unwrap_or(false) {
            return self
                .finalize(
                    company_id,
                    CompanyResult::failed(ErrorCode::SkippedByNamePolicy, "company is blacklisted"),
                )
                .await;
        }
        if let Some(scope) = company.client_id {
            if scope != self.config.tenant.client_id {
                return self
                    .finalize(
                        company_id,
                        CompanyResult::failed(ErrorCode::SkippedWrongClient, "company scoped to another client"),
                    )
                    .await;
            }
        }
        if self.name_policy_blocks(&company.company_name) {
            return self
                .finalize(
                    company_id,
                    CompanyResult::failed(ErrorCode::SkippedByNamePolicy, "company name matches skip policy"),
                )
                .await;
        }

        // Daily duplicate guard. A lookup failure fails closed: the claim
        // stays assigned and stale-requeue returns it later.
        let offset = self.config.worker.zone_offset_secs;
        let today = timeutil::queue_day(Utc::now(), offset);
        let day_start = today
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_local_timezone(timeutil::zone(offset))
            .unwrap()
            .with_timezone(&Utc);
        let day_end = day_start + chrono::Duration::days(1);
        match self
            .queue
            .has_submission_today(self.config.targeting_id, company_id, day_start, day_end)
            .await
        {
            Ok(true) => {
                return self
                    .finalize(
                        company_id,
                        CompanyResult::failed(
                            ErrorCode::SkippedAlreadySentToday,
                            "a submission already exists for today",
                        ),
                    )
                    .await;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(company_id, "duplicate guard failed; failing closed: {e}");
                return WorkerOutcome::Abandoned;
            }
        }

        // The browser-facing core under the hard watchdog.
        let hard_timeout = Duration::from_secs(self.config.worker.timeouts.task_timeout_secs);
        let result =
            match tokio::time::timeout(hard_timeout, self.process_with_recovery(&form_url)).await {
                Ok(result) => result,
                Err(_) => {
                    // The outer watchdog owns page/browser teardown; inner
                    // step timeouts never reach this branch.
                    warn!(company_id, "hard watchdog fired; relaunching browser");
                    self.browser.close().await;
                    if let Err(e) = self.browser.launch().await {
                        warn!(company_id, "browser relaunch failed: {e}");
                    }
                    let sentinel = Error::HardTimeout {
                        duration_secs: hard_timeout.as_secs(),
                    };
                    CompanyResult::failed(ErrorCode::Timeout, sentinel.to_string())
                }
            };

        // Hygiene between companies.
        self.browser.clear_cookies().await.ok();
        self.browser.park().await.ok();

        self.finalize(company_id, result).await
    }

    /// Auto-recovery loop around the core: recoverable errors get a page
    /// reload or a browser reinitialization, bounded by the retry config.
    async fn process_with_recovery(&self, form_url: &str) -> CompanyResult {
        let max_retries = self.config.worker.retry.max_retries;
        let started = tokio::time::Instant::now();
        let recovery_window = Duration::from_secs(self.config.worker.retry.max_processing_secs.max(1));
        let mut attempt = 0u32;
        loop {
            match self.process_core(form_url).await {
                Ok(result) => return result,
                Err(e) => {
                    let code = match &e {
                        Error::Timeout { .. } => ErrorCode::Timeout,
                        _ if e.is_connection_loss() => ErrorCode::Access,
                        _ => ErrorClassifier::classify_message(&e.to_string(), false, false),
                    };
                    attempt += 1;
                    let out_of_window = started.elapsed() > recovery_window;
                    if attempt > max_retries
                        || out_of_window
                        || !ErrorClassifier::is_recoverable(code)
                    {
                        if attempt > max_retries {
                            return CompanyResult::failed(
                                ErrorCode::RetryExceeded,
                                format!("max retries ({max_retries}) exceeded: {e}"),
                            );
                        }
                        return CompanyResult::failed(code, e.to_string());
                    }
                    warn!(attempt, code = code.as_str(), "attempting recovery: {e}");
                    match code.recovery() {
                        RecoveryAction::ReinitBrowser => {
                            self.browser.close().await;
                            tokio::time::sleep(Duration::from_millis(500)).await;
                            if self.browser.launch().await.is_err() {
                                return CompanyResult::failed(
                                    ErrorCode::Access,
                                    "browser reinitialization failed",
                                );
                            }
                        }
                        RecoveryAction::ReloadPage | RecoveryAction::None => {
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
        }
    }

    /// One pass: navigate, analyze, fill, submit, judge.
    async fn process_core(&self, form_url: &str) -> Result<CompanyResult> {
        let mut page = self.browser.page().await?;
        let timeouts = &self.config.worker.timeouts;

        // Navigation with one retry on transient connection loss.
        let nav_timeout = Duration::from_millis(timeouts.page_load);
        if let Err(e) = page.navigate(form_url, nav_timeout).await {
            if e.is_connection_loss() {
                self.browser.close().await;
                tokio::time::sleep(Duration::from_secs(1)).await;
                self.browser.launch().await?;
                page = self.browser.page().await?;
                page.navigate(form_url, nav_timeout).await?;
            } else {
                return Err(e);
            }
        }
        page.wait_for_quiet(Duration::from_secs(5)).await.ok();
        page.try_reject_banner().await.ok();
        self.ensure_dynamic_form_ready(&page).await;
        page.enter_form_frame().await.ok();

        // Prohibition first: a high-confidence hit skips all DOM work.
        let html = page.page_source().await.unwrap_or_default();
        let targeted = page.targeted_texts().await.unwrap_or_default();
        let prohibition = self.prohibition_cache.detect_cached(
            &self.detector,
            self.config.targeting_id,
            &html,
            &targeted,
        );
        let early_abort = prohibition.detected
            && prohibition.should_abort(&self.config.worker.detectors.early_abort);

        // Harvest and analyze.
        let analysis = if early_abort {
            self.analyzer.analyze(
                &Default::default(),
                Some(prohibition.clone()),
                &self.config.tenant,
            )
        } else {
            let snapshot = self.harvest_snapshot(&page).await?;
            self.analyzer
                .analyze(&snapshot, Some(prohibition.clone()), &self.config.tenant)
        };

        if analysis.aborted_on_prohibition || early_abort {
            let mut result = CompanyResult::failed(
                ErrorCode::ProhibitionDetected,
                "solicitation prohibition detected",
            );
            result.prohibition_meta = Some(json!({
                "level": prohibition.level,
                "source": prohibition.source,
                "phrases_count": prohibition.phrases.len(),
                "confidence": prohibition.confidence_score,
            }));
            result.set_prohibition_flag = true;
            result.original_url = form_url.to_string();
            return Ok(result);
        }

        // Discovery gates.
        if analysis.field_mapping.is_empty() && analysis.plan.is_empty() {
            return Ok(CompanyResult::failed(ErrorCode::NoFormFound, "no form fields detected"));
        }
        if let Some(kind) = crate::analyzer::validator::message_issue_kind(
            &analysis.validation.issues,
            analysis.textarea_count,
        ) {
            use crate::analyzer::validator::MessageIssue;
            let (code, set_black) = match kind {
                MessageIssue::NoMessageArea => (ErrorCode::NoMessageArea, true),
                MessageIssue::MappingFailure => (ErrorCode::Mapping, false),
            };
            let mut result = CompanyResult::failed(code, "message body unavailable");
            result.set_black_flag = set_black;
            result.field_mapping = Some(analysis.storage_projection());
            return Ok(result);
        }

        // Fill.
        let executor = SubmissionExecutor::new(&self.config.worker, &self.config.tenant);
        let mut handler = FormInputHandler::new(timeouts.post_input_delay_ms);
        let filled = executor.fill_form(&page, &analysis, &mut handler).await?;
        if filled == 0 {
            return Ok(CompanyResult::failed(
                ErrorCode::NoFieldsFilled,
                "no fields were successfully filled",
            ));
        }
        tokio::time::sleep(Duration::from_millis(timeouts.post_input_delay_ms)).await;

        // Submit and judge.
        let outcome = executor.submit_and_judge(&mut page, &analysis, &handler).await?;
        let mut result = CompanyResult {
            success: outcome.success,
            code: outcome.error_code,
            message: outcome.error_message.clone(),
            bot_detected: outcome.bot_detected,
            verdict: outcome.verdict,
            retry: outcome.retry,
            original_url: outcome.original_url,
            final_url: outcome.final_url,
            page_snippet: outcome.page_snippet,
            http_status: outcome.http_status,
            filled_fields: outcome.filled_fields,
            field_mapping: Some(analysis.storage_projection()),
            ..Default::default()
        };
        // Bot protection lifts to BOT_DETECTED even when another error
        // fired first.
        if result.bot_detected && !result.success {
            result.code = Some(ErrorCode::BotDetected);
        }
        Ok(result)
    }

    /// Two-phase harvest: list candidate forms, pick the primary one, then
    /// harvest its controls. No form yields the empty snapshot; mapping
    /// never scans outside a form boundary.
    async fn harvest_snapshot(&self, page: &PageHandle) -> Result<FormSnapshot> {
        let candidates = page.form_candidates().await.unwrap_or_default();
        let Some(primary) = structure::select_primary_form(&candidates) else {
            debug!("no form element found; returning empty structure");
            return Ok(FormSnapshot {
                url: page.current_url().await.unwrap_or_default(),
                has_form: false,
                ..Default::default()
            });
        };
        // Long or element-heavy pages get a progressive scroll so lazy
        // content renders before the harvest.
        let control_count = candidates
            .get(primary)
            .map(|c| c.text_inputs + c.textareas + c.selects)
            .unwrap_or(0);
        let (height, viewport) = page.page_metrics().await.unwrap_or((0.0, 800.0));
        if crate::analyzer::preprocess::needs_progressive_scroll(height, viewport, control_count) {
            page.progressive_scroll().await.ok();
        }
        page.harvest_form(primary).await
    }

    async fn ensure_dynamic_form_ready(&self, page: &PageHandle) {
        let has_forms = page.form_count().await.unwrap_or(0) > 0;
        let dynamic = page.has_dynamic_form_embed().await.unwrap_or(false);
        if has_forms && !dynamic {
            return;
        }
        for _ in 0..3 {
            page.wait_for_quiet(Duration::from_secs(8)).await.ok();
            if page.form_count().await.unwrap_or(0) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    fn name_policy_blocks(&self, company_name: &str) -> bool {
        let lower = company_name.to_lowercase();
        self.config
            .worker
            .skip_name_keywords
            .iter()
            .any(|k| lower.contains(&k.to_lowercase()))
    }

    /// Build the classify detail and write the submissions row. Mark-done
    /// failures leave the claim assigned for stale requeue.
    async fn finalize(&self, company_id: i64, result: CompanyResult) -> WorkerOutcome {
        let detail = self.build_classify_detail(&result);
        let record = SubmissionRecord {
            targeting_id: self.config.targeting_id,
            company_id,
            success: result.success,
            error_type: result.code.map(|c| c.as_str().to_string()),
            classify_detail: detail,
            field_mapping: result.field_mapping.clone(),
            bot_protection_detected: result.bot_detected,
            submitted_at: Utc::now(),
        };
        let target_date = self
            .config
            .target_date
            .unwrap_or_else(|| timeutil::queue_day(Utc::now(), self.config.worker.zone_offset_secs));
        if let Err(e) = self.queue.mark_done(target_date, &record).await {
            warn!(company_id, "mark_done failed; leaving claim for stale requeue: {e}");
            return WorkerOutcome::Abandoned;
        }

        // Outcome-driven company mutations.
        if result.set_prohibition_flag {
            let _ = self
                .queue
                .update_company_flags(company_id, json!({ "prohibition_detected": true }))
                .await;
        }
        if result.set_black_flag {
            let _ = self
                .queue
                .update_company_flags(company_id, json!({ "black": true }))
                .await;
        }

        WorkerOutcome::Completed {
            success: result.success,
            code: result.code,
        }
    }

    fn build_classify_detail(&self, result: &CompanyResult) -> ClassifyDetail {
        let verdict = result.verdict.as_ref();
        let evidence = json!({
            "detected_phrases": verdict.map(|v| v.matched_patterns.clone()).unwrap_or_default(),
            "http_status": result.http_status,
            "final_url": self.sanitizer.sanitize(&result.final_url),
            "original_url": self.sanitizer.sanitize(&result.original_url),
            "judge_stage": verdict.map(|v| v.stage),
            "judge_stage_name": verdict.map(|v| v.stage_name.clone()),
            "judge_confidence": verdict.map(|v| v.confidence),
            "filled_fields": result.filled_fields,
            "prohibition": &result.prohibition_meta,
            "retry": &result.retry,
            "message": self.sanitizer.sanitize(&result.message),
            "page_snippet": &result.page_snippet,
        });
        match (result.success, result.code) {
            (true, _) => ClassifyDetail::success(verdict, evidence),
            (false, Some(code)) => {
                let confidence = verdict.map(|v| v.confidence).unwrap_or(0.0);
                ClassifyDetail::for_code(code, confidence, evidence)
            }
            (false, None) => ClassifyDetail::for_code(ErrorCode::WorkerError, 0.0, evidence),
        }
    }
}
