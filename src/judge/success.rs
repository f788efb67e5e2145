//! Six-stage submission success judgment.
//!
//! The judge snapshots the page before the submit click and evaluates the
//! post-click page state through ordered stages. Stages 1-4 can only
//! produce success; stages 5-6 can produce either. A pre-submission
//! prohibition hit or a bot/error early gate short-circuits everything.

use crate::detection::bot::{BotDetector, BotProbe};
use crate::detection::patterns::DetectionPatternMatcher;
use crate::detection::prohibition::ProhibitionResult;
use crate::judge::tracer::{JudgmentStage, JudgmentTracer, StageOutcome};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use url::Url;

/// Success-message regex catalog. The leading entries double as the
/// "strong success" set for the early-failure gate.
static SUCCESS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"送信.{0,8}完了|送信.{0,8}成功|送信.{0,6}ました|送信いたしました|送信致しました",
        r"お問い合わせ.{0,8}完了|お問い合わせ.{0,8}ました|お問い合わせを受け付けました",
        r"ありがとう.{0,6}ございました|ありがとう.{0,6}ます|thank.{0,4}you|thanks.{0,6}for",
        r"受付.{0,6}完了|受付.{0,6}ました|受け付け.{0,6}完了|受け付け.{0,6}ました|受付いたしました",
        r"確認.{0,6}完了|お申し込み.{0,6}完了|お申し込み.{0,6}ました",
        r"メッセージ.{0,8}送信|メール.{0,6}送信.{0,6}完了|フォーム.{0,6}送信.{0,6}完了",
        r"正常.{0,6}送信|正常.{0,6}受付|正常.{0,6}完了|成功.{0,6}送信|成功.{0,6}受付",
        r"message.{0,8}sent|successfully.{0,8}sent|submission.{0,8}complete",
        r"送信させていただきました|受付させていただきました|確認させていただきました",
        r"お預かりいたしました|承りました|拝受いたしました|頂戴いたしました",
        r"後日.{0,6}連絡|後日.{0,6}返信|確認.{0,6}メール|自動.{0,6}返信|返信.{0,6}メール",
        r"担当者.{0,6}連絡|担当.{0,4}から|折り返し.{0,6}連絡|追って.{0,6}連絡|改めて.{0,6}連絡|近日中.{0,6}連絡",
        r"手続き.{0,6}完了|処理.{0,6}完了|登録.{0,6}完了|申請.{0,6}完了|予約.{0,6}完了",
    ]
    .iter()
    .filter_map(|s| Regex::new(&format!("(?i){s}")).ok())
    .collect()
});

/// How many leading patterns count as "strong success" in the early gate.
const STRONG_SUCCESS_PREFIX: usize = 6;

/// Error families the judge distinguishes. The ids feed the submission
/// classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFamily {
    Recaptcha,
    SolicitationRefusal,
    EmailFormat,
    RequiredMissing,
    System,
    RetryRequest,
    General,
}

impl ErrorFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recaptcha => "recaptcha",
            Self::SolicitationRefusal => "solicitation_refusal",
            Self::EmailFormat => "email_format",
            Self::RequiredMissing => "required_missing",
            Self::System => "system",
            Self::RetryRequest => "retry_request",
            Self::General => "general",
        }
    }

    /// Priority order when several families match at once.
    const PRIORITY: &'static [ErrorFamily] = &[
        Self::Recaptcha,
        Self::SolicitationRefusal,
        Self::System,
        Self::EmailFormat,
        Self::RequiredMissing,
        Self::RetryRequest,
        Self::General,
    ];
}

static ERROR_FAMILIES: LazyLock<Vec<(ErrorFamily, Vec<Regex>)>> = LazyLock::new(|| {
    let build = |patterns: &[&str]| -> Vec<Regex> {
        patterns
            .iter()
            .filter_map(|s| Regex::new(&format!("(?i){s}")).ok())
            .collect()
    };
    vec![
        (
            ErrorFamily::Recaptcha,
            build(&[
                r"recaptcha|re-captcha|captcha",
                r"画像認証|認証.{0,6}確認|ロボット.{0,6}確認|人間.{0,6}確認",
            ]),
        ),
        (
            ErrorFamily::SolicitationRefusal,
            build(&[
                r"営業.{0,6}お断り|営業.{0,6}禁止|勧誘.{0,6}お断り|勧誘.{0,6}禁止",
                r"セールス.{0,6}お断り|セールス.{0,6}禁止",
                r"広告.{0,6}お断り|宣伝.{0,6}お断り",
            ]),
        ),
        (
            ErrorFamily::EmailFormat,
            build(&[
                r"メール.{0,6}形式|メール.{0,6}正しく|メール.{0,6}無効|email.{0,8}format|email.{0,8}invalid",
                r"メールアドレス.{0,6}正しく|メールアドレス.{0,6}形式|メールアドレス.{0,6}無効",
            ]),
        ),
        (
            ErrorFamily::RequiredMissing,
            build(&[
                r"必須.{0,6}項目|必須.{0,6}入力|required.{0,8}field",
                r"未入力|入力.{0,6}してください|入力されていません",
                r"選択.{0,6}してください|チェック.{0,6}してください",
            ]),
        ),
        (
            ErrorFamily::System,
            build(&[
                r"システム.{0,6}エラー|system.{0,6}error|サーバー.{0,6}エラー|server.{0,6}error",
                r"内部.{0,6}エラー|internal.{0,6}error|データベース.{0,6}エラー|database.{0,6}error",
                r"接続.{0,6}エラー|connection.{0,6}error|ネットワーク.{0,6}エラー",
            ]),
        ),
        (
            ErrorFamily::RetryRequest,
            build(&[
                r"再度.{0,6}お試し|もう一度.{0,6}お試し|やり直し|retry|再送信",
                r"一時的.{0,6}エラー|temporary.{0,6}error|しばらく.{0,6}お待ち|try.{0,6}again",
                r"タイムアウト|timeout|時間.{0,4}切れ",
            ]),
        ),
        (
            ErrorFamily::General,
            build(&[
                r"エラー|error|失敗|failed|不正|無効|invalid",
                r"正しく.{0,6}入力|適切.{0,6}入力|形式.{0,6}正しく|フォーマット.{0,6}エラー",
                r"電話番号.{0,6}正しく|電話.{0,6}形式|phone.{0,8}invalid",
            ]),
        ),
    ]
});

/// URL path tokens that read as a completed submission.
const SUCCESS_URL_TOKENS: &[&str] = &[
    "thanks", "thank-you", "success", "complete", "done", "confirm", "finish", "ok", "sent",
    "submitted",
];

/// One recorded network response from the injected fetch/XHR recorder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEntry {
    pub url: String,
    pub status: u16,
}

/// A success-classed sibling near the original form containers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiblingHit {
    pub classes: String,
    pub id: String,
    pub text: String,
}

/// Page state harvested after (or before) a submit click.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub body_text: String,
    pub form_count: usize,
    pub form_input_count: usize,
    pub visible_submit_count: usize,
    /// Texts of visible `.error` / `[aria-invalid]` / `[role=alert]` elements
    pub visible_error_texts: Vec<String>,
    pub sibling_hits: Vec<SiblingHit>,
    pub disabled_control_count: usize,
    pub alert_texts: Vec<String>,
    pub js_error_elements: usize,
    pub responses: Vec<ResponseEntry>,
    pub bot_probe: BotProbe,
}

/// Snapshot taken by `initialize_before_submission`.
#[derive(Debug, Clone, Default)]
pub struct PreSubmissionState {
    pub url: String,
    pub form_element_count: usize,
    pub prohibition: Option<ProhibitionResult>,
}

/// The final verdict tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub success: bool,
    /// 0-6
    pub stage: u8,
    pub stage_name: String,
    pub confidence: f64,
    pub message: String,
    pub bot_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_family: Option<ErrorFamily>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prohibition: Option<ProhibitionResult>,
    pub final_url: String,
    pub matched_patterns: Vec<String>,
}

impl JudgeVerdict {
    fn success_at(stage: u8, name: &str, confidence: f64, message: impl Into<String>) -> Self {
        Self {
            success: true,
            stage,
            stage_name: name.into(),
            confidence,
            message: message.into(),
            bot_detected: false,
            error_family: None,
            prohibition: None,
            final_url: String::new(),
            matched_patterns: Vec::new(),
        }
    }

    fn failure_at(stage: u8, name: &str, confidence: f64, message: impl Into<String>) -> Self {
        Self {
            success: false,
            stage,
            stage_name: name.into(),
            confidence,
            message: message.into(),
            bot_detected: false,
            error_family: None,
            prohibition: None,
            final_url: String::new(),
            matched_patterns: Vec::new(),
        }
    }
}

/// The six-stage judge, pure over page-state snapshots.
#[derive(Debug)]
pub struct SuccessJudge {
    pre: PreSubmissionState,
    matcher: DetectionPatternMatcher,
    bot_detector: BotDetector,
}

impl SuccessJudge {
    /// Initialize with the pre-submission snapshot. This must happen before
    /// the submit click so URL and form counts reflect the original page.
    pub fn new(pre: PreSubmissionState) -> Self {
        Self {
            pre,
            matcher: DetectionPatternMatcher::default(),
            bot_detector: BotDetector::new(),
        }
    }

    pub fn with_matcher(mut self, matcher: DetectionPatternMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Run the staged judgment over the post-submission state.
    pub fn judge(&self, state: &PageState, tracer: &mut JudgmentTracer) -> JudgeVerdict {
        // Stage 0: pre-submission prohibition is terminal.
        if let Some(p) = &self.pre.prohibition {
            if p.detected {
                tracer.start_stage(JudgmentStage::Stage0Init);
                tracer.complete_judgment(StageOutcome::Failure, JudgmentStage::Stage0Init, 1.0);
                let mut v = JudgeVerdict::failure_at(
                    0,
                    "prohibition_detected",
                    1.0,
                    format!("solicitation prohibition detected ({} phrases)", p.phrases.len()),
                );
                v.prohibition = Some(p.clone());
                v.final_url = state.url.clone();
                return v;
            }
        }

        // Stage 0.5: early-failure gate.
        if let Some(mut verdict) = self.early_failure_gate(state, tracer) {
            verdict.final_url = state.url.clone();
            return verdict;
        }

        // Stage 1: URL change.
        tracer.start_stage(JudgmentStage::Stage1UrlChange);
        if let Some(mut verdict) = self.stage1_url_change(state, tracer) {
            if verdict.success {
                // Post-change guard: bot/error re-check on the new page.
                if let Some(mut guard) = self.early_failure_gate(state, tracer) {
                    guard.final_url = state.url.clone();
                    tracer.complete_judgment(
                        StageOutcome::Failure,
                        JudgmentStage::Stage1UrlChange,
                        guard.confidence,
                    );
                    return guard;
                }
            }
            tracer.complete_judgment(
                StageOutcome::Success,
                JudgmentStage::Stage1UrlChange,
                verdict.confidence,
            );
            verdict.final_url = state.url.clone();
            return verdict;
        }
        tracer.complete_stage(StageOutcome::Pending, None);

        // Stage 2: success message.
        tracer.start_stage(JudgmentStage::Stage2SuccessMessage);
        if let Some(mut verdict) = self.stage2_success_message(state, tracer) {
            tracer.complete_judgment(
                StageOutcome::Success,
                JudgmentStage::Stage2SuccessMessage,
                verdict.confidence,
            );
            verdict.final_url = state.url.clone();
            return verdict;
        }
        tracer.complete_stage(StageOutcome::Pending, None);

        // Stage 3: form disappearance.
        tracer.start_stage(JudgmentStage::Stage3FormDisappearance);
        if let Some(mut verdict) = self.stage3_form_disappearance(state, tracer) {
            tracer.complete_judgment(
                StageOutcome::Success,
                JudgmentStage::Stage3FormDisappearance,
                verdict.confidence,
            );
            verdict.final_url = state.url.clone();
            return verdict;
        }
        tracer.complete_stage(StageOutcome::Pending, None);

        // Stage 4: sibling analysis.
        tracer.start_stage(JudgmentStage::Stage4SiblingAnalysis);
        if let Some(mut verdict) = self.stage4_sibling_analysis(state, tracer) {
            tracer.complete_judgment(
                StageOutcome::Success,
                JudgmentStage::Stage4SiblingAnalysis,
                verdict.confidence,
            );
            verdict.final_url = state.url.clone();
            return verdict;
        }
        tracer.complete_stage(StageOutcome::Pending, None);

        // Stage 5: error patterns (failure only; no-error continues).
        tracer.start_stage(JudgmentStage::Stage5ErrorPatterns);
        if let Some(mut verdict) = self.stage5_error_patterns(state, tracer) {
            tracer.complete_judgment(
                StageOutcome::Failure,
                JudgmentStage::Stage5ErrorPatterns,
                verdict.confidence,
            );
            verdict.final_url = state.url.clone();
            return verdict;
        }
        tracer.complete_stage(StageOutcome::Pending, None);

        // Stage 6: final fallback.
        tracer.start_stage(JudgmentStage::Stage6FailurePatterns);
        let mut verdict = self.stage6_failure_patterns(state, tracer);
        tracer.complete_judgment(
            if verdict.success { StageOutcome::Success } else { StageOutcome::Failure },
            JudgmentStage::Stage6FailurePatterns,
            verdict.confidence,
        );
        verdict.final_url = state.url.clone();
        verdict
    }

    /// The strict early-failure gate: bot protection, visible error
    /// elements, or a strong multi-category failure text signal.
    fn early_failure_gate(
        &self,
        state: &PageState,
        tracer: &mut JudgmentTracer,
    ) -> Option<JudgeVerdict> {
        if let Some(kind) = self.bot_detector.detect(&state.bot_probe) {
            let mut v = JudgeVerdict::failure_at(
                1,
                "early_gate_bot_protection",
                0.95,
                format!("bot protection detected: {kind}"),
            );
            v.bot_detected = true;
            v.error_family = Some(ErrorFamily::Recaptcha);
            tracer.add_pattern_match(format!("bot:{kind}"));
            return Some(v);
        }

        if let Some(text) = state.visible_error_texts.iter().find(|t| !t.trim().is_empty()) {
            tracer.add_element(format!("error element: {}", text.chars().take(60).collect::<String>()));
            let mut v = JudgeVerdict::failure_at(
                1,
                "early_gate_error_element",
                0.9,
                "visible error element detected",
            );
            v.error_family = self.classify_error_text(text);
            return Some(v);
        }

        // Strong text signal: ≥2 failure categories, no strong success
        // phrase, and a URL that does not read as a success page.
        let body = &state.body_text;
        if body.is_empty() {
            return None;
        }
        let categories: [(&str, &[&str]); 4] = [
            ("required", &["必須", "未入力", "入力してください", "is required", "please enter", "please select", "please fill"]),
            ("invalid", &["不正", "無効", "invalid", "正しく入力", "形式が正しく"]),
            ("retry", &["もう一度", "やり直し", "retry", "try again"]),
            ("bot", &["recaptcha", "captcha", "not a robot", "human verification", "認証してください", "画像認証", "ロボットでは", "人間であること"]),
        ];
        let lower = body.to_lowercase();
        let mut matched: Vec<&str> = Vec::new();
        for (name, tokens) in &categories {
            if tokens.iter().any(|t| lower.contains(&t.to_lowercase())) {
                matched.push(name);
            }
        }
        let has_bot_text = matched.contains(&"bot");
        let strong = matched.iter().filter(|c| **c != "bot").count() >= 2 || has_bot_text;
        if !strong {
            return None;
        }
        let has_strong_success = SUCCESS_PATTERNS
            .iter()
            .take(STRONG_SUCCESS_PREFIX)
            .any(|p| p.is_match(body));
        let url_indicates_success = {
            let lower_url = state.url.to_lowercase();
            SUCCESS_URL_TOKENS.iter().any(|t| lower_url.contains(t))
        };
        if has_strong_success || url_indicates_success {
            return None;
        }
        for m in &matched {
            tracer.add_pattern_match(format!("failure_category:{m}"));
        }
        let mut v = JudgeVerdict::failure_at(
            1,
            "early_gate_failure_text",
            if has_bot_text { 0.9 } else { 0.85 },
            "strong failure text signal detected",
        );
        v.bot_detected = has_bot_text;
        v.error_family = if has_bot_text {
            Some(ErrorFamily::Recaptcha)
        } else {
            Some(ErrorFamily::RequiredMissing)
        };
        Some(v)
    }

    fn stage1_url_change(
        &self,
        state: &PageState,
        tracer: &mut JudgmentTracer,
    ) -> Option<JudgeVerdict> {
        if state.url == self.pre.url {
            return None;
        }
        let original = Url::parse(&self.pre.url).ok();
        let current = Url::parse(&state.url).ok();
        let (Some(original), Some(current)) = (original, current) else {
            return None;
        };
        // Query/hash-only changes never pass stage 1.
        if original.host_str() == current.host_str() && original.path() == current.path() {
            return None;
        }
        let path = current.path().to_lowercase();
        let found: Vec<&str> = SUCCESS_URL_TOKENS
            .iter()
            .filter(|t| path.contains(*t))
            .copied()
            .collect();
        let confidence = if !found.is_empty() {
            0.95
        } else if original.host_str() != current.host_str() {
            0.85
        } else {
            0.90
        };
        for t in &found {
            tracer.add_pattern_match(format!("url:{t}"));
        }
        Some(JudgeVerdict::success_at(
            1,
            "url_change",
            confidence,
            "page navigated away from the form",
        ))
    }

    fn stage2_success_message(
        &self,
        state: &PageState,
        tracer: &mut JudgmentTracer,
    ) -> Option<JudgeVerdict> {
        let mut match_count = 0usize;
        let mut matched = Vec::new();
        for pattern in SUCCESS_PATTERNS.iter() {
            if let Some(m) = pattern.find(&state.body_text) {
                match_count += 1;
                matched.push(m.as_str().to_string());
                tracer.add_pattern_match(m.as_str().to_string());
            }
        }
        let config_hit = self.matcher.contains_success_indicators(&state.body_text);
        if match_count == 0 && !config_hit {
            return None;
        }
        let mut bonus = (match_count as f64 * 0.02).min(0.07);
        if config_hit {
            bonus = bonus.max(0.03);
        }
        let confidence = (0.88 + bonus).min(0.95);
        let mut v = JudgeVerdict::success_at(
            2,
            "success_message",
            confidence,
            format!("success message detected ({match_count} matches)"),
        );
        v.matched_patterns = matched;
        Some(v)
    }

    fn stage3_form_disappearance(
        &self,
        state: &PageState,
        tracer: &mut JudgmentTracer,
    ) -> Option<JudgeVerdict> {
        if self.pre.form_element_count == 0 {
            return None;
        }
        if state.form_count == 0 {
            tracer.add_detail("disappearance", serde_json::json!("complete"));
            return Some(JudgeVerdict::success_at(
                3,
                "form_disappearance",
                0.85,
                "all forms disappeared",
            ));
        }
        let before = self.pre.form_element_count as f64;
        let after = state.form_input_count as f64;
        if after < before * 0.5 {
            let reduction = 1.0 - after / before;
            tracer.add_detail("reduction_rate", serde_json::json!(reduction));
            return Some(JudgeVerdict::success_at(
                3,
                "form_disappearance",
                (0.75 + reduction * 0.1).min(0.83),
                format!("form inputs reduced by {:.0}%", reduction * 100.0),
            ));
        }
        if state.visible_submit_count == 0 {
            return Some(JudgeVerdict::success_at(
                3,
                "form_disappearance",
                0.78,
                "submit buttons disappeared",
            ));
        }
        None
    }

    fn stage4_sibling_analysis(
        &self,
        state: &PageState,
        tracer: &mut JudgmentTracer,
    ) -> Option<JudgeVerdict> {
        const SUCCESS_CLASS_TOKENS: &[&str] = &[
            "success", "complete", "thanks", "thank", "confirmation", "confirmed", "sent",
            "submitted",
        ];
        let mut hits = 0usize;
        for sibling in &state.sibling_hits {
            let class_blob = format!("{} {}", sibling.classes, sibling.id).to_lowercase();
            let class_match = SUCCESS_CLASS_TOKENS.iter().any(|t| class_blob.contains(t));
            let text_match = SUCCESS_PATTERNS
                .iter()
                .take(5)
                .any(|p| p.is_match(&sibling.text));
            if class_match || text_match {
                hits += 1;
                tracer.add_element(format!("sibling:{}", sibling.classes));
            }
        }
        if hits > 0 {
            let confidence = (0.77 + (hits as f64 * 0.01)).min(0.80);
            return Some(JudgeVerdict::success_at(
                4,
                "sibling_analysis",
                confidence,
                format!("{hits} success-classed elements appeared"),
            ));
        }
        if state.disabled_control_count > 0 {
            return Some(JudgeVerdict::success_at(
                4,
                "sibling_analysis",
                0.75,
                format!("{} controls disabled after submit", state.disabled_control_count),
            ));
        }
        None
    }

    fn stage5_error_patterns(
        &self,
        state: &PageState,
        tracer: &mut JudgmentTracer,
    ) -> Option<JudgeVerdict> {
        let mut detected: Vec<ErrorFamily> = Vec::new();
        let mut indicator_count = 0usize;
        for (family, patterns) in ERROR_FAMILIES.iter() {
            let hits = patterns.iter().filter(|p| p.is_match(&state.body_text)).count();
            if hits > 0 {
                detected.push(*family);
                indicator_count += hits;
                tracer.add_pattern_match(format!("error_family:{}", family.as_str()));
            }
        }
        if self.matcher.contains_error_indicators(&state.body_text) {
            if !detected.contains(&ErrorFamily::General) {
                detected.push(ErrorFamily::General);
            }
            indicator_count += 1;
        }
        if detected.is_empty() {
            return None;
        }
        let primary = ErrorFamily::PRIORITY
            .iter()
            .find(|f| detected.contains(f))
            .copied()
            .unwrap_or(ErrorFamily::General);
        let confidence = (0.70 + indicator_count as f64 * 0.01).min(0.75);
        let mut v = JudgeVerdict::failure_at(
            5,
            "error_patterns",
            confidence,
            format!("{} error detected ({indicator_count} indicators)", primary.as_str()),
        );
        v.error_family = Some(primary);
        v.bot_detected = primary == ErrorFamily::Recaptcha;
        Some(v)
    }

    fn stage6_failure_patterns(&self, state: &PageState, tracer: &mut JudgmentTracer) -> JudgeVerdict {
        let mut indicators: Vec<String> = Vec::new();

        let lower_url = state.url.to_lowercase();
        if ["error", "fail", "invalid", "404", "403", "500", "timeout", "エラー", "失敗"]
            .iter()
            .any(|t| lower_url.contains(t))
        {
            indicators.push("failure URL pattern".into());
        }
        if state.responses.iter().any(|r| r.status >= 400) {
            indicators.push("HTTP error response".into());
        }
        let lower_title = state.title.to_lowercase();
        if ["404", "not found", "500", "internal server error", "403", "forbidden", "error", "エラー", "問題が発生"]
            .iter()
            .any(|t| lower_title.contains(t))
        {
            indicators.push(format!("error title: {}", state.title));
        }
        if state.alert_texts.iter().any(|t| !t.trim().is_empty()) {
            indicators.push("visible alert/dialog".into());
        }
        if state.js_error_elements > 0 {
            indicators.push("JS error element".into());
        }
        for i in &indicators {
            tracer.add_pattern_match(i.clone());
        }

        if indicators.len() >= 2 {
            let mut v = JudgeVerdict::failure_at(
                6,
                "failure_patterns",
                0.68,
                format!("failure indicators: {}", indicators.join(", ")),
            );
            v.error_family = Some(ErrorFamily::General);
            return v;
        }
        let confidence = if indicators.is_empty() { 0.70 } else { 0.65 };
        JudgeVerdict::success_at(
            6,
            "failure_patterns",
            confidence,
            "no clear failure pattern; presumed success",
        )
    }

    fn classify_error_text(&self, text: &str) -> Option<ErrorFamily> {
        for (family, patterns) in ERROR_FAMILIES.iter() {
            if patterns.iter().any(|p| p.is_match(text)) {
                return Some(*family);
            }
        }
        Some(ErrorFamily::General)
    }

    /// Highest-priority HTTP status for evidence: 429 > 403 > 5xx > last.
    pub fn primary_http_status(responses: &[ResponseEntry]) -> Option<u16> {
        let statuses: Vec<u16> = responses.iter().map(|r| r.status).filter(|s| *s >= 400).collect();
        if statuses.is_empty() {
            return None;
        }
        if statuses.contains(&429) {
            return Some(429);
        }
        if statuses.contains(&403) {
            return Some(403);
        }
        statuses
            .iter()
            .find(|s| (500..600).contains(&(**s as i32)))
            .copied()
            .or(statuses.last().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pre(url: &str, inputs: usize) -> PreSubmissionState {
        PreSubmissionState {
            url: url.into(),
            form_element_count: inputs,
            prohibition: None,
        }
    }

    fn tracer() -> JudgmentTracer {
        JudgmentTracer::new("https://example.com/contact")
    }

    fn base_state(url: &str) -> PageState {
        PageState {
            url: url.into(),
            form_count: 1,
            form_input_count: 6,
            visible_submit_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_stage0_prohibition_is_terminal() {
        let mut pre_state = pre("https://example.com/contact", 6);
        pre_state.prohibition = Some(ProhibitionResult {
            detected: true,
            phrases: vec!["営業電話はお断りしております".into()],
            ..Default::default()
        });
        let judge = SuccessJudge::new(pre_state);
        let state = base_state("https://example.com/contact/thanks");
        let verdict = judge.judge(&state, &mut tracer());
        assert!(!verdict.success);
        assert_eq!(verdict.stage, 0);
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn test_stage1_path_change_succeeds() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 6));
        let state = base_state("https://example.com/contact/thanks");
        let verdict = judge.judge(&state, &mut tracer());
        assert!(verdict.success);
        assert_eq!(verdict.stage, 1);
        assert_eq!(verdict.confidence, 0.95);
    }

    #[test]
    fn test_query_only_change_does_not_pass_stage1() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 6));
        let mut state = base_state("https://example.com/contact?submitted=1");
        // No other signals; falls through to the stage-6 presumption.
        state.body_text = "お問い合わせフォーム".into();
        let verdict = judge.judge(&state, &mut tracer());
        assert_ne!(verdict.stage, 1);
    }

    #[test]
    fn test_stage1_guard_rejects_bot_on_new_page() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 6));
        let mut state = base_state("https://example.com/verify");
        state.bot_probe.recaptcha_script_tags = 1;
        state.bot_probe.recaptcha_response_fields = 1;
        let verdict = judge.judge(&state, &mut tracer());
        assert!(!verdict.success);
        assert!(verdict.bot_detected);
    }

    #[test]
    fn test_stage2_success_message() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 6));
        let mut state = base_state("https://example.com/contact");
        state.body_text = "お問い合わせを受け付けました。担当者からご連絡いたします。".into();
        let verdict = judge.judge(&state, &mut tracer());
        assert!(verdict.success);
        assert_eq!(verdict.stage, 2);
        assert!(verdict.confidence >= 0.88 && verdict.confidence <= 0.95);
    }

    #[test]
    fn test_stage3_form_disappearance() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 10));
        let mut state = base_state("https://example.com/contact");
        state.form_count = 0;
        state.form_input_count = 0;
        state.body_text = "トップページへ戻る".into();
        let verdict = judge.judge(&state, &mut tracer());
        assert!(verdict.success);
        assert_eq!(verdict.stage, 3);
        assert_eq!(verdict.confidence, 0.85);
    }

    #[test]
    fn test_stage3_input_reduction() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 10));
        let mut state = base_state("https://example.com/contact");
        state.form_count = 1;
        state.form_input_count = 2;
        state.body_text = "ページ".into();
        let verdict = judge.judge(&state, &mut tracer());
        assert!(verdict.success);
        assert_eq!(verdict.stage, 3);
        assert!(verdict.confidence <= 0.83);
    }

    #[test]
    fn test_stage4_sibling_success_class() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 6));
        let mut state = base_state("https://example.com/contact");
        state.body_text = "フォーム".into();
        state.sibling_hits.push(SiblingHit {
            classes: "form-success-box".into(),
            id: String::new(),
            text: String::new(),
        });
        let verdict = judge.judge(&state, &mut tracer());
        assert!(verdict.success);
        assert_eq!(verdict.stage, 4);
    }

    #[test]
    fn test_stage5_error_families() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 6));
        let mut state = base_state("https://example.com/contact");
        state.body_text = "メールアドレスの形式が正しくありません".into();
        let verdict = judge.judge(&state, &mut tracer());
        assert!(!verdict.success);
        assert_eq!(verdict.stage, 5);
        assert_eq!(verdict.error_family, Some(ErrorFamily::EmailFormat));
    }

    #[test]
    fn test_stage6_two_indicators_fail() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 6));
        let mut state = base_state("https://example.com/contact");
        state.title = "500 Internal Server Error".into();
        state.responses.push(ResponseEntry {
            url: "https://example.com/submit".into(),
            status: 500,
        });
        state.body_text = "ページ".into();
        let verdict = judge.judge(&state, &mut tracer());
        assert!(!verdict.success);
        assert_eq!(verdict.stage, 6);
        assert_eq!(verdict.confidence, 0.68);
    }

    #[test]
    fn test_stage6_clean_page_presumed_success() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 6));
        let mut state = base_state("https://example.com/contact");
        state.body_text = "お問い合わせページ".into();
        let verdict = judge.judge(&state, &mut tracer());
        assert!(verdict.success);
        assert_eq!(verdict.stage, 6);
        assert_eq!(verdict.confidence, 0.70);
    }

    #[test]
    fn test_early_gate_requires_two_categories() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 6));
        let mut state = base_state("https://example.com/contact");
        // Only one category: not strong enough for the gate, but stage 5
        // still reads it as a required-missing failure.
        state.body_text = "必須項目が未入力です。入力してください。".into();
        let verdict = judge.judge(&state, &mut tracer());
        assert!(!verdict.success);

        let mut state = base_state("https://example.com/contact");
        state.body_text = "必須項目が未入力です。入力内容が無効です。もう一度お試しください。".into();
        let verdict = judge.judge(&state, &mut tracer());
        assert!(!verdict.success);
        assert_eq!(verdict.stage_name, "early_gate_failure_text");
    }

    #[test]
    fn test_early_gate_spares_success_pages() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 6));
        let mut state = base_state("https://example.com/contact/thanks");
        state.body_text =
            "送信完了しました。必須項目の入力ありがとうございました。無効なデータはありません。もう一度送信する場合はこちら。".into();
        let verdict = judge.judge(&state, &mut tracer());
        assert!(verdict.success);
    }

    #[test]
    fn test_visible_error_element_gates_early() {
        let judge = SuccessJudge::new(pre("https://example.com/contact", 6));
        let mut state = base_state("https://example.com/contact");
        state.visible_error_texts.push("メールアドレスの形式が正しくありません".into());
        let verdict = judge.judge(&state, &mut tracer());
        assert!(!verdict.success);
        assert_eq!(verdict.stage_name, "early_gate_error_element");
        assert_eq!(verdict.error_family, Some(ErrorFamily::EmailFormat));
    }

    #[test]
    fn test_primary_http_status_priority() {
        let rs = |s: &[u16]| -> Vec<ResponseEntry> {
            s.iter()
                .map(|status| ResponseEntry {
                    url: String::new(),
                    status: *status,
                })
                .collect()
        };
        assert_eq!(SuccessJudge::primary_http_status(&rs(&[500, 429, 404])), Some(429));
        assert_eq!(SuccessJudge::primary_http_status(&rs(&[500, 403])), Some(403));
        assert_eq!(SuccessJudge::primary_http_status(&rs(&[404, 503])), Some(503));
        assert_eq!(SuccessJudge::primary_http_status(&rs(&[404, 410])), Some(410));
        assert_eq!(SuccessJudge::primary_http_status(&rs(&[200])), None);
    }
}
