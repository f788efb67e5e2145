//! Judgment tracing.
//!
//! Every judge run records an ordered list of stage traces (timing, result,
//! confidence, matched patterns, analyzed elements) plus the final verdict,
//! attached to the submission evidence for after-the-fact analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The judgment stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentStage {
    Stage0Init,
    Stage1UrlChange,
    Stage2SuccessMessage,
    Stage3FormDisappearance,
    Stage4SiblingAnalysis,
    Stage5ErrorPatterns,
    Stage6FailurePatterns,
    Complete,
}

impl JudgmentStage {
    /// Numeric stage id persisted in classify_detail (0-6).
    pub fn id(&self) -> u8 {
        match self {
            Self::Stage0Init => 0,
            Self::Stage1UrlChange => 1,
            Self::Stage2SuccessMessage => 2,
            Self::Stage3FormDisappearance => 3,
            Self::Stage4SiblingAnalysis => 4,
            Self::Stage5ErrorPatterns => 5,
            Self::Stage6FailurePatterns | Self::Complete => 6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Stage0Init => "initialization",
            Self::Stage1UrlChange => "url_change",
            Self::Stage2SuccessMessage => "success_message",
            Self::Stage3FormDisappearance => "form_disappearance",
            Self::Stage4SiblingAnalysis => "sibling_analysis",
            Self::Stage5ErrorPatterns => "error_patterns",
            Self::Stage6FailurePatterns => "failure_patterns",
            Self::Complete => "complete",
        }
    }
}

/// Stage outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Failure,
    Pending,
    Error,
    Skipped,
}

/// Trace of one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTrace {
    pub stage: JudgmentStage,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub patterns_matched: Vec<String>,
    pub elements_analyzed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub details: HashMap<String, serde_json::Value>,
}

impl StageTrace {
    fn new(stage: JudgmentStage) -> Self {
        Self {
            stage,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            result: None,
            confidence: None,
            patterns_matched: Vec::new(),
            elements_analyzed: Vec::new(),
            error: None,
            details: HashMap::new(),
        }
    }

    fn complete(&mut self, result: StageOutcome, confidence: Option<f64>, error: Option<String>) {
        let now = Utc::now();
        self.duration_ms = Some((now - self.started_at).num_milliseconds() as f64);
        self.completed_at = Some(now);
        self.result = Some(result);
        self.confidence = confidence;
        self.error = error;
    }
}

/// The full judgment trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgmentTrace {
    pub trace_id: Uuid,
    pub form_url: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_result: Option<StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_stage: Option<JudgmentStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_confidence: Option<f64>,
    pub stage_traces: Vec<StageTrace>,
    pub page_metadata: HashMap<String, serde_json::Value>,
}

/// Records stage progression for one judge run.
#[derive(Debug)]
pub struct JudgmentTracer {
    trace: JudgmentTrace,
}

impl JudgmentTracer {
    pub fn new(form_url: impl Into<String>) -> Self {
        Self {
            trace: JudgmentTrace {
                trace_id: Uuid::new_v4(),
                form_url: form_url.into(),
                started_at: Utc::now(),
                completed_at: None,
                total_duration_ms: None,
                final_result: None,
                final_stage: None,
                final_confidence: None,
                stage_traces: Vec::new(),
                page_metadata: HashMap::new(),
            },
        }
    }

    pub fn set_page_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.trace.page_metadata.insert(key.into(), value);
    }

    /// Begin a stage; an unfinished previous stage closes as an error.
    pub fn start_stage(&mut self, stage: JudgmentStage) {
        if let Some(open) = self
            .trace
            .stage_traces
            .last_mut()
            .filter(|t| t.completed_at.is_none())
        {
            open.complete(
                StageOutcome::Error,
                None,
                Some("stage was not properly completed".into()),
            );
        }
        self.trace.stage_traces.push(StageTrace::new(stage));
    }

    pub fn add_pattern_match(&mut self, pattern: impl Into<String>) {
        if let Some(t) = self.trace.stage_traces.last_mut() {
            t.patterns_matched.push(pattern.into());
        }
    }

    pub fn add_element(&mut self, description: impl Into<String>) {
        if let Some(t) = self.trace.stage_traces.last_mut() {
            t.elements_analyzed.push(description.into());
        }
    }

    pub fn add_detail(&mut self, key: impl Into<String>, value: serde_json::Value) {
        if let Some(t) = self.trace.stage_traces.last_mut() {
            t.details.insert(key.into(), value);
        }
    }

    pub fn complete_stage(&mut self, result: StageOutcome, confidence: Option<f64>) {
        if let Some(t) = self.trace.stage_traces.last_mut() {
            t.complete(result, confidence, None);
        }
    }

    pub fn complete_judgment(
        &mut self,
        result: StageOutcome,
        stage: JudgmentStage,
        confidence: f64,
    ) {
        if let Some(open) = self
            .trace
            .stage_traces
            .last_mut()
            .filter(|t| t.completed_at.is_none())
        {
            open.complete(result, Some(confidence), None);
        }
        let now = Utc::now();
        self.trace.total_duration_ms =
            Some((now - self.trace.started_at).num_milliseconds() as f64);
        self.trace.completed_at = Some(now);
        self.trace.final_result = Some(result);
        self.trace.final_stage = Some(stage);
        self.trace.final_confidence = Some(confidence);
    }

    pub fn trace(&self) -> &JudgmentTrace {
        &self.trace
    }

    pub fn into_trace(self) -> JudgmentTrace {
        self.trace
    }

    /// Compact summary for the submissions evidence blob.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "trace_id": self.trace.trace_id,
            "stages": self.trace.stage_traces.iter().map(|t| {
                serde_json::json!({
                    "stage": t.stage.name(),
                    "result": t.result,
                    "confidence": t.confidence,
                    "duration_ms": t.duration_ms,
                    "patterns_matched": t.patterns_matched.len(),
                })
            }).collect::<Vec<_>>(),
            "final_result": self.trace.final_result,
            "final_stage": self.trace.final_stage.map(|s| s.id()),
            "final_confidence": self.trace.final_confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stage_ids_are_bounded() {
        assert_eq!(JudgmentStage::Stage0Init.id(), 0);
        assert_eq!(JudgmentStage::Stage6FailurePatterns.id(), 6);
    }

    #[test]
    fn test_stage_progression() {
        let mut tracer = JudgmentTracer::new("https://example.com/contact");
        tracer.start_stage(JudgmentStage::Stage1UrlChange);
        tracer.add_pattern_match("thanks");
        tracer.complete_stage(StageOutcome::Success, Some(0.95));
        tracer.complete_judgment(StageOutcome::Success, JudgmentStage::Stage1UrlChange, 0.95);

        let trace = tracer.trace();
        assert_eq!(trace.stage_traces.len(), 1);
        assert_eq!(trace.stage_traces[0].result, Some(StageOutcome::Success));
        assert_eq!(trace.final_confidence, Some(0.95));
        assert!(trace.total_duration_ms.is_some());
    }

    #[test]
    fn test_unfinished_stage_closed_as_error() {
        let mut tracer = JudgmentTracer::new("https://example.com");
        tracer.start_stage(JudgmentStage::Stage1UrlChange);
        tracer.start_stage(JudgmentStage::Stage2SuccessMessage);
        let trace = tracer.trace();
        assert_eq!(trace.stage_traces[0].result, Some(StageOutcome::Error));
    }

    #[test]
    fn test_summary_shape() {
        let mut tracer = JudgmentTracer::new("https://example.com");
        tracer.start_stage(JudgmentStage::Stage1UrlChange);
        tracer.complete_judgment(StageOutcome::Failure, JudgmentStage::Stage1UrlChange, 0.9);
        let summary = tracer.summary();
        assert_eq!(summary["final_stage"], 1);
        assert!(summary["stages"].as_array().unwrap().len() == 1);
    }
}
