//! Submission success judgment: the six-stage judge and its tracer.

pub mod success;
pub mod tracer;

pub use success::{
    ErrorFamily, JudgeVerdict, PageState, PreSubmissionState, ResponseEntry, SiblingHit,
    SuccessJudge,
};
pub use tracer::{JudgmentStage, JudgmentTrace, JudgmentTracer, StageOutcome, StageTrace};

/// Alias kept for the public API: a stage trace is the per-stage result.
pub type StageResult = StageTrace;
