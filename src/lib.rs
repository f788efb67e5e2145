//! # formflow-core
//!
//! A queue-driven contact-form analysis and submission engine. Each worker
//! drains a pre-seeded daily queue of companies, opens the company's contact
//! form in a WebDriver-controlled browser, classifies the form with a
//! rule-based analyzer, fills it from tenant data, submits, and judges the
//! outcome with a staged success judge before persisting the verdict.
//!
//! ## Core Components
//!
//! - **Analyzer**: snapshot-based form understanding (scoring, mapping,
//!   split/combined field reconciliation, value assignment)
//! - **Detection**: bot-protection and solicitation-prohibition detectors
//! - **Judge**: six-stage submission success judgment with tracing
//! - **Submit**: input handler, submit-button detection, and the
//!   submission state machine
//! - **Queue**: atomic claim / mark-done RPC surface and the worker runner
//!
//! ## Example
//!
//! ```rust,ignore
//! use formflow_core::config::{load_tenant_config, HeadlessMode, RunnerConfig, WorkerConfig};
//! use formflow_core::queue::Runner;
//!
//! let tenant = load_tenant_config("/tmp/client_config_*.json")?;
//! let (db_url, db_api_key) = RunnerConfig::resolve_credentials()?;
//! let (company_table, send_queue_table) = RunnerConfig::resolve_tables();
//! let config = RunnerConfig {
//!     targeting_id: tenant.targeting_id,
//!     tenant,
//!     worker: WorkerConfig::default(),
//!     num_workers: 2,
//!     headless: HeadlessMode::Auto,
//!     target_date: None,
//!     shard_id: None,
//!     max_processed: 0,
//!     company_id: None,
//!     db_url,
//!     db_api_key,
//!     run_id: RunnerConfig::resolve_run_id(),
//!     company_table,
//!     send_queue_table,
//! };
//! Runner::new(config).run().await?;
//! ```

pub mod analyzer;
pub mod browser;
pub mod config;
pub mod detection;
pub mod error;
pub mod judge;
pub mod queue;
pub mod sanitize;
pub mod submit;
pub mod template;
pub mod timeutil;
pub mod worker;

// Re-exports for convenience
pub use analyzer::{
    AnalysisResult, AnalysisSettings, AssignedInput, AutoAction, FieldMapping, FormSnapshot,
    InputKind, RuleBasedAnalyzer,
};
pub use config::{
    ClientInfo, RunnerConfig, TargetingConfig, TenantConfig, WorkerConfig, save_tenant_config,
};
pub use detection::{
    BotDetector, BotProbe, ConfidenceLevel, DetectionPatternMatcher, ProhibitionDetector,
    ProhibitionLevel, ProhibitionResult,
};
pub use error::{Error, ErrorCode, Result};
pub use judge::{JudgeVerdict, JudgmentStage, JudgmentTracer, StageResult, SuccessJudge};
pub use queue::{ClaimedEntry, ClassifyDetail, QueueClient, Runner, SubmissionRecord};
pub use timeutil::{BusinessHours, queue_day, now_fixed};
pub use worker::{FormWorker, WorkerOutcome};
