//! Error types for formflow-core.

use thiserror::Error;

/// Result type alias using formflow-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while analyzing, submitting, or persisting.
#[derive(Error, Debug)]
pub enum Error {
    /// Browser/WebDriver operation failed
    #[error("Browser error: {message}")]
    Browser {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Timeout during an inner step (distinct from the outer watchdog)
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The per-company hard watchdog fired
    #[error("Hard timeout: processing exceeded {duration_secs}s")]
    HardTimeout { duration_secs: u64 },

    /// Persistence RPC error
    #[error("RPC error: {procedure} - {message}")]
    Rpc { procedure: String, message: String },

    /// The remote procedure does not exist (drives the legacy-name fallback)
    #[error("RPC function missing: {procedure}")]
    RpcFunctionMissing { procedure: String },

    /// Form analysis produced no usable plan
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Graceful shutdown was requested mid-task
    #[error("Shutdown requested")]
    ShutdownRequested,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a browser error.
    pub fn browser(message: impl Into<String>) -> Self {
        Self::Browser {
            message: message.into(),
            source: None,
        }
    }

    /// Create a browser error with source.
    pub fn browser_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Browser {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an RPC error.
    pub fn rpc(procedure: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rpc {
            procedure: procedure.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Whether this error looks like a lost browser connection. Those get a
    /// full browser reinitialization instead of a page reload.
    pub fn is_connection_loss(&self) -> bool {
        let msg = self.to_string().to_lowercase();
        ["target closed", "connection closed", "browser connection lost", "session not created"]
            .iter()
            .any(|k| msg.contains(k))
    }
}

impl From<thirtyfour::error::WebDriverError> for Error {
    fn from(e: thirtyfour::error::WebDriverError) -> Self {
        Self::Browser {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

/// Error codes surfaced to persistence and classification (one row per
/// submission attempt carries exactly one of these).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Preconditions
    NoFormUrl,
    NotFound,
    SkippedByNamePolicy,
    SkippedAlreadySentToday,
    SkippedWrongClient,
    // Discovery
    AnalysisFailed,
    NoFormFound,
    NoFieldsFilled,
    Mapping,
    NoMessageArea,
    // Submission
    BotDetected,
    ProhibitionDetected,
    ValidationFormat,
    System,
    WorkerError,
    RuleBasedError,
    SubmissionError,
    // Transport/system
    Access,
    Timeout,
    RetryExceeded,
    ShutdownRequested,
}

impl ErrorCode {
    /// Stable string form written to the submissions row.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoFormUrl => "NO_FORM_URL",
            Self::NotFound => "NOT_FOUND",
            Self::SkippedByNamePolicy => "SKIPPED_BY_NAME_POLICY",
            Self::SkippedAlreadySentToday => "SKIPPED_ALREADY_SENT_TODAY",
            Self::SkippedWrongClient => "SKIPPED_WRONG_CLIENT",
            Self::AnalysisFailed => "ANALYSIS_FAILED",
            Self::NoFormFound => "NO_FORM_FOUND",
            Self::NoFieldsFilled => "NO_FIELDS_FILLED",
            Self::Mapping => "MAPPING",
            Self::NoMessageArea => "NO_MESSAGE_AREA",
            Self::BotDetected => "BOT_DETECTED",
            Self::ProhibitionDetected => "PROHIBITION_DETECTED",
            Self::ValidationFormat => "VALIDATION_FORMAT",
            Self::System => "SYSTEM",
            Self::WorkerError => "WORKER_ERROR",
            Self::RuleBasedError => "RULE_BASED_ERROR",
            Self::SubmissionError => "SUBMISSION_ERROR",
            Self::Access => "ACCESS",
            Self::Timeout => "TIMEOUT",
            Self::RetryExceeded => "RETRY_EXCEEDED",
            Self::ShutdownRequested => "SHUTDOWN_REQUESTED",
        }
    }

    /// Classification category persisted inside `classify_detail`.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ProhibitionDetected => "BUSINESS",
            Self::NoMessageArea | Self::NoFormFound | Self::Mapping => "FORM_STRUCTURE",
            Self::BotDetected => "BOT_PROTECTION",
            Self::ValidationFormat => "VALIDATION",
            Self::Access | Self::Timeout | Self::RetryExceeded => "TRANSPORT",
            Self::SkippedByNamePolicy
            | Self::SkippedAlreadySentToday
            | Self::SkippedWrongClient
            | Self::NoFormUrl
            | Self::NotFound => "PRECONDITION",
            Self::ShutdownRequested => "LIFECYCLE",
            _ => "SYSTEM",
        }
    }

    /// Whether a later run may retry this company.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Access
                | Self::Timeout
                | Self::RetryExceeded
                | Self::System
                | Self::SubmissionError
                | Self::WorkerError
                | Self::ShutdownRequested
                | Self::SkippedAlreadySentToday
        )
    }

    /// Cooldown before the next attempt, in seconds. Zero for terminal codes.
    pub fn cooldown_seconds(&self) -> u64 {
        match self {
            Self::Access | Self::Timeout => 3_600,
            Self::System | Self::SubmissionError | Self::WorkerError => 21_600,
            Self::RetryExceeded => 86_400,
            _ => 0,
        }
    }

    /// Local recovery policy for this code.
    pub fn recovery(&self) -> RecoveryAction {
        match self {
            Self::Timeout => RecoveryAction::ReloadPage,
            Self::Access => RecoveryAction::ReinitBrowser,
            _ => RecoveryAction::None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Local recovery attempted before surfacing a failure to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    ReloadPage,
    ReinitBrowser,
}

/// Maps raw failures to taxonomy codes. Kept in one place so the final
/// `classify_detail` always carries the canonical category and retry flag.
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a free-form error message from the processing pipeline.
    pub fn classify_message(message: &str, is_timeout: bool, is_bot: bool) -> ErrorCode {
        let lower = message.to_lowercase();
        if is_bot || ["recaptcha", "cloudflare", "bot protection"].iter().any(|k| lower.contains(k))
        {
            return ErrorCode::BotDetected;
        }
        if is_timeout || lower.contains("timeout") || lower.contains("timed out") {
            return ErrorCode::Timeout;
        }
        if ["target closed", "connection closed", "net::err", "dns", "refused"]
            .iter()
            .any(|k| lower.contains(k))
        {
            return ErrorCode::Access;
        }
        ErrorCode::WorkerError
    }

    /// Classify a submission failure using the judge's primary error family
    /// and the page content, mirroring the submission-side mapping table.
    pub fn classify_submission(
        primary_error_family: Option<&str>,
        error_message: &str,
        page_content: &str,
    ) -> ErrorCode {
        if let Some(family) = primary_error_family {
            match family {
                "required_missing" => return ErrorCode::Mapping,
                "email_format" => return ErrorCode::ValidationFormat,
                "recaptcha" => return ErrorCode::BotDetected,
                "solicitation_refusal" => return ErrorCode::ProhibitionDetected,
                "system" => return ErrorCode::System,
                _ => {}
            }
        }
        let blob = format!("{} {}", error_message, page_content).to_lowercase();
        if blob.contains("recaptcha") || blob.contains("captcha") {
            ErrorCode::BotDetected
        } else if blob.contains("submit button not found") {
            ErrorCode::NoFormFound
        } else {
            ErrorCode::SubmissionError
        }
    }

    /// Whether local recovery should even be attempted for this code.
    pub fn is_recoverable(code: ErrorCode) -> bool {
        code.recovery() != RecoveryAction::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_strings_are_stable() {
        assert_eq!(ErrorCode::NoMessageArea.as_str(), "NO_MESSAGE_AREA");
        assert_eq!(ErrorCode::ProhibitionDetected.as_str(), "PROHIBITION_DETECTED");
        assert_eq!(ErrorCode::SkippedAlreadySentToday.as_str(), "SKIPPED_ALREADY_SENT_TODAY");
    }

    #[test]
    fn test_canonical_categories() {
        assert_eq!(ErrorCode::ProhibitionDetected.category(), "BUSINESS");
        assert_eq!(ErrorCode::NoMessageArea.category(), "FORM_STRUCTURE");
        assert!(!ErrorCode::ProhibitionDetected.retryable());
        assert!(!ErrorCode::NoMessageArea.retryable());
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(
            ErrorClassifier::classify_message("reCAPTCHA challenge shown", false, false),
            ErrorCode::BotDetected
        );
        assert_eq!(
            ErrorClassifier::classify_message("navigation timed out", false, false),
            ErrorCode::Timeout
        );
        assert_eq!(
            ErrorClassifier::classify_message("Target closed unexpectedly", false, false),
            ErrorCode::Access
        );
        assert_eq!(
            ErrorClassifier::classify_message("something odd", false, false),
            ErrorCode::WorkerError
        );
    }

    #[test]
    fn test_classify_submission_uses_judge_family_first() {
        assert_eq!(
            ErrorClassifier::classify_submission(Some("required_missing"), "", ""),
            ErrorCode::Mapping
        );
        assert_eq!(
            ErrorClassifier::classify_submission(None, "Submit button not found", ""),
            ErrorCode::NoFormFound
        );
    }

    #[test]
    fn test_recovery_policy() {
        assert_eq!(ErrorCode::Timeout.recovery(), RecoveryAction::ReloadPage);
        assert_eq!(ErrorCode::Access.recovery(), RecoveryAction::ReinitBrowser);
        assert_eq!(ErrorCode::Mapping.recovery(), RecoveryAction::None);
    }

    #[test]
    fn test_connection_loss_detection() {
        let e = Error::browser("Target closed while navigating");
        assert!(e.is_connection_loss());
        let e = Error::browser("element not interactable");
        assert!(!e.is_connection_loss());
    }
}
