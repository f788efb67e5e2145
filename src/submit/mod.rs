//! Form filling and submission: button detection, input execution, the
//! invalid-field inspector and the submission state machine.

pub mod buttons;
pub mod executor;
pub mod input;
pub mod invalid;

pub use buttons::{ButtonCategory, SubmitCandidate};
pub use executor::{RetryMeta, SubmissionExecutor, SubmissionOutcome};
pub use input::FormInputHandler;
pub use invalid::{detect_invalid_required_fields, plan_retry_fills, InvalidField};
