//! Detection: bot protection, solicitation prohibition, and the
//! success/error indicator pattern matcher.

pub mod bot;
pub mod patterns;
pub mod prohibition;

pub use bot::{BotDetector, BotKind, BotProbe};
pub use patterns::DetectionPatternMatcher;
pub use prohibition::{
    ConfidenceLevel, ProhibitionCache, ProhibitionDetector, ProhibitionLevel, ProhibitionResult,
};
