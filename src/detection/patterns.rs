//! Success/error indicator lists used by the judge alongside its regex
//! catalogs. Patterns are held lowercased so matching stays allocation-free
//! on the hot path, and a config file can override the built-ins.

use serde::{Deserialize, Serialize};

/// Configurable indicator lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionPatternConfig {
    pub success_url_patterns: Vec<String>,
    pub success_content_patterns: Vec<String>,
    pub error_url_patterns: Vec<String>,
    pub error_content_patterns: Vec<String>,
}

impl Default for DetectionPatternConfig {
    fn default() -> Self {
        Self {
            success_url_patterns: [
                "/thanks",
                "/thank-you",
                "/complete",
                "/completed",
                "/done",
                "/submitted",
                "/success",
                "/confirm",
                "/confirmation",
                "/kanryou",
                "/uketsuke",
                "/arigatou",
                "完了",
                "受付",
                "成功",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            success_content_patterns: [
                "送信完了",
                "受付完了",
                "ありがとう",
                "完了しました",
                "thank you",
                "submitted",
                "successfully",
                "confirmation",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            error_url_patterns: ["/error", "/404", "/500", "/403", "/failed", "エラー", "失敗"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            error_content_patterns: [
                "エラー",
                "失敗",
                "error",
                "failed",
                "問題が発生",
                "something went wrong",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Indicator matcher with lowercase precompute.
#[derive(Debug, Clone)]
pub struct DetectionPatternMatcher {
    success_url: Vec<String>,
    success_content: Vec<String>,
    error_url: Vec<String>,
    error_content: Vec<String>,
}

impl Default for DetectionPatternMatcher {
    fn default() -> Self {
        Self::new(DetectionPatternConfig::default())
    }
}

impl DetectionPatternMatcher {
    pub fn new(config: DetectionPatternConfig) -> Self {
        let lower = |v: Vec<String>| v.into_iter().map(|s| s.to_lowercase()).collect();
        Self {
            success_url: lower(config.success_url_patterns),
            success_content: lower(config.success_content_patterns),
            error_url: lower(config.error_url_patterns),
            error_content: lower(config.error_content_patterns),
        }
    }

    pub fn is_success_url(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        self.success_url.iter().any(|p| lower.contains(p))
    }

    pub fn is_error_url(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        self.error_url.iter().any(|p| lower.contains(p))
    }

    pub fn contains_success_indicators(&self, content: &str) -> bool {
        let lower = content.to_lowercase();
        self.success_content.iter().any(|p| lower.contains(p))
    }

    pub fn contains_error_indicators(&self, content: &str) -> bool {
        let lower = content.to_lowercase();
        self.error_content.iter().any(|p| lower.contains(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_url_indicators() {
        let m = DetectionPatternMatcher::default();
        assert!(m.is_success_url("https://example.com/contact/thanks"));
        assert!(m.is_success_url("https://example.com/送信完了"));
        assert!(!m.is_success_url("https://example.com/contact"));
        assert!(m.is_error_url("https://example.com/404"));
    }

    #[test]
    fn test_content_indicators_case_insensitive() {
        let m = DetectionPatternMatcher::default();
        assert!(m.contains_success_indicators("Thank You for contacting us"));
        assert!(m.contains_error_indicators("Something Went Wrong"));
        assert!(!m.contains_success_indicators("お問い合わせフォーム"));
    }

    #[test]
    fn test_config_override() {
        let config = DetectionPatternConfig {
            success_content_patterns: vec!["受け付けました".into()],
            ..Default::default()
        };
        let m = DetectionPatternMatcher::new(config);
        assert!(m.contains_success_indicators("受け付けました"));
    }
}
