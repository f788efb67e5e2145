//! Handler-level log sanitization.
//!
//! Every string that can reach a log line or a persisted evidence snippet
//! goes through one sanitizer instead of per-call-site redaction. The rules
//! cover URLs, email addresses, long digit runs (phone/postal), and
//! free-form values wrapped in common assignment syntax.

use regex::Regex;
use std::sync::LazyLock;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s'\x22<>]+").expect("invalid regex"));

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("invalid regex"));

static LONG_DIGITS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{7,}").expect("invalid regex"));

static VALUE_ASSIGN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // value='...' / value="..." / value=...
    Regex::new(r#"(?i)(value\s*[=:]\s*)(?:'[^']*'|\x22[^\x22]*\x22|[^\s,}]+)"#)
        .expect("invalid regex")
});

/// String sanitizer shared by the tracing layer and evidence assembly.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    /// Maximum length of a sanitized snippet (0 = unlimited)
    pub max_len: usize,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self { max_len: 0 }
    }

    /// Limit sanitized output to `max_len` characters.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Redact URLs, emails, long digit runs and inline values.
    pub fn sanitize(&self, input: &str) -> String {
        let mut s = URL_PATTERN.replace_all(input, "***URL***").into_owned();
        s = EMAIL_PATTERN.replace_all(&s, "***EMAIL***").into_owned();
        s = VALUE_ASSIGN_PATTERN.replace_all(&s, "${1}***").into_owned();
        s = LONG_DIGITS_PATTERN.replace_all(&s, "***DIGITS***").into_owned();
        if self.max_len > 0 {
            s.chars().take(self.max_len).collect()
        } else {
            s
        }
    }

    /// Sanitize a page-content snippet destined for classify_detail evidence.
    /// Collapses whitespace in addition to redaction.
    pub fn sanitize_snippet(&self, input: &str, max_len: usize) -> String {
        let collapsed: String = input.split_whitespace().collect::<Vec<_>>().join(" ");
        let redacted = self.sanitize(&collapsed);
        redacted.chars().take(max_len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_redacts_urls_and_emails() {
        let s = Sanitizer::new();
        let out = s.sanitize("visited https://example.com/contact?x=1 as taro@example.com");
        assert_eq!(out, "visited ***URL*** as ***EMAIL***");
    }

    #[test]
    fn test_redacts_long_digit_runs_only() {
        let s = Sanitizer::new();
        let out = s.sanitize("zip 1600023 and index 42");
        assert!(out.contains("***DIGITS***"));
        assert!(out.contains("index 42"));
    }

    #[test]
    fn test_redacts_inline_values() {
        let s = Sanitizer::new();
        let out = s.sanitize("filled value='山田 太郎' ok");
        assert!(!out.contains("山田"));
        assert!(out.contains("value='***'") || out.contains("value=***") || out.contains("***"));
    }

    #[test]
    fn test_snippet_collapses_and_truncates() {
        let s = Sanitizer::new();
        let out = s.sanitize_snippet("a\n  b\t c   d", 5);
        assert_eq!(out, "a b c");
    }
}
