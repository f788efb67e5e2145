//! Bot-protection detection.
//!
//! Strict reCAPTCHA v2 detection first (anchor iframe + sitekey + visible
//! widget), then a composite-signal relaxation for invisible/v3 variants,
//! then a strict Cloudflare challenge AND-chain. Normal-page features
//! (forms, navigation chrome, enough text) veto everything: false
//! positives cost a submission, false negatives only cost a retry.

use serde::{Deserialize, Serialize};

/// Thresholds for the normal-page exclusion.
pub const NORMAL_PAGE_MIN_TEXT_LEN: usize = 500;
pub const NORMAL_PAGE_MIN_HTML_LEN: usize = 1_000;

/// What was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotKind {
    Recaptcha,
    CloudflareChallenge,
}

impl std::fmt::Display for BotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recaptcha => write!(f, "reCAPTCHA"),
            Self::CloudflareChallenge => write!(f, "Cloudflare Challenge"),
        }
    }
}

/// One JS evaluation harvests everything the detector needs; the decision
/// itself is pure over this probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotProbe {
    // reCAPTCHA signals
    pub recaptcha_anchor_iframes: usize,
    pub recaptcha_sitekey_widgets: usize,
    pub recaptcha_widget_visible: bool,
    pub recaptcha_script_tags: usize,
    pub recaptcha_iframes: usize,
    pub recaptcha_response_fields: usize,
    pub recaptcha_badges: usize,
    pub has_grecaptcha_object: bool,
    // Cloudflare signals
    pub url: String,
    pub title: String,
    pub cloudflare_elements: usize,
    pub html_contains_cloudflare: bool,
    pub html_contains_checking_browser: bool,
    // Normal-page features
    pub form_control_count: usize,
    pub nav_chrome_count: usize,
    pub body_text_len: usize,
    pub html_len: usize,
}

impl BotProbe {
    fn is_normal_page(&self) -> bool {
        self.form_control_count > 0
            || self.nav_chrome_count > 0
            || self.body_text_len > NORMAL_PAGE_MIN_TEXT_LEN
            || self.html_len > NORMAL_PAGE_MIN_HTML_LEN
    }
}

/// The pure bot-protection decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct BotDetector;

impl BotDetector {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a probe. Explicit protections are checked before the
    /// normal-page exclusion so a challenge page with a lone form still
    /// counts.
    pub fn detect(&self, probe: &BotProbe) -> Option<BotKind> {
        if let Some(kind) = self.detect_recaptcha(probe) {
            return Some(kind);
        }
        if let Some(kind) = self.detect_cloudflare(probe) {
            return Some(kind);
        }
        None
    }

    fn detect_recaptcha(&self, probe: &BotProbe) -> Option<BotKind> {
        // Strict: v2 visible.
        if probe.recaptcha_anchor_iframes > 0
            && probe.recaptcha_sitekey_widgets > 0
            && probe.recaptcha_widget_visible
        {
            return Some(BotKind::Recaptcha);
        }
        // Relaxed: two or more independent signals (invisible v2 / v3).
        let mut signals = 0;
        if probe.recaptcha_script_tags > 0 {
            signals += 1;
        }
        if probe.recaptcha_anchor_iframes > 0 || probe.recaptcha_iframes > 0 {
            signals += 1;
        }
        if probe.recaptcha_response_fields > 0 {
            signals += 1;
        }
        if probe.recaptcha_badges > 0 {
            signals += 1;
        }
        if probe.has_grecaptcha_object {
            signals += 1;
        }
        if signals >= 2 {
            return Some(BotKind::Recaptcha);
        }
        None
    }

    fn detect_cloudflare(&self, probe: &BotProbe) -> Option<BotKind> {
        if !probe.url.contains("/cdn-cgi/challenge-platform/") {
            return None;
        }
        if probe.title != "Just a moment..." {
            return None;
        }
        if probe.cloudflare_elements == 0 {
            return None;
        }
        if probe.is_normal_page() {
            return None;
        }
        if !(probe.html_contains_cloudflare && probe.html_contains_checking_browser) {
            return None;
        }
        Some(BotKind::CloudflareChallenge)
    }
}

/// The JS expression the browser layer evaluates to build a [`BotProbe`].
pub const BOT_PROBE_SCRIPT: &str = r#"
return (() => {
  const widget = document.querySelector('.g-recaptcha');
  let visible = false;
  if (widget) {
    const s = getComputedStyle(widget);
    visible = s.display !== 'none' && s.visibility !== 'hidden';
  }
  const html = document.documentElement.outerHTML;
  return {
    recaptcha_anchor_iframes: document.querySelectorAll('iframe[src*="recaptcha/api2/anchor"]').length,
    recaptcha_sitekey_widgets: document.querySelectorAll('.g-recaptcha[data-sitekey]').length,
    recaptcha_widget_visible: visible,
    recaptcha_script_tags: document.querySelectorAll('script[src*="recaptcha/api.js"]').length,
    recaptcha_iframes: document.querySelectorAll('iframe[src*="recaptcha"]').length,
    recaptcha_response_fields: document.querySelectorAll('[name="g-recaptcha-response"]').length,
    recaptcha_badges: document.querySelectorAll('.grecaptcha-badge, .g-recaptcha').length,
    has_grecaptcha_object: typeof window.grecaptcha !== 'undefined',
    url: location.href,
    title: document.title,
    cloudflare_elements: document.querySelectorAll('.cf-browser-verification, #cf-wrapper').length,
    html_contains_cloudflare: html.includes('Cloudflare'),
    html_contains_checking_browser: html.includes('Checking your browser'),
    form_control_count: document.querySelectorAll('form, input, textarea, select').length,
    nav_chrome_count: document.querySelectorAll('nav, header, footer, .header, .footer, .navigation').length,
    body_text_len: (document.body ? document.body.innerText : '').trim().length,
    html_len: html.length
  };
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_visible_recaptcha_v2_detected() {
        let probe = BotProbe {
            recaptcha_anchor_iframes: 1,
            recaptcha_sitekey_widgets: 1,
            recaptcha_widget_visible: true,
            // A visible widget on an otherwise normal page still counts.
            form_control_count: 8,
            body_text_len: 4000,
            ..Default::default()
        };
        assert_eq!(BotDetector::new().detect(&probe), Some(BotKind::Recaptcha));
    }

    #[test]
    fn test_single_weak_signal_not_enough() {
        let probe = BotProbe {
            recaptcha_script_tags: 1,
            form_control_count: 8,
            ..Default::default()
        };
        assert_eq!(BotDetector::new().detect(&probe), None);
    }

    #[test]
    fn test_two_signals_flag_invisible_recaptcha() {
        let probe = BotProbe {
            recaptcha_script_tags: 1,
            recaptcha_response_fields: 1,
            ..Default::default()
        };
        assert_eq!(BotDetector::new().detect(&probe), Some(BotKind::Recaptcha));
    }

    #[test]
    fn test_cloudflare_requires_full_chain() {
        let mut probe = BotProbe {
            url: "https://example.com/cdn-cgi/challenge-platform/h".into(),
            title: "Just a moment...".into(),
            cloudflare_elements: 1,
            html_contains_cloudflare: true,
            html_contains_checking_browser: true,
            ..Default::default()
        };
        assert_eq!(
            BotDetector::new().detect(&probe),
            Some(BotKind::CloudflareChallenge)
        );
        probe.title = "Welcome".into();
        assert_eq!(BotDetector::new().detect(&probe), None);
    }

    #[test]
    fn test_normal_page_vetoes_cloudflare() {
        let probe = BotProbe {
            url: "https://example.com/cdn-cgi/challenge-platform/h".into(),
            title: "Just a moment...".into(),
            cloudflare_elements: 1,
            html_contains_cloudflare: true,
            html_contains_checking_browser: true,
            form_control_count: 5,
            ..Default::default()
        };
        assert_eq!(BotDetector::new().detect(&probe), None);
    }
}
