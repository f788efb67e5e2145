//! Browser session lifecycle.
//!
//! One worker owns one WebDriver session. Stealth instrumentation, the
//! cookie/CMP blackhole and resource blocking are applied exactly once per
//! session; recreation happens atomically under a lock when the session
//! goes unhealthy.

use crate::browser::page::PageHandle;
use crate::config::BrowserConfig;
use crate::error::{Error, Result};
use serde_json::json;
use thirtyfour::extensions::cdp::ChromeDevTools;
use thirtyfour::prelude::*;
use thirtyfour::ChromeCapabilities;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Known consent-platform script hosts blocked at the network layer.
const CMP_BLOCK_PATTERNS: &[&str] = &[
    "*cookielaw.org*",
    "*onetrust.com*",
    "*cookiebot.com*",
    "*consensu.org*",
    "*usercentrics.eu*",
    "*trustarc.com*",
    "*quantcast.mgr.consensu.org*",
    "*didomi.io*",
];

/// Stealth instrumentation applied to every new document.
const STEALTH_INIT_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
window.chrome = window.chrome || { runtime: {} };
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3] });
"#;

/// Inert `document.cookie` override, installed only when configured.
const COOKIE_OVERRIDE_SCRIPT: &str = r#"
(() => {
  let jar = '';
  Object.defineProperty(document, 'cookie', {
    get: () => jar,
    set: (v) => { jar = String(v).split(';')[0]; return true; }
  });
})();
"#;

/// Owns the WebDriver session for one worker.
pub struct BrowserManager {
    worker_id: usize,
    config: BrowserConfig,
    headless: bool,
    session: Mutex<Option<WebDriver>>,
    stealth_applied: std::sync::atomic::AtomicBool,
}

impl BrowserManager {
    pub fn new(worker_id: usize, config: BrowserConfig, headless: bool) -> Self {
        Self {
            worker_id,
            config,
            headless,
            session: Mutex::new(None),
            stealth_applied: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn build_capabilities(&self) -> Result<ChromeCapabilities> {
        let mut caps = DesiredCapabilities::chrome();
        if self.headless {
            caps.add_chrome_arg("--headless=new")
                .map_err(|e| Error::browser(format!("capabilities: {e}")))?;
        }
        let lang_arg = format!("--lang={}", self.config.locale);
        for arg in [
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--no-first-run",
            lang_arg.as_str(),
        ] {
            caps.add_chrome_arg(arg)
                .map_err(|e| Error::browser(format!("capabilities: {e}")))?;
        }
        Ok(caps)
    }

    /// Launch (or relaunch) the session and apply the one-time
    /// instrumentation.
    pub async fn launch(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if let Some(old) = guard.take() {
            let _ = old.quit().await;
        }
        self.stealth_applied
            .store(false, std::sync::atomic::Ordering::SeqCst);

        let caps = self.build_capabilities()?;
        let driver = WebDriver::new(&self.config.webdriver_url, caps)
            .await
            .map_err(|e| Error::browser_with_source("session creation failed", e))?;
        self.apply_instrumentation(&driver).await?;
        info!(worker = self.worker_id, "browser session ready");
        *guard = Some(driver);
        Ok(())
    }

    /// Stealth + cookie blackhole + resource blocking. Applied exactly once
    /// per session; relaunching reapplies exactly once.
    async fn apply_instrumentation(&self, driver: &WebDriver) -> Result<()> {
        if self
            .stealth_applied
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Ok(());
        }
        let dev_tools = ChromeDevTools::new(driver.handle.clone());

        // UA + locale consistency with the request headers.
        let ua_result = dev_tools
            .execute_cdp_with_params(
                "Network.setUserAgentOverride",
                json!({
                    "userAgent": self.config.user_agent,
                    "acceptLanguage": self.config.accept_language,
                }),
            )
            .await;
        if let Err(e) = ua_result {
            warn!(worker = self.worker_id, "UA override unavailable: {e}");
        }
        let tz_result = dev_tools
            .execute_cdp_with_params(
                "Emulation.setTimezoneOverride",
                json!({ "timezoneId": self.config.timezone }),
            )
            .await;
        if let Err(e) = tz_result {
            debug!(worker = self.worker_id, "timezone override unavailable: {e}");
        }

        // Resource blocking + CMP blackhole via blocked URL patterns.
        let mut blocked: Vec<String> = Vec::new();
        let rb = &self.config.resource_blocking;
        if rb.block_images {
            blocked.extend(
                ["*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        if rb.block_fonts {
            blocked.extend(["*.woff", "*.woff2", "*.ttf", "*.otf"].iter().map(|s| s.to_string()));
        }
        if rb.block_stylesheets {
            blocked.push("*.css".to_string());
        }
        if self.config.cookie_control.block_cmp_scripts {
            blocked.extend(CMP_BLOCK_PATTERNS.iter().map(|s| s.to_string()));
        }
        if !blocked.is_empty() {
            dev_tools
                .execute_cdp("Network.enable")
                .await
                .map_err(|e| Error::browser(format!("Network.enable: {e}")))?;
            dev_tools
                .execute_cdp_with_params("Network.setBlockedURLs", json!({ "urls": blocked }))
                .await
                .map_err(|e| Error::browser(format!("setBlockedURLs: {e}")))?;
        }

        // Init scripts on every new document.
        if self.stealth_enabled() {
            let _ = dev_tools
                .execute_cdp_with_params(
                    "Page.addScriptToEvaluateOnNewDocument",
                    json!({ "source": STEALTH_INIT_SCRIPT }),
                )
                .await;
            let languages: Vec<&str> =
                self.config.stealth.languages.iter().map(|s| s.as_str()).collect();
            let _ = dev_tools
                .execute_cdp_with_params(
                    "Page.addScriptToEvaluateOnNewDocument",
                    json!({
                        "source": format!(
                            "Object.defineProperty(navigator, 'languages', {{ get: () => {} }});",
                            serde_json::to_string(&languages).unwrap_or_else(|_| "['ja-JP','ja']".into())
                        )
                    }),
                )
                .await;
        }
        if self.config.cookie_control.override_document_cookie {
            let _ = dev_tools
                .execute_cdp_with_params(
                    "Page.addScriptToEvaluateOnNewDocument",
                    json!({ "source": COOKIE_OVERRIDE_SCRIPT }),
                )
                .await;
        }
        Ok(())
    }

    fn stealth_enabled(&self) -> bool {
        self.config.stealth.enabled
    }

    /// Whether the current session still responds.
    pub async fn is_healthy(&self) -> bool {
        let guard = self.session.lock().await;
        match guard.as_ref() {
            Some(driver) => driver.title().await.is_ok(),
            None => false,
        }
    }

    /// Get a page handle, recreating the session atomically when it is
    /// missing or unhealthy.
    pub async fn page(&self) -> Result<PageHandle> {
        {
            let guard = self.session.lock().await;
            if let Some(driver) = guard.as_ref() {
                if driver.title().await.is_ok() {
                    return Ok(PageHandle::new(driver.clone()));
                }
                warn!(worker = self.worker_id, "session unhealthy; recreating");
            }
        }
        self.launch().await?;
        let guard = self.session.lock().await;
        guard
            .as_ref()
            .map(|d| PageHandle::new(d.clone()))
            .ok_or_else(|| Error::browser("session unavailable after relaunch"))
    }

    /// Clear cookies between companies.
    pub async fn clear_cookies(&self) -> Result<()> {
        let guard = self.session.lock().await;
        if let Some(driver) = guard.as_ref() {
            driver.delete_all_cookies().await?;
        }
        Ok(())
    }

    /// Navigate away to a blank page so the previous company's document is
    /// released even when the next claim is slow.
    pub async fn park(&self) -> Result<()> {
        let guard = self.session.lock().await;
        if let Some(driver) = guard.as_ref() {
            let _ = driver.goto("about:blank").await;
        }
        Ok(())
    }

    /// Close the session.
    pub async fn close(&self) {
        let mut guard = self.session.lock().await;
        if let Some(driver) = guard.take() {
            if let Err(e) = driver.quit().await {
                debug!(worker = self.worker_id, "session quit failed: {e}");
            } else {
                info!(worker = self.worker_id, "browser session closed");
            }
        }
        self.stealth_applied
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_include_headless_flag() {
        let manager = BrowserManager::new(0, BrowserConfig::default(), true);
        assert!(manager.build_capabilities().is_ok());
        let manager = BrowserManager::new(0, BrowserConfig::default(), false);
        assert!(manager.build_capabilities().is_ok());
    }

    #[test]
    fn test_stealth_toggle_follows_config() {
        let mut config = BrowserConfig::default();
        config.stealth.enabled = false;
        let manager = BrowserManager::new(0, config, true);
        assert!(!manager.stealth_enabled());
    }
}
