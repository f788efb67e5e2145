//! Worker configuration: timeouts, detector thresholds, browser control,
//! retry policy, shard rotation and multi-process sizing.
//!
//! Every section has safe defaults; `WorkerConfig::validate` keeps loaded
//! values inside the ranges the runtime was designed for.

use serde::{Deserialize, Serialize};

/// Bounded timeouts for browser-facing steps, in milliseconds unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub page_load: u64,
    pub element_wait: u64,
    pub click_timeout: u64,
    pub input_timeout: u64,
    /// Upper bound for pre-processing work (scroll, readiness waits)
    pub pre_processing_max: u64,
    /// Delay after each successful fill before verification
    pub post_input_delay_ms: u64,
    /// Per-company hard watchdog, in seconds
    pub task_timeout_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            page_load: 30_000,
            element_wait: 10_000,
            click_timeout: 5_000,
            input_timeout: 5_000,
            pre_processing_max: 60_000,
            post_input_delay_ms: 200,
            task_timeout_secs: 180,
        }
    }
}

/// Prohibition-detector result cache limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProhibitionCacheConfig {
    pub max_entries: usize,
    pub ttl_seconds: u64,
}

impl Default for ProhibitionCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            ttl_seconds: 120,
        }
    }
}

/// Early-abort thresholds for the prohibition detector. Satisfying any one
/// of the criteria aborts before submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyAbortConfig {
    /// Minimum prohibition level ordinal ("weak" < "mild" < "moderate" < "strict")
    pub min_level: String,
    /// Minimum confidence level name ("high")
    pub min_confidence_level: String,
    /// Minimum 0-100 confidence score
    pub min_score: f64,
    /// Minimum number of matched phrases
    pub min_matches: usize,
}

impl Default for EarlyAbortConfig {
    fn default() -> Self {
        Self {
            min_level: "moderate".into(),
            min_confidence_level: "high".into(),
            min_score: 80.0,
            min_matches: 2,
        }
    }
}

/// Detector tuning.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub prohibition_cache: ProhibitionCacheConfig,
    pub early_abort: EarlyAbortConfig,
    /// Optional fast pre-check before full prohibition analysis
    pub fast_precheck_enabled: bool,
}

/// Resource classes blocked at the network layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBlockingConfig {
    pub block_images: bool,
    pub block_fonts: bool,
    pub block_stylesheets: bool,
}

impl Default for ResourceBlockingConfig {
    fn default() -> Self {
        Self {
            block_images: true,
            block_fonts: true,
            block_stylesheets: false,
        }
    }
}

/// Cookie/CMP blackhole options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieControlConfig {
    /// Block known consent-platform scripts at the network layer
    pub block_cmp_scripts: bool,
    /// Override `document.cookie` with an inert implementation
    pub override_document_cookie: bool,
    /// Auto-click reject buttons on common banner UIs
    pub ui_reject_banners: bool,
}

impl Default for CookieControlConfig {
    fn default() -> Self {
        Self {
            block_cmp_scripts: true,
            override_document_cookie: false,
            ui_reject_banners: true,
        }
    }
}

/// Stealth instrumentation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StealthConfig {
    pub enabled: bool,
    /// `navigator.languages` override
    pub languages: Vec<String>,
}

impl Default for StealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: vec!["ja-JP".into(), "ja".into()],
        }
    }
}

/// Browser-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub resource_blocking: ResourceBlockingConfig,
    pub cookie_control: CookieControlConfig,
    pub stealth: StealthConfig,
    /// WebDriver endpoint (chromedriver)
    pub webdriver_url: String,
    pub locale: String,
    pub timezone: String,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            resource_blocking: ResourceBlockingConfig::default(),
            cookie_control: CookieControlConfig::default(),
            stealth: StealthConfig::default(),
            webdriver_url: "http://localhost:9515".into(),
            locale: "ja-JP".into(),
            timezone: "Asia/Tokyo".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .into(),
            accept_language: "ja, en-US;q=0.8, en;q=0.7".into(),
        }
    }
}

/// Retry and recovery policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Recovery attempts per company before surfacing RETRY_EXCEEDED
    pub max_retries: u32,
    /// Upper bound on total recovery time per company, seconds
    pub max_processing_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_processing_secs: 30,
        }
    }
}

/// Shard rotation policy for pinned workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardRotationConfig {
    pub enabled: bool,
    /// Empty-claim window before probing the unsharded queue, seconds
    pub empty_window_secs: u64,
    /// Advance sequentially (false = random shard pick)
    pub sequential: bool,
    /// Total shard count to rotate through
    pub shard_count: i64,
}

impl Default for ShardRotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            empty_window_secs: 60,
            sequential: true,
            shard_count: 4,
        }
    }
}

/// Choice priorities used when the retry path has to pick checkbox/radio
/// options on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChoicePriorityConfig {
    pub primary_keywords: Vec<String>,
    pub secondary_keywords: Vec<String>,
    pub tertiary_keywords: Vec<String>,
    pub privacy_keywords: Vec<String>,
    pub agree_tokens: Vec<String>,
    pub negative_tokens: Vec<String>,
    /// Select every member of a required checkbox group
    pub select_all_when_group_required: bool,
    pub max_group_select: usize,
}

impl Default for ChoicePriorityConfig {
    fn default() -> Self {
        Self {
            primary_keywords: vec!["営業".into(), "提案".into(), "メール".into()],
            secondary_keywords: vec![
                "その他".into(),
                "一般".into(),
                "other".into(),
                "該当なし".into(),
            ],
            tertiary_keywords: vec!["問い合わせ".into(), "問合".into()],
            privacy_keywords: vec![
                "プライバシー".into(),
                "privacy".into(),
                "個人情報".into(),
                "利用規約".into(),
                "terms".into(),
            ],
            agree_tokens: vec!["同意".into(), "agree".into(), "承諾".into()],
            negative_tokens: vec![
                "メルマガ".into(),
                "newsletter".into(),
                "配信".into(),
                "案内".into(),
                "広告".into(),
                "キャンペーン".into(),
            ],
            select_all_when_group_required: true,
            max_group_select: 8,
        }
    }
}

/// Submit-button keyword catalogs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitKeywordsConfig {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
    pub confirmation: Vec<String>,
    /// Keywords searched for the final button on confirmation pages
    pub final_submit: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for SubmitKeywordsConfig {
    fn default() -> Self {
        Self {
            primary: vec!["送信".into(), "送る".into(), "submit".into(), "send".into()],
            secondary: vec![
                "完了".into(),
                "complete".into(),
                "確定".into(),
                "実行".into(),
                "登録".into(),
            ],
            confirmation: vec![
                "確認".into(),
                "次へ".into(),
                "次".into(),
                "review".into(),
                "confirm".into(),
                "進む".into(),
            ],
            final_submit: vec![
                "送信".into(),
                "送信する".into(),
                "この内容で送信".into(),
                "送る".into(),
                "submit".into(),
                "send".into(),
                "完了".into(),
            ],
            exclude: vec![
                "戻る".into(),
                "キャンセル".into(),
                "リセット".into(),
                "クリア".into(),
                "検索".into(),
                "back".into(),
                "cancel".into(),
                "reset".into(),
                "clear".into(),
                "search".into(),
            ],
        }
    }
}

/// The full worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub timeouts: TimeoutSettings,
    pub detectors: DetectorConfig,
    pub browser: BrowserConfig,
    pub retry: RetryConfig,
    pub shard_rotation: ShardRotationConfig,
    pub choice_priority: ChoicePriorityConfig,
    pub submit_keywords: SubmitKeywordsConfig,
    /// Company-name skip policy: case-insensitive substrings
    pub skip_name_keywords: Vec<String>,
    /// Stale-requeue maintenance interval, seconds (worker 0 only)
    pub stale_requeue_interval_secs: u64,
    /// Assignments older than this are considered stale, minutes
    pub stale_minutes: i64,
    /// Success-count cache TTL for the daily-cap check, seconds
    pub success_count_cache_secs: u64,
    /// Extra wait after clicking the final submit, milliseconds
    pub confirmation_extra_wait_ms: u64,
    /// Fixed-offset zone for business time, seconds east of UTC
    pub zone_offset_secs: i32,
}

impl WorkerConfig {
    /// Range-check loaded values. Returns every violation rather than the
    /// first so operators can fix a file in one pass.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let t = &self.timeouts;
        let range = |name: &str, v: u64, lo: u64, hi: u64, errors: &mut Vec<String>| {
            if v < lo || v > hi {
                errors.push(format!("{name} must be between {lo} and {hi}, got {v}"));
            }
        };
        range("timeouts.page_load", t.page_load, 5_000, 60_000, &mut errors);
        range("timeouts.element_wait", t.element_wait, 1_000, 60_000, &mut errors);
        range("timeouts.click_timeout", t.click_timeout, 1_000, 30_000, &mut errors);
        range("timeouts.pre_processing_max", t.pre_processing_max, 10_000, 120_000, &mut errors);
        range("timeouts.task_timeout_secs", t.task_timeout_secs, 60, 1_800, &mut errors);
        if t.page_load > t.pre_processing_max {
            errors.push("timeouts.page_load should not exceed timeouts.pre_processing_max".into());
        }
        if t.element_wait > t.pre_processing_max {
            errors
                .push("timeouts.element_wait should not exceed timeouts.pre_processing_max".into());
        }
        if !(1..=10).contains(&self.retry.max_retries) {
            errors.push(format!(
                "retry.max_retries must be between 1 and 10, got {}",
                self.retry.max_retries
            ));
        }
        if self.stale_minutes < 1 {
            errors.push("stale_requeue.stale_minutes must be >= 1".into());
        }
        let cache = &self.detectors.prohibition_cache;
        if cache.max_entries < 32 {
            errors.push("detectors.prohibition_cache.max_entries must be >= 32".into());
        }
        if cache.ttl_seconds < 10 {
            errors.push("detectors.prohibition_cache.ttl_seconds must be >= 10".into());
        }
        errors
    }

    /// Load from a JSON file, falling back to defaults when absent.
    pub fn load(path: Option<&std::path::Path>) -> crate::error::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| crate::error::Error::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)?;
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(crate::error::Error::Config(format!(
                "worker config validation failed: {}",
                errors.join("; ")
            )));
        }
        Ok(config)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutSettings::default(),
            detectors: DetectorConfig::default(),
            browser: BrowserConfig::default(),
            retry: RetryConfig::default(),
            shard_rotation: ShardRotationConfig::default(),
            choice_priority: ChoicePriorityConfig::default(),
            submit_keywords: SubmitKeywordsConfig::default(),
            skip_name_keywords: Vec::new(),
            stale_requeue_interval_secs: 300,
            stale_minutes: 15,
            success_count_cache_secs: 30,
            confirmation_extra_wait_ms: 2_000,
            zone_offset_secs: crate::timeutil::DEFAULT_OFFSET_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_clean() {
        assert!(WorkerConfig::default().validate().is_empty());
    }

    #[test]
    fn test_validation_reports_every_violation() {
        let mut c = WorkerConfig::default();
        c.timeouts.page_load = 1;
        c.retry.max_retries = 0;
        let errors = c.validate();
        assert!(errors.iter().any(|e| e.contains("page_load")));
        assert!(errors.iter().any(|e| e.contains("max_retries")));
    }

    #[test]
    fn test_cross_field_timeout_rule() {
        let mut c = WorkerConfig::default();
        c.timeouts.page_load = 50_000;
        c.timeouts.pre_processing_max = 40_000;
        assert!(c
            .validate()
            .iter()
            .any(|e| e.contains("should not exceed")));
    }

    #[test]
    fn test_round_trips_through_json() {
        let c = WorkerConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let back: WorkerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
