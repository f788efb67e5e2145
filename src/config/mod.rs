//! Configuration: worker tuning knobs and the tenant ("targeting" +
//! "client") configuration with strict validation.
//!
//! Two sources feed a run, in order: the tenant config file given on the
//! command line (glob patterns resolve to the newest match), then the worker
//! config which overrides operational knobs. Tenant data enters the worker
//! only through the atomically-written config file.

mod tenant;
mod worker;

pub use tenant::{
    load_tenant_config, parse_tenant_config, resolve_config_path, save_tenant_config, ClientInfo,
    TargetingConfig, TenantConfig,
};
pub use worker::{
    BrowserConfig, ChoicePriorityConfig, CookieControlConfig, DetectorConfig, EarlyAbortConfig,
    ProhibitionCacheConfig, ResourceBlockingConfig, RetryConfig, ShardRotationConfig,
    StealthConfig, SubmitKeywordsConfig, TimeoutSettings, WorkerConfig,
};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Headless-mode selection for the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadlessMode {
    /// Decide from the environment (CI => headless)
    #[default]
    Auto,
    True,
    False,
}

impl std::str::FromStr for HeadlessMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "true" | "1" | "yes" => Ok(Self::True),
            "false" | "0" | "no" => Ok(Self::False),
            other => Err(format!("invalid headless mode: {other}")),
        }
    }
}

impl HeadlessMode {
    /// Resolve to a concrete boolean, honoring the environment override.
    pub fn resolve(self) -> bool {
        if let Ok(v) = std::env::var("PLAYWRIGHT_HEADLESS") {
            match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => return true,
                "0" | "false" | "no" => return false,
                _ => {}
            }
        }
        match self {
            Self::True => true,
            Self::False => false,
            Self::Auto => std::env::var("GITHUB_ACTIONS").as_deref() == Ok("true"),
        }
    }
}

/// Top-level run configuration assembled by the binary from CLI arguments,
/// environment credentials and the two config sources.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub targeting_id: i64,
    pub tenant: TenantConfig,
    pub worker: WorkerConfig,
    pub num_workers: usize,
    pub headless: HeadlessMode,
    /// Target queue date (defaults to today in the configured zone)
    pub target_date: Option<chrono::NaiveDate>,
    pub shard_id: Option<i64>,
    /// Stop after this many processed companies (0 = unlimited)
    pub max_processed: usize,
    /// Single-company mode: bypass claim, still write mark-done
    pub company_id: Option<i64>,
    /// Persistence endpoint and credential
    pub db_url: String,
    pub db_api_key: String,
    /// Claim owner identity (GITHUB_RUN_ID or a local fallback)
    pub run_id: String,
    /// Table variant selection from COMPANY_TABLE / SEND_QUEUE_TABLE
    pub company_table: String,
    pub send_queue_table: String,
}

impl RunnerConfig {
    /// Clamp the worker count to the supported 1..=4 range.
    pub fn clamped_workers(&self) -> usize {
        self.num_workers.clamp(1, 4)
    }

    /// Whether the extra table variant is configured, which selects the
    /// `_extra`-suffixed remote procedures.
    pub fn uses_extra_tables(&self) -> bool {
        self.send_queue_table.ends_with("_extra")
    }

    /// Claim owner id: `GITHUB_RUN_ID` when present, else a local
    /// timestamp-based identifier.
    pub fn resolve_run_id() -> String {
        match std::env::var("GITHUB_RUN_ID") {
            Ok(id) if !id.trim().is_empty() => id,
            _ => format!(
                "local_{}_{}",
                chrono::Utc::now().timestamp(),
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            ),
        }
    }

    /// Read persistence credentials from the environment.
    pub fn resolve_credentials() -> Result<(String, String)> {
        let url = std::env::var("SUPABASE_URL")
            .map_err(|_| Error::Config("SUPABASE_URL is not set".into()))?;
        let key = std::env::var("SUPABASE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_ROLE_KEY"))
            .map_err(|_| Error::Config("SUPABASE_KEY is not set".into()))?;
        Ok((url, key))
    }

    /// Table names from the environment, with the default variant.
    pub fn resolve_tables() -> (String, String) {
        let company = std::env::var("COMPANY_TABLE").unwrap_or_else(|_| "companies".into());
        let queue = std::env::var("SEND_QUEUE_TABLE").unwrap_or_else(|_| "send_queue".into());
        (company, queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_mode_parses() {
        assert_eq!("auto".parse::<HeadlessMode>().unwrap(), HeadlessMode::Auto);
        assert_eq!("true".parse::<HeadlessMode>().unwrap(), HeadlessMode::True);
        assert_eq!("FALSE".parse::<HeadlessMode>().unwrap(), HeadlessMode::False);
        assert!("sometimes".parse::<HeadlessMode>().is_err());
    }

    #[test]
    fn test_run_id_fallback_shape() {
        std::env::remove_var("GITHUB_RUN_ID");
        let id = RunnerConfig::resolve_run_id();
        assert!(id.starts_with("local_"));
    }
}
