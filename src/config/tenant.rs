//! Tenant ("targeting" + "client") configuration.
//!
//! The tenant file is a two-sheet structure `{targeting_id, client_id,
//! active, client, targeting}` validated strictly before use. It is the only
//! point of ingress for tenant data into the worker: `save_tenant_config`
//! writes it atomically to a private 0600 file, and the runner resolves a
//! `--config-file` glob to the newest match.

use crate::error::{Error, Result};
use crate::timeutil::BusinessHours;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

static HHMM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("invalid regex"));

/// Client identity record: names in three scripts, split email/phone/postal,
/// five-part address, role and gender.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    pub company_name: String,
    pub company_name_kana: String,
    pub last_name: String,
    pub first_name: String,
    pub last_name_kana: String,
    pub first_name_kana: String,
    pub last_name_hiragana: String,
    pub first_name_hiragana: String,
    pub position: String,
    pub gender: String,
    pub email_1: String,
    pub email_2: String,
    pub postal_code_1: String,
    pub postal_code_2: String,
    pub address_1: String,
    pub address_2: String,
    pub address_3: String,
    pub address_4: String,
    pub phone_1: String,
    pub phone_2: String,
    pub phone_3: String,
    // Optional fields (empty string allowed)
    pub department: String,
    pub website_url: String,
    pub address_5: String,
}

/// Targeting sheet: message templates, send window, daily cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetingConfig {
    pub subject: String,
    pub message: String,
    pub max_daily_sends: u32,
    /// "HH:MM" in the fixed zone
    pub send_start_time: String,
    pub send_end_time: String,
    /// 0 = Sunday .. 6 = Saturday
    pub send_days_of_week: Vec<u8>,
    /// Companies never contacted for this targeting (newline separated)
    pub ng_companies: String,
}

/// Validated two-sheet tenant configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub targeting_id: i64,
    pub client_id: i64,
    #[serde(default = "default_active")]
    pub active: bool,
    pub client: ClientInfo,
    pub targeting: TargetingConfig,
}

fn default_active() -> bool {
    true
}

const CLIENT_REQUIRED: &[&str] = &[
    "company_name",
    "company_name_kana",
    "last_name",
    "first_name",
    "last_name_kana",
    "first_name_kana",
    "last_name_hiragana",
    "first_name_hiragana",
    "position",
    "gender",
    "email_1",
    "email_2",
    "postal_code_1",
    "postal_code_2",
    "address_1",
    "address_2",
    "address_3",
    "address_4",
    "phone_1",
    "phone_2",
    "phone_3",
];

impl TenantConfig {
    /// Parse and strictly validate the two-sheet structure.
    pub fn from_json(raw: &serde_json::Value) -> Result<Self> {
        let client = raw
            .get("client")
            .ok_or_else(|| Error::Config("tenant config is missing the 'client' sheet".into()))?;
        if !client.is_object() {
            return Err(Error::Config("'client' sheet is not an object".into()));
        }
        let targeting = raw.get("targeting").ok_or_else(|| {
            Error::Config("tenant config is missing the 'targeting' sheet".into())
        })?;
        if !targeting.is_object() {
            return Err(Error::Config("'targeting' sheet is not an object".into()));
        }
        if raw.get("targeting_id").and_then(|v| v.as_i64()).is_none() {
            return Err(Error::Config("required field 'targeting_id' is missing".into()));
        }
        if raw.get("client_id").and_then(|v| v.as_i64()).is_none() {
            return Err(Error::Config("required field 'client_id' is missing".into()));
        }

        let missing: Vec<&str> = CLIENT_REQUIRED
            .iter()
            .filter(|f| {
                client
                    .get(**f)
                    .and_then(|v| v.as_str())
                    .map(|s| s.trim().is_empty())
                    .unwrap_or(true)
            })
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "client sheet is missing required fields: {}",
                missing.join(", ")
            )));
        }

        let config: TenantConfig = serde_json::from_value(raw.clone())?;
        config.validate_targeting()?;
        Ok(config)
    }

    fn validate_targeting(&self) -> Result<()> {
        let t = &self.targeting;
        if t.subject.trim().is_empty() || t.message.trim().is_empty() {
            return Err(Error::Config(
                "targeting sheet requires non-empty 'subject' and 'message'".into(),
            ));
        }
        if t.max_daily_sends == 0 {
            return Err(Error::Config("targeting.max_daily_sends must be a positive integer".into()));
        }
        if !HHMM.is_match(&t.send_start_time) {
            return Err(Error::Config(
                "targeting.send_start_time must be 'HH:MM' (e.g. '09:00')".into(),
            ));
        }
        if !HHMM.is_match(&t.send_end_time) {
            return Err(Error::Config(
                "targeting.send_end_time must be 'HH:MM' (e.g. '18:00')".into(),
            ));
        }
        if t.send_days_of_week.is_empty() || t.send_days_of_week.iter().any(|d| *d > 6) {
            return Err(Error::Config(
                "targeting.send_days_of_week must be a non-empty list of integers 0-6".into(),
            ));
        }
        Ok(())
    }

    /// The tenant's send window in the given zone.
    pub fn business_hours(&self, offset_secs: i32) -> Result<BusinessHours> {
        BusinessHours::parse(
            &self.targeting.send_days_of_week,
            &self.targeting.send_start_time,
            &self.targeting.send_end_time,
            offset_secs,
        )
        .ok_or_else(|| Error::Config("invalid business-hours window".into()))
    }

    /// A fully-populated config for tests and examples.
    pub fn sample() -> Self {
        Self {
            targeting_id: 1,
            client_id: 1,
            active: true,
            client: ClientInfo {
                company_name: "ニューリフィ株式会社".into(),
                company_name_kana: "ニューリフィカブシキガイシャ".into(),
                last_name: "山田".into(),
                first_name: "太郎".into(),
                last_name_kana: "ヤマダ".into(),
                first_name_kana: "タロウ".into(),
                last_name_hiragana: "やまだ".into(),
                first_name_hiragana: "たろう".into(),
                position: "部長".into(),
                gender: "男性".into(),
                email_1: "t.yamada".into(),
                email_2: "example.co.jp".into(),
                postal_code_1: "160".into(),
                postal_code_2: "0023".into(),
                address_1: "東京都".into(),
                address_2: "新宿区".into(),
                address_3: "西新宿".into(),
                address_4: "3-3-13".into(),
                phone_1: "03".into(),
                phone_2: "6825".into(),
                phone_3: "0324".into(),
                department: "営業部".into(),
                website_url: "https://example.co.jp".into(),
                address_5: "西新宿水間ビル6階".into(),
            },
            targeting: TargetingConfig {
                subject: "ご提案のご連絡".into(),
                message: "ご連絡いたしました。".into(),
                max_daily_sends: 40,
                send_start_time: "09:00".into(),
                send_end_time: "18:00".into(),
                send_days_of_week: vec![1, 2, 3, 4, 5],
                ng_companies: String::new(),
            },
        }
    }
}

// Validated-config cache keyed by content hash, short TTL. Avoids
// re-validating the same payload when several workers start together.
static CONFIG_CACHE: LazyLock<Mutex<HashMap<String, (TenantConfig, i64)>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));
const CONFIG_CACHE_TTL_SECS: i64 = 300;

fn cache_key(raw: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.to_string().as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Parse with the validation cache in front.
pub fn parse_tenant_config(raw: &serde_json::Value) -> Result<TenantConfig> {
    let key = cache_key(raw);
    let now = Utc::now().timestamp();
    if let Ok(cache) = CONFIG_CACHE.lock() {
        if let Some((config, ts)) = cache.get(&key) {
            if now - ts < CONFIG_CACHE_TTL_SECS {
                return Ok(config.clone());
            }
        }
    }
    let config = TenantConfig::from_json(raw)?;
    if let Ok(mut cache) = CONFIG_CACHE.lock() {
        cache.insert(key, (config.clone(), now));
    }
    Ok(config)
}

/// Load a tenant config from a path or glob. `*` patterns resolve to the
/// newest matching file.
pub fn load_tenant_config(path_or_glob: &str) -> Result<TenantConfig> {
    let path = resolve_config_path(path_or_glob)?;
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    parse_tenant_config(&value)
}

/// Resolve a literal path or glob pattern to the newest matching file.
pub fn resolve_config_path(path_or_glob: &str) -> Result<PathBuf> {
    if !path_or_glob.contains('*') {
        let p = PathBuf::from(path_or_glob);
        if !p.exists() {
            return Err(Error::Config(format!("config file not found: {path_or_glob}")));
        }
        return Ok(p);
    }
    let mut candidates: Vec<PathBuf> = glob::glob(path_or_glob)
        .map_err(|e| Error::Config(format!("invalid config glob: {e}")))?
        .filter_map(|entry| entry.ok())
        .collect();
    candidates.sort_by_key(|p| {
        std::fs::metadata(p)
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });
    candidates
        .pop()
        .ok_or_else(|| Error::Config(format!("no config file matches {path_or_glob}")))
}

/// Write the validated tenant config atomically under `dir`:
/// `.tmp_*` sibling, fsync, rename, 0600 permissions, per-process name.
/// Returns the final path.
pub fn save_tenant_config(config: &TenantConfig, dir: &Path) -> Result<PathBuf> {
    let pid = std::process::id();
    let micros = Utc::now().timestamp_micros();
    let mut hasher = Sha256::new();
    hasher.update(format!("{pid}_{micros}").as_bytes());
    let suffix = &format!("{:x}", hasher.finalize())[..8];

    let final_path = dir.join(format!("client_config_{pid}_{micros}_{suffix}.json"));
    let tmp_path = dir.join(format!(
        "{}.tmp_{suffix}",
        final_path.file_name().unwrap().to_string_lossy()
    ));

    let payload = serde_json::to_vec_pretty(config)?;
    {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&tmp_path)
            .map_err(|e| Error::Config(format!("create {}: {e}", tmp_path.display())))?;
        file.write_all(&payload)
            .map_err(|e| Error::Config(format!("write {}: {e}", tmp_path.display())))?;
        file.sync_all()
            .map_err(|e| Error::Config(format!("fsync {}: {e}", tmp_path.display())))?;
    }
    if payload.len() < 50 {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(Error::Config("generated config file is suspiciously small".into()));
    }
    std::fs::rename(&tmp_path, &final_path)
        .map_err(|e| Error::Config(format!("rename to {}: {e}", final_path.display())))?;
    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sample_round_trips() {
        let sample = TenantConfig::sample();
        let value = serde_json::to_value(&sample).unwrap();
        let parsed = TenantConfig::from_json(&value).unwrap();
        assert_eq!(sample, parsed);
    }

    #[test]
    fn test_missing_client_sheet_rejected() {
        let raw = serde_json::json!({"targeting": {}, "targeting_id": 1, "client_id": 1});
        assert!(TenantConfig::from_json(&raw).is_err());
    }

    #[test]
    fn test_missing_client_fields_listed() {
        let mut value = serde_json::to_value(TenantConfig::sample()).unwrap();
        value["client"]["email_1"] = serde_json::Value::String(String::new());
        let err = TenantConfig::from_json(&value).unwrap_err().to_string();
        assert!(err.contains("email_1"));
    }

    #[test]
    fn test_time_format_enforced() {
        let mut value = serde_json::to_value(TenantConfig::sample()).unwrap();
        value["targeting"]["send_start_time"] = serde_json::Value::String("9am".into());
        assert!(TenantConfig::from_json(&value).is_err());
    }

    #[test]
    fn test_days_of_week_bounds() {
        let mut value = serde_json::to_value(TenantConfig::sample()).unwrap();
        value["targeting"]["send_days_of_week"] = serde_json::json!([1, 9]);
        assert!(TenantConfig::from_json(&value).is_err());
    }

    #[test]
    fn test_zero_daily_cap_rejected() {
        let mut value = serde_json::to_value(TenantConfig::sample()).unwrap();
        value["targeting"]["max_daily_sends"] = serde_json::json!(0);
        assert!(TenantConfig::from_json(&value).is_err());
    }

    #[test]
    fn test_atomic_save_sets_owner_only_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_tenant_config(&TenantConfig::sample(), dir.path()).unwrap();
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("client_config_"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        // No temp sibling left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_glob_resolves_newest() {
        let dir = tempfile::tempdir().unwrap();
        let older = dir.path().join("client_config_a.json");
        std::fs::write(&older, "{}").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let newer = dir.path().join("client_config_b.json");
        std::fs::write(&newer, "{}").unwrap();
        let pattern = format!("{}/client_config_*.json", dir.path().display());
        assert_eq!(resolve_config_path(&pattern).unwrap(), newer);
    }

    #[test]
    fn test_business_hours_from_targeting() {
        let hours = TenantConfig::sample()
            .business_hours(crate::timeutil::DEFAULT_OFFSET_SECS)
            .unwrap();
        assert_eq!(hours.days_of_week, vec![1, 2, 3, 4, 5]);
    }
}
