//! Persistence RPC surface.
//!
//! All queue state transitions go through three remote procedures:
//! `claim_next_batch`, `mark_done` and `requeue_stale_assigned`. The runner
//! picks the `_extra` name suffix from the configured table variant and
//! falls back to the legacy name only when the error clearly indicates a
//! missing function; business errors always propagate.

use crate::error::{Error, ErrorCode, Result};
use crate::judge::JudgeVerdict;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One claimed queue entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClaimedEntry {
    pub company_id: i64,
    pub assigned_at: DateTime<Utc>,
}

/// Company row as read from the company table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyRow {
    pub id: i64,
    pub company_name: String,
    pub form_url: Option<String>,
    pub black: Option<bool>,
    pub prohibition_detected: Option<bool>,
    /// Optional client-scope tag restricting the company to one client
    pub client_id: Option<i64>,
}

/// The persisted classification detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyDetail {
    pub code: String,
    pub category: String,
    pub retryable: bool,
    pub cooldown_seconds: u64,
    pub confidence: f64,
    pub evidence: Value,
}

impl ClassifyDetail {
    /// Build the canonical detail for a code. `PROHIBITION_DETECTED` and
    /// `NO_MESSAGE_AREA` always get their canonical categories and
    /// non-retryable flags regardless of the caller's path.
    pub fn for_code(code: ErrorCode, confidence: f64, evidence: Value) -> Self {
        Self {
            code: code.as_str().to_string(),
            category: code.category().to_string(),
            retryable: code.retryable(),
            cooldown_seconds: code.cooldown_seconds(),
            confidence,
            evidence,
        }
    }

    /// Detail for a successful submission.
    pub fn success(verdict: Option<&JudgeVerdict>, evidence: Value) -> Self {
        Self {
            code: "SUCCESS".into(),
            category: "SUCCESS".into(),
            retryable: false,
            cooldown_seconds: 0,
            confidence: verdict.map(|v| v.confidence).unwrap_or(0.0),
            evidence,
        }
    }
}

/// The submissions row written by mark-done.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRecord {
    pub targeting_id: i64,
    pub company_id: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub classify_detail: ClassifyDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_mapping: Option<Value>,
    pub bot_protection_detected: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Short-TTL cache for the daily success count, invalidated locally on
/// every success so the cap check stays fresh.
#[derive(Debug)]
struct SuccessCountCache {
    value: Mutex<Option<(u64, Instant)>>,
    ttl: Duration,
}

impl SuccessCountCache {
    fn new(ttl: Duration) -> Self {
        Self {
            value: Mutex::new(None),
            ttl,
        }
    }

    fn get(&self) -> Option<u64> {
        let guard = self.value.lock().ok()?;
        let (count, at) = (*guard)?;
        if at.elapsed() <= self.ttl {
            Some(count)
        } else {
            None
        }
    }

    fn set(&self, count: u64) {
        if let Ok(mut guard) = self.value.lock() {
            *guard = Some((count, Instant::now()));
        }
    }

    fn invalidate(&self) {
        if let Ok(mut guard) = self.value.lock() {
            *guard = None;
        }
    }
}

/// Persistence client for one targeting run.
pub struct QueueClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    run_id: String,
    company_table: String,
    send_queue_table: String,
    success_cache: SuccessCountCache,
}

impl QueueClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        run_id: impl Into<String>,
        company_table: impl Into<String>,
        send_queue_table: impl Into<String>,
        success_cache_ttl: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            run_id: run_id.into(),
            company_table: company_table.into(),
            send_queue_table: send_queue_table.into(),
            success_cache: SuccessCountCache::new(success_cache_ttl),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Whether the extra table variant drives the `_extra` RPC names.
    fn uses_extra(&self) -> bool {
        self.send_queue_table.ends_with("_extra")
    }

    /// The submissions table matching the configured variant.
    fn submissions_table(&self) -> String {
        if self.uses_extra() {
            "submissions_extra".into()
        } else {
            "submissions".into()
        }
    }

    fn rpc_url(&self, name: &str) -> String {
        format!("{}/rest/v1/rpc/{name}", self.base_url)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    async fn post_rpc(&self, name: &str, payload: &Value) -> Result<Value> {
        let response = self
            .http
            .post(self.rpc_url(name))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::rpc(name, e.to_string()))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(body);
        }
        let message = body.to_string();
        if status == StatusCode::NOT_FOUND
            && (message.contains("PGRST202") || message.contains("Could not find the function"))
        {
            return Err(Error::RpcFunctionMissing {
                procedure: name.to_string(),
            });
        }
        Err(Error::rpc(name, format!("{status}: {message}")))
    }

    /// Call with the variant suffix, falling back to the legacy name only
    /// on a missing-function error.
    async fn call_rpc(&self, base_name: &str, payload: &Value) -> Result<Value> {
        if self.uses_extra() {
            let suffixed = format!("{base_name}_extra");
            match self.post_rpc(&suffixed, payload).await {
                Err(Error::RpcFunctionMissing { .. }) => {
                    warn!(procedure = base_name, "extra variant missing; using legacy name");
                    self.post_rpc(base_name, payload).await
                }
                other => other,
            }
        } else {
            self.post_rpc(base_name, payload).await
        }
    }

    /// Atomically claim the next pending entry (`pending → assigned`).
    /// Returns None when the queue is drained for the given shard.
    pub async fn claim_next_batch(
        &self,
        target_date: NaiveDate,
        targeting_id: i64,
        shard_id: Option<i64>,
        max_daily: Option<u32>,
    ) -> Result<Option<ClaimedEntry>> {
        let mut payload = json!({
            "p_target_date": target_date.to_string(),
            "p_targeting_id": targeting_id,
            "p_run_id": &self.run_id,
            "p_limit": 1,
        });
        if let Some(shard) = shard_id {
            payload["p_shard_id"] = json!(shard);
        }
        if let Some(cap) = max_daily {
            payload["p_max_daily"] = json!(cap);
        }
        let body = self.call_rpc("claim_next_batch", &payload).await?;
        let rows: Vec<ClaimedEntry> = serde_json::from_value(body).unwrap_or_default();
        Ok(rows.into_iter().next())
    }

    /// Finalize a claim (`assigned → done/failed`). Idempotent per
    /// (target_date, targeting_id, company_id); only the claim owner can
    /// finalize.
    pub async fn mark_done(
        &self,
        target_date: NaiveDate,
        record: &SubmissionRecord,
    ) -> Result<()> {
        let payload = json!({
            "p_target_date": target_date.to_string(),
            "p_targeting_id": record.targeting_id,
            "p_company_id": record.company_id,
            "p_success": record.success,
            "p_error_type": &record.error_type,
            "p_classify_detail": &record.classify_detail,
            "p_field_mapping": &record.field_mapping,
            "p_bot_protection": record.bot_protection_detected,
            "p_submitted_at": record.submitted_at.to_rfc3339(),
            "p_run_id": &self.run_id,
        });
        self.call_rpc("mark_done", &payload).await?;
        if record.success {
            self.success_cache.invalidate();
        }
        info!(
            company_id = record.company_id,
            success = record.success,
            code = %record.classify_detail.code,
            "mark_done"
        );
        Ok(())
    }

    /// Return long-assigned entries to pending. Returns the row count.
    pub async fn requeue_stale_assigned(
        &self,
        target_date: NaiveDate,
        targeting_id: i64,
        stale_minutes: i64,
    ) -> Result<u64> {
        let payload = json!({
            "p_target_date": target_date.to_string(),
            "p_targeting_id": targeting_id,
            "p_stale_minutes": stale_minutes,
        });
        let body = self.call_rpc("requeue_stale_assigned", &payload).await?;
        Ok(body.as_u64().unwrap_or(0))
    }

    /// Fetch one company row.
    pub async fn fetch_company(&self, company_id: i64) -> Result<Option<CompanyRow>> {
        let response = self
            .http
            .get(self.table_url(&self.company_table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(&[("id", format!("eq.{company_id}")), ("select", "*".into()), ("limit", "1".into())])
            .send()
            .await
            .map_err(|e| Error::rpc("fetch_company", e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::rpc("fetch_company", response.status().to_string()));
        }
        let rows: Vec<CompanyRow> = response.json().await.unwrap_or_default();
        Ok(rows.into_iter().next())
    }

    /// Patch company flags (`prohibition_detected`, `black`).
    pub async fn update_company_flags(&self, company_id: i64, patch: Value) -> Result<()> {
        let response = self
            .http
            .patch(self.table_url(&self.company_table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(&[("id", format!("eq.{company_id}"))])
            .json(&patch)
            .send()
            .await
            .map_err(|e| Error::rpc("update_company", e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::rpc("update_company", response.status().to_string()));
        }
        debug!(company_id, "company flags updated");
        Ok(())
    }

    /// Whether a submission already exists today for this company. Used by
    /// the pre-submit duplicate guard; errors fail closed at the caller.
    pub async fn has_submission_today(
        &self,
        targeting_id: i64,
        company_id: i64,
        day_start_utc: DateTime<Utc>,
        day_end_utc: DateTime<Utc>,
    ) -> Result<bool> {
        let response = self
            .http
            .get(self.table_url(&self.submissions_table()))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(&[
                ("targeting_id", format!("eq.{targeting_id}")),
                ("company_id", format!("eq.{company_id}")),
                ("submitted_at", format!("gte.{}", day_start_utc.to_rfc3339())),
                ("select", "id".into()),
                ("limit", "1".into()),
            ])
            .query(&[("submitted_at", format!("lt.{}", day_end_utc.to_rfc3339()))])
            .send()
            .await
            .map_err(|e| Error::rpc("has_submission_today", e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::rpc("has_submission_today", response.status().to_string()));
        }
        let rows: Vec<Value> = response.json().await.unwrap_or_default();
        Ok(!rows.is_empty())
    }

    /// Count today's successful submissions for the daily cap, via the
    /// short-TTL cache.
    pub async fn count_success_today(
        &self,
        targeting_id: i64,
        day_start_utc: DateTime<Utc>,
        day_end_utc: DateTime<Utc>,
    ) -> Result<u64> {
        if let Some(cached) = self.success_cache.get() {
            return Ok(cached);
        }
        let response = self
            .http
            .get(self.table_url(&self.submissions_table()))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "count=exact")
            .header("Range", "0-0")
            .query(&[
                ("targeting_id", format!("eq.{targeting_id}")),
                ("success", "eq.true".into()),
                ("submitted_at", format!("gte.{}", day_start_utc.to_rfc3339())),
                ("select", "id".into()),
            ])
            .query(&[("submitted_at", format!("lt.{}", day_end_utc.to_rfc3339()))])
            .send()
            .await
            .map_err(|e| Error::rpc("count_success_today", e.to_string()))?;
        // PostgREST reports the exact count in Content-Range: 0-0/N.
        let count = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        self.success_cache.set(count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_detail_canonical_codes() {
        let detail = ClassifyDetail::for_code(ErrorCode::ProhibitionDetected, 0.95, json!({}));
        assert_eq!(detail.code, "PROHIBITION_DETECTED");
        assert_eq!(detail.category, "BUSINESS");
        assert!(!detail.retryable);

        let detail = ClassifyDetail::for_code(ErrorCode::NoMessageArea, 1.0, json!({}));
        assert_eq!(detail.category, "FORM_STRUCTURE");
        assert!(!detail.retryable);

        let detail = ClassifyDetail::for_code(ErrorCode::Timeout, 0.5, json!({}));
        assert!(detail.retryable);
        assert!(detail.cooldown_seconds > 0);
    }

    #[test]
    fn test_extra_variant_selection() {
        let client = QueueClient::new(
            "https://db.example.com",
            "key",
            "run-1",
            "companies_extra",
            "send_queue_extra",
            Duration::from_secs(30),
        );
        assert!(client.uses_extra());
        assert_eq!(client.submissions_table(), "submissions_extra");

        let client = QueueClient::new(
            "https://db.example.com",
            "key",
            "run-1",
            "companies",
            "send_queue",
            Duration::from_secs(30),
        );
        assert!(!client.uses_extra());
        assert_eq!(client.submissions_table(), "submissions");
    }

    #[test]
    fn test_rpc_url_shape() {
        let client = QueueClient::new(
            "https://db.example.com/",
            "key",
            "run-1",
            "companies",
            "send_queue",
            Duration::from_secs(30),
        );
        assert_eq!(
            client.rpc_url("claim_next_batch"),
            "https://db.example.com/rest/v1/rpc/claim_next_batch"
        );
    }

    #[test]
    fn test_success_cache_ttl_and_invalidation() {
        let cache = SuccessCountCache::new(Duration::from_secs(30));
        assert_eq!(cache.get(), None);
        cache.set(5);
        assert_eq!(cache.get(), Some(5));
        cache.invalidate();
        assert_eq!(cache.get(), None);
    }
}
