//! Pipeline configuration from environment variables

use super::alerts::{ClaimFailurePolicy, DEFAULT_DEDUP_WINDOW};
use super::dispatcher::DEFAULT_DISPATCH_TIMEOUT;
use super::ingestion::DEFAULT_LATEST_TTL;
use std::env;
use std::time::Duration;

/// Configuration for the telemetry pipeline
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Directory holding the `.sql` migration files
    pub schema_dir: String,

    /// Alert webhook target (None = alerts are evaluated but not sent)
    pub webhook_url: Option<String>,

    /// Webhook request timeout in milliseconds
    pub webhook_timeout_ms: u64,

    /// Alert suppression window per (device, reason) in seconds
    pub dedup_window_secs: u64,

    /// Latest-value cache expiry in seconds
    pub cache_ttl_secs: u64,

    /// Behaviour when the claim store is unreachable
    pub claim_failure_policy: ClaimFailurePolicy,

    /// Channel buffer size for ingestion requests
    pub channel_buffer: usize,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `TELEMETRY_DB_PATH` (default: telemetry.db)
    /// - `TELEMETRY_SCHEMA_DIR` (default: sql)
    /// - `ALERT_WEBHOOK_URL` (default: unset)
    /// - `ALERT_WEBHOOK_TIMEOUT_MS` (default: 5000)
    /// - `ALERT_DEDUP_WINDOW_SECS` (default: 60)
    /// - `LATEST_CACHE_TTL_SECS` (default: 86400)
    /// - `ALERT_CLAIM_FAILURE_POLICY` (default: suppress)
    /// - `INGEST_CHANNEL_BUFFER` (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let claim_failure_policy = match env::var("ALERT_CLAIM_FAILURE_POLICY") {
            Ok(raw) => ClaimFailurePolicy::parse(&raw).unwrap_or_else(|| {
                log::warn!(
                    "Invalid ALERT_CLAIM_FAILURE_POLICY '{}', defaulting to suppress",
                    raw
                );
                ClaimFailurePolicy::Suppress
            }),
            Err(_) => defaults.claim_failure_policy,
        };

        Self {
            db_path: env::var("TELEMETRY_DB_PATH").unwrap_or(defaults.db_path),

            schema_dir: env::var("TELEMETRY_SCHEMA_DIR").unwrap_or(defaults.schema_dir),

            webhook_url: env::var("ALERT_WEBHOOK_URL")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),

            webhook_timeout_ms: env::var("ALERT_WEBHOOK_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.webhook_timeout_ms),

            dedup_window_secs: env::var("ALERT_DEDUP_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.dedup_window_secs),

            cache_ttl_secs: env::var("LATEST_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cache_ttl_secs),

            claim_failure_policy,

            channel_buffer: env::var("INGEST_CHANNEL_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.channel_buffer),
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: "telemetry.db".to_string(),
            schema_dir: "sql".to_string(),
            webhook_url: None,
            webhook_timeout_ms: DEFAULT_DISPATCH_TIMEOUT.as_millis() as u64,
            dedup_window_secs: DEFAULT_DEDUP_WINDOW.as_secs(),
            cache_ttl_secs: DEFAULT_LATEST_TTL.as_secs(),
            claim_failure_policy: ClaimFailurePolicy::Suppress,
            channel_buffer: 1_000,
        }
    }
}
