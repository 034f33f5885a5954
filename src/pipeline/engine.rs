//! Telemetry engine - wiring of the ingestion, read and aggregation paths
//!
//! ```text
//! Vec<Reading>
//!     ↓
//! IngestionCoordinator::ingest()
//!     ├─ TelemetryStore::insert()        (fail-fast)
//!     ├─ LatestValueCache::set()         (best effort)
//!     └─ AlertGate::process()
//!           ├─ AlertClaimStore::claim_once()
//!           └─ AlertDispatcher::dispatch()
//!
//! get_latest()        → LatestReadingReader (cache-aside)
//! get_site_summary()  → SiteSummaryEngine
//! ```

use super::alerts::AlertGate;
use super::cache::{LatestValueCache, SqliteLatestCache};
use super::claims::{AlertClaimStore, SqliteClaimStore};
use super::config::PipelineConfig;
use super::db::{run_schema_migrations, SqliteTelemetryStore, TelemetryStore};
use super::dispatcher::{AlertDispatcher, WebhookDispatcher};
use super::error::{IngestError, PipelineError};
use super::ingestion::IngestionCoordinator;
use super::latest::LatestReadingReader;
use super::summary::SiteSummaryEngine;
use super::types::{IngestReceipt, Reading, SiteSummary};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Up/down state of one collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub database: ServiceState,
    pub cache: ServiceState,
    pub coordination: ServiceState,
}

/// Health report: `status` is "ok" when every collaborator is up, else "degraded"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub services: ServiceHealth,
}

pub struct TelemetryEngine {
    store: Arc<dyn TelemetryStore>,
    cache: Arc<dyn LatestValueCache>,
    claims: Arc<dyn AlertClaimStore>,
    ingestion: Arc<IngestionCoordinator>,
    latest: LatestReadingReader,
    summaries: SiteSummaryEngine,
}

impl TelemetryEngine {
    /// Wire the engine from explicit collaborators
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        cache: Arc<dyn LatestValueCache>,
        claims: Arc<dyn AlertClaimStore>,
        dispatcher: Arc<dyn AlertDispatcher>,
        config: &PipelineConfig,
    ) -> Self {
        let gate = AlertGate::new(
            claims.clone(),
            dispatcher,
            config.dedup_window(),
            config.claim_failure_policy,
        );

        let ingestion = Arc::new(IngestionCoordinator::new(
            store.clone(),
            cache.clone(),
            gate,
            config.cache_ttl(),
        ));

        Self {
            latest: LatestReadingReader::new(store.clone(), cache.clone(), config.cache_ttl()),
            summaries: SiteSummaryEngine::new(store.clone()),
            store,
            cache,
            claims,
            ingestion,
        }
    }

    /// Production wiring: SQLite store, cache and claims, webhook
    ///
    /// Runs schema migrations against `config.db_path` first. Cache and claims
    /// live in the same database file, so every process opened on it shares
    /// one latest-value view and one dedup window.
    pub fn open(config: &PipelineConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        log::info!("🔧 Initializing database: {}", config.db_path);
        let mut conn = Connection::open(&config.db_path)?;
        run_schema_migrations(&mut conn, &config.schema_dir).map_err(|e| e.to_string())?;
        drop(conn);

        let store: Arc<dyn TelemetryStore> = Arc::new(SqliteTelemetryStore::new(&config.db_path)?);
        let claims: Arc<dyn AlertClaimStore> = Arc::new(SqliteClaimStore::new(&config.db_path)?);
        let cache: Arc<dyn LatestValueCache> = Arc::new(SqliteLatestCache::new(&config.db_path)?);
        let dispatcher: Arc<dyn AlertDispatcher> = Arc::new(WebhookDispatcher::new(
            config.webhook_url.clone(),
            config.webhook_timeout(),
        )?);

        log::info!("✅ Telemetry engine ready");
        Ok(Self::new(store, cache, claims, dispatcher, config))
    }

    /// Shared handle for the channel-driven ingestion loop
    pub fn ingestion(&self) -> Arc<IngestionCoordinator> {
        self.ingestion.clone()
    }

    pub async fn ingest(&self, readings: Vec<Reading>) -> Result<IngestReceipt, IngestError> {
        self.ingestion.ingest(readings).await
    }

    pub async fn get_latest(&self, device_id: &str) -> Result<Option<Reading>, PipelineError> {
        self.latest.get_latest(device_id).await
    }

    pub async fn get_site_summary(
        &self,
        site_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<SiteSummary, PipelineError> {
        self.summaries.get_site_summary(site_id, from, to).await
    }

    /// Ping every collaborator. Never fails.
    pub async fn health(&self) -> HealthReport {
        let state = |ok: bool| if ok { ServiceState::Up } else { ServiceState::Down };

        let services = ServiceHealth {
            database: state(self.store.ping().await.is_ok()),
            cache: state(self.cache.ping().await.is_ok()),
            coordination: state(self.claims.ping().await.is_ok()),
        };

        let all_up = services.database == ServiceState::Up
            && services.cache == ServiceState::Up
            && services.coordination == ServiceState::Up;

        if !all_up {
            log::warn!("⚠️  Health degraded: {:?}", services);
        }

        HealthReport {
            status: if all_up { "ok" } else { "degraded" }.to_string(),
            services,
        }
    }
}
