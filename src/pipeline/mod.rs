//! # Telemetry Pipeline
//!
//! Ingests device readings, keeps the latest value per device hot, raises
//! deduplicated threshold alerts and answers windowed per-site summaries.
//!
//! ## Flow
//!
//! 1. Readings arrive as a single object or a batch (`IngestPayload`)
//! 2. Each reading is durably written to SQLite, in order, fail-fast
//! 3. The latest-value cache is overwritten (best effort)
//! 4. Threshold breaches claim a `(device, reason)` slot for the dedup
//!    window; only the winner POSTs the alert webhook
//!
//! Reads go cache-first for the latest reading and straight to the store
//! for site summaries.
//!
//! ## Schema Reference
//!
//! See `/sql/`:
//! - `telemetry_readings` → `Reading`
//! - `alert_claims` → `SqliteClaimStore`
//! - `latest_readings` → `SqliteLatestCache`
//!
//! ## Module Organization
//!
//! - `types` - Reading, Alert, SiteSummary and payload parsing
//! - `error` - Pipeline and ingestion error types
//! - `db` - Durable telemetry store trait + SQLite implementation
//! - `cache` - Latest-value cache trait (in-process and SQLite)
//! - `claims` - Atomic alert claim gate (in-memory and SQLite)
//! - `thresholds` - Pure threshold rules
//! - `dispatcher` - Alert webhook delivery
//! - `alerts` - Claim-then-dispatch alert gate
//! - `ingestion` - Ingestion coordinator and channel loop
//! - `latest` - Cache-aside latest reading lookup
//! - `summary` - Per-site aggregation
//! - `engine` - Wiring and health report

pub mod types;
pub mod error;
pub mod db;
pub mod cache;
pub mod claims;
pub mod thresholds;
pub mod dispatcher;
pub mod alerts;
pub mod ingestion;
pub mod latest;
pub mod summary;
pub mod engine;
pub mod config;

// Re-export commonly used types
pub use types::{Alert, AlertReason, IngestPayload, IngestReceipt, Metrics, Reading, SiteSummary};
pub use error::{IngestError, PipelineError};
pub use db::{SqliteTelemetryStore, TelemetryStore};
pub use cache::{LatestValueCache, MemoryLatestCache, SqliteLatestCache};
pub use claims::{AlertClaimStore, MemoryClaimStore, SqliteClaimStore};
pub use dispatcher::{AlertDispatcher, DeliveryOutcome, WebhookDispatcher};
pub use alerts::{AlertGate, ClaimFailurePolicy};
pub use ingestion::IngestionCoordinator;
pub use engine::{HealthReport, TelemetryEngine};
pub use config::PipelineConfig;
