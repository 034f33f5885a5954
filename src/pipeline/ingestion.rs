//! Ingestion coordinator and channel-driven ingestion loop
//!
//! Per reading, in input order:
//! 1. Durable write (failure stops the batch, earlier writes stay)
//! 2. Latest-value cache overwrite (failure logged, ignored)
//! 3. Alert evaluation (never fails)

use super::alerts::AlertGate;
use super::cache::LatestValueCache;
use super::db::TelemetryStore;
use super::error::{IngestError, PipelineError};
use super::types::{IngestReceipt, Reading};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

/// Default latest-value cache expiry (24h)
pub const DEFAULT_LATEST_TTL: Duration = Duration::from_secs(86_400);

/// Sequential, fail-fast ingestion of readings
pub struct IngestionCoordinator {
    store: Arc<dyn TelemetryStore>,
    cache: Arc<dyn LatestValueCache>,
    alerts: AlertGate,
    cache_ttl: Duration,
}

impl IngestionCoordinator {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        cache: Arc<dyn LatestValueCache>,
        alerts: AlertGate,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            alerts,
            cache_ttl,
        }
    }

    /// Ingest readings one at a time in input order
    ///
    /// # Returns
    /// * `Ok(receipt)` - every reading persisted, `receipt.count == readings.len()`
    /// * `Err(IngestError)` - persistence of reading `accepted` failed; readings
    ///   before it stay persisted, readings after it were not attempted
    pub async fn ingest(&self, readings: Vec<Reading>) -> Result<IngestReceipt, IngestError> {
        log::info!("📥 Ingesting {} telemetry reading(s)", readings.len());

        let mut accepted = 0;

        for reading in &readings {
            if let Err(e) = self.store.insert(reading).await {
                log::error!(
                    "❌ Failed to process telemetry for device {}: {}",
                    reading.device_id,
                    e
                );
                return Err(IngestError {
                    accepted,
                    device_id: reading.device_id.clone(),
                    source: PipelineError::Persistence(e.to_string()),
                });
            }
            accepted += 1;

            self.refresh_cache(reading).await;

            let evaluations = self.alerts.process(reading).await;
            if !evaluations.is_empty() {
                log::debug!(
                    "Evaluated {} alert candidate(s) for device {}",
                    evaluations.len(),
                    reading.device_id
                );
            }

            log::debug!("Processed telemetry for device {}", reading.device_id);
        }

        Ok(IngestReceipt::accepted(accepted))
    }

    async fn refresh_cache(&self, reading: &Reading) {
        if let Err(e) = self.cache.set(&reading.device_id, reading, self.cache_ttl).await {
            let err = PipelineError::CacheUnavailable(e.to_string());
            log::warn!("⚠️  {} (device {})", err, reading.device_id);
        }
    }
}

/// One inbound ingestion call
pub struct IngestRequest {
    pub readings: Vec<Reading>,
    pub reply: oneshot::Sender<Result<IngestReceipt, IngestError>>,
}

/// Run the ingestion loop until the request channel closes
///
/// Every request becomes its own task, so concurrent callers never wait on
/// each other. Within a request, readings stay strictly sequential. In-flight
/// requests are drained before the loop returns.
pub async fn start_ingestion_loop(
    mut rx: mpsc::Receiver<IngestRequest>,
    coordinator: Arc<IngestionCoordinator>,
) {
    log::info!("🚀 Starting ingestion loop");
    log::info!("   └─ Waiting for telemetry...");

    let mut in_flight = JoinSet::new();
    let mut request_count = 0u64;
    let mut last_log_time = Instant::now();

    while let Some(request) = rx.recv().await {
        let coordinator = coordinator.clone();
        in_flight.spawn(async move {
            let result = coordinator.ingest(request.readings).await;
            if request.reply.send(result).is_err() {
                log::debug!("Ingestion caller went away before the reply");
            }
        });

        // Reap finished tasks so the set does not grow unbounded
        while in_flight.try_join_next().is_some() {}

        request_count += 1;
        if last_log_time.elapsed().as_secs() >= 10 {
            let per_sec = request_count as f64 / last_log_time.elapsed().as_secs_f64();
            log::info!("📊 Ingestion rate: {:.1} requests/sec (total: {})", per_sec, request_count);
            last_log_time = Instant::now();
            request_count = 0;
        }
    }

    log::warn!("⚠️  Ingestion channel closed, draining {} in-flight request(s)", in_flight.len());
    while in_flight.join_next().await.is_some() {}

    log::info!("✅ Ingestion loop stopped");
}
