//! Cache-aside read path for the latest reading per device

use super::cache::LatestValueCache;
use super::db::TelemetryStore;
use super::error::PipelineError;
use super::types::Reading;
use std::sync::Arc;
use std::time::Duration;

pub struct LatestReadingReader {
    store: Arc<dyn TelemetryStore>,
    cache: Arc<dyn LatestValueCache>,
    cache_ttl: Duration,
}

impl LatestReadingReader {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        cache: Arc<dyn LatestValueCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            cache_ttl,
        }
    }

    /// Latest reading for a device
    ///
    /// Cache hit returns without touching the store. A miss, or any cache
    /// error, falls back to the store's most recent reading by timestamp
    /// and writes it back into the cache.
    ///
    /// # Returns
    /// * `Ok(Some(reading))` - found in cache or store
    /// * `Ok(None)` - no data for this device
    /// * `Err(PipelineError::Persistence)` - store lookup failed
    pub async fn get_latest(&self, device_id: &str) -> Result<Option<Reading>, PipelineError> {
        match self.cache.get(device_id).await {
            Ok(Some(reading)) => {
                log::debug!("Latest reading for {} served from cache", device_id);
                return Ok(Some(reading));
            }
            Ok(None) => {}
            Err(e) => {
                let err = PipelineError::CacheUnavailable(e.to_string());
                log::warn!("⚠️  {} - falling back to store for {}", err, device_id);
            }
        }

        let reading = self
            .store
            .find_latest(device_id)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        let Some(reading) = reading else {
            log::debug!("No data found for device {}", device_id);
            return Ok(None);
        };

        if let Err(e) = self.cache.set(device_id, &reading, self.cache_ttl).await {
            let err = PipelineError::CacheUnavailable(e.to_string());
            log::warn!("⚠️  {} - cache not repopulated for {}", err, device_id);
        }

        Ok(Some(reading))
    }
}
