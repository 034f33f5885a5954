//! Per-site windowed aggregation

use super::db::TelemetryStore;
use super::error::PipelineError;
use super::types::{SiteRow, SiteSummary};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

pub struct SiteSummaryEngine {
    store: Arc<dyn TelemetryStore>,
}

impl SiteSummaryEngine {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    /// Summary of `site_id` readings with `from <= ts <= to`
    ///
    /// An empty match set (including an inverted range) yields the
    /// zero-valued summary, never an error.
    pub async fn get_site_summary(
        &self,
        site_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<SiteSummary, PipelineError> {
        log::info!("Aggregating data for site {} from {} to {}", site_id, from, to);

        let rows = self
            .store
            .aggregate(site_id, from, to)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        Ok(summarize(&rows))
    }
}

/// Compute count, averages, maxima and distinct devices over rows
pub fn summarize(rows: &[SiteRow]) -> SiteSummary {
    if rows.is_empty() {
        return SiteSummary::default();
    }

    let count = rows.len();
    let mut temperature_sum = 0.0;
    let mut humidity_sum = 0.0;
    let mut max_temperature = f64::NEG_INFINITY;
    let mut max_humidity = f64::NEG_INFINITY;
    let mut devices = HashSet::new();

    for row in rows {
        temperature_sum += row.temperature;
        humidity_sum += row.humidity;
        max_temperature = max_temperature.max(row.temperature);
        max_humidity = max_humidity.max(row.humidity);
        devices.insert(row.device_id.as_str());
    }

    SiteSummary {
        count: count as u64,
        avg_temperature: round2(temperature_sum / count as f64),
        max_temperature,
        avg_humidity: round2(humidity_sum / count as f64),
        max_humidity,
        unique_devices: devices.len() as u64,
    }
}

/// Round to 2 decimal places, ties to even
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(device: &str, temperature: f64, humidity: f64) -> SiteRow {
        SiteRow {
            device_id: device.to_string(),
            temperature,
            humidity,
        }
    }

    #[test]
    fn test_empty_rows_give_zero_summary() {
        let summary = summarize(&[]);
        assert_eq!(
            summary,
            SiteSummary {
                count: 0,
                avg_temperature: 0.0,
                max_temperature: 0.0,
                avg_humidity: 0.0,
                max_humidity: 0.0,
                unique_devices: 0,
            }
        );
    }

    #[test]
    fn test_two_device_summary() {
        let summary = summarize(&[row("dev-001", 25.0, 60.0), row("dev-002", 30.0, 65.0)]);

        assert_eq!(summary.count, 2);
        assert_eq!(summary.avg_temperature, 27.5);
        assert_eq!(summary.max_temperature, 30.0);
        assert_eq!(summary.avg_humidity, 62.5);
        assert_eq!(summary.max_humidity, 65.0);
        assert_eq!(summary.unique_devices, 2);
    }

    #[test]
    fn test_unique_devices_counts_distinct_ids() {
        let summary = summarize(&[
            row("dev-001", 20.0, 50.0),
            row("dev-001", 22.0, 52.0),
            row("dev-002", 24.0, 54.0),
        ]);

        assert_eq!(summary.count, 3);
        assert_eq!(summary.unique_devices, 2);
        assert_eq!(summary.avg_temperature, 22.0);
    }

    #[test]
    fn test_averages_round_to_two_places() {
        let summary = summarize(&[
            row("dev-001", 20.0, 10.0),
            row("dev-001", 20.0, 10.0),
            row("dev-001", 21.0, 11.0),
        ]);

        // 61 / 3 = 20.333..., 31 / 3 = 10.333...
        assert_eq!(summary.avg_temperature, 20.33);
        assert_eq!(summary.avg_humidity, 10.33);
    }

    #[test]
    fn test_negative_maxima() {
        let summary = summarize(&[row("dev-001", -40.0, 0.0), row("dev-002", -10.0, 0.0)]);
        assert_eq!(summary.max_temperature, -10.0);
        assert_eq!(summary.max_humidity, 0.0);
    }

    #[test]
    fn test_round2_ties_to_even() {
        assert_eq!(round2(0.125), 0.12);
        assert_eq!(round2(0.375), 0.38);
        assert_eq!(round2(27.5), 27.5);
    }
}
