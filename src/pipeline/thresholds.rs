//! Threshold evaluation
//!
//! Stateless: each reading is checked independently, and both reasons may
//! fire for the same reading.

use super::types::{Alert, AlertReason, Reading, HUMIDITY_ALERT_THRESHOLD, TEMPERATURE_ALERT_THRESHOLD};

/// Candidate alerts for one reading, temperature first
///
/// Comparisons are strict (`>`). Values outside the sensor domain are still
/// compared as-is; NaN never breaches.
pub fn evaluate_thresholds(reading: &Reading) -> Vec<Alert> {
    let mut alerts = Vec::with_capacity(2);

    if reading.metrics.temperature > TEMPERATURE_ALERT_THRESHOLD {
        alerts.push(Alert::from_reading(
            reading,
            AlertReason::HighTemperature,
            reading.metrics.temperature,
        ));
    }

    if reading.metrics.humidity > HUMIDITY_ALERT_THRESHOLD {
        alerts.push(Alert::from_reading(
            reading,
            AlertReason::HighHumidity,
            reading.metrics.humidity,
        ));
    }

    alerts
}
