//! Core data types for the telemetry pipeline
//!
//! Canonical JSON shape uses camelCase field names and millisecond-precision
//! UTC timestamps (`2025-09-01T10:00:00.000Z`), matching what devices send
//! and what the latest-reading query returns.

use super::error::PipelineError;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Temperature above which a HIGH_TEMPERATURE alert is raised
pub const TEMPERATURE_ALERT_THRESHOLD: f64 = 50.0;

/// Humidity above which a HIGH_HUMIDITY alert is raised
pub const HUMIDITY_ALERT_THRESHOLD: f64 = 90.0;

/// Message returned with every successful ingestion receipt
pub const INGEST_SUCCESS_MESSAGE: &str = "Telemetry ingested successfully";

/// Sensor metrics carried by one reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub temperature: f64,
    pub humidity: f64,
}

/// One timestamped sensor sample for a device
///
/// Immutable once persisted. The core never mutates or deletes readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub device_id: String,
    pub site_id: String,
    #[serde(with = "iso_millis")]
    pub ts: DateTime<Utc>,
    pub metrics: Metrics,
}

impl Reading {
    pub fn new(
        device_id: impl Into<String>,
        site_id: impl Into<String>,
        ts: DateTime<Utc>,
        temperature: f64,
        humidity: f64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            site_id: site_id.into(),
            ts,
            metrics: Metrics {
                temperature,
                humidity,
            },
        }
    }
}

/// Wire form of a reading before its timestamp has been parsed
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingInput {
    pub device_id: String,
    pub site_id: String,
    pub ts: String,
    pub metrics: Metrics,
}

impl TryFrom<ReadingInput> for Reading {
    type Error = PipelineError;

    fn try_from(input: ReadingInput) -> Result<Self, Self::Error> {
        let ts = parse_timestamp(&input.ts)?;
        Ok(Reading {
            device_id: input.device_id,
            site_id: input.site_id,
            ts,
            metrics: input.metrics,
        })
    }
}

/// Ingestion payload: a single reading or an ordered batch
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IngestPayload {
    Batch(Vec<ReadingInput>),
    Single(ReadingInput),
}

impl IngestPayload {
    /// Parse every timestamp, preserving input order
    pub fn into_readings(self) -> Result<Vec<Reading>, PipelineError> {
        let inputs = match self {
            IngestPayload::Batch(inputs) => inputs,
            IngestPayload::Single(input) => vec![input],
        };
        inputs.into_iter().map(Reading::try_from).collect()
    }
}

/// Reason an alert was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertReason {
    HighTemperature,
    HighHumidity,
}

impl AlertReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertReason::HighTemperature => "HIGH_TEMPERATURE",
            AlertReason::HighHumidity => "HIGH_HUMIDITY",
        }
    }
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold breach for one reading. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub device_id: String,
    pub site_id: String,
    #[serde(with = "iso_millis")]
    pub ts: DateTime<Utc>,
    pub reason: AlertReason,
    pub value: f64,
}

impl Alert {
    pub fn from_reading(reading: &Reading, reason: AlertReason, value: f64) -> Self {
        Self {
            device_id: reading.device_id.clone(),
            site_id: reading.site_id.clone(),
            ts: reading.ts,
            reason,
            value,
        }
    }
}

/// Windowed per-site statistics, computed on demand
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSummary {
    pub count: u64,
    pub avg_temperature: f64,
    pub max_temperature: f64,
    pub avg_humidity: f64,
    pub max_humidity: f64,
    pub unique_devices: u64,
}

/// Projection of a stored reading used by the aggregation query
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRow {
    pub device_id: String,
    pub temperature: f64,
    pub humidity: f64,
}

/// Successful ingestion result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub message: String,
    pub count: usize,
}

impl IngestReceipt {
    pub fn accepted(count: usize) -> Self {
        Self {
            message: INGEST_SUCCESS_MESSAGE.to_string(),
            count,
        }
    }
}

/// Parse an ISO-8601 timestamp into UTC
///
/// Accepts RFC 3339 (with `Z` or an offset). A timestamp without any offset
/// is interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, PipelineError> {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| PipelineError::InvalidTimestamp(raw.to_string()))
}

/// Format a timestamp in the canonical millisecond form
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serde adapter for canonical millisecond timestamps
pub mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
