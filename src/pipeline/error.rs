//! Pipeline error taxonomy
//!
//! Only persistence failures escape the ingestion path. Cache, coordination
//! and delivery failures are absorbed where they happen and only logged.

use std::error::Error;
use std::fmt;

/// Boxed error returned by collaborator contracts (store, cache, claims)
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Result type used by collaborator contracts
pub type StoreResult<T> = Result<T, BoxError>;

#[derive(Debug)]
pub enum PipelineError {
    /// Durable store write or read failed
    Persistence(String),
    /// Latest-value cache could not be read or written
    CacheUnavailable(String),
    /// Alert coordination store could not evaluate a claim
    CoordinationUnavailable(String),
    /// Webhook delivery failed (timeout, transport, non-2xx)
    Delivery(String),
    /// A reading timestamp was not valid ISO-8601
    InvalidTimestamp(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            PipelineError::CacheUnavailable(msg) => write!(f, "Cache unavailable: {}", msg),
            PipelineError::CoordinationUnavailable(msg) => {
                write!(f, "Coordination store unavailable: {}", msg)
            }
            PipelineError::Delivery(msg) => write!(f, "Alert delivery failed: {}", msg),
            PipelineError::InvalidTimestamp(raw) => write!(f, "Invalid ISO-8601 timestamp: {}", raw),
        }
    }
}

impl Error for PipelineError {}

/// Fail-fast ingestion failure
///
/// `accepted` readings were durably persisted before the failing one and are
/// not rolled back. Readings after the failing one were never attempted.
#[derive(Debug)]
pub struct IngestError {
    pub accepted: usize,
    pub device_id: String,
    pub source: PipelineError,
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to ingest telemetry for device {} after {} accepted reading(s): {}",
            self.device_id, self.accepted, self.source
        )
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}
