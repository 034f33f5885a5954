//! Alert dedup gate
//!
//! For every candidate alert of a reading: claim the `(device, reason)`
//! window, then dispatch only if the claim was acquired. Nothing here
//! returns an error to the ingestion path.

use super::claims::AlertClaimStore;
use super::dispatcher::{AlertDispatcher, DeliveryOutcome};
use super::error::PipelineError;
use super::thresholds::evaluate_thresholds;
use super::types::{Alert, Reading};
use std::sync::Arc;
use std::time::Duration;

/// Default suppression window per (device, reason)
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// What to do when the coordination store cannot evaluate a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimFailurePolicy {
    /// Fail-safe: drop the alert
    Suppress,
    /// Fail-open: dispatch without a claim
    Dispatch,
}

impl ClaimFailurePolicy {
    /// Parse `suppress` / `dispatch` (case-insensitive)
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "suppress" => Some(ClaimFailurePolicy::Suppress),
            "dispatch" => Some(ClaimFailurePolicy::Dispatch),
            _ => None,
        }
    }
}

/// Final decision for one candidate alert
#[derive(Debug, Clone, PartialEq)]
pub enum AlertDecision {
    /// Claim acquired (or fail-open) and delivery attempted
    Dispatched(DeliveryOutcome),
    /// An unexpired claim already existed
    Deduplicated,
    /// Claim store unavailable and policy is `Suppress`
    SuppressedUnavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvaluation {
    pub alert: Alert,
    pub decision: AlertDecision,
}

/// Threshold engine + dedup gate + dispatcher hand-off
pub struct AlertGate {
    claims: Arc<dyn AlertClaimStore>,
    dispatcher: Arc<dyn AlertDispatcher>,
    dedup_window: Duration,
    failure_policy: ClaimFailurePolicy,
}

impl AlertGate {
    pub fn new(
        claims: Arc<dyn AlertClaimStore>,
        dispatcher: Arc<dyn AlertDispatcher>,
        dedup_window: Duration,
        failure_policy: ClaimFailurePolicy,
    ) -> Self {
        Self {
            claims,
            dispatcher,
            dedup_window,
            failure_policy,
        }
    }

    /// Evaluate thresholds for a reading and gate each candidate independently
    pub async fn process(&self, reading: &Reading) -> Vec<AlertEvaluation> {
        let mut evaluations = Vec::new();

        for alert in evaluate_thresholds(reading) {
            let decision = self.gate(&alert).await;
            evaluations.push(AlertEvaluation { alert, decision });
        }

        evaluations
    }

    async fn gate(&self, alert: &Alert) -> AlertDecision {
        let claimed = self
            .claims
            .claim_once(&alert.device_id, alert.reason, self.dedup_window)
            .await;

        match claimed {
            Ok(true) => AlertDecision::Dispatched(self.dispatcher.dispatch(alert).await),
            Ok(false) => {
                log::debug!("Alert deduplicated: {} - {}", alert.device_id, alert.reason);
                AlertDecision::Deduplicated
            }
            Err(e) => {
                let err = PipelineError::CoordinationUnavailable(e.to_string());
                match self.failure_policy {
                    ClaimFailurePolicy::Suppress => {
                        log::warn!(
                            "⚠️  {} - suppressing alert {} - {}",
                            err,
                            alert.device_id,
                            alert.reason
                        );
                        AlertDecision::SuppressedUnavailable
                    }
                    ClaimFailurePolicy::Dispatch => {
                        log::warn!(
                            "⚠️  {} - dispatching alert {} - {} without claim",
                            err,
                            alert.device_id,
                            alert.reason
                        );
                        AlertDecision::Dispatched(self.dispatcher.dispatch(alert).await)
                    }
                }
            }
        }
    }
}
