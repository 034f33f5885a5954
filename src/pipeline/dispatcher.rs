//! Webhook alert delivery
//!
//! One POST per claimed alert, bounded by a request timeout. Failures are
//! logged and reported as an outcome, never returned as an error. No retry.

use super::error::PipelineError;
use super::types::Alert;
use async_trait::async_trait;
use std::time::Duration;

/// Default webhook request timeout
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a single delivery attempt
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Webhook answered with a 2xx status
    Delivered(u16),
    /// Timeout, transport error, or non-2xx status
    Failed(String),
    /// No webhook configured
    Skipped,
}

/// Delivers claimed alerts
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// Attempt delivery exactly once. Must not panic or propagate errors.
    async fn dispatch(&self, alert: &Alert) -> DeliveryOutcome;
}

/// HTTP webhook dispatcher
pub struct WebhookDispatcher {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl WebhookDispatcher {
    /// Build a dispatcher with a per-request timeout
    ///
    /// `webhook_url = None` turns every dispatch into `DeliveryOutcome::Skipped`.
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl AlertDispatcher for WebhookDispatcher {
    async fn dispatch(&self, alert: &Alert) -> DeliveryOutcome {
        let Some(url) = self.webhook_url.as_deref() else {
            log::warn!(
                "⚠️  No ALERT_WEBHOOK_URL configured, alert not sent: {} - {}",
                alert.device_id,
                alert.reason
            );
            return DeliveryOutcome::Skipped;
        };

        let result = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(alert)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                let status = response.status().as_u16();
                log::info!("🚨 Alert sent: {} - {} ({})", alert.device_id, alert.reason, status);
                DeliveryOutcome::Delivered(status)
            }
            Ok(response) => {
                let message = format!("webhook responded with {}", response.status());
                failed(alert, PipelineError::Delivery(message))
            }
            Err(e) if e.is_timeout() => {
                failed(alert, PipelineError::Delivery(format!("webhook timed out: {}", e)))
            }
            Err(e) => failed(alert, PipelineError::Delivery(e.to_string())),
        }
    }
}

/// Log a swallowed delivery error and turn it into an outcome
fn failed(alert: &Alert, err: PipelineError) -> DeliveryOutcome {
    log::error!("❌ {} (device {}, {})", err, alert.device_id, alert.reason);
    DeliveryOutcome::Failed(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{AlertReason, Reading};
    use chrono::{TimeZone, Utc};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn sample_alert() -> Alert {
        let ts = Utc.with_ymd_and_hms(2025, 9, 1, 10, 0, 0).unwrap();
        let reading = Reading::new("dev-002", "site-A", ts, 55.0, 60.0);
        Alert::from_reading(&reading, AlertReason::HighTemperature, 55.0)
    }

    /// Read one HTTP/1.1 request (headers + Content-Length body)
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];

        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let lower = line.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }

        String::from_utf8_lossy(&buf).to_string()
    }

    /// Single-shot webhook that records the request and answers with `status_line`
    async fn spawn_webhook(status_line: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/alerts", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                status_line
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(request);
        });

        (url, rx)
    }

    #[tokio::test]
    async fn test_dispatch_posts_alert_json() {
        let (url, rx) = spawn_webhook("200 OK").await;
        let dispatcher = WebhookDispatcher::new(Some(url), DEFAULT_DISPATCH_TIMEOUT).unwrap();

        let outcome = dispatcher.dispatch(&sample_alert()).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered(200));

        let request = rx.await.unwrap();
        assert!(request.starts_with("POST /alerts HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));

        let body = request.split("\r\n\r\n").nth(1).unwrap();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["deviceId"], "dev-002");
        assert_eq!(json["siteId"], "site-A");
        assert_eq!(json["ts"], "2025-09-01T10:00:00.000Z");
        assert_eq!(json["reason"], "HIGH_TEMPERATURE");
        assert_eq!(json["value"], 55.0);
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let (url, _rx) = spawn_webhook("500 Internal Server Error").await;
        let dispatcher = WebhookDispatcher::new(Some(url), DEFAULT_DISPATCH_TIMEOUT).unwrap();

        let outcome = dispatcher.dispatch(&sample_alert()).await;
        assert!(matches!(
            &outcome,
            DeliveryOutcome::Failed(msg) if msg.starts_with("Alert delivery failed") && msg.contains("500")
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/alerts", listener.local_addr().unwrap());
        drop(listener);

        let dispatcher = WebhookDispatcher::new(Some(url), DEFAULT_DISPATCH_TIMEOUT).unwrap();
        let outcome = dispatcher.dispatch(&sample_alert()).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_slow_webhook_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/alerts", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let dispatcher = WebhookDispatcher::new(Some(url), Duration::from_millis(200)).unwrap();
        let started = std::time::Instant::now();
        let outcome = dispatcher.dispatch(&sample_alert()).await;

        assert!(matches!(&outcome, DeliveryOutcome::Failed(msg) if msg.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_missing_url_skips() {
        let dispatcher = WebhookDispatcher::new(None, DEFAULT_DISPATCH_TIMEOUT).unwrap();
        assert_eq!(dispatcher.dispatch(&sample_alert()).await, DeliveryOutcome::Skipped);
    }
}
