//! Ingest Runtime - stdin-driven telemetry ingestion
//!
//! Reads one JSON payload per line from stdin (a single reading object or an
//! array of readings), feeds it through the ingestion loop and writes one JSON
//! line per payload to stdout, in input order:
//!
//! ```text
//! {"message":"Telemetry ingested successfully","count":2}
//! {"error":"...","accepted":1}
//! ```
//!
//! Usage:
//!   cargo run --release --bin ingest_runtime < readings.ndjson
//!
//! Environment variables:
//!   TELEMETRY_DB_PATH - SQLite database path (default: telemetry.db)
//!   ALERT_WEBHOOK_URL - Alert webhook target (default: unset, alerts not sent)
//!   INGEST_CHANNEL_BUFFER - Channel size (default: 1000)
//!   RUST_LOG - Log level (default: info, written to stderr)

use dotenv::dotenv;
use log::{error, info, warn};
use serde_json::json;
use telemetry_ingestor::pipeline::{
    config::PipelineConfig,
    engine::TelemetryEngine,
    error::IngestError,
    ingestion::{start_ingestion_loop, IngestRequest},
    types::{IngestPayload, IngestReceipt},
};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

/// Outcome slot for one input line, resolved in input order
enum PendingReply {
    Rejected(String),
    Queued(oneshot::Receiver<Result<IngestReceipt, IngestError>>),
}

/// Write one JSON line per pending reply, in the order they were queued
///
/// Stops at the first write error; a failed final flush is reported too.
async fn write_replies<W>(mut replies: mpsc::Receiver<PendingReply>, mut out: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(pending) = replies.recv().await {
        let line = match pending {
            PendingReply::Rejected(reason) => json!({ "error": reason }),
            PendingReply::Queued(reply) => match reply.await {
                Ok(Ok(receipt)) => json!(receipt),
                Ok(Err(e)) => json!({ "error": e.to_string(), "accepted": e.accepted }),
                Err(_) => json!({ "error": "ingestion task dropped the request" }),
            },
        };
        out.write_all(format!("{}\n", line).as_bytes()).await?;
    }
    out.flush().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    // stdout carries the receipts, logs go to stderr
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Telemetry Ingest Runtime");

    let config = PipelineConfig::from_env();
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Webhook: {}", config.webhook_url.as_deref().unwrap_or("(disabled)"));
    info!("   ├─ Dedup window: {}s", config.dedup_window_secs);
    info!("   ├─ Claim failure policy: {:?}", config.claim_failure_policy);
    info!("   └─ Channel buffer: {} requests", config.channel_buffer);

    let engine = TelemetryEngine::open(&config)?;

    let health = engine.health().await;
    info!("🩺 Health: {}", serde_json::to_string(&health)?);

    let (tx, rx) = mpsc::channel::<IngestRequest>(config.channel_buffer);
    let ingestion = tokio::spawn(start_ingestion_loop(rx, engine.ingestion()));

    // Replies are printed by a single task so output order matches input order
    let (reply_tx, reply_rx) = mpsc::channel::<PendingReply>(config.channel_buffer);
    let printer = tokio::spawn(async move {
        if let Err(e) = write_replies(reply_rx, tokio::io::stdout()).await {
            error!("❌ Failed to write replies: {}", e);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_count = 0u64;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;

        let pending = match serde_json::from_str::<IngestPayload>(line)
            .map_err(|e| format!("Invalid payload: {}", e))
            .and_then(|payload| payload.into_readings().map_err(|e| e.to_string()))
        {
            Ok(readings) => {
                let (reply, receiver) = oneshot::channel();
                if tx.send(IngestRequest { readings, reply }).await.is_err() {
                    error!("❌ Ingestion loop stopped unexpectedly");
                    break;
                }
                PendingReply::Queued(receiver)
            }
            Err(reason) => {
                warn!("⚠️  Rejected line {}: {}", line_count, reason);
                PendingReply::Rejected(reason)
            }
        };

        if reply_tx.send(pending).await.is_err() {
            error!("❌ Reply printer stopped unexpectedly");
            break;
        }
    }

    info!("📭 End of input after {} payload(s), shutting down...", line_count);

    // Closing both channels lets the loop drain and the printer finish
    drop(tx);
    drop(reply_tx);
    ingestion.await?;
    printer.await?;

    info!("✅ Ingest runtime stopped");
    Ok(())
}
