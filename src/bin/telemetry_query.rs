//! Telemetry Query - latest reading and site summary lookups
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin telemetry_query -- latest --device <DEVICE_ID>
//! cargo run --bin telemetry_query -- summary --site <SITE_ID> --from <ISO_TS> --to <ISO_TS>
//! cargo run --bin telemetry_query -- health
//! ```
//!
//! Results are printed as pretty JSON. A latest lookup for a device with no
//! readings prints `No data found for device <DEVICE_ID>` and exits non-zero.
//!
//! ## Environment Variables
//!
//! - `TELEMETRY_DB_PATH` - SQLite database path (default: telemetry.db)
//! - `TELEMETRY_SCHEMA_DIR` - Migration directory (default: sql)
//! - `RUST_LOG` - Log level (default: warn, written to stderr)

use dotenv::dotenv;
use telemetry_ingestor::pipeline::{
    config::PipelineConfig,
    engine::TelemetryEngine,
    types::parse_timestamp,
};

const USAGE: &str = "Usage:\n  telemetry_query latest --device <DEVICE_ID>\n  telemetry_query summary --site <SITE_ID> --from <ISO_TS> --to <ISO_TS>\n  telemetry_query health";

/// Parsed command line
enum QueryCommand {
    Latest { device_id: String },
    Summary { site_id: String, from: String, to: String },
    Health,
}

impl QueryCommand {
    fn from_args(args: &[String]) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let flag = |name: &str| -> Result<String, String> {
            args.windows(2)
                .find(|w| w[0] == name)
                .map(|w| w[1].clone())
                .ok_or_else(|| format!("Missing {} argument.\n{}", name, USAGE))
        };

        match args.get(1).map(String::as_str) {
            Some("latest") => Ok(Self::Latest {
                device_id: flag("--device")?,
            }),
            Some("summary") => Ok(Self::Summary {
                site_id: flag("--site")?,
                from: flag("--from")?,
                to: flag("--to")?,
            }),
            Some("health") => Ok(Self::Health),
            _ => Err(USAGE.into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = QueryCommand::from_args(&args)?;

    let config = PipelineConfig::from_env();
    let engine = TelemetryEngine::open(&config)?;

    match command {
        QueryCommand::Latest { device_id } => match engine.get_latest(&device_id).await? {
            Some(reading) => println!("{}", serde_json::to_string_pretty(&reading)?),
            None => {
                println!("No data found for device {}", device_id);
                std::process::exit(1);
            }
        },
        QueryCommand::Summary { site_id, from, to } => {
            let from = parse_timestamp(&from)?;
            let to = parse_timestamp(&to)?;
            let summary = engine.get_site_summary(&site_id, from, to).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        QueryCommand::Health => {
            let report = engine.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
