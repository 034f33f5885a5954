//! Durable store contract and SQLite implementation
//!
//! Tables (see `/sql/`):
//! - `telemetry_readings` - INSERT only (append-only reading log)
//! - `alert_claims` - used by `claims::SqliteClaimStore`
//! - `latest_readings` - used by `cache::SqliteLatestCache`

use super::error::StoreResult;
use super::types::{Reading, SiteRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Durable store for readings
///
/// The pipeline never updates or deletes rows through this contract.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Append one reading
    async fn insert(&self, reading: &Reading) -> StoreResult<()>;

    /// Most recent reading for a device, ordered by reading timestamp
    async fn find_latest(&self, device_id: &str) -> StoreResult<Option<Reading>>;

    /// All rows for `site_id` with `from <= ts <= to`
    async fn aggregate(
        &self,
        site_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<SiteRow>>;

    /// Liveness check used by the health report
    async fn ping(&self) -> StoreResult<()>;
}

/// Run schema migrations from SQL files
///
/// Reads all .sql files from `schema_dir` in file-name order and executes
/// them. Files must use "IF NOT EXISTS" clauses so reruns are no-ops.
pub fn run_schema_migrations(
    conn: &mut Connection,
    schema_dir: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(format!("Schema directory not found: {}", schema_dir).into());
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::info!("   ├─ Executing: {}", filename);

        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;

        log::info!("   └─ ✅ Success: {}", filename);
    }

    log::info!("✅ All schema migrations completed successfully");

    Ok(())
}

/// SQLite implementation of TelemetryStore
pub struct SqliteTelemetryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTelemetryStore {
    /// Open a store on an existing database
    ///
    /// Does NOT create the schema. Run `run_schema_migrations` first.
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        // Claims share the file through their own connection
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_reading(
        device_id: String,
        site_id: String,
        ts_ms: i64,
        temperature: f64,
        humidity: f64,
    ) -> StoreResult<Reading> {
        let ts = DateTime::<Utc>::from_timestamp_millis(ts_ms)
            .ok_or_else(|| format!("Stored timestamp out of range: {}", ts_ms))?;
        Ok(Reading::new(device_id, site_id, ts, temperature, humidity))
    }
}

#[async_trait]
impl TelemetryStore for SqliteTelemetryStore {
    async fn insert(&self, reading: &Reading) -> StoreResult<()> {
        let conn = self.conn.lock().map_err(|_| "SQLite connection lock poisoned")?;

        conn.execute(
            r#"
            INSERT INTO telemetry_readings (
                device_id, site_id, ts_ms, temperature, humidity, ingested_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                reading.device_id,
                reading.site_id,
                reading.ts.timestamp_millis(),
                reading.metrics.temperature,
                reading.metrics.humidity,
                Utc::now().timestamp_millis(),
            ],
        )?;

        Ok(())
    }

    async fn find_latest(&self, device_id: &str) -> StoreResult<Option<Reading>> {
        let conn = self.conn.lock().map_err(|_| "SQLite connection lock poisoned")?;

        let row = conn
            .query_row(
                r#"
                SELECT device_id, site_id, ts_ms, temperature, humidity
                FROM telemetry_readings
                WHERE device_id = ?
                ORDER BY ts_ms DESC, id DESC
                LIMIT 1
                "#,
                [device_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, f64>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((device_id, site_id, ts_ms, temperature, humidity)) => Ok(Some(
                Self::row_to_reading(device_id, site_id, ts_ms, temperature, humidity)?,
            )),
            None => Ok(None),
        }
    }

    async fn aggregate(
        &self,
        site_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<SiteRow>> {
        let conn = self.conn.lock().map_err(|_| "SQLite connection lock poisoned")?;

        let mut stmt = conn.prepare(
            r#"
            SELECT device_id, temperature, humidity
            FROM telemetry_readings
            WHERE site_id = ? AND ts_ms >= ? AND ts_ms <= ?
            "#,
        )?;

        let rows = stmt
            .query_map(
                rusqlite::params![site_id, from.timestamp_millis(), to.timestamp_millis()],
                |row| {
                    Ok(SiteRow {
                        device_id: row.get(0)?,
                        temperature: row.get(1)?,
                        humidity: row.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    async fn ping(&self) -> StoreResult<()> {
        let conn = self.conn.lock().map_err(|_| "SQLite connection lock poisoned")?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    /// Helper to create a migrated test database
    fn create_test_store() -> (NamedTempFile, SqliteTelemetryStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();

        let mut conn = Connection::open(db_path).unwrap();
        run_schema_migrations(&mut conn, "sql").unwrap();
        drop(conn);

        let store = SqliteTelemetryStore::new(db_path).unwrap();
        (temp_file, store)
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 1, 10, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find_latest() {
        let (_temp, store) = create_test_store();

        store.insert(&Reading::new("dev-001", "site-A", at(0), 25.0, 60.0)).await.unwrap();

        let latest = store.find_latest("dev-001").await.unwrap().unwrap();
        assert_eq!(latest.site_id, "site-A");
        assert_eq!(latest.ts, at(0));
        assert_eq!(latest.metrics.temperature, 25.0);
        assert_eq!(latest.metrics.humidity, 60.0);
    }

    #[tokio::test]
    async fn test_find_latest_orders_by_timestamp_not_insertion() {
        let (_temp, store) = create_test_store();

        // Newer reading arrives first
        store.insert(&Reading::new("dev-001", "site-A", at(5), 31.0, 61.0)).await.unwrap();
        store.insert(&Reading::new("dev-001", "site-A", at(1), 22.0, 55.0)).await.unwrap();

        let latest = store.find_latest("dev-001").await.unwrap().unwrap();
        assert_eq!(latest.ts, at(5));
        assert_eq!(latest.metrics.temperature, 31.0);
    }

    #[tokio::test]
    async fn test_find_latest_unknown_device() {
        let (_temp, store) = create_test_store();
        assert!(store.find_latest("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_aggregate_range_is_inclusive_and_site_scoped() {
        let (_temp, store) = create_test_store();

        store.insert(&Reading::new("dev-001", "site-A", at(0), 25.0, 60.0)).await.unwrap();
        store.insert(&Reading::new("dev-002", "site-A", at(10), 30.0, 65.0)).await.unwrap();
        store.insert(&Reading::new("dev-003", "site-A", at(11), 99.0, 99.0)).await.unwrap();
        store.insert(&Reading::new("dev-004", "site-B", at(5), 10.0, 10.0)).await.unwrap();

        let rows = store.aggregate("site-A", at(0), at(10)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.device_id == "dev-001"));
        assert!(rows.iter().any(|r| r.device_id == "dev-002"));
    }

    #[tokio::test]
    async fn test_aggregate_inverted_range_is_empty() {
        let (_temp, store) = create_test_store();
        store.insert(&Reading::new("dev-001", "site-A", at(5), 25.0, 60.0)).await.unwrap();

        let rows = store.aggregate("site-A", at(10), at(0)).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_boundary_values_are_stored() {
        let (_temp, store) = create_test_store();

        store.insert(&Reading::new("dev-min", "site-A", at(0), -100.0, 0.0)).await.unwrap();
        store.insert(&Reading::new("dev-max", "site-A", at(0), 200.0, 100.0)).await.unwrap();

        let min = store.find_latest("dev-min").await.unwrap().unwrap();
        let max = store.find_latest("dev-max").await.unwrap().unwrap();
        assert_eq!(min.metrics.temperature, -100.0);
        assert_eq!(max.metrics.humidity, 100.0);
    }

    #[tokio::test]
    async fn test_ping() {
        let (_temp, store) = create_test_store();
        store.ping().await.unwrap();
    }

    #[test]
    fn test_migrations_missing_directory() {
        let mut conn = Connection::open_in_memory().unwrap();
        let result = run_schema_migrations(&mut conn, "does/not/exist");
        assert!(result.is_err());
    }
}
