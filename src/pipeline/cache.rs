//! Latest-value cache contract with in-memory and SQLite implementations
//!
//! Entries are a projection of the most recently *written* reading per
//! device. Writes overwrite unconditionally (no timestamp comparison), so
//! out-of-order arrivals can surface an older reading until the next write.

use super::error::StoreResult;
use super::types::Reading;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Key-value cache of the latest reading per device
#[async_trait]
pub trait LatestValueCache: Send + Sync {
    /// Overwrite the entry for `device_id`, expiring after `ttl`
    async fn set(&self, device_id: &str, reading: &Reading, ttl: Duration) -> StoreResult<()>;

    /// Cached reading, or `None` on miss or expiry
    async fn get(&self, device_id: &str) -> StoreResult<Option<Reading>>;

    /// Liveness check used by the health report
    async fn ping(&self) -> StoreResult<()>;
}

struct CacheEntry {
    reading: Reading,
    expires_at_ms: i64,
}

/// In-process cache with per-key expiry
///
/// Expired entries are dropped lazily on read.
pub struct MemoryLatestCache {
    entries: Mutex<HashMap<String, CacheEntry>>,

    /// Clock in Unix milliseconds (injectable for tests)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl MemoryLatestCache {
    pub fn new() -> Self {
        Self::new_with_clock(Box::new(|| chrono::Utc::now().timestamp_millis()))
    }

    /// Create a cache driven by a custom clock (Unix milliseconds)
    pub fn new_with_clock(now_fn: Box<dyn Fn() -> i64 + Send + Sync>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            now_fn,
        }
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = (self.now_fn)();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| e.expires_at_ms > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLatestCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LatestValueCache for MemoryLatestCache {
    async fn set(&self, device_id: &str, reading: &Reading, ttl: Duration) -> StoreResult<()> {
        let expires_at_ms = (self.now_fn)().saturating_add(ttl.as_millis() as i64);
        let mut entries = self.entries.lock().map_err(|_| "Cache lock poisoned")?;

        entries.insert(
            device_id.to_string(),
            CacheEntry {
                reading: reading.clone(),
                expires_at_ms,
            },
        );

        Ok(())
    }

    async fn get(&self, device_id: &str) -> StoreResult<Option<Reading>> {
        let now = (self.now_fn)();
        let mut entries = self.entries.lock().map_err(|_| "Cache lock poisoned")?;

        match entries.get(device_id) {
            Some(entry) if entry.expires_at_ms > now => Ok(Some(entry.reading.clone())),
            Some(_) => {
                entries.remove(device_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        let _entries = self.entries.lock().map_err(|_| "Cache lock poisoned")?;
        Ok(())
    }
}

/// SQLite-backed cache (`latest_readings` table)
///
/// Shared by every process that opens the same database file, so a reading
/// written by the ingestion runtime is the one a separate query process sees.
/// Expired rows are treated as misses and left for the next overwrite.
pub struct SqliteLatestCache {
    conn: Arc<Mutex<Connection>>,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl SqliteLatestCache {
    /// Open a cache on an existing, migrated database
    pub fn new(db_path: &str) -> StoreResult<Self> {
        Self::new_with_clock(db_path, Box::new(|| chrono::Utc::now().timestamp_millis()))
    }

    pub fn new_with_clock(
        db_path: &str,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            now_fn,
        })
    }
}

#[async_trait]
impl LatestValueCache for SqliteLatestCache {
    async fn set(&self, device_id: &str, reading: &Reading, ttl: Duration) -> StoreResult<()> {
        let expires_at = (self.now_fn)().saturating_add(ttl.as_millis() as i64);
        let conn = self.conn.lock().map_err(|_| "SQLite connection lock poisoned")?;

        conn.execute(
            r#"
            INSERT INTO latest_readings (
                device_id, site_id, ts_ms, temperature, humidity, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(device_id) DO UPDATE SET
                site_id = excluded.site_id,
                ts_ms = excluded.ts_ms,
                temperature = excluded.temperature,
                humidity = excluded.humidity,
                expires_at = excluded.expires_at
            "#,
            rusqlite::params![
                device_id,
                reading.site_id,
                reading.ts.timestamp_millis(),
                reading.metrics.temperature,
                reading.metrics.humidity,
                expires_at,
            ],
        )?;

        Ok(())
    }

    async fn get(&self, device_id: &str) -> StoreResult<Option<Reading>> {
        let now = (self.now_fn)();
        let conn = self.conn.lock().map_err(|_| "SQLite connection lock poisoned")?;

        let row = conn
            .query_row(
                r#"
                SELECT site_id, ts_ms, temperature, humidity
                FROM latest_readings
                WHERE device_id = ?1 AND expires_at > ?2
                "#,
                rusqlite::params![device_id, now],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((site_id, ts_ms, temperature, humidity)) = row else {
            return Ok(None);
        };

        let ts = DateTime::<Utc>::from_timestamp_millis(ts_ms)
            .ok_or_else(|| format!("Cached timestamp out of range: {}", ts_ms))?;
        Ok(Some(Reading::new(device_id, site_id, ts, temperature, humidity)))
    }

    async fn ping(&self) -> StoreResult<()> {
        let conn = self.conn.lock().map_err(|_| "SQLite connection lock poisoned")?;
        conn.query_row("SELECT COUNT(*) FROM latest_readings", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}
