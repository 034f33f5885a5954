//! Alert coordination store: atomic claim-once-with-expiry
//!
//! A claim on `(device_id, reason)` succeeds only if no unexpired claim
//! exists for that key. Check and write happen as one atomic step so two
//! concurrent ingestion paths can never both win the same window.

use super::error::StoreResult;
use super::types::AlertReason;
use async_trait::async_trait;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Capability interface with a single atomic operation
#[async_trait]
pub trait AlertClaimStore: Send + Sync {
    /// Set-if-absent with expiry
    ///
    /// # Returns
    /// * `Ok(true)` - claim acquired, caller may dispatch
    /// * `Ok(false)` - an unexpired claim already exists, suppress
    /// * `Err(...)` - the claim could not be evaluated
    async fn claim_once(
        &self,
        device_id: &str,
        reason: AlertReason,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Liveness check used by the health report
    async fn ping(&self) -> StoreResult<()>;
}

/// In-process claim store
///
/// The whole check-and-insert runs under one lock, which makes it
/// linearizable per key within a single process.
pub struct MemoryClaimStore {
    /// (device_id, reason) -> expires_at (Unix ms)
    claims: Mutex<HashMap<(String, AlertReason), i64>>,

    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::new_with_clock(Box::new(|| chrono::Utc::now().timestamp_millis()))
    }

    /// Create a claim store driven by a custom clock (Unix milliseconds)
    pub fn new_with_clock(now_fn: Box<dyn Fn() -> i64 + Send + Sync>) -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
            now_fn,
        }
    }
}

impl Default for MemoryClaimStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertClaimStore for MemoryClaimStore {
    async fn claim_once(
        &self,
        device_id: &str,
        reason: AlertReason,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = (self.now_fn)();
        let mut claims = self.claims.lock().map_err(|_| "Claim store lock poisoned")?;

        let key = (device_id.to_string(), reason);
        if let Some(expires_at) = claims.get(&key) {
            if *expires_at > now {
                return Ok(false);
            }
        }

        claims.insert(key, now.saturating_add(ttl.as_millis() as i64));
        Ok(true)
    }

    async fn ping(&self) -> StoreResult<()> {
        let _claims = self.claims.lock().map_err(|_| "Claim store lock poisoned")?;
        Ok(())
    }
}

/// SQLite-backed claim store (`alert_claims` table)
///
/// A single conditional UPSERT either inserts a fresh claim or replaces an
/// expired one. SQLite serializes writers, so the statement is atomic across
/// every process sharing the database file.
pub struct SqliteClaimStore {
    conn: Arc<Mutex<Connection>>,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl SqliteClaimStore {
    /// Open a claim store on an existing, migrated database
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
impl AlertClaimStore for SqliteClaimStore {
    async fn claim_once(
        &self,
        device_id: &str,
        reason: AlertReason,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = (self.now_fn)();
        let expires_at = now.saturating_add(ttl.as_millis() as i64);
        let conn = self.conn.lock().map_err(|_| "SQLite connection lock poisoned")?;

        let changed = conn.execute(
            r#"
            INSERT INTO alert_claims (device_id, reason, claimed_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(device_id, reason) DO UPDATE SET
                claimed_at = excluded.claimed_at,
                expires_at = excluded.expires_at
            WHERE alert_claims.expires_at <= excluded.claimed_at
            "#,
            rusqlite::params![device_id, reason.as_str(), now, expires_at],
        )?;

        Ok(changed == 1)
    }

    async fn ping(&self) -> StoreResult<()> {
        let conn = self.conn.lock().map_err(|_| "SQLite connection lock poisoned")?;
        conn.query_row("SELECT COUNT(*) FROM alert_claims", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::run_schema_migrations;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tempfile::NamedTempFile;

    const WINDOW: Duration = Duration::from_secs(60);

    fn manual_clock(start: i64) -> (Arc<AtomicI64>, Box<dyn Fn() -> i64 + Send + Sync>) {
        let clock = Arc::new(AtomicI64::new(start));
        let clock_ref = clock.clone();
        (clock, Box::new(move || clock_ref.load(Ordering::SeqCst)))
    }

    fn create_sqlite_store(
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> (NamedTempFile, SqliteClaimStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();

        let mut conn = Connection::open(db_path).unwrap();
        run_schema_migrations(&mut conn, "sql").unwrap();
        drop(conn);

        let store = SqliteClaimStore::new_with_clock(db_path, now_fn).unwrap();
        (temp_file, store)
    }

    #[tokio::test]
    async fn test_memory_second_claim_within_window_fails() {
        let (clock, now_fn) = manual_clock(0);
        let store = MemoryClaimStore::new_with_clock(now_fn);

        assert!(store.claim_once("dev-001", AlertReason::HighTemperature, WINDOW).await.unwrap());

        clock.store(59_999, Ordering::SeqCst);
        assert!(!store.claim_once("dev-001", AlertReason::HighTemperature, WINDOW).await.unwrap());

        clock.store(60_000, Ordering::SeqCst);
        assert!(store.claim_once("dev-001", AlertReason::HighTemperature, WINDOW).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_keys_are_independent() {
        let store = MemoryClaimStore::new();

        assert!(store.claim_once("dev-001", AlertReason::HighTemperature, WINDOW).await.unwrap());
        assert!(store.claim_once("dev-001", AlertReason::HighHumidity, WINDOW).await.unwrap());
        assert!(store.claim_once("dev-002", AlertReason::HighTemperature, WINDOW).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_concurrent_claims_single_winner() {
        let store = Arc::new(MemoryClaimStore::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(32));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                store
                    .claim_once("dev-hot", AlertReason::HighTemperature, WINDOW)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_sqlite_concurrent_connections_single_winner() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();
        let mut conn = Connection::open(&db_path).unwrap();
        run_schema_migrations(&mut conn, "sql").unwrap();
        drop(conn);

        const CLAIMANTS: usize = 8;
        let barrier = Arc::new(std::sync::Barrier::new(CLAIMANTS));

        // Each thread owns its connection and runtime, released together
        let threads: Vec<_> = (0..CLAIMANTS)
            .map(|_| {
                let store = SqliteClaimStore::new(&db_path).unwrap();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .build()
                        .unwrap();
                    barrier.wait();
                    runtime
                        .block_on(store.claim_once("dev-hot", AlertReason::HighTemperature, WINDOW))
                        .unwrap()
                })
            })
            .collect();

        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_sqlite_claim_window() {
        let (clock, now_fn) = manual_clock(1_700_000_000_000);
        let (_temp, store) = create_sqlite_store(now_fn);

        assert!(store.claim_once("dev-001", AlertReason::HighHumidity, WINDOW).await.unwrap());
        assert!(!store.claim_once("dev-001", AlertReason::HighHumidity, WINDOW).await.unwrap());
        assert!(store.claim_once("dev-001", AlertReason::HighTemperature, WINDOW).await.unwrap());

        clock.store(1_700_000_060_000, Ordering::SeqCst);
        assert!(store.claim_once("dev-001", AlertReason::HighHumidity, WINDOW).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_claim_shared_between_connections() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let mut conn = Connection::open(db_path).unwrap();
        run_schema_migrations(&mut conn, "sql").unwrap();
        drop(conn);

        let first = SqliteClaimStore::new(db_path).unwrap();
        let second = SqliteClaimStore::new(db_path).unwrap();

        assert!(first.claim_once("dev-001", AlertReason::HighTemperature, WINDOW).await.unwrap());
        assert!(!second.claim_once("dev-001", AlertReason::HighTemperature, WINDOW).await.unwrap());
        second.ping().await.unwrap();
    }
}
