//! SQLite-backed cache store.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::sweeper;

/// Configuration for the cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Interval between background sweeps of expired entries.
    pub sweep_interval: Duration,
    /// Idle read-only connections kept around for reuse.
    pub max_idle_readers: usize,
    /// How long a connection waits on a locked database.
    pub busy_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30 * 60),
            max_idle_readers: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Bookkeeping for a live entry, without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStat {
    pub key: String,
    pub size_bytes: u64,
    pub updated_at: DateTime<Utc>,
    /// `None` if the entry never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sweeps: AtomicU64,
    pub swept_keys: AtomicU64,
}

/// Synchronous core shared by the async handle and the sweeper.
pub(crate) struct Store {
    path: PathBuf,
    config: CacheConfig,
    writer: Mutex<Option<Connection>>,
    readers: Mutex<Vec<Connection>>,
    closed: AtomicBool,
    pub(crate) stats: CacheStats,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn is_expired(expires_at: Option<i64>, now: i64) -> bool {
    expires_at.is_some_and(|deadline| deadline <= now)
}

impl Store {
    fn open(path: &Path, config: CacheConfig) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(config.busy_timeout)?;

        // WAL lets readers proceed while a write transaction is open.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_values (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache_expiry (
                key TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_expiry_expires_at ON cache_expiry(expires_at);
            "#,
        )?;

        debug!(path = %path.display(), "Cache schema initialized");

        Ok(Self {
            path: path.to_path_buf(),
            config,
            writer: Mutex::new(Some(conn)),
            readers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            stats: CacheStats::default(),
        })
    }

    fn with_reader<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }

        let pooled = self
            .readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => {
                let conn = Connection::open_with_flags(
                    &self.path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                conn.busy_timeout(self.config.busy_timeout)?;
                conn
            }
        };

        let result = f(&conn);

        if !self.closed.load(Ordering::Acquire) {
            let mut readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
            if readers.len() < self.config.max_idle_readers {
                readers.push(conn);
            }
        }

        result
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match writer.as_mut() {
            Some(conn) => f(conn),
            None => Err(CacheError::Closed),
        }
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let row: Option<(Vec<u8>, Option<i64>)> = self.with_reader(|conn| {
            conn.query_row(
                "SELECT v.value, e.expires_at
                 FROM cache_values v LEFT JOIN cache_expiry e ON e.key = v.key
                 WHERE v.key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(Into::into)
        })?;

        match row {
            Some((value, expires_at)) if !is_expired(expires_at, now_millis()) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            _ => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::NotFound(key.to_string()))
            }
        }
    }

    fn stat(&self, key: &str) -> Result<Option<CacheStat>, CacheError> {
        let row: Option<(i64, i64, Option<i64>)> = self.with_reader(|conn| {
            conn.query_row(
                "SELECT length(v.value), v.updated_at, e.expires_at
                 FROM cache_values v LEFT JOIN cache_expiry e ON e.key = v.key
                 WHERE v.key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(Into::into)
        })?;

        Ok(row.and_then(|(size, updated_at, expires_at)| {
            if is_expired(expires_at, now_millis()) {
                return None;
            }
            Some(CacheStat {
                key: key.to_string(),
                size_bytes: u64::try_from(size).unwrap_or(0),
                updated_at: from_millis(updated_at),
                expires_at: expires_at.map(from_millis),
            })
        }))
    }

    fn set(
        &self,
        key: &str,
        value: &[u8],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), CacheError> {
        self.with_writer(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                r#"
                INSERT INTO cache_values (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                params![key, value, now_millis()],
            )?;
            match expires_at {
                Some(deadline) => {
                    tx.execute(
                        r#"
                        INSERT INTO cache_expiry (key, expires_at)
                        VALUES (?1, ?2)
                        ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at
                        "#,
                        params![key, deadline.timestamp_millis()],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM cache_expiry WHERE key = ?1", params![key])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn unset(&self, key: &str) -> Result<(), CacheError> {
        self.with_writer(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute("DELETE FROM cache_values WHERE key = ?1", params![key])?;
            tx.execute("DELETE FROM cache_expiry WHERE key = ?1", params![key])?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Delete every expired key from both partitions.
    pub(crate) fn sweep(&self) -> Result<u64, CacheError> {
        let now = now_millis();
        let removed = self.with_writer(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "DELETE FROM cache_values
                 WHERE key IN (SELECT key FROM cache_expiry WHERE expires_at <= ?1)",
                params![now],
            )?;
            let removed = tx.execute(
                "DELETE FROM cache_expiry WHERE expires_at <= ?1",
                params![now],
            )?;
            tx.commit()?;
            Ok(removed as u64)
        })?;

        self.stats.sweeps.fetch_add(1, Ordering::Relaxed);
        self.stats.swept_keys.fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        // Waits for an in-flight write to finish before the connection goes away.
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(writer);
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Durable key/value cache with optional per-entry expiry.
///
/// Safe to share (behind an `Arc`) across any number of concurrent pipeline
/// runs. All SQLite work runs on the blocking thread pool.
///
/// Operations take no cancellation or deadline. Callers that need one race
/// the returned future against it; dropping that future stops waiting but
/// does not interrupt a statement already running on the blocking pool.
pub struct Cache {
    store: Arc<Store>,
    shutdown_tx: watch::Sender<bool>,
    sweeper: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Cache {
    /// Open or create a cache at `path` and start the background sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open<P: AsRef<Path>>(path: P, config: CacheConfig) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        let interval = config.sweep_interval;

        let store =
            tokio::task::spawn_blocking(move || Store::open(&path, config).map(Arc::new)).await??;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sweeper::run(Arc::clone(&store), interval, shutdown_rx));

        info!(
            path = %store.path.display(),
            sweep_interval_secs = interval.as_secs(),
            "Cache opened"
        );

        Ok(Self {
            store,
            shutdown_tx,
            sweeper: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(&Store) -> Result<T, CacheError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    /// Whether a live (unexpired) entry exists for `key`.
    pub async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let key = key.to_string();
        Ok(self.blocking(move |store| store.stat(&key)).await?.is_some())
    }

    /// Fetch the payload for `key`.
    ///
    /// Fails with [`CacheError::NotFound`] if the key was never set, was
    /// removed, or is past its expiry.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let key = key.to_string();
        self.blocking(move |store| store.get(&key)).await
    }

    /// Insert or replace `key`. An `expires_at` of `None` never expires.
    pub async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), CacheError> {
        let key = key.to_string();
        self.blocking(move |store| store.set(&key, &value, expires_at))
            .await
    }

    /// Insert or replace `key`, expiring `ttl` from now.
    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        if expires_at.is_none() {
            warn!(key = %key, ttl_secs = ttl.as_secs(), "TTL out of range, entry will not expire");
        }
        self.set(key, value, expires_at).await
    }

    /// Remove `key`. Removing a missing key succeeds.
    pub async fn unset(&self, key: &str) -> Result<(), CacheError> {
        let key = key.to_string();
        self.blocking(move |store| store.unset(&key)).await
    }

    /// Bookkeeping for `key`, or `None` if it is absent or expired.
    pub async fn stat(&self, key: &str) -> Result<Option<CacheStat>, CacheError> {
        let key = key.to_string();
        self.blocking(move |store| store.stat(&key)).await
    }

    /// Fetch and deserialize a JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let bytes = self.get(key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Serialize `value` as JSON and store it.
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, expires_at).await
    }

    /// Serialize `value` as JSON and store it, expiring `ttl` from now.
    pub async fn set_json_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.set_with_ttl(key, bytes, ttl).await
    }

    /// Run one sweep of expired entries now. Returns the number of keys removed.
    pub async fn sweep(&self) -> Result<u64, CacheError> {
        self.blocking(|store| store.sweep()).await
    }

    /// Cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.store.stats
    }

    /// Stop the sweeper, wait for its current pass, then close the database.
    ///
    /// Every operation after `close` returns fails with [`CacheError::Closed`].
    pub async fn close(&self) -> Result<(), CacheError> {
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.sweeper.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cache sweeper task failed");
            }
        }

        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.shutdown()).await?;

        info!(path = %self.store.path.display(), "Cache closed");
        Ok(())
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_test_cache(dir: &TempDir) -> Cache {
        Cache::open(dir.path().join("cache.db"), CacheConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = open_test_cache(&dir).await;

        cache.set("k", b"value".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), b"value");
        assert!(cache.has("k").await.unwrap());

        cache.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_unset_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let cache = open_test_cache(&dir).await;

        let err = cache.get("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!cache.has("missing").await.unwrap());

        let stats = cache.stats();
        assert_eq!(stats.misses.load(Ordering::Relaxed), 1);
        assert_eq!(stats.hits.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_past_expiry_is_not_found_before_sweep() {
        let dir = TempDir::new().unwrap();
        let cache = open_test_cache(&dir).await;

        let past = Utc::now() - TimeDelta::seconds(10);
        cache.set("stale", b"old".to_vec(), Some(past)).await.unwrap();

        assert!(cache.get("stale").await.unwrap_err().is_not_found());
        assert!(!cache.has("stale").await.unwrap());
        assert!(cache.stat("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unset_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = open_test_cache(&dir).await;

        cache.set("k", b"v".to_vec(), None).await.unwrap();
        cache.unset("k").await.unwrap();
        assert!(cache.get("k").await.unwrap_err().is_not_found());
        assert!(cache.stat("k").await.unwrap().is_none());

        // Idempotent.
        cache.unset("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_set_without_expiry_clears_previous_expiry() {
        let dir = TempDir::new().unwrap();
        let cache = open_test_cache(&dir).await;

        let past = Utc::now() - TimeDelta::seconds(1);
        cache.set("k", b"a".to_vec(), Some(past)).await.unwrap();
        cache.set("k", b"b".to_vec(), None).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), b"b");
        let stat = cache.stat("k").await.unwrap().unwrap();
        assert_eq!(stat.expires_at, None);
        assert_eq!(stat.size_bytes, 1);
    }

    #[tokio::test]
    async fn test_stat_reports_expiry() {
        let dir = TempDir::new().unwrap();
        let cache = open_test_cache(&dir).await;

        cache
            .set_with_ttl("k", b"abc".to_vec(), Duration::from_secs(3600))
            .await
            .unwrap();

        let stat = cache.stat("k").await.unwrap().unwrap();
        assert_eq!(stat.key, "k");
        assert_eq!(stat.size_bytes, 3);
        assert!(stat.expires_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = open_test_cache(&dir).await;

        let value = vec!["3.7.0".to_string(), "3.7.1".to_string()];
        cache.set_json("tags", &value, None).await.unwrap();
        let fetched: Vec<String> = cache.get_json("tags").await.unwrap();
        assert_eq!(fetched, value);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let dir = TempDir::new().unwrap();
        let cache = open_test_cache(&dir).await;

        let past = Utc::now() - TimeDelta::seconds(5);
        cache.set("expired", b"x".to_vec(), Some(past)).await.unwrap();
        cache
            .set_with_ttl("fresh", b"y".to_vec(), Duration::from_secs(3600))
            .await
            .unwrap();
        cache.set("forever", b"z".to_vec(), None).await.unwrap();

        assert_eq!(cache.sweep().await.unwrap(), 1);
        assert_eq!(cache.sweep().await.unwrap(), 0);

        assert!(cache.has("fresh").await.unwrap());
        assert!(cache.has("forever").await.unwrap());
        assert_eq!(cache.stats().swept_keys.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let dir = TempDir::new().unwrap();
        let cache = open_test_cache(&dir).await;

        cache.set("k", b"v".to_vec(), None).await.unwrap();
        cache.close().await.unwrap();

        assert!(matches!(
            cache.set("k", b"w".to_vec(), None).await,
            Err(CacheError::Closed)
        ));
        assert!(matches!(cache.get("k").await, Err(CacheError::Closed)));

        // Closing twice is harmless.
        cache.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open_test_cache(&dir).await;
            cache.set("durable", b"1".to_vec(), None).await.unwrap();
            cache.close().await.unwrap();
        }

        let cache = open_test_cache(&dir).await;
        assert_eq!(cache.get("durable").await.unwrap(), b"1");
    }
}
