//! SQLite cache store

use super::CacheStore;
use crate::{MeshError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// SQLite store configuration
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to SQLite database file
    pub path: PathBuf,

    /// Enable WAL mode for better concurrency
    pub wal_mode: bool,
}

impl SqliteStoreConfig {
    /// Default database location (~/.config/ctxmesh/cache.db)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("ctxmesh");
        path.push("cache.db");
        path
    }
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            wal_mode: true,
        }
    }
}

/// Cache store persisted in a single SQLite table
///
/// The connection is shared behind a mutex and every statement runs on the
/// blocking pool, so concurrent async callers never block the runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    config: SqliteStoreConfig,
}

impl SqliteStore {
    /// Open or create a cache database
    pub fn new(config: SqliteStoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %config.path.display(), "Opening cache database");

        let conn = Connection::open(&config.path)?;

        if config.wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }

        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// In-memory database, for tests and throwaway engines
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config: SqliteStoreConfig {
                path: PathBuf::from(":memory:"),
                wal_mode: false,
            },
        })
    }

    /// Delete expired rows, returning how many were removed
    pub async fn purge_expired(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM cache_entries WHERE expires_at <= ?",
                params![now_millis()],
            )?;
            Ok(removed)
        })
        .await
    }

    /// Delete every row
    pub async fn clear(&self) -> Result<()> {
        tracing::info!("Clearing cache");
        self.with_conn(|conn| {
            conn.execute("DELETE FROM cache_entries", [])?;
            Ok(())
        })
        .await
    }

    /// Row counts
    pub async fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
            let live: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cache_entries WHERE expires_at > ?",
                params![now_millis()],
                |row| row.get(0),
            )?;

            Ok(StoreStats {
                entries: total as usize,
                live_entries: live as usize,
            })
        })
        .await
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| MeshError::Cache(format!("Cache connection poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| MeshError::Cache(format!("Cache task failed: {}", e)))?
    }
}

/// Cache row counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: usize,
    pub live_entries: usize,
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
        "#,
    )?;

    Ok(())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM cache_entries WHERE key = ? AND expires_at > ?",
                    params![key, now_millis()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn set_ex(&self, key: &str, ttl: Duration, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_millis().saturating_add(ttl_millis);

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)",
                params![key, value, expires_at],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let config = SqliteStoreConfig {
            path: dir.path().join("cache.db"),
            ..Default::default()
        };
        let store = SqliteStore::new(config).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_store_creation() {
        let (_dir, store) = temp_store();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_huge_ttl_stays_readable() {
        let (_dir, store) = temp_store();

        store
            .set_ex("k", Duration::from_secs(u64::MAX), "v")
            .await
            .unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.stats().await.unwrap().live_entries, 1);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (_dir, store) = temp_store();

        assert_eq!(store.get("k").await.unwrap(), None);
        store.set_ex("k", Duration::from_secs(60), "v1").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v1".to_string()));

        store.set_ex("k", Duration::from_secs(60), "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn test_expiration_and_purge() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .set_ex("short", Duration::from_millis(50), "v")
            .await
            .unwrap();
        store
            .set_ex("long", Duration::from_secs(3600), "v")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.get("short").await.unwrap(), None);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.live_entries, 1);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = SqliteStore::in_memory().unwrap();
        store.set_ex("k", Duration::from_secs(60), "v").await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
