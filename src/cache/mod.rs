//! Cache layer for aggregated results
//!
//! A [`CacheStore`] is a plain key-value store with per-key TTL
//! (`GET` / `SETEX`). The [`CacheGateway`] wraps a store with the
//! read-through/write-through policy: store failures degrade to a miss on
//! read and are logged and skipped on write.

mod gateway;
mod memory;
mod sqlite;

pub use gateway::{cache_key, CacheGateway, CACHE_KEY_PREFIX};
pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, SqliteStoreConfig, StoreStats};

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// External key-value store holding serialized results
///
/// Implementations must tolerate concurrent `get`/`set_ex` calls; each key
/// is independent.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Value for `key`, or `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` for `ttl`
    async fn set_ex(&self, key: &str, ttl: Duration, value: &str) -> Result<()>;
}
