//! The cache capability contract shared by every tier.
//!
//! Collaborators (ingestion workers, exporters) talk to a tier only through
//! the [`Cache`] trait; they never see whether the tier is in-process or
//! shared. Store-level failures are absorbed inside each implementation:
//! reads degrade to a miss, writes to a no-op, and the failure is logged and
//! counted. The cache must never become a hard dependency that can take a
//! caller down with it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod local;
pub mod memory;
pub mod remote;

pub use local::LocalCache;
pub use memory::MemoryCache;
pub use remote::{RemoteCache, RemoteLock};

#[derive(Error, Debug)]
pub enum CacheError {
    /// Transient backend failure (network, timeout). Retried at the call
    /// site; never surfaced through `get`/`set`.
    #[error("store error: {0}")]
    Store(String),
    /// A stored value failed to decode. Treated as a miss by callers.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Registry lookup for an unregistered cache name.
    #[error("no cache registered under '{0}'")]
    CacheMissing(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Store(e.to_string())
    }
}

/// Bound for values that can flow through a tier.
///
/// The local tier keeps values unserialized; the serde bounds exist so the
/// same value type can cross the remote edge, which is the only place
/// serialization happens.
pub trait CacheValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Point-in-time counters for one tier.
///
/// `current_size` and `max_size` are entry counts; `max_size == 0` means
/// the tier is unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub current_size: u64,
    pub max_size: u64,
    pub hit_rate: f64,
}

impl CacheMetrics {
    pub(crate) fn with_hit_rate(mut self) -> Self {
        let total = self.hits + self.misses;
        self.hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
        self
    }
}

/// The operation set every tier implements.
///
/// All methods are infallible from the caller's point of view: a failing
/// backend degrades to a miss or a no-op. Construction and registry lookup
/// are where [`CacheError`] surfaces.
#[async_trait]
pub trait Cache<V: CacheValue>: Send + Sync {
    /// Tier name, used for logging and metric labels.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Option<V>;

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>);

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> bool;

    async fn exists(&self, key: &str) -> bool;

    async fn clear(&self);

    /// Overwrite the TTL of an existing key without touching the value.
    /// Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> bool;

    /// Remaining lifetime of a key; `None` if absent or never expiring.
    async fn ttl(&self, key: &str) -> Option<Duration>;

    async fn metrics(&self) -> CacheMetrics;

    /// Batched read. Missing keys are simply absent from the result map.
    /// Default implementation loops over `get`; tiers override with a
    /// real batch primitive.
    async fn multi_get(&self, keys: &[String]) -> HashMap<String, V> {
        let mut results = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await {
                results.insert(key.clone(), value);
            }
        }
        results
    }

    /// Batched write, one shared TTL.
    async fn multi_set(&self, entries: HashMap<String, V>, ttl: Option<Duration>) {
        for (key, value) in entries {
            self.set(&key, value, ttl).await;
        }
    }
}

/// Extra surface a shared tier exposes to the sync manager: bounded
/// iteration over its namespace. Logical (unprefixed) keys come back.
///
/// Scanning is allowed to fail loudly — reconciliation wants to know when a
/// pass could not complete, unlike the degrade-to-miss contract above.
#[async_trait]
pub trait RemoteTier<V: CacheValue>: Cache<V> {
    /// One bounded page of keys. `cursor = 0` starts a scan; a returned
    /// cursor of 0 ends it.
    async fn scan_keys(&self, cursor: u64) -> Result<(u64, Vec<String>), CacheError>;
}
