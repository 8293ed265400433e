//! Configuration for the tiered cache.
//!
//! # Example
//!
//! ```
//! use tiered_cache::CacheConfig;
//!
//! // Minimal config (uses defaults)
//! let config = CacheConfig::default();
//! assert_eq!(config.local_max_entries, 1000);
//!
//! // Full config
//! let config = CacheConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     remote_prefix: "pages:".into(),
//!     local_max_entries: 5000,
//!     sync_interval_secs: 30,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

/// Configuration for the tiered cache and its sync manager.
///
/// All fields have sensible defaults. For production use you should at
/// minimum configure `redis_url` and a `remote_prefix` unique to the
/// logical cache, since multiple caches share one physical Redis.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key prefix applied to every remote key (default: "cache:")
    #[serde(default = "default_remote_prefix")]
    pub remote_prefix: String,

    /// Default TTL in seconds for remote writes without an explicit TTL.
    /// `None` stores without expiry.
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,

    /// Max entries held by the local tier before LRU eviction (default: 1000)
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,

    /// Interval of the local expired-entry sweep in seconds (default: 60)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Interval of the remote-to-local reconciliation pass in seconds
    /// (default: 60)
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Keys per SCAN page when clearing, counting or reconciling the
    /// remote namespace (default: 100)
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Lease duration of the distributed lock in seconds (default: 30)
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Acquisition attempts before giving up the lock (default: 3)
    #[serde(default = "default_lock_retry_times")]
    pub lock_retry_times: usize,

    /// Fixed delay between lock attempts in milliseconds (default: 100)
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,
}

fn default_remote_prefix() -> String {
    "cache:".to_string()
}
fn default_local_max_entries() -> usize {
    1000
}
fn default_cleanup_interval_secs() -> u64 {
    60
}
fn default_sync_interval_secs() -> u64 {
    60
}
fn default_scan_batch_size() -> usize {
    100
}
fn default_lock_ttl_secs() -> u64 {
    30
}
fn default_lock_retry_times() -> usize {
    3
}
fn default_lock_retry_delay_ms() -> u64 {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            remote_prefix: default_remote_prefix(),
            default_ttl_secs: None,
            local_max_entries: default_local_max_entries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            scan_batch_size: default_scan_batch_size(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_retry_times: default_lock_retry_times(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
        }
    }
}
