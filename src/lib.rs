//! # Tiered Cache
//!
//! A two-tier cache and synchronization engine for read-heavy services.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CacheRegistry                          │
//! │  • Named lookup of every registered tier                   │
//! │  • Flush-all and cross-tier metrics snapshots               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Local Tier: LocalCache                     │
//! │  • Bounded LRU with per-entry TTL                           │
//! │  • Lazy expiry on read + background sweeper                 │
//! │  • Per-entry version and hit counters                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!            (SyncManager: version-gated write-through,
//!             periodic remote → local reconciliation)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Remote Tier: RemoteCache                    │
//! │  • Namespaced Redis keyspace shared across processes        │
//! │  • Degrades to a miss on backend failure                    │
//! │  • Atomic counters and lease-based locks                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tiered_cache::{
//!     CacheConfig, CacheEvent, EventBus, LocalCache, RemoteCache, RemoteTier, SyncManager,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig {
//!         redis_url: Some("redis://localhost:6379".into()),
//!         ..Default::default()
//!     };
//!
//!     let local = Arc::new(LocalCache::<serde_json::Value>::new(
//!         "local",
//!         config.local_max_entries,
//!         Duration::from_secs(config.cleanup_interval_secs),
//!     ));
//!     local.start().await;
//!
//!     let remote: Arc<dyn RemoteTier<serde_json::Value>> = Arc::new(
//!         RemoteCache::connect("remote", "redis://localhost:6379", &config).await?,
//!     );
//!
//!     let bus = Arc::new(EventBus::new("events"));
//!     let sync = Arc::new(SyncManager::new(
//!         "sync",
//!         local,
//!         remote,
//!         bus,
//!         Duration::from_secs(config.sync_interval_secs),
//!     ));
//!     sync.start().await;
//!
//!     // a version-tagged write propagates to both tiers
//!     sync.publish_event(CacheEvent::set(
//!         "user:42",
//!         serde_json::json!({"name": "Ada"}),
//!         Some(Duration::from_secs(300)),
//!         1,
//!     ))
//!     .await;
//!
//!     sync.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Uniform Contract**: one [`Cache`] trait over every tier
//! - **Bounded Local Tier**: LRU eviction, lazy + background TTL expiry
//! - **Shared Remote Tier**: namespaced Redis with pipelined bulk operations
//! - **Degrade to Miss**: backend failures read as misses, never as errors
//! - **Version-Gated Sync**: highest version wins, stale events dropped
//! - **Eventual Consistency**: periodic remote → local reconciliation
//! - **Distributed Locks**: lease-based SET NX EX with scope-exit release
//! - **Retry Logic**: configurable policies for transient Redis failures
//!
//! ## Configuration
//!
//! See [`CacheConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`cache`]: the [`Cache`] contract and the local, remote and in-memory tiers
//! - [`sync`]: the [`SyncManager`] applying version-gated events across tiers
//! - [`event`]: [`CacheEvent`] wire format and the [`EventBus`]
//! - [`registry`]: named registry over every tier
//! - [`resilience`]: retry policies for remote round-trips
//! - [`entry`]: the versioned, TTL-carrying [`CacheEntry`]

pub mod cache;
pub mod config;
pub mod entry;
pub mod event;
pub mod metrics;
pub mod registry;
pub mod resilience;
pub mod sync;

pub use cache::{
    Cache, CacheError, CacheMetrics, CacheValue, LocalCache, MemoryCache, RemoteCache,
    RemoteLock, RemoteTier,
};
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use event::{CacheEvent, EventBus, EventHandler, EventType, SubscriptionId};
pub use metrics::LatencyTimer;
pub use registry::CacheRegistry;
pub use resilience::{retry, RetryPolicy};
pub use sync::SyncManager;
