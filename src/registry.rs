//! Central registry of named cache tiers.
//!
//! Administrative surface over every registered cache: lookup by name,
//! flush-all, metrics snapshot across tiers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::cache::{Cache, CacheError, CacheMetrics, CacheValue};

pub struct CacheRegistry<V> {
    caches: RwLock<HashMap<String, Arc<dyn Cache<V>>>>,
}

impl<V: CacheValue> CacheRegistry<V> {
    pub fn new() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// Register a cache under `name`. Re-registering a name replaces the
    /// previous tier (last one wins); one tier may be registered under
    /// several logical names.
    pub fn register(&self, name: impl Into<String>, cache: Arc<dyn Cache<V>>) {
        let name = name.into();
        let previous = self.caches.write().insert(name.clone(), cache);
        if previous.is_some() {
            warn!(cache = %name, "replaced an already registered cache");
        } else {
            info!(cache = %name, "cache registered");
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Cache<V>>, CacheError> {
        self.caches
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::CacheMissing(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.caches.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }

    /// Flush every registered cache. Each tier absorbs its own failures,
    /// so this never short-circuits partway through.
    pub async fn clear_all(&self) {
        let caches: Vec<Arc<dyn Cache<V>>> = self.caches.read().values().cloned().collect();
        for cache in caches {
            cache.clear().await;
        }
        info!("all registered caches cleared");
    }

    /// Snapshot of every tier's metrics, keyed by registered name.
    pub async fn all_metrics(&self) -> HashMap<String, CacheMetrics> {
        let caches: Vec<(String, Arc<dyn Cache<V>>)> = self
            .caches
            .read()
            .iter()
            .map(|(name, cache)| (name.clone(), Arc::clone(cache)))
            .collect();
        let mut out = HashMap::with_capacity(caches.len());
        for (name, cache) in caches {
            out.insert(name, cache.metrics().await);
        }
        out
    }
}

impl<V: CacheValue> Default for CacheRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = CacheRegistry::<String>::new();
        registry.register("sessions", Arc::new(MemoryCache::new("sessions")));

        let cache = registry.get("sessions").unwrap();
        cache.set("k", "v".to_string(), None).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_one_tier_under_several_names() {
        let registry = CacheRegistry::<String>::new();
        let shared = Arc::new(MemoryCache::new("shared"));
        registry.register("pages", shared.clone());
        registry.register("fragments", shared);

        registry.get("pages").unwrap().set("k", "v".to_string(), None).await;
        assert_eq!(
            registry.get("fragments").unwrap().get("k").await.as_deref(),
            Some("v")
        );
    }

    #[test]
    fn test_missing_cache_is_an_error() {
        let registry = CacheRegistry::<String>::new();
        let err = registry.get("nope").unwrap_err();
        assert!(matches!(err, CacheError::CacheMissing(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_reregister_replaces() {
        let registry = CacheRegistry::<String>::new();
        let first = Arc::new(MemoryCache::new("dup"));
        first.set("k", "old".to_string(), None).await;
        registry.register("dup", first);
        registry.register("dup", Arc::new(MemoryCache::new("dup")));

        let current = registry.get("dup").unwrap();
        assert!(current.get("k").await.is_none());
        assert_eq!(registry.names().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_all_and_metrics() {
        let registry = CacheRegistry::<String>::new();
        registry.register("a", Arc::new(MemoryCache::new("a")));
        registry.register("b", Arc::new(MemoryCache::new("b")));

        registry.get("a").unwrap().set("k", "v".to_string(), None).await;
        registry.get("b").unwrap().set("k", "v".to_string(), None).await;
        registry.clear_all().await;

        assert!(registry.get("a").unwrap().get("k").await.is_none());
        assert!(registry.get("b").unwrap().get("k").await.is_none());

        let metrics = registry.all_metrics().await;
        assert_eq!(metrics.len(), 2);
        assert!(metrics.contains_key("a"));
    }
}
