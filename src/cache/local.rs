// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process bounded LRU + TTL tier.
//!
//! One [`parking_lot::Mutex`] guards the whole key space: every operation is
//! O(1)-ish and I/O-free, so holding the lock for the full call is cheap and
//! keeps the recency order total. Operations never suspend; the only async
//! code here is the background expiry sweep.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{Cache, CacheMetrics, CacheValue};
use crate::entry::CacheEntry;
use crate::metrics;

/// Tracks access order for LRU eviction.
///
/// Front = most recently used, back = least recently used.
#[derive(Debug, Default)]
struct LruTracker {
    order: VecDeque<String>,
}

impl LruTracker {
    fn touch(&mut self, key: &str) {
        self.remove(key);
        self.order.push_front(key.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.order.retain(|k| k != key);
    }

    fn pop_oldest(&mut self) -> Option<String> {
        self.order.pop_back()
    }

    fn clear(&mut self) {
        self.order.clear();
    }
}

/// Everything behind the tier lock: entries, recency order and counters.
/// Metrics move in the same critical section as the mutation they count.
struct LocalState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    recency: LruTracker,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> LocalState<V> {
    /// Drop an entry from both the map and the recency order.
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.recency.remove(key);
        }
        removed
    }
}

/// Bounded in-process LRU tier with TTL expiry.
///
/// Expired entries are purged lazily on `get`/`exists` and proactively by
/// the background sweep started with [`LocalCache::start`].
pub struct LocalCache<V> {
    name: String,
    max_entries: usize,
    cleanup_interval: Duration,
    state: Mutex<LocalState<V>>,
    sweeper: tokio::sync::Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl<V: CacheValue> LocalCache<V> {
    pub fn new(name: impl Into<String>, max_entries: usize, cleanup_interval: Duration) -> Self {
        Self {
            name: name.into(),
            max_entries,
            cleanup_interval,
            state: Mutex::new(LocalState {
                entries: HashMap::new(),
                recency: LruTracker::default(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            sweeper: tokio::sync::Mutex::new(None),
        }
    }

    /// Spawn the background expiry sweep. Idempotent: calling it while the
    /// sweep is running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick is immediate, skip it
            loop {
                tokio::select! {
                    _ = ticker.tick() => cache.sweep_expired(),
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        *sweeper = Some((shutdown_tx, handle));
        info!(cache = %self.name, interval = ?self.cleanup_interval, "local cache sweep started");
    }

    /// Cancel the background sweep and wait for it to finish.
    pub async fn stop(&self) {
        let task = self.sweeper.lock().await.take();
        if let Some((shutdown_tx, handle)) = task {
            let _ = shutdown_tx.send(true);
            if let Err(e) = handle.await {
                error!(cache = %self.name, error = %e, "sweep task panicked");
            }
            info!(cache = %self.name, "local cache sweep stopped");
        }
    }

    /// One pass of the expiry sweep: drop every expired entry. Safety net
    /// independent of the lazy purge in `get`/`exists`.
    fn sweep_expired(&self) {
        let mut state = self.state.lock();
        let expired_keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.expired())
            .map(|(key, _)| key.clone())
            .collect();
        let count = expired_keys.len();
        for key in expired_keys {
            state.remove(&key);
        }
        if count > 0 {
            metrics::record_expired(&self.name, count);
            metrics::set_local_entries(&self.name, state.entries.len());
            debug!(cache = %self.name, removed = count, "swept expired entries");
        }
    }

    /// Current entry count (includes not-yet-purged expired entries).
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Version of the entry under `key`, if present. Versions start at 1
    /// and bump on every in-place update.
    pub fn version(&self, key: &str) -> Option<u64> {
        self.state.lock().entries.get(key).map(|e| e.version)
    }

    /// Insert under the lock, evicting from the LRU end while at capacity.
    fn insert_locked(state: &mut LocalState<V>, max_entries: usize, name: &str, key: &str, value: V, ttl: Option<Duration>) {
        if let Some(entry) = state.entries.get_mut(key) {
            entry.update(value, ttl);
            state.recency.touch(key);
            return;
        }

        let mut evicted = 0usize;
        while state.entries.len() >= max_entries {
            match state.recency.pop_oldest() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                    state.evictions += 1;
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            metrics::record_evictions(name, evicted);
        }

        state
            .entries
            .insert(key.to_string(), CacheEntry::new(key.to_string(), value, ttl));
        state.recency.touch(key);
    }
}

#[async_trait]
impl<V: CacheValue> Cache<V> for LocalCache<V> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Option<V> {
        let mut state = self.state.lock();
        let status = state.entries.get(key).map(CacheEntry::expired);
        match status {
            None => {
                state.misses += 1;
                metrics::record_operation("local", "get", "miss");
                None
            }
            Some(true) => {
                state.remove(key);
                state.misses += 1;
                metrics::record_operation("local", "get", "miss");
                None
            }
            Some(false) => {
                let value = state.entries.get_mut(key).map(|entry| {
                    entry.access();
                    entry.value.clone()
                });
                state.recency.touch(key);
                state.hits += 1;
                metrics::record_operation("local", "get", "hit");
                value
            }
        }
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let mut state = self.state.lock();
        Self::insert_locked(&mut state, self.max_entries, &self.name, key, value, ttl);
        metrics::set_local_entries(&self.name, state.entries.len());
        metrics::record_operation("local", "set", "success");
    }

    async fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.remove(key).is_some();
        metrics::set_local_entries(&self.name, state.entries.len());
        removed
    }

    async fn exists(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let status = state.entries.get(key).map(CacheEntry::expired);
        match status {
            None => false,
            Some(true) => {
                state.remove(key);
                false
            }
            Some(false) => true,
        }
    }

    async fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
        // single bump as a reset signal, distinguishable from capacity
        // eviction bursts
        state.evictions += 1;
        metrics::set_local_entries(&self.name, 0);
        debug!(cache = %self.name, "local cache cleared");
    }

    async fn expire(&self, key: &str, ttl: Duration) -> bool {
        let mut state = self.state.lock();
        match state.entries.get_mut(key) {
            Some(entry) => {
                // value and version untouched; the TTL clock restarts now
                entry.ttl = Some(ttl);
                entry.created_at = std::time::Instant::now();
                true
            }
            None => false,
        }
    }

    async fn ttl(&self, key: &str) -> Option<Duration> {
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .filter(|entry| !entry.expired())
            .and_then(|entry| entry.remaining_ttl())
    }

    async fn metrics(&self) -> CacheMetrics {
        let state = self.state.lock();
        CacheMetrics {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            current_size: state.entries.len() as u64,
            max_size: self.max_entries as u64,
            hit_rate: 0.0,
        }
        .with_hit_rate()
    }

    async fn multi_get(&self, keys: &[String]) -> HashMap<String, V> {
        let mut state = self.state.lock();
        let mut results = HashMap::new();
        for key in keys {
            let status = state.entries.get(key).map(CacheEntry::expired);
            match status {
                Some(false) => {
                    if let Some(entry) = state.entries.get_mut(key) {
                        entry.access();
                        results.insert(key.clone(), entry.value.clone());
                    }
                    state.recency.touch(key);
                    state.hits += 1;
                }
                Some(true) => {
                    state.remove(key);
                    state.misses += 1;
                }
                None => {
                    state.misses += 1;
                }
            }
        }
        results
    }

    async fn multi_set(&self, entries: HashMap<String, V>, ttl: Option<Duration>) {
        let mut state = self.state.lock();
        for (key, value) in entries {
            Self::insert_locked(&mut state, self.max_entries, &self.name, &key, value, ttl);
        }
        metrics::set_local_entries(&self.name, state.entries.len());
    }
}
