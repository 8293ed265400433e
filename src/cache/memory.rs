//! In-memory stand-in for the shared tier.
//!
//! Implements the full remote contract (including bounded key scans) over a
//! `DashMap`, so sync and registry logic can run without a Redis. Also
//! usable as a degraded-mode tier when no shared store is configured.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Cache, CacheError, CacheMetrics, CacheValue, RemoteTier};
use crate::entry::CacheEntry;

/// Unbounded in-process tier with remote-contract semantics.
pub struct MemoryCache<V> {
    name: String,
    page_size: usize,
    entries: DashMap<String, CacheEntry<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: CacheValue> MemoryCache<V> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page_size: 100,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<V: CacheValue> Cache<V> for MemoryCache<V> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expired(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            self.entries.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let value = self.entries.get_mut(key).map(|mut entry| {
            entry.access();
            entry.value.clone()
        });
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        match self.entries.get_mut(key) {
            Some(mut entry) => entry.update(value, ttl),
            None => {
                self.entries
                    .insert(key.to_string(), CacheEntry::new(key.to_string(), value, ttl));
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    async fn exists(&self, key: &str) -> bool {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expired(),
            None => return false,
        };
        if expired {
            self.entries.remove(key);
            return false;
        }
        true
    }

    async fn clear(&self) {
        self.entries.clear();
    }

    async fn expire(&self, key: &str, ttl: Duration) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.ttl = Some(ttl);
                entry.created_at = std::time::Instant::now();
                true
            }
            None => false,
        }
    }

    async fn ttl(&self, key: &str) -> Option<Duration> {
        self.entries
            .get(key)
            .filter(|entry| !entry.expired())
            .and_then(|entry| entry.remaining_ttl())
    }

    async fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: 0,
            current_size: self.entries.len() as u64,
            max_size: 0,
            hit_rate: 0.0,
        }
        .with_hit_rate()
    }
}

#[async_trait]
impl<V: CacheValue> RemoteTier<V> for MemoryCache<V> {
    async fn scan_keys(&self, cursor: u64) -> Result<(u64, Vec<String>), CacheError> {
        // Snapshot and sort so cursor pagination is stable across pages.
        let mut all: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        all.sort();

        let start = cursor as usize;
        if start >= all.len() {
            return Ok((0, Vec::new()));
        }
        let end = (start + self.page_size).min(all.len());
        let next = if end >= all.len() { 0 } else { end as u64 };
        Ok((next, all[start..end].to_vec()))
    }
}
