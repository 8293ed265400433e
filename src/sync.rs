// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cross-tier synchronization.
//!
//! The [`SyncManager`] owns one local tier, one remote tier and an event
//! bus. Mutations arrive as [`CacheEvent`]s through [`SyncManager::publish_event`]
//! and are applied to both tiers under a per-key version gate: an event is
//! accepted iff its version is strictly greater than the last applied
//! version for that key. Highest version wins, regardless of arrival order
//! or wall clock; stale events are silently dropped. The version table is
//! the sole source of conflict-resolution truth.
//!
//! A write is not atomic across tiers. A crash between the two
//! write-throughs leaves one tier stale until the next reconciliation pass
//! or the next version-bearing event for that key; the design is eventually
//! consistent, never linearizable.
//!
//! The background reconciliation loop bulk-copies the remote namespace into
//! the local tier every `sync_interval`. That pass treats remote as the
//! source of truth and bypasses the version table, so it can overwrite a
//! newer local-only value that has not propagated remotely yet. The
//! staleness window is bounded by the interval and is accepted behavior.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{Cache, CacheError, CacheValue, LocalCache, RemoteTier};
use crate::event::{CacheEvent, EventBus, EventType};
use crate::metrics;

/// Applies version-gated mutations to both tiers and reconciles them
/// periodically.
pub struct SyncManager<V> {
    name: String,
    local: Arc<LocalCache<V>>,
    remote: Arc<dyn RemoteTier<V>>,
    bus: Arc<EventBus<V>>,
    /// key -> last applied version; reset only by Clear (epoch reset)
    versions: DashMap<String, u64>,
    sync_interval: Duration,
    task: tokio::sync::Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl<V: CacheValue> SyncManager<V> {
    pub fn new(
        name: impl Into<String>,
        local: Arc<LocalCache<V>>,
        remote: Arc<dyn RemoteTier<V>>,
        bus: Arc<EventBus<V>>,
        sync_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            local,
            remote,
            bus,
            versions: DashMap::new(),
            sync_interval,
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn local(&self) -> &Arc<LocalCache<V>> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn RemoteTier<V>> {
        &self.remote
    }

    pub fn bus(&self) -> &Arc<EventBus<V>> {
        &self.bus
    }

    /// Last version applied for `key`, if any event has been accepted.
    pub fn last_applied(&self, key: &str) -> Option<u64> {
        self.versions.get(key).map(|v| *v)
    }

    /// Apply a mutation event to both tiers, then re-publish it on the bus
    /// for other subscribers (observability, invalidation fan-out). The
    /// sync handlers themselves are not bus subscribers, so each event is
    /// applied exactly once per publish.
    pub async fn publish_event(&self, event: CacheEvent<V>) {
        match event.event_type {
            EventType::Set => self.handle_set(&event).await,
            EventType::Delete => self.handle_delete(&event).await,
            EventType::Clear => self.handle_clear().await,
        }
        self.bus.publish(&event).await;
    }

    /// Accept iff strictly newer than the last applied version; updates the
    /// table on acceptance. An unseen key counts as last-applied 0, so a
    /// wire event carrying version 0 is always stale. Compare-and-update
    /// runs under the key's shard entry, so two racing events for one key
    /// serialize here.
    fn accept_version(&self, key: &str, version: u64) -> bool {
        match self.versions.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if version > *occupied.get() {
                    occupied.insert(version);
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                if version > 0 {
                    vacant.insert(version);
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn handle_set(&self, event: &CacheEvent<V>) {
        let Some(value) = &event.value else {
            warn!(manager = %self.name, key = %event.key, "set event without a value, dropped");
            return;
        };
        if !self.accept_version(&event.key, event.version) {
            debug!(
                manager = %self.name,
                key = %event.key,
                version = event.version,
                "stale set event ignored"
            );
            metrics::record_stale_event(&self.name);
            return;
        }

        // write-through both tiers; order is irrelevant, both converge to
        // the version-tagged state
        let ttl = event.ttl_duration();
        self.remote.set(&event.key, value.clone(), ttl).await;
        self.local.set(&event.key, value.clone(), ttl).await;
        metrics::record_applied_event(&self.name, "set");
    }

    async fn handle_delete(&self, event: &CacheEvent<V>) {
        if !self.accept_version(&event.key, event.version) {
            debug!(
                manager = %self.name,
                key = %event.key,
                version = event.version,
                "stale delete event ignored"
            );
            metrics::record_stale_event(&self.name);
            return;
        }

        self.remote.delete(&event.key).await;
        self.local.delete(&event.key).await;
        metrics::record_applied_event(&self.name, "delete");
    }

    async fn handle_clear(&self) {
        // epoch reset: every key restarts its version sequence
        self.versions.clear();
        self.remote.clear().await;
        self.local.clear().await;
        metrics::record_applied_event(&self.name, "clear");
        info!(manager = %self.name, "both tiers cleared");
    }

    /// Run one reconciliation pass now: cursor-scan the remote namespace in
    /// bounded batches and copy every key (value + TTL) into the local
    /// tier. Returns the number of keys copied.
    ///
    /// Remote is treated as the source of truth here; the version table is
    /// deliberately not consulted.
    pub async fn reconcile_once(&self) -> Result<usize, CacheError> {
        let mut cursor = 0u64;
        let mut synced = 0usize;
        loop {
            let (next, keys) = self.remote.scan_keys(cursor).await?;
            for key in keys {
                // a read failure degrades to a miss and the key is skipped
                // until the next pass
                if let Some(value) = self.remote.get(&key).await {
                    let ttl = self.remote.ttl(&key).await;
                    self.local.set(&key, value, ttl).await;
                    synced += 1;
                }
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        debug!(manager = %self.name, synced, "reconciliation pass complete");
        Ok(synced)
    }

    /// Spawn the reconciliation loop. Idempotent: a second call while the
    /// loop is running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // brief backoff after a failed pass instead of a full interval
            let backoff = Duration::from_secs(1).min(manager.sync_interval);
            let mut delay = manager.sync_interval;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        match manager.reconcile_once().await {
                            Ok(synced) => {
                                metrics::record_reconciliation(&manager.name, synced, true);
                                delay = manager.sync_interval;
                            }
                            Err(e) => {
                                warn!(manager = %manager.name, error = %e, "reconciliation pass failed, backing off");
                                metrics::record_reconciliation(&manager.name, 0, false);
                                delay = backoff;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        *task = Some((shutdown_tx, handle));
        info!(manager = %self.name, interval = ?self.sync_interval, "sync manager started");
    }

    /// Cancel the reconciliation loop and wait for it to wind down. An
    /// in-flight pass may be cut short; the next start picks up from a
    /// fresh scan.
    pub async fn stop(&self) {
        let task = self.task.lock().await.take();
        if let Some((shutdown_tx, handle)) = task {
            let _ = shutdown_tx.send(true);
            if let Err(e) = handle.await {
                error!(manager = %self.name, error = %e, "reconciliation task panicked");
            }
            info!(manager = %self.name, "sync manager stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::event::EventHandler;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(sync_interval: Duration) -> Arc<SyncManager<String>> {
        let local = Arc::new(LocalCache::new("local", 1000, Duration::from_secs(60)));
        let remote: Arc<dyn RemoteTier<String>> = Arc::new(MemoryCache::new("remote"));
        let bus = Arc::new(EventBus::new("bus"));
        Arc::new(SyncManager::new("test", local, remote, bus, sync_interval))
    }

    #[tokio::test]
    async fn test_set_event_writes_through_both_tiers() {
        let m = manager(Duration::from_secs(60));
        m.publish_event(CacheEvent::set("k", "v".to_string(), None, 1)).await;

        assert_eq!(m.local().get("k").await.as_deref(), Some("v"));
        assert_eq!(m.remote().get("k").await.as_deref(), Some("v"));
        assert_eq!(m.last_applied("k"), Some(1));
    }

    #[tokio::test]
    async fn test_stale_event_is_dropped() {
        let m = manager(Duration::from_secs(60));
        m.publish_event(CacheEvent::set("x", "v1".to_string(), None, 1)).await;
        m.publish_event(CacheEvent::set("x", "v2".to_string(), None, 2)).await;
        // replay of the old version
        m.publish_event(CacheEvent::set("x", "v1stale".to_string(), None, 1)).await;

        assert_eq!(m.local().get("x").await.as_deref(), Some("v2"));
        assert_eq!(m.remote().get("x").await.as_deref(), Some("v2"));
        assert_eq!(m.last_applied("x"), Some(2));
    }

    #[tokio::test]
    async fn test_event_application_is_idempotent() {
        let m = manager(Duration::from_secs(60));
        let event = CacheEvent::set("k", "v".to_string(), None, 3);
        m.publish_event(event.clone()).await;
        m.publish_event(event).await;

        assert_eq!(m.local().get("k").await.as_deref(), Some("v"));
        assert_eq!(m.last_applied("k"), Some(3));
    }

    #[tokio::test]
    async fn test_highest_version_wins_any_interleaving() {
        let m = manager(Duration::from_secs(60));
        m.publish_event(CacheEvent::set("k", "new".to_string(), None, 5)).await;
        m.publish_event(CacheEvent::set("k", "old".to_string(), None, 2)).await;

        assert_eq!(m.local().get("k").await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_delete_event_is_version_gated() {
        let m = manager(Duration::from_secs(60));
        m.publish_event(CacheEvent::set("k", "v".to_string(), None, 2)).await;
        // stale delete must not remove the newer value
        m.publish_event(CacheEvent::delete("k", 1)).await;
        assert_eq!(m.local().get("k").await.as_deref(), Some("v"));

        m.publish_event(CacheEvent::delete("k", 3)).await;
        assert!(m.local().get("k").await.is_none());
        assert!(!m.remote().exists("k").await);
    }

    #[tokio::test]
    async fn test_clear_resets_version_table() {
        let m = manager(Duration::from_secs(60));
        m.publish_event(CacheEvent::set("k", "v".to_string(), None, 9)).await;
        m.publish_event(CacheEvent::clear()).await;

        assert!(m.last_applied("k").is_none());
        assert!(m.local().is_empty());

        // after the epoch reset, version 1 is acceptable again
        m.publish_event(CacheEvent::set("k", "fresh".to_string(), None, 1)).await;
        assert_eq!(m.local().get("k").await.as_deref(), Some("fresh"));
    }

    struct Observer {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler<String> for Observer {
        async fn handle(&self, _event: &CacheEvent<String>) -> Result<(), CacheError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_event_republished_once_on_bus() {
        let m = manager(Duration::from_secs(60));
        let observer = Arc::new(Observer { seen: AtomicUsize::new(0) });
        m.bus().subscribe(EventType::Set, observer.clone());

        m.publish_event(CacheEvent::set("k", "v".to_string(), None, 1)).await;
        // stale events are still observable on the bus
        m.publish_event(CacheEvent::set("k", "v0".to_string(), None, 1)).await;

        assert_eq!(observer.seen.load(Ordering::SeqCst), 2);
        assert_eq!(m.local().get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_reconcile_copies_remote_into_local() {
        let m = manager(Duration::from_secs(60));
        // remote written out-of-band (another process)
        m.remote().set("orphan", "remote-value".to_string(), Some(Duration::from_secs(300))).await;

        let synced = m.reconcile_once().await.unwrap();
        assert_eq!(synced, 1);
        assert_eq!(m.local().get("orphan").await.as_deref(), Some("remote-value"));
        // TTL travels with the value
        assert!(m.local().ttl("orphan").await.is_some());
    }

    #[tokio::test]
    async fn test_reconcile_bypasses_version_table() {
        // documented, accepted behavior: the pass can overwrite a newer
        // local-only value with the remote one
        let m = manager(Duration::from_secs(60));
        m.remote().set("k", "remote-old".to_string(), None).await;
        m.local().set("k", "local-new".to_string(), None).await;

        m.reconcile_once().await.unwrap();
        assert_eq!(m.local().get("k").await.as_deref(), Some("remote-old"));
    }

    #[tokio::test]
    async fn test_background_loop_converges() {
        let m = manager(Duration::from_millis(20));
        m.start().await;
        m.start().await; // idempotent
        assert!(m.is_running().await);

        m.remote().set("k", "v".to_string(), None).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(m.local().get("k").await.as_deref(), Some("v"));

        m.stop().await;
        assert!(!m.is_running().await);
        m.stop().await; // no-op
    }

    #[tokio::test]
    async fn test_zero_version_wire_event_is_stale() {
        // the constructors never emit version 0, but the wire can
        let m = manager(Duration::from_secs(60));
        let wire = r#"{"eventType":"set","key":"k","value":"v","ttl":null,"version":0,"timestamp":0.0}"#;
        let event: CacheEvent<String> = serde_json::from_str(wire).unwrap();
        m.publish_event(event).await;

        assert!(m.last_applied("k").is_none());
        assert!(m.local().get("k").await.is_none());
        assert!(!m.remote().exists("k").await);

        // a real first version still gets through afterwards
        m.publish_event(CacheEvent::set("k", "v1".to_string(), None, 1)).await;
        assert_eq!(m.local().get("k").await.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_version_table_grows_per_key() {
        let m = manager(Duration::from_secs(60));
        m.publish_event(CacheEvent::set("a", "1".to_string(), None, 1)).await;
        m.publish_event(CacheEvent::set("b", "2".to_string(), None, 7)).await;
        m.publish_event(CacheEvent::delete("a", 2)).await;

        assert_eq!(m.last_applied("a"), Some(2));
        assert_eq!(m.last_applied("b"), Some(7));
        // deletion does not prune the table; only Clear does
        assert!(m.last_applied("a").is_some());
    }
}
