// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis-backed shared tier.
//!
//! Every key is namespaced with the cache's prefix before touching the
//! store, so multiple logical caches share one physical Redis safely.
//! Serialization happens here and only here: values cross the wire as JSON,
//! and a value that fails to decode is treated as a miss, never as a fatal
//! error.
//!
//! All network round-trips are wrapped in [`retry`] with the per-operation
//! policy; a call that still fails afterwards is logged, counted and
//! absorbed (miss on read, no-op on write). Workers keep running in
//! local-only degraded mode when Redis is unreachable.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, AsyncCommands, Client};
use tracing::{debug, info, warn};

use super::{Cache, CacheError, CacheMetrics, CacheValue, RemoteTier};
use crate::config::CacheConfig;
use crate::metrics;
use crate::resilience::{retry, RetryPolicy};

/// Namespaced Redis tier with pluggable-at-the-edge serialization.
pub struct RemoteCache<V> {
    name: String,
    connection: ConnectionManager,
    prefix: String,
    default_ttl: Option<Duration>,
    scan_batch: usize,
    lock_ttl: Duration,
    lock_retry_times: usize,
    lock_retry_delay: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    _value: PhantomData<fn() -> V>,
}

impl<V: CacheValue> RemoteCache<V> {
    /// Connect to Redis and build a namespaced cache over it.
    ///
    /// Connection setup is the one place failures surface to the caller:
    /// a bad URL or unreachable server fails fast with the connect policy.
    pub async fn connect(
        name: impl Into<String>,
        url: &str,
        config: &CacheConfig,
    ) -> Result<Self, CacheError> {
        let name = name.into();
        let client = Client::open(url)?;
        let connection = retry("redis_connect", &RetryPolicy::connect(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await?;

        info!(cache = %name, prefix = %config.remote_prefix, "remote cache connected");
        Ok(Self {
            name,
            connection,
            prefix: config.remote_prefix.clone(),
            default_ttl: config.default_ttl_secs.map(Duration::from_secs),
            scan_batch: config.scan_batch_size,
            lock_ttl: Duration::from_secs(config.lock_ttl_secs),
            lock_retry_times: config.lock_retry_times,
            lock_retry_delay: Duration::from_millis(config.lock_retry_delay_ms),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            _value: PhantomData,
        })
    }

    #[inline]
    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    #[inline]
    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.prefix).unwrap_or(key)
    }

    fn encode(&self, value: &V) -> Result<String, CacheError> {
        Ok(serde_json::to_string(value)?)
    }

    /// Decode a stored payload; a malformed value is logged and turned into
    /// a miss rather than an error.
    fn decode(&self, key: &str, raw: &str) -> Option<V> {
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(cache = %self.name, key = %key, error = %e, "stored value failed to decode, treating as miss");
                metrics::record_store_error("remote", "decode");
                None
            }
        }
    }

    async fn try_get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let conn = self.connection.clone();
        let full_key = self.prefixed(key);
        let raw: Option<String> = retry("redis_get", &RetryPolicy::op(), || {
            let mut conn = conn.clone();
            let key = full_key.clone();
            async move {
                let data: Option<String> = conn.get(&key).await?;
                Ok::<_, redis::RedisError>(data)
            }
        })
        .await?;
        Ok(raw)
    }

    async fn try_set(&self, key: &str, payload: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let conn = self.connection.clone();
        let full_key = self.prefixed(key);
        let ttl = ttl.or(self.default_ttl);
        retry("redis_set", &RetryPolicy::op(), || {
            let mut conn = conn.clone();
            let key = full_key.clone();
            let payload = payload.clone();
            async move {
                match ttl {
                    // PSETEX keeps sub-second TTLs; 0 is rejected by the server
                    Some(ttl) => {
                        let _: () = conn
                            .pset_ex(&key, &payload, (ttl.as_millis() as u64).max(1))
                            .await?;
                    }
                    None => {
                        let _: () = conn.set(&key, &payload).await?;
                    }
                }
                Ok::<_, redis::RedisError>(())
            }
        })
        .await?;
        Ok(())
    }

    /// One SCAN page over this cache's namespace.
    async fn scan_page(&self, cursor: u64) -> Result<(u64, Vec<String>), CacheError> {
        let conn = self.connection.clone();
        let pattern = format!("{}*", self.prefix);
        let batch = self.scan_batch;
        let (next, keys): (u64, Vec<String>) = retry("redis_scan", &RetryPolicy::op(), || {
            let mut conn = conn.clone();
            let pattern = pattern.clone();
            async move {
                let page: (u64, Vec<String>) = cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(batch)
                    .query_async(&mut conn)
                    .await?;
                Ok::<_, redis::RedisError>(page)
            }
        })
        .await?;
        Ok((next, keys))
    }

    /// Cursor-scan the namespace and delete in bounded batches, so a large
    /// clear never turns into one long blocking command.
    async fn try_clear(&self) -> Result<u64, CacheError> {
        let mut cursor = 0u64;
        let mut deleted = 0u64;
        loop {
            let (next, keys) = self.scan_page(cursor).await?;
            if !keys.is_empty() {
                let mut conn = self.connection.clone();
                let mut pipeline = pipe();
                for key in &keys {
                    pipeline.del(key);
                }
                pipeline.query_async::<()>(&mut conn).await?;
                deleted += keys.len() as u64;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(deleted)
    }

    /// Count keys under the prefix by scanning. Accurate but expensive;
    /// only invoked on demand from `metrics()`.
    async fn try_key_count(&self) -> Result<u64, CacheError> {
        let mut cursor = 0u64;
        let mut count = 0u64;
        loop {
            let (next, keys) = self.scan_page(cursor).await?;
            count += keys.len() as u64;
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(count)
    }

    /// Atomically add `amount` to the counter under `key`.
    pub async fn incr(&self, key: &str, amount: i64) -> Option<i64> {
        let mut conn = self.connection.clone();
        let full_key = self.prefixed(key);
        match conn.incr::<_, _, i64>(&full_key, amount).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(cache = %self.name, key = %key, error = %e, "incr failed");
                metrics::record_store_error("remote", "incr");
                None
            }
        }
    }

    /// Atomically subtract `amount` from the counter under `key`.
    pub async fn decr(&self, key: &str, amount: i64) -> Option<i64> {
        let mut conn = self.connection.clone();
        let full_key = self.prefixed(key);
        match conn.decr::<_, _, i64>(&full_key, amount).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(cache = %self.name, key = %key, error = %e, "decr failed");
                metrics::record_store_error("remote", "decr");
                None
            }
        }
    }

    /// Acquire the lease-based lock under `key` with the configured TTL and
    /// retry schedule.
    pub async fn acquire_lock(&self, key: &str) -> RemoteLock {
        self.acquire_lock_with(key, self.lock_ttl, self.lock_retry_times, self.lock_retry_delay)
            .await
    }

    /// Lease-based mutual exclusion: create-if-absent with an expiry,
    /// retried with a fixed delay. A guard with `locked() == false` means
    /// the caller must proceed without exclusivity; acquisition never
    /// blocks indefinitely.
    ///
    /// This is best-effort, not linearizable: there is no fencing token,
    /// and a holder that outlives its lease can still believe it holds the
    /// lock.
    pub async fn acquire_lock_with(
        &self,
        key: &str,
        ttl: Duration,
        retry_times: usize,
        retry_delay: Duration,
    ) -> RemoteLock {
        let lock_key = format!("{}lock:{}", self.prefix, key);
        let mut locked = false;

        for attempt in 0..retry_times.max(1) {
            let mut conn = self.connection.clone();
            let acquired: Result<Option<String>, redis::RedisError> = cmd("SET")
                .arg(&lock_key)
                .arg("1")
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async(&mut conn)
                .await;

            match acquired {
                Ok(Some(_)) => {
                    locked = true;
                    break;
                }
                Ok(None) => {
                    debug!(cache = %self.name, key = %key, attempt, "lock held elsewhere");
                }
                Err(e) => {
                    warn!(cache = %self.name, key = %key, error = %e, "lock attempt failed");
                    metrics::record_store_error("remote", "lock");
                }
            }
            if attempt + 1 < retry_times {
                tokio::time::sleep(retry_delay).await;
            }
        }

        metrics::record_lock(if locked { "acquired" } else { "timeout" });
        RemoteLock {
            lock_key,
            locked,
            released: false,
            connection: self.connection.clone(),
        }
    }
}

#[async_trait]
impl<V: CacheValue> Cache<V> for RemoteCache<V> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Option<V> {
        let _timer = metrics::LatencyTimer::new("remote", "get");
        let raw = match self.try_get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(cache = %self.name, key = %key, error = %e, "remote get failed, degrading to miss");
                metrics::record_store_error("remote", "get");
                None
            }
        };
        let value = raw.and_then(|raw| self.decode(key, &raw));
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_operation("remote", "get", "hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::record_operation("remote", "get", "miss");
        }
        value
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let _timer = metrics::LatencyTimer::new("remote", "set");
        let payload = match self.encode(&value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(cache = %self.name, key = %key, error = %e, "value failed to encode, dropping write");
                metrics::record_store_error("remote", "encode");
                return;
            }
        };
        if let Err(e) = self.try_set(key, payload, ttl).await {
            warn!(cache = %self.name, key = %key, error = %e, "remote set failed, dropping write");
            metrics::record_store_error("remote", "set");
        } else {
            metrics::record_operation("remote", "set", "success");
        }
    }

    async fn delete(&self, key: &str) -> bool {
        let conn = self.connection.clone();
        let full_key = self.prefixed(key);
        let result = retry("redis_delete", &RetryPolicy::op(), || {
            let mut conn = conn.clone();
            let key = full_key.clone();
            async move {
                let removed: u64 = conn.del(&key).await?;
                Ok::<_, redis::RedisError>(removed)
            }
        })
        .await;

        match result {
            Ok(removed) => removed > 0,
            Err(e) => {
                warn!(cache = %self.name, key = %key, error = %e, "remote delete failed");
                metrics::record_store_error("remote", "delete");
                false
            }
        }
    }

    async fn exists(&self, key: &str) -> bool {
        let conn = self.connection.clone();
        let full_key = self.prefixed(key);
        let result = retry("redis_exists", &RetryPolicy::op(), || {
            let mut conn = conn.clone();
            let key = full_key.clone();
            async move {
                let exists: bool = conn.exists(&key).await?;
                Ok::<_, redis::RedisError>(exists)
            }
        })
        .await;

        match result {
            Ok(exists) => exists,
            Err(e) => {
                warn!(cache = %self.name, key = %key, error = %e, "remote exists failed");
                metrics::record_store_error("remote", "exists");
                false
            }
        }
    }

    async fn clear(&self) {
        match self.try_clear().await {
            Ok(deleted) => {
                info!(cache = %self.name, deleted, "remote cache cleared");
                metrics::record_operation("remote", "clear", "success");
            }
            Err(e) => {
                warn!(cache = %self.name, error = %e, "remote clear failed");
                metrics::record_store_error("remote", "clear");
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> bool {
        let mut conn = self.connection.clone();
        let full_key = self.prefixed(key);
        let result: Result<bool, redis::RedisError> = cmd("EXPIRE")
            .arg(&full_key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await;
        match result {
            Ok(updated) => updated,
            Err(e) => {
                warn!(cache = %self.name, key = %key, error = %e, "remote expire failed");
                metrics::record_store_error("remote", "expire");
                false
            }
        }
    }

    async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut conn = self.connection.clone();
        let full_key = self.prefixed(key);
        let result: Result<i64, redis::RedisError> =
            cmd("PTTL").arg(&full_key).query_async(&mut conn).await;
        match result {
            // -1 = no expiry, -2 = missing key
            Ok(millis) if millis > 0 => Some(Duration::from_millis(millis as u64)),
            Ok(_) => None,
            Err(e) => {
                warn!(cache = %self.name, key = %key, error = %e, "remote ttl failed");
                metrics::record_store_error("remote", "ttl");
                None
            }
        }
    }

    async fn metrics(&self) -> CacheMetrics {
        let current_size = match self.try_key_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(cache = %self.name, error = %e, "remote key count failed");
                metrics::record_store_error("remote", "scan");
                0
            }
        };
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: 0,
            current_size,
            max_size: 0,
            hit_rate: 0.0,
        }
        .with_hit_rate()
    }

    async fn multi_get(&self, keys: &[String]) -> HashMap<String, V> {
        if keys.is_empty() {
            return HashMap::new();
        }
        let _timer = metrics::LatencyTimer::new("remote", "multi_get");
        let conn = self.connection.clone();
        let full_keys: Vec<String> = keys.iter().map(|k| self.prefixed(k)).collect();

        let result = retry("redis_mget", &RetryPolicy::op(), || {
            let mut conn = conn.clone();
            let full_keys = full_keys.clone();
            async move {
                let values: Vec<Option<String>> = cmd("MGET")
                    .arg(&full_keys)
                    .query_async(&mut conn)
                    .await?;
                Ok::<_, redis::RedisError>(values)
            }
        })
        .await;

        let values = match result {
            Ok(values) => values,
            Err(e) => {
                warn!(cache = %self.name, error = %e, "remote multi_get failed, degrading to empty");
                metrics::record_store_error("remote", "multi_get");
                self.misses.fetch_add(keys.len() as u64, Ordering::Relaxed);
                return HashMap::new();
            }
        };

        let mut results = HashMap::new();
        for (key, raw) in keys.iter().zip(values) {
            match raw.and_then(|raw| self.decode(key, &raw)) {
                Some(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    results.insert(key.clone(), value);
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        results
    }

    async fn multi_set(&self, entries: HashMap<String, V>, ttl: Option<Duration>) {
        if entries.is_empty() {
            return;
        }
        let _timer = metrics::LatencyTimer::new("remote", "multi_set");

        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in &entries {
            match self.encode(value) {
                Ok(payload) => encoded.push((self.prefixed(key), payload)),
                Err(e) => {
                    warn!(cache = %self.name, key = %key, error = %e, "value failed to encode, skipping");
                    metrics::record_store_error("remote", "encode");
                }
            }
        }
        if encoded.is_empty() {
            return;
        }

        let ttl = ttl.or(self.default_ttl);
        let conn = self.connection.clone();
        let result = retry("redis_multi_set", &RetryPolicy::op(), || {
            let mut conn = conn.clone();
            let encoded = encoded.clone();
            async move {
                match ttl {
                    // no expiry anywhere: one multi-key write
                    None => {
                        let mut command = cmd("MSET");
                        for (key, payload) in &encoded {
                            command.arg(key).arg(payload);
                        }
                        command.query_async::<()>(&mut conn).await?;
                    }
                    // per-key expiry: atomic pipeline of PSETEX, millisecond
                    // precision so sub-second TTLs survive the wire
                    Some(ttl) => {
                        let mut pipeline = pipe();
                        pipeline.atomic();
                        for (key, payload) in &encoded {
                            pipeline.pset_ex(key, payload, (ttl.as_millis() as u64).max(1));
                        }
                        pipeline.query_async::<()>(&mut conn).await?;
                    }
                }
                Ok::<_, redis::RedisError>(())
            }
        })
        .await;

        if let Err(e) = result {
            warn!(cache = %self.name, error = %e, "remote multi_set failed, dropping batch");
            metrics::record_store_error("remote", "multi_set");
        } else {
            metrics::record_operation("remote", "multi_set", "success");
        }
    }
}

#[async_trait]
impl<V: CacheValue> RemoteTier<V> for RemoteCache<V> {
    async fn scan_keys(&self, cursor: u64) -> Result<(u64, Vec<String>), CacheError> {
        let (next, keys) = self.scan_page(cursor).await?;
        let logical = keys
            .iter()
            .map(|k| self.strip_prefix(k).to_string())
            // lock markers live under the same prefix but are not entries
            .filter(|k| !k.starts_with("lock:"))
            .collect();
        Ok((next, logical))
    }
}

/// Scoped handle for the lease-based lock.
///
/// `locked()` tells the caller whether exclusivity was obtained; release is
/// guaranteed on scope exit if it was. Only the acquirer ever deletes the
/// marker key.
#[must_use = "the lock is held until the guard is released or dropped"]
pub struct RemoteLock {
    lock_key: String,
    locked: bool,
    released: bool,
    connection: ConnectionManager,
}

impl RemoteLock {
    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Release the lease. Preferred over relying on drop: the deletion is
    /// awaited, so the lock is free when this returns.
    pub async fn release(mut self) {
        if self.locked && !self.released {
            self.released = true;
            let mut conn = self.connection.clone();
            if let Err(e) = conn.del::<_, u64>(&self.lock_key).await {
                warn!(key = %self.lock_key, error = %e, "lock release failed; lease will expire on its own");
            }
        }
    }
}

impl Drop for RemoteLock {
    fn drop(&mut self) {
        if self.locked && !self.released {
            // best effort: the lease TTL is the real safety net
            let mut conn = self.connection.clone();
            let key = std::mem::take(&mut self.lock_key);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = conn.del::<_, u64>(&key).await;
                });
            }
        }
    }
}
