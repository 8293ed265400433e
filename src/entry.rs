//! Cache entry data structure.
//!
//! A [`CacheEntry`] is the unit held by the local tier: the value plus the
//! bookkeeping needed for TTL expiry, LRU recency and version tracking.

use std::time::{Duration, Instant};

/// A single cached value with its expiry and access bookkeeping.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tiered_cache::CacheEntry;
///
/// let mut entry = CacheEntry::new("user:42".into(), "alice", None);
/// assert_eq!(entry.version, 1);
/// assert_eq!(entry.hits, 0);
/// assert!(!entry.expired());
///
/// entry.access();
/// assert_eq!(entry.hits, 1);
///
/// entry.update("bob", Some(Duration::from_secs(30)));
/// assert_eq!(entry.version, 2);
/// ```
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Logical cache key (unprefixed)
    pub key: String,
    /// The cached value
    pub value: V,
    /// When the value was written (reset on update)
    pub created_at: Instant,
    /// When the value was last read
    pub accessed_at: Instant,
    /// Time-to-live; `None` means the entry never expires
    pub ttl: Option<Duration>,
    /// Version number, starts at 1 and increments on in-place update
    pub version: u64,
    /// Number of hits served by this entry
    pub hits: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(key: String, value: V, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            created_at: now,
            accessed_at: now,
            ttl,
            version: 1,
            hits: 0,
        }
    }

    /// An entry is expired iff it has a TTL and that TTL has elapsed
    /// since the last write.
    pub fn expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.created_at.elapsed() > ttl,
            None => false,
        }
    }

    /// Mark the entry as read: refresh the access timestamp and hit count.
    pub fn access(&mut self) {
        self.accessed_at = Instant::now();
        self.hits += 1;
    }

    /// Replace the value in place, bumping the version and restarting
    /// the TTL clock.
    pub fn update(&mut self, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        self.value = value;
        self.ttl = ttl;
        self.version += 1;
        self.created_at = now;
        self.accessed_at = now;
    }

    /// Remaining lifetime, or `None` if the entry has no TTL.
    /// Returns `Duration::ZERO` once expired.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.ttl
            .map(|ttl| ttl.saturating_sub(self.created_at.elapsed()))
    }
}
