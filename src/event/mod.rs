//! Mutation events.
//!
//! A [`CacheEvent`] is the immutable record of one cache mutation. Events
//! carry the version used for conflict resolution and serialize to a flat
//! record, so they can be logged or shipped across a process boundary:
//!
//! ```json
//! { "eventType": "set", "key": "page:42", "value": {"html": "..."},
//!   "ttl": 300, "version": 7, "timestamp": 1767084657.058 }
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub mod bus;

pub use bus::{EventBus, EventHandler, SubscriptionId};

/// The three mutations a cache can undergo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Set,
    Delete,
    Clear,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Set => "set",
            EventType::Delete => "delete",
            EventType::Clear => "clear",
        }
    }
}

/// Immutable record of one mutation. `value` is present only for Set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEvent<V> {
    pub event_type: EventType,
    pub key: String,
    pub value: Option<V>,
    /// TTL in whole seconds, if the mutation carried one
    pub ttl: Option<u64>,
    /// Per-key monotonically increasing version; the conflict-resolution key
    pub version: u64,
    /// Wall-clock seconds since the epoch, informational only: conflict
    /// resolution is by version, never by timestamp
    pub timestamp: f64,
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl<V> CacheEvent<V> {
    pub fn set(key: impl Into<String>, value: V, ttl: Option<Duration>, version: u64) -> Self {
        Self {
            event_type: EventType::Set,
            key: key.into(),
            value: Some(value),
            ttl: ttl.map(|t| t.as_secs()),
            version,
            timestamp: now_epoch(),
        }
    }

    pub fn delete(key: impl Into<String>, version: u64) -> Self {
        Self {
            event_type: EventType::Delete,
            key: key.into(),
            value: None,
            ttl: None,
            version,
            timestamp: now_epoch(),
        }
    }

    /// A Clear affects the whole key space; it carries no key or version.
    pub fn clear() -> Self {
        Self {
            event_type: EventType::Clear,
            key: String::new(),
            value: None,
            ttl: None,
            version: 0,
            timestamp: now_epoch(),
        }
    }

    pub fn ttl_duration(&self) -> Option<Duration> {
        self.ttl.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let event = CacheEvent::set("page:1", json!({"title": "t"}), Some(Duration::from_secs(300)), 7);
        let wire = serde_json::to_value(&event).unwrap();

        assert_eq!(wire["eventType"], "set");
        assert_eq!(wire["key"], "page:1");
        assert_eq!(wire["value"]["title"], "t");
        assert_eq!(wire["ttl"], 300);
        assert_eq!(wire["version"], 7);
        assert!(wire["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_delete_has_no_value() {
        let event: CacheEvent<String> = CacheEvent::delete("page:1", 3);
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["eventType"], "delete");
        assert!(wire["value"].is_null());
        assert!(wire["ttl"].is_null());
    }

    #[test]
    fn test_round_trip() {
        let event = CacheEvent::set("k", "v".to_string(), None, 2);
        let json = serde_json::to_string(&event).unwrap();
        let back: CacheEvent<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, EventType::Set);
        assert_eq!(back.key, "k");
        assert_eq!(back.value.as_deref(), Some("v"));
        assert_eq!(back.version, 2);
    }

    #[test]
    fn test_clear_constructor() {
        let event: CacheEvent<u32> = CacheEvent::clear();
        assert_eq!(event.event_type, EventType::Clear);
        assert!(event.key.is_empty());
        assert_eq!(event.version, 0);
    }

    #[test]
    fn test_ttl_duration() {
        let event = CacheEvent::set("k", 1u32, Some(Duration::from_secs(60)), 1);
        assert_eq!(event.ttl_duration(), Some(Duration::from_secs(60)));
    }
}
