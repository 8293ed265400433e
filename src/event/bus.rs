// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory publish/subscribe dispatcher keyed by event type.
//!
//! This is not a durable queue: subscribers see events published after they
//! subscribe, dispatch is sequential per publish, and there is no ordering
//! guarantee across event types. A handler that fails is logged and skipped;
//! it never stops the remaining handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{CacheEvent, EventType};
use crate::cache::CacheError;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A subscriber callback. Failures are isolated per handler.
#[async_trait]
pub trait EventHandler<V>: Send + Sync {
    async fn handle(&self, event: &CacheEvent<V>) -> Result<(), CacheError>;
}

type HandlerList<V> = Vec<(SubscriptionId, Arc<dyn EventHandler<V>>)>;

pub struct EventBus<V> {
    name: String,
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<EventType, HandlerList<V>>>,
}

impl<V: Send + Sync + 'static> EventBus<V> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` for one event type.
    pub fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler<V>>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .entry(event_type)
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a subscription. Unknown ids are ignored, so calling this
    /// twice is harmless.
    pub fn unsubscribe(&self, event_type: EventType, id: SubscriptionId) {
        if let Some(handlers) = self.subscribers.write().get_mut(&event_type) {
            handlers.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.subscribers
            .read()
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Dispatch `event` sequentially to every handler registered for its
    /// type. A handler error is logged and does not stop the rest.
    pub async fn publish(&self, event: &CacheEvent<V>) {
        // clone the handler list so dispatch never holds the lock
        let handlers: HandlerList<V> = match self.subscribers.read().get(&event.event_type) {
            Some(handlers) => handlers.clone(),
            None => return,
        };

        debug!(
            bus = %self.name,
            event_type = event.event_type.as_str(),
            key = %event.key,
            subscribers = handlers.len(),
            "publishing event"
        );

        for (id, handler) in handlers {
            if let Err(e) = handler.handle(event).await {
                warn!(
                    bus = %self.name,
                    event_type = event.event_type.as_str(),
                    key = %event.key,
                    subscription = ?id,
                    error = %e,
                    "event handler failed"
                );
            }
        }
    }
}
