//! Topic-based event bus
//!
//! Topics are `/`-separated paths such as `orders/created`. A subscription
//! pattern is either an exact topic, a `prefix/*` wildcard matching every
//! topic below `prefix`, or `*` matching everything.

use super::{EventBus, OwnerScoped};
use crate::boundary::{materialize_locally, Materialize, Value};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub type SubscriptionId = u64;

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub topic: String,
    pub payload: Value,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

impl Materialize for Event {
    fn materialize(&self) -> Self {
        Self {
            id: self.id,
            topic: materialize_locally(&self.topic),
            payload: materialize_locally(&self.payload),
            sender: materialize_locally(&self.sender),
            timestamp: self.timestamp,
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    owner: String,
    handler: EventHandler,
}

fn matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix("/*") {
        Some(prefix) => topic
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/')),
        None => pattern == topic,
    }
}

pub struct EventBusService {
    next_id: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBusService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }
}

impl Default for EventBusService {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for EventBusService {
    fn subscribe(&self, pattern: &str, owner: &str, handler: EventHandler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("EventBus: {} subscribed to {} ({})", owner, pattern, id);
        self.subscriptions.write().push(Subscription {
            id,
            pattern: materialize_locally(&pattern.to_string()),
            owner: materialize_locally(&owner.to_string()),
            handler,
        });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    fn unsubscribe_owner(&self, owner: &str) -> usize {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.owner != owner);
        before - subscriptions.len()
    }

    fn publish(&self, topic: &str, payload: &Value, sender: &str) -> usize {
        let event = Event {
            id: Uuid::new_v4(),
            topic: materialize_locally(&topic.to_string()),
            payload: materialize_locally(payload),
            sender: materialize_locally(&sender.to_string()),
            timestamp: Utc::now(),
        };

        let handlers: Vec<(String, EventHandler)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| matches(&s.pattern, &event.topic))
            .map(|s| (s.owner.clone(), Arc::clone(&s.handler)))
            .collect();

        let mut delivered = 0;
        for (owner, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!("EventBus: handler of {} panicked on {}", owner, event.topic),
            }
        }
        debug!("EventBus: {} delivered to {} handler(s)", event.topic, delivered);
        delivered
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions
            .read()
            .iter()
            .filter(|s| matches(&s.pattern, topic))
            .count()
    }
}

impl OwnerScoped for EventBusService {
    fn release_owner(&self, owner: &str) -> usize {
        self.unsubscribe_owner(owner)
    }
}
