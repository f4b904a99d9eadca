//! Event Bus Adapter (§4.3).
//!
//! In scope: publishing gateway-originated events and fanning them out to
//! subscribers (SSE connections, internal listeners). Out of scope: the
//! actual external broker — per spec.md this crate only needs an adapter
//! boundary, so the default implementation is an in-process
//! `tokio::sync::broadcast` channel, with a trait seam for swapping in a
//! real broker client later without touching callers.
//!
//! Structurally grounded on `chat_history_memory::InMemoryChatHistory`'s
//! `Arc<RwLock<_>>`-guarded shared-state shape, adapted to a broadcast
//! channel instead of a map because fanout (not point lookup) is the
//! primary operation here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("event bus is disabled by configuration")]
    Disabled,
    #[error("event channel closed")]
    Closed,
}

/// A gateway-originated event. `topic` scopes subscription (e.g. a
/// conversation id); `payload` is opaque to the bus itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub kind: String,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(topic: impl Into<String>, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            kind: kind.into(),
            payload,
        }
    }
}

/// Guards a subscription's lifetime: dropping it releases the receiver's
/// slot against the broadcast channel's buffer immediately rather than
/// waiting for the SSE connection task to unwind, satisfying the
/// "guaranteed-release scope" §4.3 requires for an abandoned subscriber.
pub struct SubscriptionHandle {
    receiver: Option<broadcast::Receiver<Event>>,
}

impl SubscriptionHandle {
    fn new(receiver: broadcast::Receiver<Event>) -> Self {
        Self {
            receiver: Some(receiver),
        }
    }

    pub fn receiver_mut(&mut self) -> &mut broadcast::Receiver<Event> {
        self.receiver.as_mut().expect("receiver taken after drop")
    }

    pub fn into_receiver(mut self) -> broadcast::Receiver<Event> {
        self.receiver.take().expect("receiver taken twice")
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        // Dropping `self.receiver` is itself sufficient to unsubscribe
        // (tokio::sync::broadcast releases the slot on receiver drop); the
        // explicit `drop` call documents that release point.
        drop(self.receiver.take());
    }
}

/// Adapter seam: swap this for a real broker client (Kafka, NATS, redis
/// streams, ...) without touching publishers or subscribers.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> Result<(), EventBusError>;
    fn subscribe(&self) -> Result<SubscriptionHandle, EventBusError>;
}

/// Default in-process adapter. Every publish is broadcast to every current
/// subscriber; a lagging subscriber skips ahead (per `broadcast` semantics)
/// rather than blocking publishers — acceptable because SSE consumers are
/// expected to re-request missed state rather than rely on exactly-once
/// delivery (§4.3 Non-goals).
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity);
        Arc::new(Self { sender })
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: Event) -> Result<(), EventBusError> {
        // No receivers is not an error: a publish with nobody listening is
        // the common case between a conversation's turns.
        let _ = self.sender.send(event);
        Ok(())
    }

    fn subscribe(&self) -> Result<SubscriptionHandle, EventBusError> {
        Ok(SubscriptionHandle::new(self.sender.subscribe()))
    }
}

/// No-op adapter used when `EVENTBUS_ENDPOINT=disabled` (§6 default):
/// publishes are dropped and subscriptions fail fast rather than silently
/// hanging forever.
pub struct DisabledEventBus;

#[async_trait]
impl EventBus for DisabledEventBus {
    async fn publish(&self, _event: Event) -> Result<(), EventBusError> {
        Err(EventBusError::Disabled)
    }

    fn subscribe(&self) -> Result<SubscriptionHandle, EventBusError> {
        Err(EventBusError::Disabled)
    }
}

pub fn build_event_bus(disabled: bool) -> Arc<dyn EventBus> {
    if disabled {
        Arc::new(DisabledEventBus)
    } else {
        BroadcastEventBus::new(1024)
    }
}
