//! Lifecycle events emitted by the orchestrator (spec §6 "Event payloads").
//!
//! The crate only emits; delivery (SSE/WebSocket/webhook) is an
//! external collaborator's job (spec §1 non-goals).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Mutex;

/// Event type discriminant (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MemoryCreated,
    MemoryUpdated,
    MemoryDeleted,
    MemoryAccessed,
    MemoryRestored,
    GraphBuilt,
    PatternsUpdated,
    CompressionRan,
    ProfileSwitched,
}

/// A single emitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub profile: String,
    pub agent_id: Option<String>,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, profile: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            profile: profile.into(),
            agent_id: None,
            payload,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// Broadcast channel for lifecycle events.
///
/// Multiple subscribers each get their own `Receiver` fed from the same
/// publish call; `publish` clones the event once per subscriber. A
/// subscriber that never drains its receiver simply accumulates events
/// in its own channel buffer without blocking the publisher (unbounded
/// `mpsc`, matching "the core never imposes its own... timeouts").
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Publish an event to all current subscribers, dropping any whose
    /// receiver has been closed.
    pub fn publish(&self, event: Event) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        bus.publish(Event::new(EventType::MemoryCreated, "default", serde_json::json!({"id": 1})));
        let event = rx.recv().unwrap();
        assert_eq!(event.event_type, EventType::MemoryCreated);
        assert_eq!(event.profile, "default");
    }

    #[test]
    fn dropped_subscriber_is_pruned_on_next_publish() {
        let bus = EventBus::new();
        {
            let _rx = bus.subscribe();
        }
        bus.publish(Event::new(EventType::GraphBuilt, "default", serde_json::json!({})));
        assert_eq!(bus.subscribers.lock().unwrap().len(), 0);
    }

    #[test]
    fn multiple_subscribers_each_get_a_copy() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        bus.publish(Event::new(EventType::PatternsUpdated, "work", serde_json::json!({})));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
