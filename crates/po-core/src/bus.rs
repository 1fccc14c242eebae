// Message Bus (spec §4.8)
//
// In-process publish/subscribe of traffic and state-change events. `publish`
// stays synchronous and fast (spec §9); persistence to the thread store's
// `events` table, when a store is attached, is handed off so a slow writer
// never stalls a publisher.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::human::HumanRequest;

/// Default summary cap (spec §9 open question, resolved in DESIGN.md).
pub const SUMMARY_CAP: usize = 120;

/// Bounded in-memory ring of the most recent bus events.
const RING_CAPACITY: usize = 1000;

/// An observable traffic record (spec §3 "Bus event").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub content: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoStatus {
    Thinking,
    Idle,
    CallingTool,
}

/// Flatten newlines and cap length; the storage layer always keeps the
/// untruncated `content` (spec §9: "store full, display truncated").
pub fn truncate_summary(content: &str, cap: usize) -> String {
    let flattened: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= cap {
        return flattened;
    }
    let truncated: String = flattened.chars().take(cap.saturating_sub(3)).collect();
    format!("{truncated}...")
}

/// Persistence hook the bus hands events off to. Implemented by the thread
/// store crate; kept as a trait here so `po-core` has no storage dependency.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record_event(&self, event: BusEvent);
}

/// Narrow subscriber interface (spec §4.8). Every method defaults to a
/// no-op so a subscriber only implements what it cares about. Callbacks
/// MUST be non-blocking — offload real work (e.g. a WebSocket write) onto
/// the subscriber's own queue.
pub trait Subscriber: Send + Sync {
    fn on_message(&self, _event: &BusEvent) {}
    fn on_po_state_change(&self, _po_name: &str, _status: PoStatus) {}
    fn on_stream_chunk(&self, _session_id: Uuid, _po_name: &str, _chunk: &str) {}
    fn on_stream_end(&self, _session_id: Uuid, _po_name: &str) {}
    fn on_notification(&self, _request: &HumanRequest) {}
    fn on_notification_resolved(&self, _request_id: Uuid) {}
    fn on_env_data_change(&self, _root_thread_id: Uuid, _key: &str) {}
}

pub struct MessageBus {
    ring: RwLock<VecDeque<BusEvent>>,
    subscribers: RwLock<HashMap<Uuid, Arc<dyn Subscriber>>>,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            ring: RwLock::new(VecDeque::with_capacity(RING_CAPACITY)),
            subscribers: RwLock::new(HashMap::new()),
            sink: RwLock::new(None),
        }
    }

    pub fn attach_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write().unwrap() = Some(sink);
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> Uuid {
        let id = Uuid::now_v7();
        self.subscribers.write().unwrap().insert(id, subscriber);
        id
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.write().unwrap().remove(&id);
    }

    /// Publish a traffic event: `P -> target` or `target -> P`. Delivered to
    /// subscribers in the order `publish` returns to its caller; persisted
    /// asynchronously if a sink is attached.
    pub fn publish(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
        session_id: Option<Uuid>,
    ) -> BusEvent {
        let content = content.into();
        let event = BusEvent {
            id: Uuid::now_v7(),
            from: from.into(),
            to: to.into(),
            summary: truncate_summary(&content, SUMMARY_CAP),
            content,
            timestamp: Utc::now(),
            session_id,
        };

        {
            let mut ring = self.ring.write().unwrap();
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }

        for sub in self.subscribers.read().unwrap().values() {
            sub.on_message(&event);
        }

        if let Some(sink) = self.sink.read().unwrap().clone() {
            let event = event.clone();
            tokio::spawn(async move { sink.record_event(event).await });
        }

        event
    }

    pub fn notify_po_state(&self, po_name: &str, status: PoStatus) {
        for sub in self.subscribers.read().unwrap().values() {
            sub.on_po_state_change(po_name, status);
        }
    }

    pub fn notify_stream_chunk(&self, session_id: Uuid, po_name: &str, chunk: &str) {
        for sub in self.subscribers.read().unwrap().values() {
            sub.on_stream_chunk(session_id, po_name, chunk);
        }
    }

    pub fn notify_stream_end(&self, session_id: Uuid, po_name: &str) {
        for sub in self.subscribers.read().unwrap().values() {
            sub.on_stream_end(session_id, po_name);
        }
    }

    pub fn notify_notification(&self, request: &HumanRequest) {
        for sub in self.subscribers.read().unwrap().values() {
            sub.on_notification(request);
        }
    }

    pub fn notify_notification_resolved(&self, request_id: Uuid) {
        for sub in self.subscribers.read().unwrap().values() {
            sub.on_notification_resolved(request_id);
        }
    }

    pub fn notify_env_data_change(&self, root_thread_id: Uuid, key: &str) {
        for sub in self.subscribers.read().unwrap().values() {
            sub.on_env_data_change(root_thread_id, key);
        }
    }

    /// Events published since `since`, newest last — backs connector catch-up
    /// (`get_events_since`, spec §4.9) for the in-memory ring; `po-storage`
    /// backs the durable version over the `events` table.
    pub fn events_since(&self, since: DateTime<Utc>) -> Vec<BusEvent> {
        self.ring
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.timestamp > since)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_has_no_newlines_and_respects_cap() {
        let content = "line one\nline two\nline three".repeat(10);
        let summary = truncate_summary(&content, SUMMARY_CAP);
        assert!(!summary.contains('\n'));
        assert!(summary.chars().count() <= SUMMARY_CAP);
    }

    #[test]
    fn short_content_is_not_truncated() {
        assert_eq!(truncate_summary("hello", SUMMARY_CAP), "hello");
    }

    struct Counter(std::sync::atomic::AtomicUsize);
    impl Subscriber for Counter {
        fn on_message(&self, _event: &BusEvent) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn publish_fans_out_to_subscribers() {
        let bus = MessageBus::new();
        let counter = Arc::new(Counter(std::sync::atomic::AtomicUsize::new(0)));
        let id = bus.subscribe(counter.clone());
        bus.publish("a", "b", "hi", None);
        assert_eq!(counter.0.load(std::sync::atomic::Ordering::SeqCst), 1);
        bus.unsubscribe(id);
        bus.publish("a", "b", "hi again", None);
        assert_eq!(counter.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
