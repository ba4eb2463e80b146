//! Event sink
//!
//! Terminal quest events (`<id>.<quest>.<msgId>.finished` / `.error`) and
//! deletion notices (`<id>.deleted`) leave the runtime through this trait.

use async_trait::async_trait;
use horde_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Capacity of the live subscription channel
const EVENT_SUBSCRIBERS_BUFFER_COUNT: usize = 1024;

/// One emitted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Dotted topic
    pub topic: String,
    /// Event body
    pub payload: Value,
}

/// Destination for runtime events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emit one event
    async fn emit(&self, topic: &str, payload: Value) -> Result<()>;
}

/// Records every event and fans them out to live subscribers
#[derive(Debug, Clone)]
pub struct MemoryEventSink {
    events: Arc<RwLock<Vec<Event>>>,
    live: broadcast::Sender<Event>,
}

impl Default for MemoryEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventSink {
    /// Create an empty sink
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(EVENT_SUBSCRIBERS_BUFFER_COUNT);
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            live,
        }
    }

    /// Receive events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.live.subscribe()
    }

    /// Every event emitted so far, in order
    pub async fn events(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }

    /// Topics of every event emitted so far, in order
    pub async fn topics(&self) -> Vec<String> {
        self.events
            .read()
            .await
            .iter()
            .map(|e| e.topic.clone())
            .collect()
    }

    /// Events whose topic starts with `prefix`
    pub async fn with_prefix(&self, prefix: &str) -> Vec<Event> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.topic.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of events whose topic ends with `suffix`
    pub async fn count_suffix(&self, suffix: &str) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.topic.ends_with(suffix))
            .count()
    }

    /// Forget recorded events
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, topic: &str, payload: Value) -> Result<()> {
        let event = Event {
            topic: topic.to_string(),
            payload,
        };
        tracing::trace!(topic = %event.topic, "Event emitted");
        self.events.write().await.push(event.clone());
        // no subscribers is fine
        let _ = self.live.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemoryEventSink::new();
        sink.emit("counter@1.create.m1.finished", json!(null))
            .await
            .unwrap();
        sink.emit("counter@1.deleted", json!({})).await.unwrap();

        assert_eq!(
            sink.topics().await,
            vec!["counter@1.create.m1.finished", "counter@1.deleted"]
        );
        assert_eq!(sink.count_suffix(".finished").await, 1);
        assert_eq!(sink.with_prefix("counter@1.").await.len(), 2);

        sink.clear().await;
        assert!(sink.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_sink_subscribe() {
        let sink = MemoryEventSink::new();
        let mut rx = sink.subscribe();
        sink.emit("a.deleted", json!(1)).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "a.deleted");
        assert_eq!(event.payload, json!(1));
    }
}
