//! Event sinks: where phases report document transitions.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};

/// Receives lifecycle events from the pipeline phases.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - One of the [`types`](super::types) constants
    /// * `data` - Optional payload, usually from [`document_payload`](super::document_payload)
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits an event without awaiting.
    ///
    /// Implementations must never fail; phases call this while holding
    /// a document mid-transition.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// Sink handle shared between phases.
pub type SharedEventSink = Arc<dyn EventSink>;

fn document_of(data: Option<&Value>) -> Option<&str> {
    data.and_then(|d| d.get("document_id")).and_then(Value::as_str)
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl NoOpEventSink {
    /// Returns the no-op sink as a shared handle.
    #[must_use]
    pub fn shared() -> SharedEventSink {
        Arc::new(Self)
    }
}

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes events to `tracing` at a fixed level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self::info()
    }
}

impl LoggingEventSink {
    /// Logs at `level`. `TRACE` is folded into `DEBUG` and `ERROR` into `WARN`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Logs at debug level.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Logs at info level.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn record(&self, event_type: &str, data: Option<&Value>) {
        let document_id = document_of(data).unwrap_or("-");
        match self.level {
            Level::TRACE | Level::DEBUG => {
                debug!(event_type, document_id, data = ?data, "Pipeline event");
            }
            Level::INFO => info!(event_type, document_id, data = ?data, "Pipeline event"),
            Level::WARN | Level::ERROR => warn!(event_type, document_id, data = ?data, "Pipeline event"),
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.record(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.record(event_type, data.as_ref());
    }
}

/// One event captured by [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// The event type.
    pub event_type: String,
    /// The document the payload names, if any.
    pub document_id: Option<String>,
    /// The raw payload.
    pub data: Option<Value>,
}

/// Keeps every event in memory, for assertions.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events captured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Events of exactly the given type, in emission order.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Counts events of the given type.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events.read().iter().filter(|e| e.event_type == event_type).count()
    }

    /// The event types recorded for one document, in order.
    #[must_use]
    pub fn history_of(&self, document_id: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|e| e.document_id.as_deref() == Some(document_id))
            .map(|e| e.event_type.clone())
            .collect()
    }

    fn push(&self, event_type: &str, data: Option<Value>) {
        let document_id = document_of(data.as_ref()).map(str::to_string);
        self.events.write().push(RecordedEvent {
            event_type: event_type.to_string(),
            document_id,
            data,
        });
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.push(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.push(event_type, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink::shared();
        sink.emit("document.launched", None).await;
        sink.try_emit("document.launched", Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_logging_sink_levels() {
        for sink in [LoggingEventSink::debug(), LoggingEventSink::info(), LoggingEventSink::new(Level::WARN)] {
            sink.emit("document.held", Some(json!({"document_id": "d1"}))).await;
            sink.try_emit("document.held", None);
        }
    }

    #[tokio::test]
    async fn test_collecting_sink_tracks_documents() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("document.launched", Some(json!({"document_id": "d1"}))).await;
        sink.try_emit("document.held", Some(json!({"document_id": "d2"})));
        sink.try_emit("document.held", Some(json!({"document_id": "d1"})));
        sink.try_emit("pipeline.step", Some(json!({"step": "PROMOTE"})));

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.count("document.held"), 2);
        assert_eq!(sink.history_of("d1"), vec!["document.launched", "document.held"]);

        let steps = sink.events_of_type("pipeline.step");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].document_id, None);
    }
}
