//! Event sink trait and implementations.

use super::EventKind;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn, Level};

/// Receives execution events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "node.started")
    /// * `data` - Optional event data
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits an event without blocking. Never fails; problems are logged.
    fn try_emit(&self, event_type: &str, data: Option<Value>);

    /// Emits a lifecycle event without blocking.
    fn try_emit_kind(&self, kind: EventKind, data: Value) {
        self.try_emit(kind.as_str(), Some(data));
    }
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Logs events through `tracing`. Failure events are always logged as
/// warnings.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub const fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        let scan = data.and_then(|d| d.get("scan")).and_then(Value::as_str).unwrap_or("-");
        let node = data.and_then(|d| d.get("node")).and_then(Value::as_str).unwrap_or("-");
        if event_type.ends_with(".failed") {
            warn!(event_type, scan, node, event_data = ?data, "Event: {event_type}");
        } else if self.level == Level::DEBUG {
            debug!(event_type, scan, node, event_data = ?data, "Event: {event_type}");
        } else {
            info!(event_type, scan, node, "Event: {event_type}");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// Keeps every event in memory, for tests and run summaries.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Number of `kind` events reported for `scan`.
    #[must_use]
    pub fn count_for_scan(&self, kind: EventKind, scan: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|(t, data)| {
                t == kind.as_str()
                    && data
                        .as_ref()
                        .and_then(|d| d.get("scan"))
                        .and_then(Value::as_str)
                        == Some(scan)
            })
            .count()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        sink.emit("node.started", None).await;
        sink.try_emit_kind(EventKind::ScanStarted, json!({"scan": "T1_subject-1"}));
    }

    #[tokio::test]
    async fn test_logging_sink() {
        let sink = LoggingEventSink::debug();
        sink.emit("node.failed", Some(json!({"scan": "T1_subject-1", "node": "bet"}))).await;
        sink.try_emit("scan.completed", None);
    }

    #[tokio::test]
    async fn test_collecting_sink_filters() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());
        sink.emit("scan.started", Some(json!({"scan": "a"}))).await;
        sink.try_emit_kind(EventKind::NodeStarted, json!({"scan": "a", "node": "x"}));
        sink.try_emit_kind(EventKind::NodeStarted, json!({"scan": "b", "node": "x"}));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("node.").len(), 2);
        assert_eq!(sink.count_for_scan(EventKind::NodeStarted, "a"), 1);
        assert_eq!(sink.count_for_scan(EventKind::ScanStarted, "b"), 0);

        sink.clear();
        assert!(sink.is_empty());
    }
}
