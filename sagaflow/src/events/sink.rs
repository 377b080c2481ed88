//! Event sinks.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn, Level};

/// Receives orchestrator lifecycle events.
///
/// Sinks are injected per orchestrator; there is no process-wide sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    ///
    /// # Arguments
    ///
    /// * `event_type` - Dotted event name, e.g. `"compensation.failed"`
    /// * `data` - Payload built by [`event_payload`](super::event_payload)
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits an event without awaiting. Must never panic.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards every event. The orchestrator default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes events to `tracing`, lifting the envelope into span fields.
///
/// Failure events (`*.failed`, `gate.timed_out`) are logged at `WARN`
/// regardless of the configured level.
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
    /// Creates a sink logging at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        let field = |key: &str| {
            data.and_then(|d| d.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let instance_id = field("instance_id");
        let pipeline = field("pipeline");
        let stage = field("stage");

        if is_alarming(event_type) {
            warn!(event = event_type, %instance_id, %pipeline, %stage, data = ?data, "Pipeline event");
        } else if self.level == Level::DEBUG {
            debug!(event = event_type, %instance_id, %pipeline, %stage, data = ?data, "Pipeline event");
        } else {
            info!(event = event_type, %instance_id, %pipeline, %stage, "Pipeline event");
        }
    }
}

fn is_alarming(event_type: &str) -> bool {
    event_type.ends_with(".failed") || event_type == "gate.timed_out"
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

/// Keeps every event in emission order, for tests and audit trails.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Returns the collected event names in emission order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Returns events whose name starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the event names emitted for one instance.
    #[must_use]
    pub fn timeline(&self, instance_id: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|(_, data)| {
                data.as_ref()
                    .and_then(|d| d.get("instance_id"))
                    .and_then(Value::as_str)
                    == Some(instance_id)
            })
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Returns the `stage` field of every event named `event_type`.
    #[must_use]
    pub fn stages_of(&self, event_type: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .filter_map(|(_, data)| data.as_ref()?.get("stage")?.as_str().map(str::to_string))
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops everything collected so far.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.try_emit(event_type, data);
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
    async fn test_logging_sink_accepts_any_payload() {
        let sink = LoggingEventSink::debug();
        sink.emit("stage.started", Some(json!({"stage": "A"}))).await;
        sink.emit("compensation.failed", Some(json!({"stage": 7}))).await;
        sink.try_emit("pipeline.completed", None);
        NoOpEventSink.try_emit("pipeline.started", None);
    }

    #[test]
    fn test_alarming_events() {
        assert!(is_alarming("stage.failed"));
        assert!(is_alarming("gate.timed_out"));
        assert!(!is_alarming("gate.decided"));
    }

    #[tokio::test]
    async fn test_collecting_sink_views() {
        let sink = CollectingEventSink::new();
        sink.emit("stage.started", Some(json!({"instance_id": "a", "stage": "PAY"}))).await;
        sink.emit("stage.completed", Some(json!({"instance_id": "a", "stage": "PAY"}))).await;
        sink.emit("stage.started", Some(json!({"instance_id": "b", "stage": "SHIP"}))).await;
        sink.try_emit("compensation.started", Some(json!({"instance_id": "a", "stage": "PAY"})));

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.events_of_type("stage.").len(), 3);
        assert_eq!(sink.stages_of("stage.started"), vec!["PAY", "SHIP"]);
        assert_eq!(
            sink.timeline("a"),
            vec!["stage.started", "stage.completed", "compensation.started"]
        );

        sink.clear();
        assert!(sink.is_empty());
    }
}
