//! Lifecycle events emitted by the orchestrator.
//!
//! Every event carries the instance id and pipeline name plus
//! event-specific fields; see [`PipelineEvent`] for the catalogue.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde_json::{Map, Value};
use std::fmt;

use crate::context::InstanceId;
use crate::utils::iso_timestamp;

/// The events an orchestrator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineEvent {
    /// The forward pass began.
    PipelineStarted,
    /// The instance completed.
    PipelineCompleted,
    /// The instance failed after compensation.
    PipelineFailed,
    /// The instance was cancelled after compensation.
    PipelineCancelled,
    /// A forward stage was invoked.
    StageStarted,
    /// A forward stage succeeded.
    StageCompleted,
    /// A forward stage failed.
    StageFailed,
    /// A compensating action was invoked.
    CompensationStarted,
    /// A compensating action succeeded.
    CompensationCompleted,
    /// A compensating action failed.
    CompensationFailed,
    /// The gate asked for an external decision.
    GateRequested,
    /// The gate received a decision.
    GateDecided,
    /// The decision window elapsed.
    GateTimedOut,
    /// A best-effort notification failed.
    NotificationFailed,
}

impl PipelineEvent {
    /// Returns the dotted event name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineStarted => "pipeline.started",
            Self::PipelineCompleted => "pipeline.completed",
            Self::PipelineFailed => "pipeline.failed",
            Self::PipelineCancelled => "pipeline.cancelled",
            Self::StageStarted => "stage.started",
            Self::StageCompleted => "stage.completed",
            Self::StageFailed => "stage.failed",
            Self::CompensationStarted => "compensation.started",
            Self::CompensationCompleted => "compensation.completed",
            Self::CompensationFailed => "compensation.failed",
            Self::GateRequested => "gate.requested",
            Self::GateDecided => "gate.decided",
            Self::GateTimedOut => "gate.timed_out",
            Self::NotificationFailed => "notification.failed",
        }
    }
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds an event payload with the common envelope fields.
#[must_use]
pub fn event_payload(instance_id: InstanceId, pipeline: &str, fields: Value) -> Value {
    let mut map = Map::new();
    map.insert("instance_id".to_string(), Value::String(instance_id.to_string()));
    map.insert("pipeline".to_string(), Value::String(pipeline.to_string()));
    map.insert("timestamp".to_string(), Value::String(iso_timestamp()));
    if let Value::Object(extra) = fields {
        map.extend(extra);
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(PipelineEvent::GateTimedOut.as_str(), "gate.timed_out");
        assert_eq!(PipelineEvent::CompensationFailed.to_string(), "compensation.failed");
    }

    #[test]
    fn test_event_payload_envelope() {
        let id = InstanceId::new();
        let payload = event_payload(id, "order", serde_json::json!({"stage": "PAYMENT_CHARGED"}));

        assert_eq!(payload["instance_id"], id.to_string());
        assert_eq!(payload["pipeline"], "order");
        assert_eq!(payload["stage"], "PAYMENT_CHARGED");
        assert!(payload["timestamp"].is_string());
    }
}
