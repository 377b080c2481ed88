//! Error types for the sagaflow orchestrator.
//!
//! The taxonomy separates errors a capability reports (business rejections
//! and transient infrastructure faults), errors the control plane returns to
//! its callers (update rejections), and errors raised while assembling a
//! stage registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::core::PipelineStatus;

/// The main error type for sagaflow operations.
#[derive(Debug, Error)]
pub enum SagaflowError {
    /// The stage registry is invalid.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// A control-plane update was rejected.
    #[error("{0}")]
    Update(#[from] UpdateRejection),

    /// A capability call failed outside a pipeline run.
    #[error("{0}")]
    Capability(#[from] CapabilityError),

    /// The pipeline instance is unknown or its result was already retrieved.
    #[error("Pipeline instance not found: {0}")]
    NotFound(String),

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SagaflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors reported by a capability's forward or compensating action.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapabilityError {
    /// The external system explicitly refused the request (e.g. insufficient
    /// funds, out of stock). Never retried.
    #[error("{capability} rejected: {reason}")]
    Rejected {
        /// The capability name.
        capability: String,
        /// The reason for rejection.
        reason: String,
    },

    /// A transient fault; eligible for retry under the call's policy.
    #[error("{capability} unavailable: {reason}")]
    Transient {
        /// The capability name.
        capability: String,
        /// The fault description.
        reason: String,
    },

    /// A transient fault persisted through every attempt of the retry policy.
    #[error("{capability} failed after {attempts} attempts: {reason}")]
    Exhausted {
        /// The capability name.
        capability: String,
        /// Number of attempts performed.
        attempts: u32,
        /// The last fault description.
        reason: String,
    },

    /// The call payload could not be interpreted by the capability.
    #[error("{capability} received an invalid request: {reason}")]
    InvalidRequest {
        /// The capability name.
        capability: String,
        /// What was wrong with the payload.
        reason: String,
    },
}

impl CapabilityError {
    /// Creates a business rejection.
    #[must_use]
    pub fn rejected(capability: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            capability: capability.into(),
            reason: reason.into(),
        }
    }

    /// Creates a transient (retryable) fault.
    #[must_use]
    pub fn transient(capability: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            capability: capability.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-request error.
    #[must_use]
    pub fn invalid_request(capability: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            capability: capability.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the call may be attempted again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the name of the capability that raised the error.
    #[must_use]
    pub fn capability(&self) -> &str {
        match self {
            Self::Rejected { capability, .. }
            | Self::Transient { capability, .. }
            | Self::Exhausted { capability, .. }
            | Self::InvalidRequest { capability, .. } => capability,
        }
    }

    /// Classifies the error for failure bookkeeping.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Rejected { .. } | Self::InvalidRequest { .. } => FailureKind::Business,
            Self::Transient { .. } | Self::Exhausted { .. } => FailureKind::Infrastructure,
        }
    }

    /// Converts a transient error into its exhausted form.
    #[must_use]
    pub fn exhausted(self, attempts: u32) -> Self {
        match self {
            Self::Transient { capability, reason } => Self::Exhausted {
                capability,
                attempts,
                reason,
            },
            other => other,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        let kind = match self {
            Self::Rejected { .. } => "CapabilityRejected",
            Self::Transient { .. } => "CapabilityTransient",
            Self::Exhausted { attempts, .. } => {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
                "CapabilityExhausted"
            }
            Self::InvalidRequest { .. } => "CapabilityInvalidRequest",
        };
        map.insert("type".to_string(), serde_json::json!(kind));
        map.insert("capability".to_string(), serde_json::json!(self.capability()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A capability explicitly refused the request.
    Business,
    /// A capability exhausted its retry policy.
    Infrastructure,
    /// Cancellation was observed at a suspension point.
    Cancellation,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Business => write!(f, "business"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Cancellation => write!(f, "cancellation"),
        }
    }
}

/// Structured rejection returned by a control-plane update.
///
/// A rejected update never mutates the pipeline context.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateRejection {
    /// The update carried no payload.
    #[error("update '{update}' requires a payload")]
    MissingPayload {
        /// The update name.
        update: String,
    },

    /// The payload could not be decoded.
    #[error("update '{update}' has a malformed payload: {reason}")]
    MalformedPayload {
        /// The update name.
        update: String,
        /// Decoder message.
        reason: String,
    },

    /// The payload decoded but a field value is out of range.
    #[error("update '{update}' has an invalid value: {reason}")]
    InvalidValue {
        /// The update name.
        update: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// The pipeline already reached a terminal status.
    #[error("update '{update}' rejected: pipeline is {status}")]
    TerminalStatus {
        /// The update name.
        update: String,
        /// The terminal status observed.
        status: PipelineStatus,
    },

    /// A decision was submitted while no decision is being awaited.
    #[error("update '{update}' rejected: pipeline is {status}, not awaiting a decision")]
    NotAwaitingDecision {
        /// The update name.
        update: String,
        /// The status observed.
        status: PipelineStatus,
    },

    /// A decision was already delivered for this instance.
    #[error("update '{update}' rejected: a decision was already submitted")]
    DecisionAlreadySubmitted {
        /// The update name.
        update: String,
    },

    /// The update name is not part of the control surface.
    #[error("unknown update '{update}'")]
    UnknownUpdate {
        /// The update name.
        update: String,
    },
}

impl UpdateRejection {
    /// Returns the name of the rejected update.
    #[must_use]
    pub fn update(&self) -> &str {
        match self {
            Self::MissingPayload { update }
            | Self::MalformedPayload { update, .. }
            | Self::InvalidValue { update, .. }
            | Self::TerminalStatus { update, .. }
            | Self::NotAwaitingDecision { update, .. }
            | Self::DecisionAlreadySubmitted { update }
            | Self::UnknownUpdate { update } => update,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(obj)) => obj.into_iter().collect(),
            _ => HashMap::new(),
        };
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors raised while building a stage registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry has no stages.
    #[error("Pipeline '{pipeline}' has no stages")]
    Empty {
        /// The pipeline name.
        pipeline: String,
    },

    /// Two stages share a name.
    #[error("Duplicate stage name '{name}'")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// Two entries share an order value.
    #[error("Stages '{first}' and '{second}' share order {order}")]
    DuplicateOrder {
        /// The shared order value.
        order: u32,
        /// The first stage.
        first: String,
        /// The second stage.
        second: String,
    },

    /// A stage name does not match the allowed pattern.
    #[error("Invalid stage name '{name}': {reason}")]
    InvalidName {
        /// The offending name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// More than one gate was configured.
    #[error("Pipeline '{pipeline}' defines more than one gate")]
    MultipleGates {
        /// The pipeline name.
        pipeline: String,
    },

    /// The gate has no forward stage before it.
    #[error("Gate '{gate}' must follow at least one forward stage")]
    GateFirst {
        /// The gate name.
        gate: String,
    },

    /// A notify-class stage declared a compensating action.
    #[error("Notify stage '{name}' cannot declare a compensating action")]
    CompensatedNotify {
        /// The stage name.
        name: String,
    },
}

/// Provides default suggestions for registry error codes.
pub struct RegistrySuggestions;

impl RegistrySuggestions {
    /// Gets a fix hint for a registry error.
    #[must_use]
    pub fn get(err: &RegistryError) -> &'static str {
        match err {
            RegistryError::Empty { .. } => "Add at least one stage before building the registry.",
            RegistryError::DuplicateName { .. } => {
                "Stage names key the completed-step list; give every stage a unique name."
            }
            RegistryError::DuplicateOrder { .. } => {
                "Assign strictly increasing order values or let the builder number stages."
            }
            RegistryError::InvalidName { .. } => {
                "Use letters, digits, '_', '-' or '.', starting with a letter."
            }
            RegistryError::MultipleGates { .. } => "Only one decision gate may be outstanding.",
            RegistryError::GateFirst { .. } => "Place the gate after the stages it reviews.",
            RegistryError::CompensatedNotify { .. } => {
                "Notifications are best-effort; move the rollback into an action stage."
            }
        }
    }
}
