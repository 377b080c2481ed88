//! Serializable resumption checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::PipelineContext;
use crate::core::CompensationRecord;

/// A named place where an instance may yield and later resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum SuspensionPoint {
    /// Before the forward stage at this registry position.
    StageBoundary(usize),
    /// Waiting at the decision gate.
    Gate,
    /// Before compensating the completed step at this position.
    Compensation(usize),
    /// The instance is terminal.
    Finished,
}

impl Default for SuspensionPoint {
    fn default() -> Self {
        Self::StageBoundary(0)
    }
}

impl fmt::Display for SuspensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StageBoundary(n) => write!(f, "stage_boundary[{n}]"),
            Self::Gate => write!(f, "gate"),
            Self::Compensation(n) => write!(f, "compensation[{n}]"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// A point-in-time copy of an instance's durable state.
///
/// Handed to the substrate at every suspension point. Restoring a handle
/// from a snapshot lets the orchestrator resume without re-invoking
/// completed stages or re-sending a recorded gate request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// The context as of the suspension point.
    pub context: PipelineContext,
    /// Where the instance was suspended.
    pub suspension: SuspensionPoint,
    /// Compensation attempts recorded so far.
    #[serde(default)]
    pub compensations: Vec<CompensationRecord>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl ContextSnapshot {
    /// Creates a snapshot stamped with the current time.
    #[must_use]
    pub fn new(
        context: PipelineContext,
        suspension: SuspensionPoint,
        compensations: Vec<CompensationRecord>,
    ) -> Self {
        Self {
            context,
            suspension,
            compensations,
            taken_at: Utc::now(),
        }
    }

    /// Serializes the snapshot to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a snapshot from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
