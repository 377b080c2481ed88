//! Completed-step and compensation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stage whose forward action succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedStep {
    /// Stage name.
    pub stage_name: String,
    /// Token returned by the forward action; handed to the compensating action.
    pub result_token: String,
    /// Registry order of the stage.
    pub order: u32,
    /// When the forward action reported success.
    pub completed_at: DateTime<Utc>,
}

impl CompletedStep {
    /// Creates a completed step stamped with the current time.
    #[must_use]
    pub fn new(stage_name: impl Into<String>, result_token: impl Into<String>, order: u32) -> Self {
        Self {
            stage_name: stage_name.into(),
            result_token: result_token.into(),
            order,
            completed_at: Utc::now(),
        }
    }
}

/// Outcome of compensating a single completed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompensationOutcome {
    /// The compensating action succeeded.
    Compensated,
    /// The compensating action failed; later compensations still ran.
    Failed {
        /// The failure description.
        reason: String,
    },
    /// The stage declares no compensating action.
    Skipped,
}

impl CompensationOutcome {
    /// Returns true if a compensating action was actually invoked.
    #[must_use]
    pub fn was_attempted(&self) -> bool {
        !matches!(self, Self::Skipped)
    }
}

/// Audit record of one compensation attempt, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationRecord {
    /// Stage being compensated.
    pub stage_name: String,
    /// Token of the forward action being undone.
    pub result_token: String,
    /// What happened.
    #[serde(flatten)]
    pub outcome: CompensationOutcome,
    /// When the attempt finished.
    pub finished_at: DateTime<Utc>,
}

impl CompensationRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(step: &CompletedStep, outcome: CompensationOutcome) -> Self {
        Self {
            stage_name: step.stage_name.clone(),
            result_token: step.result_token.clone(),
            outcome,
            finished_at: Utc::now(),
        }
    }
}
