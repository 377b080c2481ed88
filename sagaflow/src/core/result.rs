//! The result returned once a pipeline instance reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    CompensationRecord, CompletedStep, Decision, DecisionSource, PipelineStatus, Priority,
};
use crate::context::InstanceId;
use crate::errors::FailureKind;

/// Lifecycle timestamps of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTimestamps {
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the orchestrator started driving it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineTimestamps {
    /// Creates timestamps for an instance created now.
    #[must_use]
    pub fn created_now() -> Self {
        Self {
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Final outcome of a pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Instance identifier.
    pub instance_id: InstanceId,
    /// Registry name.
    pub pipeline: String,
    /// Terminal status.
    pub status: PipelineStatus,
    /// Completed steps as of the terminal transition.
    pub completed_steps: Vec<CompletedStep>,
    /// Why the instance failed or was cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Classification of the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// Compensation attempts, in execution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compensations: Vec<CompensationRecord>,
    /// The decision the gate acted on, if the pipeline has a gate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    /// Whether that decision was delivered or synthesized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_source: Option<DecisionSource>,
    /// Final priority.
    pub priority: Priority,
    /// Best-effort failures that did not affect the outcome.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Lifecycle timestamps.
    pub timestamps: PipelineTimestamps,
}

impl PipelineResult {
    /// Returns the forward token of every completed stage, keyed by stage name.
    #[must_use]
    pub fn stage_tokens(&self) -> BTreeMap<String, String> {
        self.completed_steps
            .iter()
            .map(|step| (step.stage_name.clone(), step.result_token.clone()))
            .collect()
    }

    /// Returns the forward token of a single stage.
    #[must_use]
    pub fn token(&self, stage_name: &str) -> Option<&str> {
        self.completed_steps
            .iter()
            .find(|step| step.stage_name == stage_name)
            .map(|step| step.result_token.as_str())
    }

    /// Returns the names of completed stages in completion order.
    #[must_use]
    pub fn completed_stage_names(&self) -> Vec<&str> {
        self.completed_steps
            .iter()
            .map(|step| step.stage_name.as_str())
            .collect()
    }

    /// Returns the number of compensating actions actually invoked.
    #[must_use]
    pub fn compensations_attempted(&self) -> usize {
        self.compensations
            .iter()
            .filter(|record| record.outcome.was_attempted())
            .count()
    }

    /// Returns the wall-clock duration in milliseconds, if the run started and finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<f64> {
        let started = self.timestamps.started_at?;
        let finished = self.timestamps.finished_at?;
        Some((finished - started).num_milliseconds() as f64)
    }

    /// Returns true if the instance completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CompensationOutcome;

    fn sample() -> PipelineResult {
        PipelineResult {
            instance_id: InstanceId::new(),
            pipeline: "order".to_string(),
            status: PipelineStatus::Failed,
            completed_steps: vec![
                CompletedStep::new("PAYMENT_CHARGED", "pay_1", 1),
                CompletedStep::new("INVENTORY_RESERVED", "inv_1", 2),
            ],
            failure_reason: Some("shipping rejected".to_string()),
            failure_kind: Some(FailureKind::Business),
            compensations: Vec::new(),
            decision: None,
            decision_source: None,
            priority: Priority::Normal,
            warnings: Vec::new(),
            timestamps: PipelineTimestamps::created_now(),
        }
    }

    #[test]
    fn test_stage_tokens() {
        let result = sample();
        let tokens = result.stage_tokens();

        assert_eq!(tokens.get("PAYMENT_CHARGED").map(String::as_str), Some("pay_1"));
        assert_eq!(result.token("INVENTORY_RESERVED"), Some("inv_1"));
        assert_eq!(result.token("SHIPMENT_SCHEDULED"), None);
        assert_eq!(
            result.completed_stage_names(),
            vec!["PAYMENT_CHARGED", "INVENTORY_RESERVED"]
        );
    }

    #[test]
    fn test_compensations_attempted_ignores_skips() {
        let mut result = sample();
        result.compensations = vec![
            CompensationRecord::new(&result.completed_steps[1], CompensationOutcome::Skipped),
            CompensationRecord::new(&result.completed_steps[0], CompensationOutcome::Compensated),
        ];

        assert_eq!(result.compensations_attempted(), 1);
    }

    #[test]
    fn test_duration_requires_both_timestamps() {
        let mut result = sample();
        assert!(result.duration_ms().is_none());

        let now = Utc::now();
        result.timestamps.started_at = Some(now);
        result.timestamps.finished_at = Some(now + chrono::Duration::milliseconds(25));
        assert_eq!(result.duration_ms(), Some(25.0));
    }
}
