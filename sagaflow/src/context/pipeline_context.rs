//! The durable state record of one pipeline instance.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::InstanceId;
use crate::core::{
    CompensationRecord, CompletedStep, Decision, DecisionSource, PipelineResult, PipelineStatus,
    PipelineTimestamps, Priority,
};
use crate::errors::FailureKind;

/// Bookkeeping errors raised when a mutation would break a context invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context is terminal and frozen.
    #[error("pipeline is {status}; no further mutation is allowed")]
    Terminal {
        /// The terminal status.
        status: PipelineStatus,
    },

    /// The requested status transition is not part of the lifecycle.
    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition {
        /// Current status.
        from: PipelineStatus,
        /// Requested status.
        to: PipelineStatus,
    },

    /// A step with the same stage name was already recorded.
    #[error("stage '{stage}' is already recorded as completed")]
    DuplicateStep {
        /// The stage name.
        stage: String,
    },

    /// A step was recorded out of registry order.
    #[error("stage '{stage}' (order {order}) recorded after order {last}")]
    OutOfOrder {
        /// The stage name.
        stage: String,
        /// Its order.
        order: u32,
        /// The order of the last recorded step.
        last: u32,
    },

    /// Steps may only be recorded while running.
    #[error("cannot record stage '{stage}' while {status}")]
    NotRunning {
        /// The stage name.
        stage: String,
        /// The current status.
        status: PipelineStatus,
    },
}

/// The state record for one pipeline instance.
///
/// Exclusively owned by its instance; the orchestrator and the control plane
/// mutate it through the methods below, which enforce:
/// - `completed_steps` only grows, in strictly increasing registry order;
/// - `failure_reason` is written once;
/// - nothing mutates after a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineContext {
    id: InstanceId,
    pipeline: String,
    request: serde_json::Value,
    status: PipelineStatus,
    completed_steps: Vec<CompletedStep>,
    failure_reason: Option<String>,
    failure_kind: Option<FailureKind>,
    priority: Priority,
    pending_decision: Option<Decision>,
    decision: Option<Decision>,
    decision_source: Option<DecisionSource>,
    gate_correlation: Option<String>,
    cancel_requested: bool,
    #[serde(default)]
    progress: BTreeMap<String, u8>,
    #[serde(default)]
    warnings: Vec<String>,
    timestamps: PipelineTimestamps,
}

impl PipelineContext {
    /// Creates a pending context for a new instance.
    #[must_use]
    pub fn new(id: InstanceId, pipeline: impl Into<String>, request: serde_json::Value) -> Self {
        Self {
            id,
            pipeline: pipeline.into(),
            request,
            status: PipelineStatus::Pending,
            completed_steps: Vec::new(),
            failure_reason: None,
            failure_kind: None,
            priority: Priority::default(),
            pending_decision: None,
            decision: None,
            decision_source: None,
            gate_correlation: None,
            cancel_requested: false,
            progress: BTreeMap::new(),
            warnings: Vec::new(),
            timestamps: PipelineTimestamps::created_now(),
        }
    }

    /// Sets the initial priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Returns the instance identifier.
    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Returns the registry name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Returns the request payload the instance was started with.
    #[must_use]
    pub fn request(&self) -> &serde_json::Value {
        &self.request
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    /// Returns true once the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the completed steps in completion order.
    #[must_use]
    pub fn completed_steps(&self) -> &[CompletedStep] {
        &self.completed_steps
    }

    /// Returns true if the named stage already completed.
    #[must_use]
    pub fn has_completed(&self, stage_name: &str) -> bool {
        self.completed_steps.iter().any(|s| s.stage_name == stage_name)
    }

    /// Returns the forward token of every completed stage.
    #[must_use]
    pub fn stage_tokens(&self) -> BTreeMap<String, String> {
        self.completed_steps
            .iter()
            .map(|s| (s.stage_name.clone(), s.result_token.clone()))
            .collect()
    }

    /// Returns the failure reason, if any.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Returns the failure classification, if any.
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_kind
    }

    /// Returns the current priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the decision delivered but not yet consumed by the gate.
    #[must_use]
    pub fn pending_decision(&self) -> Option<&Decision> {
        self.pending_decision.as_ref()
    }

    /// Returns the decision the gate acted on.
    #[must_use]
    pub fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }

    /// Returns how the gate obtained its decision.
    #[must_use]
    pub fn decision_source(&self) -> Option<DecisionSource> {
        self.decision_source
    }

    /// Returns the correlation token of the outstanding gate request.
    #[must_use]
    pub fn gate_correlation(&self) -> Option<&str> {
        self.gate_correlation.as_deref()
    }

    /// Returns true if cancellation was signalled.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Returns reported progress per stage, in percent.
    #[must_use]
    pub fn progress(&self) -> &BTreeMap<String, u8> {
        &self.progress
    }

    /// Returns best-effort failures recorded so far.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Returns the lifecycle timestamps.
    #[must_use]
    pub fn timestamps(&self) -> &PipelineTimestamps {
        &self.timestamps
    }

    fn ensure_mutable(&self) -> Result<(), ContextError> {
        if self.is_terminal() {
            return Err(ContextError::Terminal {
                status: self.status,
            });
        }
        Ok(())
    }

    /// Moves to a new non-failure status.
    ///
    /// Returns the previous status.
    pub fn transition(&mut self, next: PipelineStatus) -> Result<PipelineStatus, ContextError> {
        self.ensure_mutable()?;
        if !self.status.can_transition_to(next) {
            return Err(ContextError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }

        let previous = self.status;
        self.status = next;

        let now = Utc::now();
        if next == PipelineStatus::Running && self.timestamps.started_at.is_none() {
            self.timestamps.started_at = Some(now);
        }
        if next.is_terminal() {
            self.timestamps.finished_at = Some(now);
        }
        Ok(previous)
    }

    /// Appends a completed step.
    pub fn record_step(&mut self, step: CompletedStep) -> Result<(), ContextError> {
        self.ensure_mutable()?;
        if self.status != PipelineStatus::Running {
            return Err(ContextError::NotRunning {
                stage: step.stage_name,
                status: self.status,
            });
        }
        if self.has_completed(&step.stage_name) {
            return Err(ContextError::DuplicateStep {
                stage: step.stage_name,
            });
        }
        if let Some(last) = self.completed_steps.last() {
            if step.order <= last.order {
                return Err(ContextError::OutOfOrder {
                    stage: step.stage_name,
                    order: step.order,
                    last: last.order,
                });
            }
        }

        self.completed_steps.push(step);
        Ok(())
    }

    /// Records the failure and moves to `Failed` or `Cancelled` in one step,
    /// so queries never observe one without the other.
    pub fn fail(
        &mut self,
        kind: FailureKind,
        reason: impl Into<String>,
    ) -> Result<(), ContextError> {
        let terminal = match kind {
            FailureKind::Cancellation => PipelineStatus::Cancelled,
            FailureKind::Business | FailureKind::Infrastructure => PipelineStatus::Failed,
        };
        self.ensure_mutable()?;
        if !self.status.can_transition_to(terminal) {
            return Err(ContextError::IllegalTransition {
                from: self.status,
                to: terminal,
            });
        }

        if self.failure_reason.is_none() {
            self.failure_reason = Some(reason.into());
            self.failure_kind = Some(kind);
        }
        self.transition(terminal)?;
        Ok(())
    }

    /// Replaces the priority, returning the previous value.
    pub fn set_priority(&mut self, priority: Priority) -> Result<Priority, ContextError> {
        self.ensure_mutable()?;
        Ok(std::mem::replace(&mut self.priority, priority))
    }

    /// Stores a delivered decision for the gate to consume.
    pub fn offer_decision(&mut self, decision: Decision) -> Result<(), ContextError> {
        self.ensure_mutable()?;
        self.pending_decision = Some(decision);
        Ok(())
    }

    /// Consumes the delivered decision, if any.
    pub fn take_pending_decision(&mut self) -> Option<Decision> {
        if self.is_terminal() {
            return None;
        }
        let decision = self.pending_decision.take()?;
        self.decision = Some(decision.clone());
        self.decision_source = Some(DecisionSource::External);
        Some(decision)
    }

    /// Records the deterministic default decision synthesized on timeout.
    pub fn accept_default_decision(&mut self, decision: Decision) -> Result<(), ContextError> {
        self.ensure_mutable()?;
        self.decision = Some(decision);
        self.decision_source = Some(DecisionSource::Timeout);
        Ok(())
    }

    /// Records the correlation token of the gate request.
    pub fn record_gate_request(
        &mut self,
        correlation: impl Into<String>,
    ) -> Result<(), ContextError> {
        self.ensure_mutable()?;
        self.gate_correlation = Some(correlation.into());
        Ok(())
    }

    /// Sets the cancellation flag. Returns true if this call set it.
    pub fn request_cancel(&mut self) -> bool {
        if self.is_terminal() || self.cancel_requested {
            return false;
        }
        self.cancel_requested = true;
        true
    }

    /// Records progress for a stage; values above 100 are clamped.
    pub fn record_progress(&mut self, stage: &str, percent: u8) {
        if self.is_terminal() {
            return;
        }
        self.progress.insert(stage.to_string(), percent.min(100));
    }

    /// Records a best-effort failure that does not affect the outcome.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.warnings.push(warning.into());
    }

    /// Builds the result view of this context.
    #[must_use]
    pub fn to_result(&self, compensations: Vec<CompensationRecord>) -> PipelineResult {
        PipelineResult {
            instance_id: self.id,
            pipeline: self.pipeline.clone(),
            status: self.status,
            completed_steps: self.completed_steps.clone(),
            failure_reason: self.failure_reason.clone(),
            failure_kind: self.failure_kind,
            compensations,
            decision: self.decision.clone(),
            decision_source: self.decision_source,
            priority: self.priority,
            warnings: self.warnings.clone(),
            timestamps: self.timestamps.clone(),
        }
    }
}
