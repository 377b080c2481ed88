//! The shared, cloneable handle to one running instance.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::context::{ContextError, ContextSnapshot, InstanceId, PipelineContext, SuspensionPoint};
use crate::core::{
    CompensationRecord, CompletedStep, Decision, DecisionSource, PipelineResult, PipelineStatus,
    Priority,
};
use crate::errors::{FailureKind, SagaflowError};
use crate::gate::GateOutcome;

#[cfg(any(test, feature = "test-hooks"))]
use crate::testing::FailureSwitchboard;

/// Orchestrator bookkeeping kept beside the context.
///
/// Compensation happens after the terminal transition, so its audit lives
/// here rather than in the frozen context.
#[derive(Debug, Default)]
struct Journal {
    suspension: SuspensionPoint,
    compensations: Vec<CompensationRecord>,
    notes: Vec<String>,
}

/// Lock order is context, then journal. The journal lock is never held
/// while taking the context lock.
struct Shared {
    context: RwLock<PipelineContext>,
    journal: Mutex<Journal>,
    wakeup: Notify,
    #[cfg(any(test, feature = "test-hooks"))]
    switchboard: RwLock<Option<Arc<FailureSwitchboard>>>,
}

/// Handle through which queries, signals and updates reach an instance.
///
/// Clones share the same instance. Every operation takes the context lock
/// for a bounded, synchronous critical section; no lock is held across an
/// await, so queries never wait on an in-flight capability call.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctx = self.shared.context.read();
        f.debug_struct("PipelineHandle")
            .field("instance_id", &ctx.id())
            .field("pipeline", &ctx.pipeline())
            .field("status", &ctx.status())
            .finish()
    }
}

impl PipelineHandle {
    /// Wraps a fresh context.
    #[must_use]
    pub fn new(context: PipelineContext) -> Self {
        Self::with_journal(context, Journal::default())
    }

    /// Restores a handle from a checkpoint.
    #[must_use]
    pub fn from_snapshot(snapshot: ContextSnapshot) -> Self {
        let journal = Journal {
            suspension: snapshot.suspension,
            compensations: snapshot.compensations,
            notes: Vec::new(),
        };
        Self::with_journal(snapshot.context, journal)
    }

    fn with_journal(context: PipelineContext, journal: Journal) -> Self {
        Self {
            shared: Arc::new(Shared {
                context: RwLock::new(context),
                journal: Mutex::new(journal),
                wakeup: Notify::new(),
                #[cfg(any(test, feature = "test-hooks"))]
                switchboard: RwLock::new(None),
            }),
        }
    }

    // --- queries -------------------------------------------------------

    /// Returns the instance identifier.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.shared.context.read().id()
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline(&self) -> String {
        self.shared.context.read().pipeline().to_string()
    }

    /// `getStatus`
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.shared.context.read().status()
    }

    /// `getCompletedSteps`
    #[must_use]
    pub fn completed_steps(&self) -> Vec<CompletedStep> {
        self.shared.context.read().completed_steps().to_vec()
    }

    /// `getFailureReason`
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        self.shared.context.read().failure_reason().map(str::to_string)
    }

    /// `getPriority`
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.shared.context.read().priority()
    }

    /// `getDecision`
    #[must_use]
    pub fn decision(&self) -> Option<Decision> {
        self.shared.context.read().decision().cloned()
    }

    /// Returns how the gate obtained its decision.
    #[must_use]
    pub fn decision_source(&self) -> Option<DecisionSource> {
        self.shared.context.read().decision_source()
    }

    /// `getProgress`
    #[must_use]
    pub fn progress(&self) -> BTreeMap<String, u8> {
        self.shared.context.read().progress().clone()
    }

    /// Returns true once cancellation was signalled.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.shared.context.read().cancel_requested()
    }

    /// Returns the last suspension point reached.
    #[must_use]
    pub fn suspension_point(&self) -> SuspensionPoint {
        self.shared.journal.lock().suspension
    }

    /// Returns compensation attempts recorded so far.
    #[must_use]
    pub fn compensations(&self) -> Vec<CompensationRecord> {
        self.shared.journal.lock().compensations.clone()
    }

    /// Returns a copy of the context.
    #[must_use]
    pub fn context(&self) -> PipelineContext {
        self.shared.context.read().clone()
    }

    /// `getSnapshot`
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        let context = self.shared.context.read();
        let journal = self.shared.journal.lock();
        ContextSnapshot::new(
            context.clone(),
            journal.suspension,
            journal.compensations.clone(),
        )
    }

    /// Builds the result view. Meaningful once the status is terminal.
    #[must_use]
    pub fn result(&self) -> PipelineResult {
        let context = self.shared.context.read();
        let journal = self.shared.journal.lock();
        let mut result = context.to_result(journal.compensations.clone());
        result.warnings.extend(journal.notes.iter().cloned());
        result
    }

    /// Runs a named query and returns its JSON value.
    ///
    /// # Errors
    ///
    /// Returns `SagaflowError::NotFound` for an unknown query name.
    pub fn query(&self, name: &str) -> Result<serde_json::Value, SagaflowError> {
        let value = match name {
            "getStatus" => serde_json::to_value(self.status())?,
            "getCompletedSteps" => serde_json::to_value(self.completed_steps())?,
            "getFailureReason" => serde_json::to_value(self.failure_reason())?,
            "getPriority" => serde_json::to_value(self.priority())?,
            "getDecision" => serde_json::to_value(self.decision())?,
            "getProgress" => serde_json::to_value(self.progress())?,
            "getSnapshot" => serde_json::to_value(self.snapshot())?,
            other => return Err(SagaflowError::NotFound(format!("query '{other}'"))),
        };
        Ok(value)
    }

    // --- signals -------------------------------------------------------

    /// `requestCancel`: sets the cancellation flag.
    ///
    /// Idempotent and fire-and-forget. The orchestrator observes it at the
    /// next stage boundary or gate wait, never inside an in-flight call.
    pub fn request_cancel(&self) {
        let (id, newly_set) = {
            let mut ctx = self.shared.context.write();
            (ctx.id(), ctx.request_cancel())
        };
        if newly_set {
            info!(instance_id = %id, "Cancellation requested");
            self.shared.wakeup.notify_one();
        }
    }

    /// `injectFailure`: makes the next invocation of `stage` fail.
    ///
    /// Only compiled into test builds.
    #[cfg(any(test, feature = "test-hooks"))]
    pub fn inject_failure(&self, stage: &str) {
        let id = self.instance_id();
        match self.shared.switchboard.read().as_ref() {
            Some(switchboard) => {
                info!(instance_id = %id, stage, "Failure injected");
                switchboard.arm(id, stage);
            }
            None => tracing::warn!(instance_id = %id, stage, "No failure switchboard attached"),
        }
    }

    #[cfg(any(test, feature = "test-hooks"))]
    pub(crate) fn attach_failure_switchboard(&self, switchboard: Arc<FailureSwitchboard>) {
        *self.shared.switchboard.write() = Some(switchboard);
    }

    // --- orchestrator-side bookkeeping ----------------------------------

    pub(crate) fn wake(&self) {
        self.shared.wakeup.notify_one();
    }

    pub(crate) fn notified(&self) -> Notified<'_> {
        self.shared.wakeup.notified()
    }

    pub(crate) fn read_context<R>(&self, f: impl FnOnce(&PipelineContext) -> R) -> R {
        f(&*self.shared.context.read())
    }

    pub(crate) fn write_context<R>(&self, f: impl FnOnce(&mut PipelineContext) -> R) -> R {
        f(&mut *self.shared.context.write())
    }

    pub(crate) fn transition(&self, next: PipelineStatus) -> Result<PipelineStatus, ContextError> {
        self.write_context(|ctx| ctx.transition(next))
    }

    pub(crate) fn record_step(&self, step: CompletedStep) -> Result<(), ContextError> {
        self.write_context(|ctx| ctx.record_step(step))
    }

    pub(crate) fn fail(&self, kind: FailureKind, reason: &str) -> Result<(), ContextError> {
        self.write_context(|ctx| ctx.fail(kind, reason))
    }

    pub(crate) fn record_progress(&self, stage: &str, percent: u8) {
        self.write_context(|ctx| ctx.record_progress(stage, percent));
    }

    pub(crate) fn add_warning(&self, warning: String) {
        let recorded = self.write_context(|ctx| {
            if ctx.is_terminal() {
                false
            } else {
                ctx.add_warning(warning.clone());
                true
            }
        });
        if !recorded {
            self.shared.journal.lock().notes.push(warning);
        }
    }

    pub(crate) fn set_suspension(&self, point: SuspensionPoint) {
        self.shared.journal.lock().suspension = point;
    }

    pub(crate) fn record_compensation(&self, record: CompensationRecord) {
        self.shared.journal.lock().compensations.push(record);
    }

    pub(crate) fn has_compensation_record(&self, stage: &str) -> bool {
        self.shared
            .journal
            .lock()
            .compensations
            .iter()
            .any(|r| r.stage_name == stage)
    }

    /// Checks the gate's wake conditions under a single write lock.
    ///
    /// Cancellation wins over a delivered decision. A consumed decision
    /// moves the instance back to `Running`.
    pub(crate) fn poll_gate(&self) -> Option<GateOutcome> {
        let mut ctx = self.shared.context.write();
        if ctx.cancel_requested() {
            return Some(GateOutcome::Cancelled);
        }
        let decision = ctx.take_pending_decision()?;
        if let Err(e) = ctx.transition(PipelineStatus::Running) {
            error!(instance_id = %ctx.id(), error = %e, "Could not resume after decision");
        }
        debug!(instance_id = %ctx.id(), approved = decision.approved, "Decision consumed");
        Some(GateOutcome::Decided(decision))
    }

    /// Resolves an elapsed decision window.
    ///
    /// A decision that slipped in just before the lock was taken still wins.
    pub(crate) fn resolve_gate_timeout(&self, default: Decision) -> GateOutcome {
        let mut ctx = self.shared.context.write();
        if ctx.cancel_requested() {
            return GateOutcome::Cancelled;
        }

        let outcome = match ctx.take_pending_decision() {
            Some(decision) => GateOutcome::Decided(decision),
            None => {
                if let Err(e) = ctx.accept_default_decision(default.clone()) {
                    error!(instance_id = %ctx.id(), error = %e, "Could not record default decision");
                }
                GateOutcome::TimedOut(default)
            }
        };
        if let Err(e) = ctx.transition(PipelineStatus::Running) {
            error!(instance_id = %ctx.id(), error = %e, "Could not resume after decision window");
        }
        outcome
    }
}
