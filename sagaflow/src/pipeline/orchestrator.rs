//! The orchestrator: forward pass, gate and completion.
//!
//! One [`Orchestrator`] serves any number of instances. Each instance is
//! driven by a single `execute` call on its [`PipelineHandle`]; control-plane
//! handlers run concurrently against the same handle and become visible at
//! the next stage boundary or gate wait.

use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::registry::{RegistryEntry, StageRegistry};
use super::spec::StageSpec;
use crate::capabilities::{CapabilityCall, ProgressReporter};
use crate::config::PipelineConfig;
use crate::context::{ContextSnapshot, InstanceId, PipelineContext, SuspensionPoint};
use crate::control::PipelineHandle;
use crate::core::{CompletedStep, PipelineResult, PipelineStatus, Priority};
use crate::errors::FailureKind;
use crate::events::{event_payload, EventSink, NoOpEventSink, PipelineEvent};
use crate::gate::{ExternalGate, GateOutcome};
use crate::observability::SpanTimer;
use crate::substrate::{ExecutionSubstrate, LocalSubstrate};

#[cfg(any(test, feature = "test-hooks"))]
use crate::testing::FailureSwitchboard;

/// Why the forward pass stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Interrupted {
    pub(crate) kind: FailureKind,
    pub(crate) reason: String,
}

impl Interrupted {
    fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Cancellation,
            reason: reason.into(),
        }
    }
}

/// Drives pipeline instances through a [`StageRegistry`].
pub struct Orchestrator<S: ExecutionSubstrate = LocalSubstrate> {
    pub(crate) registry: StageRegistry,
    pub(crate) substrate: Arc<S>,
    pub(crate) config: PipelineConfig,
    pub(crate) events: Arc<dyn EventSink>,
    #[cfg(any(test, feature = "test-hooks"))]
    switchboard: Option<Arc<FailureSwitchboard>>,
}

impl<S: ExecutionSubstrate> fmt::Debug for Orchestrator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipeline", &self.registry.name())
            .field("stages", &self.registry.entry_names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: ExecutionSubstrate> Orchestrator<S> {
    /// Creates an orchestrator with a no-op event sink.
    #[must_use]
    pub fn new(registry: StageRegistry, substrate: Arc<S>, config: PipelineConfig) -> Self {
        Self {
            registry,
            substrate,
            config,
            events: Arc::new(NoOpEventSink),
            #[cfg(any(test, feature = "test-hooks"))]
            switchboard: None,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Routes every forward action through a failure switchboard so the
    /// `injectFailure` signal takes effect.
    #[cfg(any(test, feature = "test-hooks"))]
    #[must_use]
    pub fn with_failure_switchboard(mut self, switchboard: Arc<FailureSwitchboard>) -> Self {
        self.registry = self.registry.intercept(|_, capability| switchboard.wrap(capability));
        self.switchboard = Some(switchboard);
        self
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Returns the substrate.
    #[must_use]
    pub fn substrate(&self) -> &Arc<S> {
        &self.substrate
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Creates the handle of a new, pending instance.
    #[must_use]
    pub fn prepare(&self, request: Value, priority: Priority) -> PipelineHandle {
        let context = PipelineContext::new(InstanceId::new(), self.registry.name(), request)
            .with_priority(priority);
        self.attach(PipelineHandle::new(context))
    }

    /// Recreates the handle of an instance from a checkpoint.
    #[must_use]
    pub fn restore(&self, snapshot: ContextSnapshot) -> PipelineHandle {
        self.attach(PipelineHandle::from_snapshot(snapshot))
    }

    #[cfg_attr(not(any(test, feature = "test-hooks")), allow(clippy::unused_self))]
    fn attach(&self, handle: PipelineHandle) -> PipelineHandle {
        #[cfg(any(test, feature = "test-hooks"))]
        if let Some(switchboard) = &self.switchboard {
            handle.attach_failure_switchboard(Arc::clone(switchboard));
        }
        handle
    }

    /// Drives an instance to a terminal status and returns its result.
    ///
    /// Re-entrant: a handle restored from a checkpoint resumes where the
    /// checkpoint was taken. Completed stages are not re-invoked, a recorded
    /// gate request is not re-sent and recorded compensations are not
    /// repeated.
    #[instrument(
        name = "pipeline",
        skip_all,
        fields(pipeline = %self.registry.name(), instance_id = %handle.instance_id())
    )]
    pub async fn execute(&self, handle: &PipelineHandle) -> PipelineResult {
        let timer = SpanTimer::start(self.registry.name());

        match handle.status() {
            PipelineStatus::Completed => {
                debug!("Instance already completed");
            }
            status if status.is_failure() => {
                if handle.suspension_point() != SuspensionPoint::Finished {
                    info!(status = %status, suspension = %handle.suspension_point(), "Resuming compensation");
                    self.unwind(handle).await;
                }
            }
            status => {
                if status == PipelineStatus::Pending {
                    self.start(handle).await;
                } else {
                    info!(status = %status, suspension = %handle.suspension_point(), "Resuming pipeline");
                }

                match self.forward_pass(handle).await {
                    Ok(()) => self.complete(handle).await,
                    Err(interrupted) => {
                        if let Err(e) = handle.fail(interrupted.kind, &interrupted.reason) {
                            error!(error = %e, "Could not record failure");
                        }
                        self.unwind(handle).await;
                    }
                }
            }
        }

        let result = handle.result();
        debug!(status = %result.status, elapsed_ms = timer.finish(), "Execution finished");
        result
    }

    async fn start(&self, handle: &PipelineHandle) {
        if let Err(e) = handle.transition(PipelineStatus::Running) {
            error!(error = %e, "Could not start instance");
        }
        info!(priority = %handle.priority(), "Pipeline started");
        self.emit(
            handle,
            PipelineEvent::PipelineStarted,
            json!({
                "priority": handle.priority(),
                "stages": self.registry.entry_names(),
            }),
        )
        .await;
    }

    async fn forward_pass(&self, handle: &PipelineHandle) -> Result<(), Interrupted> {
        for (index, entry) in self.registry.entries().iter().enumerate() {
            handle.set_suspension(SuspensionPoint::StageBoundary(index));
            self.checkpoint(handle).await;

            if handle.cancel_requested() {
                info!(stage = entry.name(), "Cancellation observed at stage boundary");
                return Err(Interrupted::cancelled(format!(
                    "cancellation requested before {}",
                    entry.name()
                )));
            }

            match entry {
                RegistryEntry::Stage(stage) => {
                    if handle.read_context(|ctx| ctx.has_completed(&stage.name)) {
                        debug!(stage = %stage.name, "Stage already completed, skipping");
                        continue;
                    }
                    self.run_stage(handle, stage, entry.order()).await?;
                }
                RegistryEntry::Gate(gate) => self.run_gate(handle, gate).await?,
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(stage = %stage.name))]
    async fn run_stage(
        &self,
        handle: &PipelineHandle,
        stage: &StageSpec,
        order: u32,
    ) -> Result<(), Interrupted> {
        let policy = stage
            .retry
            .as_ref()
            .unwrap_or_else(|| self.config.forward_policy(&stage.name));
        let call = self.capability_call(handle, &stage.name);
        let key = call.idempotency_key.clone();
        let forward = Arc::clone(&stage.forward);

        info!(capability = forward.name(), "Stage started");
        self.emit(handle, PipelineEvent::StageStarted, json!({ "stage": stage.name })).await;

        let outcome = self
            .substrate
            .call(policy, &key, |attempt| {
                let call = call.for_attempt(attempt);
                let forward = Arc::clone(&forward);
                async move { forward.invoke(&call).await }
            })
            .await;

        match outcome {
            Ok(token) => {
                let step = CompletedStep::new(&stage.name, &token, order);
                if let Err(e) = handle.record_step(step) {
                    error!(error = %e, "Could not record completed step");
                    return Err(Interrupted {
                        kind: FailureKind::Infrastructure,
                        reason: format!("{}: {e}", stage.name),
                    });
                }
                info!(token = %token, "Stage completed");
                self.emit(
                    handle,
                    PipelineEvent::StageCompleted,
                    json!({ "stage": stage.name, "token": token }),
                )
                .await;
                Ok(())
            }
            Err(e) if stage.is_notify() => {
                warn!(error = %e, "Notification failed, continuing");
                handle.add_warning(format!("{}: {e}", stage.name));
                self.emit(
                    handle,
                    PipelineEvent::NotificationFailed,
                    json!({ "stage": stage.name, "error": e.to_string() }),
                )
                .await;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, kind = ?e.failure_kind(), "Stage failed");
                self.emit(
                    handle,
                    PipelineEvent::StageFailed,
                    json!({ "stage": stage.name, "error": e.to_dict() }),
                )
                .await;
                Err(Interrupted {
                    kind: e.failure_kind(),
                    reason: format!("{}: {e}", stage.name),
                })
            }
        }
    }

    #[instrument(skip_all, fields(gate = %gate.name()))]
    async fn run_gate(
        &self,
        handle: &PipelineHandle,
        gate: &ExternalGate,
    ) -> Result<(), Interrupted> {
        if handle.decision().is_some() {
            debug!("Gate already decided, skipping");
            return Ok(());
        }

        if handle.status() == PipelineStatus::Running {
            if let Err(e) = handle.transition(PipelineStatus::AwaitingDecision) {
                error!(error = %e, "Could not suspend at gate");
            }
        }
        handle.set_suspension(SuspensionPoint::Gate);
        self.checkpoint(handle).await;

        let config = gate.config_or(&self.config.gate);

        if handle.read_context(|ctx| ctx.gate_correlation().is_none()) {
            let call = self.capability_call(handle, gate.name());
            match gate
                .request(self.substrate.as_ref(), &self.config.notification_retry, &call)
                .await
            {
                Ok(correlation) => {
                    if let Err(e) =
                        handle.write_context(|ctx| ctx.record_gate_request(&correlation))
                    {
                        error!(error = %e, "Could not record gate request");
                    }
                    info!(correlation = %correlation, timeout_ms = config.timeout_ms, "Decision requested");
                    self.emit(
                        handle,
                        PipelineEvent::GateRequested,
                        json!({
                            "gate": gate.name(),
                            "correlation": correlation,
                            "timeout_ms": config.timeout_ms,
                        }),
                    )
                    .await;
                    self.checkpoint(handle).await;
                }
                Err(e) => {
                    error!(error = %e, "Decision request failed");
                    self.emit(
                        handle,
                        PipelineEvent::StageFailed,
                        json!({ "stage": gate.name(), "error": e.to_dict() }),
                    )
                    .await;
                    return Err(Interrupted {
                        kind: e.failure_kind(),
                        reason: format!("{}: {e}", gate.name()),
                    });
                }
            }
        } else {
            debug!("Decision already requested, waiting");
        }

        match gate.wait(handle, self.substrate.as_ref(), config).await {
            GateOutcome::Decided(decision) => {
                info!(approved = decision.approved, "Decision received");
                self.emit(
                    handle,
                    PipelineEvent::GateDecided,
                    json!({ "gate": gate.name(), "decision": decision }),
                )
                .await;
                Ok(())
            }
            GateOutcome::TimedOut(decision) => {
                warn!(approved = decision.approved, reason = %decision.comments, "Decision window elapsed");
                self.emit(
                    handle,
                    PipelineEvent::GateTimedOut,
                    json!({ "gate": gate.name(), "decision": decision }),
                )
                .await;
                Ok(())
            }
            GateOutcome::Cancelled => {
                info!("Cancellation observed while awaiting decision");
                Err(Interrupted::cancelled(format!(
                    "cancellation requested while awaiting {}",
                    gate.name()
                )))
            }
        }
    }

    async fn complete(&self, handle: &PipelineHandle) {
        if let Err(e) = handle.transition(PipelineStatus::Completed) {
            error!(error = %e, "Could not complete instance");
        }
        handle.set_suspension(SuspensionPoint::Finished);
        self.checkpoint(handle).await;

        let tokens = handle.read_context(PipelineContext::stage_tokens);
        info!(stages = tokens.len(), "Pipeline completed");
        self.emit(
            handle,
            PipelineEvent::PipelineCompleted,
            json!({ "stage_tokens": tokens }),
        )
        .await;
    }

    /// Builds the forward call of `stage` from the current context.
    pub(crate) fn capability_call(&self, handle: &PipelineHandle, stage: &str) -> CapabilityCall {
        let (id, request, tokens, decision) = handle.read_context(|ctx| {
            (
                ctx.id(),
                Arc::new(ctx.request().clone()),
                ctx.stage_tokens(),
                ctx.decision().cloned(),
            )
        });

        let progress_handle = handle.clone();
        let progress_stage = stage.to_string();
        let progress = ProgressReporter::new(move |percent| {
            progress_handle.record_progress(&progress_stage, percent);
        });

        CapabilityCall::new(id, stage, request)
            .with_tokens(tokens)
            .with_decision(decision)
            .with_progress(progress)
    }

    pub(crate) async fn checkpoint(&self, handle: &PipelineHandle) {
        self.substrate.checkpoint(&handle.snapshot()).await;
    }

    pub(crate) async fn emit(&self, handle: &PipelineHandle, event: PipelineEvent, fields: Value) {
        let payload = event_payload(handle.instance_id(), self.registry.name(), fields);
        self.events.emit(event.as_str(), Some(payload)).await;
    }
}
