//! Reverse-order compensation and the failure epilogue.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::orchestrator::Orchestrator;
use crate::capabilities::CompensationCall;
use crate::context::SuspensionPoint;
use crate::control::PipelineHandle;
use crate::core::{CompensationOutcome, CompensationRecord, CompletedStep, PipelineStatus};
use crate::events::PipelineEvent;
use crate::substrate::ExecutionSubstrate;

/// Stage name under which the failure notification is invoked.
pub const FAILURE_NOTIFICATION: &str = "FAILURE_NOTIFICATION";

impl<S: ExecutionSubstrate> Orchestrator<S> {
    /// Compensates, notifies and finalizes a failed or cancelled instance.
    pub(crate) async fn unwind(&self, handle: &PipelineHandle) {
        self.compensate(handle).await;
        self.notify_failure(handle).await;

        let status = handle.status();
        let reason = handle.failure_reason().unwrap_or_default();
        let event = if status == PipelineStatus::Cancelled {
            info!(reason = %reason, "Pipeline cancelled");
            PipelineEvent::PipelineCancelled
        } else {
            info!(reason = %reason, "Pipeline failed");
            PipelineEvent::PipelineFailed
        };

        handle.set_suspension(SuspensionPoint::Finished);
        self.checkpoint(handle).await;

        let compensations = handle.compensations();
        self.emit(
            handle,
            event,
            json!({
                "status": status,
                "failure_reason": reason,
                "completed_steps": handle.completed_steps().len(),
                "compensations": compensations,
            }),
        )
        .await;
    }

    /// Runs compensating actions over the completed steps in reverse.
    ///
    /// Each step is attempted independently: a failed compensation is
    /// recorded and the next one still runs. Steps that already carry a
    /// compensation record are skipped, so a resumed unwind never repeats
    /// one.
    #[instrument(skip_all)]
    pub(crate) async fn compensate(&self, handle: &PipelineHandle) {
        let steps = handle.completed_steps();
        if steps.is_empty() {
            debug!("Nothing to compensate");
            return;
        }
        info!(steps = steps.len(), "Compensating");

        for (index, step) in steps.iter().enumerate().rev() {
            if handle.has_compensation_record(&step.stage_name) {
                debug!(stage = %step.stage_name, "Already compensated, skipping");
                continue;
            }

            handle.set_suspension(SuspensionPoint::Compensation(index));
            self.checkpoint(handle).await;

            let outcome = self.compensate_step(handle, step).await;
            handle.record_compensation(CompensationRecord::new(step, outcome));
        }
    }

    async fn compensate_step(
        &self,
        handle: &PipelineHandle,
        step: &CompletedStep,
    ) -> CompensationOutcome {
        let Some(compensation) = self
            .registry
            .stage(&step.stage_name)
            .and_then(|stage| stage.compensation.clone())
        else {
            debug!(stage = %step.stage_name, "No compensating action");
            return CompensationOutcome::Skipped;
        };

        let request = handle.read_context(|ctx| Arc::new(ctx.request().clone()));
        let call = CompensationCall::new(
            handle.instance_id(),
            &step.stage_name,
            &step.result_token,
            request,
        );
        let key = call.idempotency_key.clone();

        info!(stage = %step.stage_name, token = %step.result_token, "Compensation started");
        self.emit(
            handle,
            PipelineEvent::CompensationStarted,
            json!({ "stage": step.stage_name, "token": step.result_token }),
        )
        .await;

        let outcome = self
            .substrate
            .call(&self.config.compensation_retry, &key, |attempt| {
                let call = call.for_attempt(attempt);
                let compensation = Arc::clone(&compensation);
                async move { compensation.compensate(&call).await }
            })
            .await;

        match outcome {
            Ok(()) => {
                info!(stage = %step.stage_name, "Compensation completed");
                self.emit(
                    handle,
                    PipelineEvent::CompensationCompleted,
                    json!({ "stage": step.stage_name }),
                )
                .await;
                CompensationOutcome::Compensated
            }
            Err(e) => {
                error!(stage = %step.stage_name, token = %step.result_token, error = %e, "Compensation failed");
                self.emit(
                    handle,
                    PipelineEvent::CompensationFailed,
                    json!({ "stage": step.stage_name, "error": e.to_dict() }),
                )
                .await;
                CompensationOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Sends the registry's failure notification, if any. Best effort.
    async fn notify_failure(&self, handle: &PipelineHandle) {
        let Some(notifier) = self.registry.failure_notification() else {
            return;
        };

        let call = self
            .capability_call(handle, FAILURE_NOTIFICATION)
            .with_failure_reason(handle.failure_reason());
        let key = call.idempotency_key.clone();
        let notifier = Arc::clone(notifier);

        let outcome = self
            .substrate
            .call(&self.config.notification_retry, &key, |attempt| {
                let call = call.for_attempt(attempt);
                let notifier = Arc::clone(&notifier);
                async move { notifier.invoke(&call).await }
            })
            .await;

        match outcome {
            Ok(token) => debug!(token = %token, "Failure notification sent"),
            Err(e) => {
                warn!(error = %e, "Failure notification failed");
                handle.add_warning(format!("{FAILURE_NOTIFICATION}: {e}"));
                self.emit(
                    handle,
                    PipelineEvent::NotificationFailed,
                    json!({ "stage": FAILURE_NOTIFICATION, "error": e.to_string() }),
                )
                .await;
            }
        }
    }
}
