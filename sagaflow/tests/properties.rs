//! Ordering, rollback and control-plane properties that hold for every run.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use sagaflow::capabilities::payment::{ChargePayment, InMemoryPaymentGateway};
use sagaflow::capabilities::{
    CapabilityCall, CompensatingCapability, CompensationCall, ForwardCapability,
};
use sagaflow::config::PipelineConfig;
use sagaflow::context::{InstanceId, SuspensionPoint};
use sagaflow::core::{CompensationOutcome, Decision, PipelineStatus, Priority};
use sagaflow::errors::{FailureKind, UpdateRejection};
use sagaflow::events::CollectingEventSink;
use sagaflow::pipeline::{Orchestrator, StageRegistry, StageSpec};
use sagaflow::pipelines::order::{CONFIRMATION_SENT, PAYMENT_CHARGED};
use sagaflow::runtime::PipelineRuntime;
use sagaflow::substrate::LocalSubstrate;
use sagaflow::testing::{
    assert_reverse_compensation, assert_status, assert_strictly_increasing, BlockingCapability,
    CallLog, OrderFixture, ScriptedCapability,
};

fn orchestrator(registry: StageRegistry) -> Orchestrator {
    Orchestrator::new(registry, Arc::new(LocalSubstrate::new()), PipelineConfig::default())
}

/// A chain of `len` compensated stages where stage `fail_at` (if any) rejects.
fn chain(len: usize, fail_at: Option<usize>, log: &CallLog) -> StageRegistry {
    let mut builder = StageRegistry::builder("chain");
    for i in 0..len {
        let name = format!("STEP_{i}");
        let capability = if Some(i) == fail_at {
            ScriptedCapability::rejecting(format!("svc{i}"), "refused")
        } else {
            ScriptedCapability::succeeding(format!("svc{i}"), format!("tok{i}"))
        };
        builder = builder.stage(StageSpec::compensated(name, Arc::new(capability.with_log(log))));
    }
    builder.build().unwrap()
}

#[tokio::test]
async fn test_compensation_mirrors_completed_steps_for_every_failure_point() {
    for len in 1..=5 {
        for fail_at in 0..len {
            let log = CallLog::new();
            let orchestrator = orchestrator(chain(len, Some(fail_at), &log));
            let handle = orchestrator.prepare(json!({}), Priority::Normal);
            let result = orchestrator.execute(&handle).await;

            assert_status(&result, PipelineStatus::Failed);
            assert_eq!(result.completed_steps.len(), fail_at);
            assert_strictly_increasing(&result);
            assert_reverse_compensation(&result);

            let expected: Vec<(String, String)> = (0..fail_at)
                .rev()
                .map(|i| (format!("STEP_{i}"), format!("tok{i}")))
                .collect();
            assert_eq!(log.compensations(), expected);
            assert_eq!(log.forward_stages().len(), fail_at + 1);
        }
    }
}

#[tokio::test]
async fn test_successful_runs_never_compensate() {
    let log = CallLog::new();
    let orchestrator = orchestrator(chain(4, None, &log));
    let handle = orchestrator.prepare(json!({}), Priority::Normal);
    let result = orchestrator.execute(&handle).await;

    assert_status(&result, PipelineStatus::Completed);
    assert_strictly_increasing(&result);
    assert!(log.compensations().is_empty());
}

#[tokio::test]
async fn test_compensation_failure_does_not_stop_the_rest() {
    let log = CallLog::new();
    let registry = StageRegistry::builder("partial")
        .stage(StageSpec::compensated(
            "A",
            Arc::new(ScriptedCapability::succeeding("a", "ta").with_log(&log)),
        ))
        .stage(StageSpec::compensated(
            "B",
            Arc::new(
                ScriptedCapability::succeeding("b", "tb")
                    .with_failing_compensation("ledger locked")
                    .with_log(&log),
            ),
        ))
        .stage(StageSpec::action(
            "C",
            Arc::new(ScriptedCapability::rejecting("c", "nope").with_log(&log)),
        ))
        .build()
        .unwrap();
    let events = Arc::new(CollectingEventSink::new());
    let orchestrator = orchestrator(registry).with_event_sink(events.clone());

    let handle = orchestrator.prepare(json!({}), Priority::Normal);
    let result = orchestrator.execute(&handle).await;

    assert_status(&result, PipelineStatus::Failed);
    assert_eq!(
        log.compensations(),
        vec![
            ("B".to_string(), "tb".to_string()),
            ("A".to_string(), "ta".to_string()),
        ]
    );
    assert!(matches!(
        result.compensations[0].outcome,
        CompensationOutcome::Failed { .. }
    ));
    assert_eq!(result.compensations[1].outcome, CompensationOutcome::Compensated);
    assert_eq!(events.events_of_type("compensation.failed").len(), 1);
    assert_eq!(events.events_of_type("compensation.completed").len(), 1);
}

#[tokio::test]
async fn test_resumed_unwind_skips_recorded_compensations() {
    let first = Arc::new(BlockingCapability::new("first", "t1"));
    let second = Arc::new(ScriptedCapability::succeeding("second", "t2"));
    let registry = StageRegistry::builder("unwind")
        .stage(StageSpec::compensated("FIRST", first.clone()))
        .stage(StageSpec::compensated("SECOND", second.clone()))
        .stage(StageSpec::action(
            "THIRD",
            Arc::new(ScriptedCapability::rejecting("third", "declined")),
        ))
        .build()
        .unwrap();
    let orchestrator = Arc::new(orchestrator(registry));

    let handle = orchestrator.prepare(json!({}), Priority::Normal);
    let id = handle.instance_id();
    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        let handle = handle.clone();
        tokio::spawn(async move { orchestrator.execute(&handle).await })
    };

    first.entered().await;
    first.release();
    // Parked again, this time inside its compensation.
    first.entered().await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let snapshot = orchestrator.substrate().latest_checkpoint(id).unwrap();
    assert_eq!(snapshot.suspension, SuspensionPoint::Compensation(0));
    assert_eq!(snapshot.context.status(), PipelineStatus::Failed);
    assert_eq!(snapshot.compensations.len(), 1);
    assert_eq!(snapshot.compensations[0].stage_name, "SECOND");

    let restored = orchestrator.restore(snapshot);
    first.release();
    let result = tokio::time::timeout(Duration::from_secs(5), orchestrator.execute(&restored))
        .await
        .unwrap();

    assert_status(&result, PipelineStatus::Failed);
    assert_eq!(second.compensated_tokens(), vec!["t2".to_string()]);
    assert_eq!(first.compensations(), 1);
    assert_eq!(restored.suspension_point(), SuspensionPoint::Finished);
    let audit: Vec<(&str, &CompensationOutcome)> = result
        .compensations
        .iter()
        .map(|r| (r.stage_name.as_str(), &r.outcome))
        .collect();
    assert_eq!(
        audit,
        vec![
            ("SECOND", &CompensationOutcome::Compensated),
            ("FIRST", &CompensationOutcome::Compensated),
        ]
    );
}

#[tokio::test]
async fn test_charge_and_refund_are_idempotent() {
    let gateway = Arc::new(InMemoryPaymentGateway::new(10_000));
    let capability = ChargePayment::new(gateway.clone());
    let id = InstanceId::new();
    let request = Arc::new(json!({"customer_id": "c-1", "amount_cents": 4_000}));

    let call = CapabilityCall::new(id, PAYMENT_CHARGED, request.clone());
    let first = capability.invoke(&call).await.unwrap();
    let second = capability.invoke(&call.for_attempt(2)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(gateway.charge_count(), 1);
    assert_eq!(gateway.balance("c-1"), 6_000);

    let refund = CompensationCall::new(id, PAYMENT_CHARGED, first, request);
    capability.compensate(&refund).await.unwrap();
    capability.compensate(&refund.for_attempt(2)).await.unwrap();
    assert_eq!(gateway.refunds_applied(), 1);
    assert_eq!(gateway.balance("c-1"), 10_000);
}

#[tokio::test]
async fn test_cancel_before_any_stage() {
    let fixture = OrderFixture::new();
    let runtime = fixture.runtime().unwrap();

    let id = runtime.start(OrderFixture::request().to_value());
    runtime.handle(id).unwrap().request_cancel();
    let result = runtime.await_result(id).await.unwrap();

    assert_status(&result, PipelineStatus::Cancelled);
    assert_eq!(result.failure_kind, Some(FailureKind::Cancellation));
    assert!(result.completed_steps.is_empty());
    assert!(result.compensations.is_empty());
    assert_eq!(fixture.payment.charge_count(), 0);
    assert_eq!(fixture.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_cancel_is_observed_at_the_next_boundary() {
    let log = CallLog::new();
    let slow = Arc::new(BlockingCapability::new("slow", "slow-token"));
    let registry = StageRegistry::builder("cancel")
        .stage(StageSpec::compensated(
            "FIRST",
            Arc::new(ScriptedCapability::succeeding("first", "t1").with_log(&log)),
        ))
        .stage(StageSpec::action("SLOW", slow.clone()))
        .stage(StageSpec::action(
            "LAST",
            Arc::new(ScriptedCapability::succeeding("last", "t3").with_log(&log)),
        ))
        .build()
        .unwrap();
    let runtime = PipelineRuntime::new(orchestrator(registry));

    let id = runtime.start(json!({}));
    let handle = runtime.handle(id).unwrap();
    slow.entered().await;
    handle.request_cancel();
    handle.request_cancel();
    slow.release();

    let result = runtime.await_result(id).await.unwrap();
    assert_status(&result, PipelineStatus::Cancelled);
    assert_eq!(result.completed_stage_names(), vec!["FIRST", "SLOW"]);
    assert_reverse_compensation(&result);
    assert_eq!(log.forward_stages(), vec!["FIRST"]);
    assert_eq!(log.compensations(), vec![("FIRST".to_string(), "t1".to_string())]);
}

#[tokio::test]
async fn test_rejected_updates_leave_state_untouched() {
    let slow = Arc::new(BlockingCapability::new("slow", "token"));
    let registry = StageRegistry::builder("updates")
        .stage(StageSpec::action("SLOW", slow.clone()))
        .build()
        .unwrap();
    let runtime = PipelineRuntime::new(orchestrator(registry));

    let id = runtime.start(json!({}));
    let handle = runtime.handle(id).unwrap();
    slow.entered().await;
    let before = handle.context();

    let rejection = handle.submit_decision(Decision::approve("early")).unwrap_err();
    assert!(matches!(rejection, UpdateRejection::NotAwaitingDecision { .. }));
    assert!(handle.handle_update("setPriority", &json!(null)).is_err());
    assert!(handle.handle_update("setPriority", &json!("URGENT")).is_err());
    assert!(handle.handle_update("submitDecision", &json!({"comments": "x"})).is_err());
    assert_eq!(handle.context(), before);

    slow.release();
    let result = runtime.await_result(id).await.unwrap();
    assert!(result.decision.is_none());
    assert_eq!(result.priority, Priority::Normal);
}

#[tokio::test]
async fn test_queries_agree_with_result() {
    let fixture = OrderFixture::new();
    fixture.notifier.set_unavailable(true);
    let runtime = fixture.runtime().unwrap();

    let id = runtime.start(OrderFixture::request().to_value());
    let handle = runtime.handle(id).unwrap();
    let result = runtime.await_result(id).await.unwrap();

    assert_status(&result, PipelineStatus::Completed);
    assert!(!result.completed_stage_names().contains(&CONFIRMATION_SENT));
    assert_eq!(result.warnings.len(), 1);

    assert_eq!(handle.query("getStatus").unwrap(), json!("COMPLETED"));
    assert_eq!(
        handle.query("getCompletedSteps").unwrap(),
        serde_json::to_value(&result.completed_steps).unwrap()
    );
    assert_eq!(handle.query("getFailureReason").unwrap(), json!(null));
    assert!(handle.query("getEverything").is_err());
}
