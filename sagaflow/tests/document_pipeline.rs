//! The document pipeline around its review gate.

use anyhow::Context;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sagaflow::capabilities::notification::NotificationKind;
use sagaflow::capabilities::storage::DocumentStatus;
use sagaflow::config::{GateConfig, PipelineConfig};
use sagaflow::context::{ContextSnapshot, SuspensionPoint};
use sagaflow::control::PipelineHandle;
use sagaflow::core::{
    CompensationOutcome, Decision, DecisionSource, PipelineResult, PipelineStatus, Priority,
};
use sagaflow::pipeline::Orchestrator;
use sagaflow::pipelines::document::{
    DOCUMENT_CLASSIFIED, DOCUMENT_FINALIZED, DOCUMENT_PERSISTED, OCR_COMPLETED,
    SUBMITTER_NOTIFIED,
};
use sagaflow::testing::{assert_status, DocumentFixture};

fn long_window() -> PipelineConfig {
    PipelineConfig::default()
        .with_gate(GateConfig::default().with_timeout(Duration::from_secs(24 * 3600)))
}

async fn until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}

fn spawn(
    orchestrator: &Arc<Orchestrator>,
    handle: &PipelineHandle,
) -> tokio::task::JoinHandle<PipelineResult> {
    let orchestrator = Arc::clone(orchestrator);
    let handle = handle.clone();
    tokio::spawn(async move { orchestrator.execute(&handle).await })
}

#[tokio::test]
async fn test_approved_document_is_processed() {
    let fixture = DocumentFixture::new();
    let orchestrator = Arc::new(fixture.orchestrator(long_window()).unwrap());
    let handle = orchestrator.prepare(
        DocumentFixture::request("Receipt\nTotal paid: 12.00").to_value(),
        Priority::Normal,
    );
    let task = spawn(&orchestrator, &handle);

    until(|| handle.status() == PipelineStatus::AwaitingDecision).await;
    assert_eq!(handle.progress(), BTreeMap::from([(OCR_COMPLETED.to_string(), 100)]));

    handle
        .handle_update("submitDecision", &json!({"approved": true, "comments": "legible"}))
        .unwrap();
    let result = task.await.unwrap();

    assert_status(&result, PipelineStatus::Completed);
    assert_eq!(result.decision_source, Some(DecisionSource::External));
    assert_eq!(result.token(DOCUMENT_CLASSIFIED), Some("RECEIPT"));
    assert_eq!(result.token(DOCUMENT_FINALIZED), Some("PROCESSED"));
    assert!(result.token(SUBMITTER_NOTIFIED).is_some());

    let id = result.token(DOCUMENT_PERSISTED).unwrap();
    assert_eq!(fixture.storage.status(id), Some(DocumentStatus::Processed));

    let sent = fixture.notifier.sent_of_kind(NotificationKind::Confirmation);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("review approved: legible"));
}

#[tokio::test]
async fn test_cancel_while_awaiting_decision() {
    let fixture = DocumentFixture::new();
    let orchestrator = Arc::new(fixture.orchestrator(long_window()).unwrap());
    let handle = orchestrator.prepare(
        DocumentFixture::request("contract of sale").to_value(),
        Priority::Normal,
    );
    let task = spawn(&orchestrator, &handle);

    until(|| handle.status() == PipelineStatus::AwaitingDecision).await;
    handle.request_cancel();
    let result = task.await.unwrap();

    assert_status(&result, PipelineStatus::Cancelled);
    assert!(result.decision.is_none());
    assert_eq!(result.compensations.len(), 4);
    assert_eq!(result.compensations_attempted(), 1);
    let last = result.compensations.last().unwrap();
    assert_eq!(last.stage_name, DOCUMENT_PERSISTED);
    assert_eq!(last.outcome, CompensationOutcome::Compensated);

    let id = result.token(DOCUMENT_PERSISTED).unwrap();
    assert_eq!(fixture.storage.status(id), Some(DocumentStatus::Failed));
    assert_eq!(fixture.notifier.sent_of_kind(NotificationKind::Cancellation).len(), 1);
    assert!(handle.submit_decision(Decision::approve("late")).is_err());
}

#[tokio::test]
async fn test_resume_from_gate_checkpoint() -> anyhow::Result<()> {
    let fixture = DocumentFixture::new();
    let orchestrator = Arc::new(fixture.orchestrator(long_window())?);
    let handle = orchestrator.prepare(
        DocumentFixture::request("invoice number 7").to_value(),
        Priority::High,
    );
    let id = handle.instance_id();
    let task = spawn(&orchestrator, &handle);

    let substrate = Arc::clone(orchestrator.substrate());
    until(|| {
        substrate
            .latest_checkpoint(id)
            .is_some_and(|s| s.context.gate_correlation().is_some())
    })
    .await;
    task.abort();

    let snapshot = substrate
        .latest_checkpoint(id)
        .context("no checkpoint at the gate")?;
    assert_eq!(snapshot.suspension, SuspensionPoint::Gate);
    let restored = orchestrator.restore(ContextSnapshot::from_json(&snapshot.to_json()?)?);
    assert_eq!(restored.status(), PipelineStatus::AwaitingDecision);
    assert_eq!(restored.priority(), Priority::High);

    restored.submit_decision(Decision::reject("wrong vendor"))?;
    let result = orchestrator.execute(&restored).await;

    assert_status(&result, PipelineStatus::Completed);
    assert_eq!(result.token(DOCUMENT_FINALIZED), Some("REJECTED"));
    assert_eq!(fixture.desk.requests().len(), 1);
    assert_eq!(result.completed_steps.len(), 6);
    Ok(())
}
