//! End-to-end scenarios over the order and document pipelines.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use sagaflow::capabilities::notification::NotificationKind;
use sagaflow::capabilities::storage::DocumentStatus;
use sagaflow::config::{GateConfig, PipelineConfig, DEFAULT_TIMEOUT_REASON};
use sagaflow::core::{DecisionSource, PipelineStatus, Priority};
use sagaflow::errors::UpdateRejection;
use sagaflow::pipeline::{Orchestrator, StageRegistry, StageSpec};
use sagaflow::pipelines::document::{DOCUMENT_FINALIZED, DOCUMENT_PERSISTED};
use sagaflow::pipelines::order::{
    CONFIRMATION_SENT, INVENTORY_RESERVED, PAYMENT_CHARGED, SHIPMENT_SCHEDULED,
};
use sagaflow::runtime::PipelineRuntime;
use sagaflow::substrate::LocalSubstrate;
use sagaflow::testing::{
    assert_compensated, assert_completed_stages, assert_failure_mentions, assert_status,
    BlockingCapability, DocumentFixture, OrderFixture, ScriptedCapability, BROKE_CUSTOMER,
    SOLD_OUT_SKU, UNDELIVERABLE_ADDRESS,
};

#[tokio::test]
async fn scenario_a_happy_path() {
    let fixture = OrderFixture::new();
    let runtime = fixture.runtime().unwrap();

    let id = runtime.start(OrderFixture::request().to_value());
    let result = runtime.await_result(id).await.unwrap();

    assert_status(&result, PipelineStatus::Completed);
    assert_completed_stages(
        &result,
        &[PAYMENT_CHARGED, INVENTORY_RESERVED, SHIPMENT_SCHEDULED, CONFIRMATION_SENT],
    );
    assert!(result.compensations.is_empty());
    assert!(result.failure_reason.is_none());

    let payment_token = result.token(PAYMENT_CHARGED).unwrap();
    let charge = fixture.payment.charge_record(payment_token).unwrap();
    assert_eq!(charge.amount_cents, 2_500);
    assert!(!charge.refunded);

    let shipping_token = result.token(SHIPMENT_SCHEDULED).unwrap();
    assert!(fixture.shipping.shipment(shipping_token).is_some());
    assert_eq!(fixture.inventory.available("SKU-1"), 9);
    assert_eq!(fixture.notifier.sent_of_kind(NotificationKind::Confirmation).len(), 1);
    assert!(fixture.notifier.sent_of_kind(NotificationKind::Cancellation).is_empty());
}

#[tokio::test]
async fn scenario_b_first_stage_failure() {
    let fixture = OrderFixture::new();
    let runtime = fixture.runtime().unwrap();

    let mut request = OrderFixture::request();
    request.customer_id = BROKE_CUSTOMER.to_string();
    let id = runtime.start(request.to_value());
    let result = runtime.await_result(id).await.unwrap();

    assert_status(&result, PipelineStatus::Failed);
    assert!(result.completed_steps.is_empty());
    assert_failure_mentions(&result, "payment");
    assert_eq!(result.compensations_attempted(), 0);
    assert_eq!(fixture.payment.charge_count(), 0);
    assert_eq!(fixture.notifier.sent_of_kind(NotificationKind::Cancellation).len(), 1);
}

#[tokio::test]
async fn scenario_c_second_stage_failure() {
    let fixture = OrderFixture::new();
    let runtime = fixture.runtime().unwrap();

    let request = OrderFixture::request().with_item(SOLD_OUT_SKU, 1);
    let id = runtime.start(request.to_value());
    let result = runtime.await_result(id).await.unwrap();

    assert_status(&result, PipelineStatus::Failed);
    assert_completed_stages(&result, &[PAYMENT_CHARGED]);
    assert_failure_mentions(&result, "out of stock");
    assert_compensated(&result, &[PAYMENT_CHARGED]);

    let payment_token = result.token(PAYMENT_CHARGED).unwrap();
    assert!(fixture.payment.charge_record(payment_token).unwrap().refunded);
    assert_eq!(fixture.payment.refunds_applied(), 1);
    assert_eq!(fixture.payment.balance("cust-1"), 100_000);
}

#[tokio::test]
async fn scenario_c_overflowing_quantity_rolls_back() {
    let fixture = OrderFixture::new();
    let runtime = fixture.runtime().unwrap();

    let request = OrderFixture::request().with_item("SKU-1", u32::MAX);
    let id = runtime.start(request.to_value());
    let result = runtime.await_result(id).await.unwrap();

    assert_status(&result, PipelineStatus::Failed);
    assert_completed_stages(&result, &[PAYMENT_CHARGED]);
    assert_failure_mentions(&result, "quantity overflow");
    assert_compensated(&result, &[PAYMENT_CHARGED]);
    assert_eq!(fixture.payment.refunds_applied(), 1);
    assert_eq!(fixture.inventory.available("SKU-1"), 10);
}

#[tokio::test]
async fn scenario_d_third_stage_failure() {
    let fixture = OrderFixture::new();
    let runtime = fixture.runtime().unwrap();

    let mut request = OrderFixture::request();
    request.address = UNDELIVERABLE_ADDRESS.to_string();
    let id = runtime.start(request.to_value());
    let result = runtime.await_result(id).await.unwrap();

    assert_status(&result, PipelineStatus::Failed);
    assert_completed_stages(&result, &[PAYMENT_CHARGED, INVENTORY_RESERVED]);
    assert_compensated(&result, &[INVENTORY_RESERVED, PAYMENT_CHARGED]);
    assert_eq!(
        result.compensations[0].result_token,
        result.token(INVENTORY_RESERVED).unwrap()
    );
    assert_eq!(
        result.compensations[1].result_token,
        result.token(PAYMENT_CHARGED).unwrap()
    );

    assert_eq!(fixture.inventory.available("SKU-1"), 10);
    assert_eq!(fixture.inventory.active_reservations(), 0);
    assert_eq!(fixture.payment.refunds_applied(), 1);
    assert_eq!(fixture.shipping.active_shipments(), 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_e_gate_timeout() {
    let fixture = DocumentFixture::new();
    let config = PipelineConfig::default()
        .with_gate(GateConfig::default().with_timeout(Duration::from_secs(15 * 60)));
    let orchestrator = fixture.orchestrator(config).unwrap();

    let handle = orchestrator.prepare(
        DocumentFixture::request("INVOICE 2024-17\namount due: 40 EUR").to_value(),
        Priority::Normal,
    );
    let result = orchestrator.execute(&handle).await;

    assert_status(&result, PipelineStatus::Completed);
    assert_eq!(result.decision_source, Some(DecisionSource::Timeout));
    let decision = result.decision.clone().unwrap();
    assert!(!decision.approved);
    assert_eq!(decision.comments, DEFAULT_TIMEOUT_REASON);

    assert_eq!(result.token(DOCUMENT_FINALIZED), Some("REJECTED"));
    let document_id = result.token(DOCUMENT_PERSISTED).unwrap();
    assert_eq!(fixture.storage.status(document_id), Some(DocumentStatus::Rejected));
    assert_eq!(fixture.desk.requests().len(), 1);
}

#[tokio::test]
async fn scenario_f_mid_flight_update() {
    let slow = Arc::new(BlockingCapability::new("slow", "slow-token"));
    let registry = StageRegistry::builder("update")
        .stage(StageSpec::action(
            "FIRST",
            Arc::new(ScriptedCapability::succeeding("first", "first-token")),
        ))
        .stage(StageSpec::action("SLOW", slow.clone()))
        .build()
        .unwrap();
    let runtime = PipelineRuntime::new(Orchestrator::new(
        registry,
        Arc::new(LocalSubstrate::new()),
        PipelineConfig::default(),
    ));

    let id = runtime.start(json!({}));
    let handle = runtime.handle(id).unwrap();
    slow.entered().await;

    assert_eq!(handle.set_priority(Priority::High).unwrap(), Priority::Normal);
    assert_eq!(handle.query("getPriority").unwrap(), json!("HIGH"));
    assert_eq!(handle.status(), PipelineStatus::Running);

    slow.release();
    let result = runtime.await_result(id).await.unwrap();
    assert_status(&result, PipelineStatus::Completed);
    assert_eq!(result.priority, Priority::High);

    let rejection = handle.set_priority(Priority::Low).unwrap_err();
    assert!(matches!(
        rejection,
        UpdateRejection::TerminalStatus {
            status: PipelineStatus::Completed,
            ..
        }
    ));
    assert_eq!(handle.priority(), Priority::High);
}
