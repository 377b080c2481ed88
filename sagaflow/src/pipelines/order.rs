//! Order fulfilment: charge, reserve, schedule, confirm.
//!
//! A failure after the charge refunds it; a failure after the reservation
//! releases it before refunding. The confirmation is best effort. When the
//! order fails, the customer receives a cancellation notice.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::capabilities::inventory::{InventoryService, LineItem, ReserveInventory};
use crate::capabilities::notification::{
    Notifier, RecipientFields, SendCancellation, SendConfirmation,
};
use crate::capabilities::payment::{ChargePayment, PaymentGateway};
use crate::capabilities::shipping::{ScheduleShipment, ShippingService};
use crate::errors::RegistryError;
use crate::pipeline::{StageRegistry, StageSpec};

/// Registry name.
pub const ORDER_PIPELINE: &str = "order";
/// The order total was charged.
pub const PAYMENT_CHARGED: &str = "PAYMENT_CHARGED";
/// The order lines were reserved.
pub const INVENTORY_RESERVED: &str = "INVENTORY_RESERVED";
/// Delivery was scheduled.
pub const SHIPMENT_SCHEDULED: &str = "SHIPMENT_SCHEDULED";
/// The customer was told.
pub const CONFIRMATION_SENT: &str = "CONFIRMATION_SENT";

/// Request payload of the order pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Merchant order reference.
    pub order_id: String,
    /// Customer charged for the order.
    pub customer_id: String,
    /// Where notifications go.
    pub email: String,
    /// Total to charge.
    pub amount_cents: u64,
    /// Lines to reserve.
    pub items: Vec<LineItem>,
    /// Delivery address.
    pub address: String,
}

impl OrderRequest {
    /// Creates an order with no lines and a zero total.
    #[must_use]
    pub fn new(
        order_id: impl Into<String>,
        customer_id: impl Into<String>,
        email: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            customer_id: customer_id.into(),
            email: email.into(),
            amount_cents: 0,
            items: Vec::new(),
            address: address.into(),
        }
    }

    /// Adds a line.
    #[must_use]
    pub fn with_item(mut self, sku: impl Into<String>, quantity: u32) -> Self {
        self.items.push(LineItem::new(sku, quantity));
        self
    }

    /// Sets the total.
    #[must_use]
    pub fn with_amount_cents(mut self, amount_cents: u64) -> Self {
        self.amount_cents = amount_cents;
        self
    }

    /// Returns the JSON payload the stages decode.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "order_id": self.order_id,
            "customer_id": self.customer_id,
            "email": self.email,
            "amount_cents": self.amount_cents,
            "items": self.items,
            "address": self.address,
        })
    }
}

/// The services the order pipeline calls.
#[derive(Debug, Clone)]
pub struct OrderServices {
    /// Charges and refunds.
    pub payment: Arc<dyn PaymentGateway>,
    /// Reserves and releases stock.
    pub inventory: Arc<dyn InventoryService>,
    /// Schedules and cancels delivery.
    pub shipping: Arc<dyn ShippingService>,
    /// Sends confirmations and cancellation notices.
    pub notifier: Arc<dyn Notifier>,
}

/// Builds the order fulfilment registry.
///
/// # Errors
///
/// Only fails if the stage table itself is inconsistent.
pub fn order_registry(services: &OrderServices) -> Result<StageRegistry, RegistryError> {
    let recipients = RecipientFields::new("order_id", "email");

    StageRegistry::builder(ORDER_PIPELINE)
        .stage(StageSpec::compensated(
            PAYMENT_CHARGED,
            Arc::new(ChargePayment::new(Arc::clone(&services.payment))),
        ))
        .stage(StageSpec::compensated(
            INVENTORY_RESERVED,
            Arc::new(ReserveInventory::new(Arc::clone(&services.inventory))),
        ))
        .stage(StageSpec::compensated(
            SHIPMENT_SCHEDULED,
            Arc::new(ScheduleShipment::new(Arc::clone(&services.shipping))),
        ))
        .stage(StageSpec::notify(
            CONFIRMATION_SENT,
            Arc::new(SendConfirmation::new(Arc::clone(&services.notifier), recipients.clone())),
        ))
        .failure_notification(Arc::new(SendCancellation::new(
            Arc::clone(&services.notifier),
            recipients,
        )))
        .build()
}
