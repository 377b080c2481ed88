//! Shipping: schedule forward, cancel to compensate.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{CapabilityCall, CompensatingCapability, CompensationCall, ForwardCapability};
use crate::errors::CapabilityError;
use crate::utils::service_token;

const CAPABILITY: &str = "shipping";

/// An external carrier.
#[async_trait]
pub trait ShippingService: Send + Sync + fmt::Debug {
    /// Schedules a shipment for an order.
    async fn schedule(
        &self,
        order_id: &str,
        address: &str,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError>;

    /// Cancels a shipment. Cancelling twice has no further effect.
    async fn cancel(&self, token: &str) -> Result<(), CapabilityError>;
}

/// A shipment held by the in-memory carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shipment {
    /// Order being shipped.
    pub order_id: String,
    /// Destination.
    pub address: String,
    /// Whether the shipment was cancelled.
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct Schedule {
    shipments: HashMap<String, Shipment>,
    by_key: HashMap<String, String>,
}

/// In-memory carrier that refuses configured destinations.
#[derive(Debug, Default)]
pub struct InMemoryShipping {
    schedule: Mutex<Schedule>,
    undeliverable: Vec<String>,
}

impl InMemoryShipping {
    /// Creates a carrier that delivers everywhere.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses addresses containing `fragment` (case-insensitive).
    #[must_use]
    pub fn with_undeliverable(mut self, fragment: impl Into<String>) -> Self {
        self.undeliverable.push(fragment.into().to_lowercase());
        self
    }

    /// Returns a shipment by token.
    #[must_use]
    pub fn shipment(&self, token: &str) -> Option<Shipment> {
        self.schedule.lock().shipments.get(token).cloned()
    }

    /// Returns the number of shipments that are not cancelled.
    #[must_use]
    pub fn active_shipments(&self) -> usize {
        self.schedule
            .lock()
            .shipments
            .values()
            .filter(|s| !s.cancelled)
            .count()
    }
}

#[async_trait]
impl ShippingService for InMemoryShipping {
    async fn schedule(
        &self,
        order_id: &str,
        address: &str,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError> {
        if address.trim().is_empty() {
            return Err(CapabilityError::invalid_request(CAPABILITY, "address is empty"));
        }

        let lowered = address.to_lowercase();
        if self.undeliverable.iter().any(|f| lowered.contains(f.as_str())) {
            return Err(CapabilityError::rejected(
                CAPABILITY,
                format!("cannot deliver to {address}"),
            ));
        }

        let mut schedule = self.schedule.lock();
        if let Some(token) = schedule.by_key.get(idempotency_key) {
            return Ok(token.clone());
        }

        let token = service_token("ship");
        schedule.shipments.insert(
            token.clone(),
            Shipment {
                order_id: order_id.to_string(),
                address: address.to_string(),
                cancelled: false,
            },
        );
        schedule.by_key.insert(idempotency_key.to_string(), token.clone());
        Ok(token)
    }

    async fn cancel(&self, token: &str) -> Result<(), CapabilityError> {
        match self.schedule.lock().shipments.get_mut(token) {
            Some(shipment) => {
                shipment.cancelled = true;
                Ok(())
            }
            None => Err(CapabilityError::rejected(CAPABILITY, format!("unknown shipment {token}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScheduleView {
    order_id: String,
    address: String,
}

/// Stage capability scheduling delivery and cancelling it on rollback.
#[derive(Debug, Clone)]
pub struct ScheduleShipment {
    service: Arc<dyn ShippingService>,
}

impl ScheduleShipment {
    /// Creates the capability.
    pub fn new(service: Arc<dyn ShippingService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ForwardCapability for ScheduleShipment {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError> {
        let view: ScheduleView = call.decode(CAPABILITY)?;
        self.service
            .schedule(&view.order_id, &view.address, &call.idempotency_key)
            .await
    }
}

#[async_trait]
impl CompensatingCapability for ScheduleShipment {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn compensate(&self, call: &CompensationCall) -> Result<(), CapabilityError> {
        self.service.cancel(&call.token).await
    }
}
