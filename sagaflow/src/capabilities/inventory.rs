//! Inventory: reserve forward, release to compensate.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{CapabilityCall, CompensatingCapability, CompensationCall, ForwardCapability};
use crate::errors::CapabilityError;
use crate::utils::service_token;

const CAPABILITY: &str = "inventory";

/// One order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Stock keeping unit.
    pub sku: String,
    /// Units requested.
    pub quantity: u32,
}

impl LineItem {
    /// Creates a line item.
    #[must_use]
    pub fn new(sku: impl Into<String>, quantity: u32) -> Self {
        Self {
            sku: sku.into(),
            quantity,
        }
    }
}

/// An external stock service.
#[async_trait]
pub trait InventoryService: Send + Sync + fmt::Debug {
    /// Reserves every line or none of them.
    async fn reserve(
        &self,
        items: &[LineItem],
        idempotency_key: &str,
    ) -> Result<String, CapabilityError>;

    /// Returns reserved units to stock. Releasing twice has no further effect.
    async fn release(&self, token: &str) -> Result<(), CapabilityError>;
}

#[derive(Debug, Clone)]
struct Reservation {
    items: Vec<LineItem>,
    released: bool,
}

#[derive(Debug, Default)]
struct Stock {
    available: HashMap<String, u32>,
    reservations: HashMap<String, Reservation>,
    by_key: HashMap<String, String>,
}

/// In-memory stock ledger.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    stock: Mutex<Stock>,
}

impl InMemoryInventory {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the available units of a SKU.
    #[must_use]
    pub fn with_stock(self, sku: impl Into<String>, units: u32) -> Self {
        self.stock.lock().available.insert(sku.into(), units);
        self
    }

    /// Returns available units of a SKU.
    #[must_use]
    pub fn available(&self, sku: &str) -> u32 {
        self.stock.lock().available.get(sku).copied().unwrap_or(0)
    }

    /// Returns the number of reservations still held.
    #[must_use]
    pub fn active_reservations(&self) -> usize {
        self.stock
            .lock()
            .reservations
            .values()
            .filter(|r| !r.released)
            .count()
    }
}

#[async_trait]
impl InventoryService for InMemoryInventory {
    async fn reserve(
        &self,
        items: &[LineItem],
        idempotency_key: &str,
    ) -> Result<String, CapabilityError> {
        if items.is_empty() {
            return Err(CapabilityError::invalid_request(CAPABILITY, "order has no items"));
        }

        let mut stock = self.stock.lock();
        if let Some(token) = stock.by_key.get(idempotency_key) {
            return Ok(token.clone());
        }

        let mut needed: HashMap<&str, u32> = HashMap::new();
        for item in items {
            let total = needed.entry(item.sku.as_str()).or_insert(0);
            *total = total.checked_add(item.quantity).ok_or_else(|| {
                CapabilityError::invalid_request(
                    CAPABILITY,
                    format!("quantity overflow for {}", item.sku),
                )
            })?;
        }
        for (sku, quantity) in &needed {
            match stock.available.get(*sku) {
                None => {
                    return Err(CapabilityError::rejected(
                        CAPABILITY,
                        format!("unknown sku {sku}"),
                    ))
                }
                Some(units) if units < quantity => {
                    return Err(CapabilityError::rejected(
                        CAPABILITY,
                        format!("out of stock: {sku}"),
                    ));
                }
                Some(_) => {}
            }
        }

        for (sku, quantity) in needed {
            if let Some(units) = stock.available.get_mut(sku) {
                *units -= quantity;
            }
        }

        let token = service_token("inv");
        stock.reservations.insert(
            token.clone(),
            Reservation {
                items: items.to_vec(),
                released: false,
            },
        );
        stock.by_key.insert(idempotency_key.to_string(), token.clone());
        Ok(token)
    }

    async fn release(&self, token: &str) -> Result<(), CapabilityError> {
        let mut stock = self.stock.lock();
        let items = match stock.reservations.get_mut(token) {
            None => {
                return Err(CapabilityError::rejected(
                    CAPABILITY,
                    format!("unknown reservation {token}"),
                ));
            }
            Some(reservation) if reservation.released => return Ok(()),
            Some(reservation) => {
                reservation.released = true;
                reservation.items.clone()
            }
        };

        for item in items {
            let units = stock.available.entry(item.sku).or_insert(0);
            *units = units.saturating_add(item.quantity);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ReserveView {
    items: Vec<LineItem>,
}

/// Stage capability reserving the order lines and releasing them on rollback.
#[derive(Debug, Clone)]
pub struct ReserveInventory {
    service: Arc<dyn InventoryService>,
}

impl ReserveInventory {
    /// Creates the capability.
    pub fn new(service: Arc<dyn InventoryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ForwardCapability for ReserveInventory {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError> {
        let view: ReserveView = call.decode(CAPABILITY)?;
        self.service.reserve(&view.items, &call.idempotency_key).await
    }
}

#[async_trait]
impl CompensatingCapability for ReserveInventory {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn compensate(&self, call: &CompensationCall) -> Result<(), CapabilityError> {
        self.service.release(&call.token).await
    }
}
