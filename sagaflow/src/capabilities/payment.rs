//! Payment gateway: charge forward, refund to compensate.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{CapabilityCall, CompensatingCapability, CompensationCall, ForwardCapability};
use crate::errors::CapabilityError;
use crate::utils::service_token;

const CAPABILITY: &str = "payment";

/// An external payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync + fmt::Debug {
    /// Charges a customer. Repeating a call with the same key returns the
    /// original token.
    async fn charge(
        &self,
        customer: &str,
        amount_cents: u64,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError>;

    /// Refunds a charge. Refunding twice has no further effect.
    async fn refund(&self, token: &str) -> Result<(), CapabilityError>;
}

/// A charge held by the in-memory gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRecord {
    /// Charged customer.
    pub customer: String,
    /// Charged amount.
    pub amount_cents: u64,
    /// Whether the charge was refunded.
    pub refunded: bool,
}

#[derive(Debug, Default)]
struct Ledger {
    balances: HashMap<String, u64>,
    charges: HashMap<String, ChargeRecord>,
    by_key: HashMap<String, String>,
    refunds_applied: usize,
}

/// In-memory gateway backed by per-customer balances.
///
/// Customers without an explicit balance get `default_balance`.
#[derive(Debug)]
pub struct InMemoryPaymentGateway {
    ledger: Mutex<Ledger>,
    default_balance: u64,
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl InMemoryPaymentGateway {
    /// Creates a gateway granting every unknown customer `default_balance`.
    #[must_use]
    pub fn new(default_balance: u64) -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            default_balance,
        }
    }

    /// Sets a customer's balance.
    #[must_use]
    pub fn with_balance(self, customer: impl Into<String>, balance_cents: u64) -> Self {
        self.ledger.lock().balances.insert(customer.into(), balance_cents);
        self
    }

    /// Returns a customer's current balance.
    #[must_use]
    pub fn balance(&self, customer: &str) -> u64 {
        self.ledger
            .lock()
            .balances
            .get(customer)
            .copied()
            .unwrap_or(self.default_balance)
    }

    /// Returns a charge by token.
    #[must_use]
    pub fn charge_record(&self, token: &str) -> Option<ChargeRecord> {
        self.ledger.lock().charges.get(token).cloned()
    }

    /// Returns the number of charges taken.
    #[must_use]
    pub fn charge_count(&self) -> usize {
        self.ledger.lock().charges.len()
    }

    /// Returns the number of refunds that moved money.
    #[must_use]
    pub fn refunds_applied(&self) -> usize {
        self.ledger.lock().refunds_applied
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(
        &self,
        customer: &str,
        amount_cents: u64,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError> {
        if amount_cents == 0 {
            return Err(CapabilityError::invalid_request(CAPABILITY, "amount must be positive"));
        }

        let mut ledger = self.ledger.lock();
        if let Some(token) = ledger.by_key.get(idempotency_key) {
            return Ok(token.clone());
        }

        let balance = ledger
            .balances
            .get(customer)
            .copied()
            .unwrap_or(self.default_balance);
        if balance < amount_cents {
            return Err(CapabilityError::rejected(CAPABILITY, "insufficient funds"));
        }

        let token = service_token("pay");
        ledger
            .balances
            .insert(customer.to_string(), balance - amount_cents);
        ledger.charges.insert(
            token.clone(),
            ChargeRecord {
                customer: customer.to_string(),
                amount_cents,
                refunded: false,
            },
        );
        ledger.by_key.insert(idempotency_key.to_string(), token.clone());
        Ok(token)
    }

    async fn refund(&self, token: &str) -> Result<(), CapabilityError> {
        let mut ledger = self.ledger.lock();
        let Some(charge) = ledger.charges.get_mut(token) else {
            return Err(CapabilityError::rejected(CAPABILITY, format!("unknown charge {token}")));
        };
        if charge.refunded {
            return Ok(());
        }

        charge.refunded = true;
        let customer = charge.customer.clone();
        let amount = charge.amount_cents;
        let default_balance = self.default_balance;
        let balance = ledger.balances.entry(customer).or_insert(default_balance);
        *balance = balance.saturating_add(amount);
        ledger.refunds_applied += 1;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ChargeView {
    customer_id: String,
    amount_cents: u64,
}

/// Stage capability charging the order total and refunding it on rollback.
#[derive(Debug, Clone)]
pub struct ChargePayment {
    gateway: Arc<dyn PaymentGateway>,
}

impl ChargePayment {
    /// Creates the capability.
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ForwardCapability for ChargePayment {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError> {
        let view: ChargeView = call.decode(CAPABILITY)?;
        self.gateway
            .charge(&view.customer_id, view.amount_cents, &call.idempotency_key)
            .await
    }
}

#[async_trait]
impl CompensatingCapability for ChargePayment {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn compensate(&self, call: &CompensationCall) -> Result<(), CapabilityError> {
        self.gateway.refund(&call.token).await
    }
}
