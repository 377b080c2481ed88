//! Ready-made pipelines wired to in-memory services.

use std::sync::Arc;

use crate::capabilities::inventory::InMemoryInventory;
use crate::capabilities::notification::InMemoryNotifier;
use crate::capabilities::payment::InMemoryPaymentGateway;
use crate::capabilities::processing::LocalDocumentProcessor;
use crate::capabilities::review::InMemoryReviewDesk;
use crate::capabilities::shipping::InMemoryShipping;
use crate::capabilities::storage::InMemoryDocumentStorage;
use crate::config::PipelineConfig;
use crate::errors::RegistryError;
use crate::pipeline::{Orchestrator, StageRegistry};
use crate::pipelines::{
    document_registry, order_registry, DocumentRequest, DocumentServices, OrderRequest,
    OrderServices,
};
use crate::runtime::PipelineRuntime;
use crate::substrate::LocalSubstrate;

/// Customer with no funds.
pub const BROKE_CUSTOMER: &str = "cust-broke";
/// SKU with no stock.
pub const SOLD_OUT_SKU: &str = "SKU-SOLD-OUT";
/// Address the carrier refuses.
pub const UNDELIVERABLE_ADDRESS: &str = "Nowhere";

/// Order pipeline services with inspectable state.
#[derive(Debug, Clone)]
pub struct OrderFixture {
    /// Payment ledger.
    pub payment: Arc<InMemoryPaymentGateway>,
    /// Stock ledger.
    pub inventory: Arc<InMemoryInventory>,
    /// Shipment book.
    pub shipping: Arc<InMemoryShipping>,
    /// Sent notifications.
    pub notifier: Arc<InMemoryNotifier>,
}

impl Default for OrderFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderFixture {
    /// Creates services that accept [`OrderFixture::request`] and refuse the
    /// broke customer, the sold-out SKU and the undeliverable address.
    #[must_use]
    pub fn new() -> Self {
        Self {
            payment: Arc::new(InMemoryPaymentGateway::new(100_000).with_balance(BROKE_CUSTOMER, 0)),
            inventory: Arc::new(
                InMemoryInventory::new()
                    .with_stock("SKU-1", 10)
                    .with_stock("SKU-2", 5)
                    .with_stock(SOLD_OUT_SKU, 0),
            ),
            shipping: Arc::new(InMemoryShipping::new().with_undeliverable(UNDELIVERABLE_ADDRESS)),
            notifier: Arc::new(InMemoryNotifier::new()),
        }
    }

    /// A single-item order every service accepts.
    #[must_use]
    pub fn request() -> OrderRequest {
        OrderRequest::new("order-1", "cust-1", "cust-1@example.com", "1 Main St, Springfield")
            .with_item("SKU-1", 1)
            .with_amount_cents(2_500)
    }

    /// Returns the services as trait objects.
    #[must_use]
    pub fn services(&self) -> OrderServices {
        OrderServices {
            payment: self.payment.clone(),
            inventory: self.inventory.clone(),
            shipping: self.shipping.clone(),
            notifier: self.notifier.clone(),
        }
    }

    /// Builds the order registry.
    pub fn registry(&self) -> Result<StageRegistry, RegistryError> {
        order_registry(&self.services())
    }

    /// Builds an orchestrator on a fresh local substrate.
    pub fn orchestrator(&self, config: PipelineConfig) -> Result<Orchestrator, RegistryError> {
        Ok(Orchestrator::new(
            self.registry()?,
            Arc::new(LocalSubstrate::new()),
            config,
        ))
    }

    /// Builds a runtime with the default configuration.
    pub fn runtime(&self) -> Result<PipelineRuntime, RegistryError> {
        Ok(PipelineRuntime::new(self.orchestrator(PipelineConfig::default())?))
    }
}

/// Document pipeline services with inspectable state.
#[derive(Debug, Clone)]
pub struct DocumentFixture {
    /// Document store.
    pub storage: Arc<InMemoryDocumentStorage>,
    /// Processor over the store.
    pub processor: Arc<LocalDocumentProcessor>,
    /// Received review requests.
    pub desk: Arc<InMemoryReviewDesk>,
    /// Sent notifications.
    pub notifier: Arc<InMemoryNotifier>,
}

impl Default for DocumentFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentFixture {
    /// Creates empty services.
    #[must_use]
    pub fn new() -> Self {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        Self {
            processor: Arc::new(LocalDocumentProcessor::new(storage.clone())),
            storage,
            desk: Arc::new(InMemoryReviewDesk::new()),
            notifier: Arc::new(InMemoryNotifier::new()),
        }
    }

    /// A text document submitted by a fixed submitter.
    #[must_use]
    pub fn request(text: &str) -> DocumentRequest {
        DocumentRequest::from_bytes("scan.txt", text.as_bytes(), "clerk@example.com")
    }

    /// Returns the services as trait objects.
    #[must_use]
    pub fn services(&self) -> DocumentServices {
        DocumentServices {
            storage: self.storage.clone(),
            processor: self.processor.clone(),
            desk: self.desk.clone(),
            notifier: self.notifier.clone(),
        }
    }

    /// Builds the document registry.
    pub fn registry(&self) -> Result<StageRegistry, RegistryError> {
        document_registry(&self.services())
    }

    /// Builds an orchestrator on a fresh local substrate.
    pub fn orchestrator(&self, config: PipelineConfig) -> Result<Orchestrator, RegistryError> {
        Ok(Orchestrator::new(
            self.registry()?,
            Arc::new(LocalSubstrate::new()),
            config,
        ))
    }
}
