//! Document storage: persist forward, mark failed to compensate.

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{CapabilityCall, CompensatingCapability, CompensationCall, ForwardCapability};
use crate::errors::CapabilityError;
use crate::utils::service_token;

const CAPABILITY: &str = "storage";

/// Processing status of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    /// Stored, not yet processed.
    Received,
    /// Processing started.
    Processing,
    /// Approved and finalized.
    Processed,
    /// Rejected at review.
    Rejected,
    /// Rolled back after a failure.
    Failed,
}

/// A document held by the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    /// Original file name.
    pub filename: String,
    /// Raw content.
    pub content: Vec<u8>,
    /// Current status.
    pub status: DocumentStatus,
}

/// An external document store.
#[async_trait]
pub trait DocumentStorage: Send + Sync + fmt::Debug {
    /// Stores a document and returns its id.
    async fn persist(
        &self,
        filename: &str,
        content: Vec<u8>,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError>;

    /// Sets the processing status of a document.
    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<(), CapabilityError>;

    /// Returns the raw content of a document.
    async fn retrieve(&self, id: &str) -> Result<Vec<u8>, CapabilityError>;
}

#[derive(Debug, Default)]
struct Shelf {
    documents: HashMap<String, StoredDocument>,
    by_key: HashMap<String, String>,
}

/// In-memory document store.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStorage {
    shelf: Mutex<Shelf>,
}

impl InMemoryDocumentStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a stored document.
    #[must_use]
    pub fn document(&self, id: &str) -> Option<StoredDocument> {
        self.shelf.lock().documents.get(id).cloned()
    }

    /// Returns the status of a stored document.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<DocumentStatus> {
        self.shelf.lock().documents.get(id).map(|d| d.status)
    }
}

#[async_trait]
impl DocumentStorage for InMemoryDocumentStorage {
    async fn persist(
        &self,
        filename: &str,
        content: Vec<u8>,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError> {
        if content.is_empty() {
            return Err(CapabilityError::rejected(CAPABILITY, "document is empty"));
        }

        let mut shelf = self.shelf.lock();
        if let Some(id) = shelf.by_key.get(idempotency_key) {
            return Ok(id.clone());
        }

        let id = service_token("doc");
        shelf.documents.insert(
            id.clone(),
            StoredDocument {
                filename: filename.to_string(),
                content,
                status: DocumentStatus::Received,
            },
        );
        shelf.by_key.insert(idempotency_key.to_string(), id.clone());
        Ok(id)
    }

    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<(), CapabilityError> {
        match self.shelf.lock().documents.get_mut(id) {
            Some(doc) => {
                doc.status = status;
                Ok(())
            }
            None => Err(CapabilityError::rejected(CAPABILITY, format!("unknown document {id}"))),
        }
    }

    async fn retrieve(&self, id: &str) -> Result<Vec<u8>, CapabilityError> {
        self.shelf
            .lock()
            .documents
            .get(id)
            .map(|d| d.content.clone())
            .ok_or_else(|| CapabilityError::rejected(CAPABILITY, format!("unknown document {id}")))
    }
}

#[derive(Debug, Deserialize)]
struct PersistView {
    filename: String,
    content_base64: String,
}

/// Stage capability storing the uploaded document; rollback marks it failed.
#[derive(Debug, Clone)]
pub struct PersistDocument {
    storage: Arc<dyn DocumentStorage>,
}

impl PersistDocument {
    /// Creates the capability.
    pub fn new(storage: Arc<dyn DocumentStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ForwardCapability for PersistDocument {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError> {
        let view: PersistView = call.decode(CAPABILITY)?;
        let content = base64::engine::general_purpose::STANDARD
            .decode(view.content_base64.as_bytes())
            .map_err(|e| {
                CapabilityError::invalid_request(CAPABILITY, format!("content is not base64: {e}"))
            })?;
        self.storage
            .persist(&view.filename, content, &call.idempotency_key)
            .await
    }
}

#[async_trait]
impl CompensatingCapability for PersistDocument {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn compensate(&self, call: &CompensationCall) -> Result<(), CapabilityError> {
        self.storage.update_status(&call.token, DocumentStatus::Failed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InstanceId;

    #[tokio::test]
    async fn test_persist_decodes_base64() {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        let capability = PersistDocument::new(storage.clone());
        let call = CapabilityCall::new(
            InstanceId::new(),
            "DOCUMENT_PERSISTED",
            Arc::new(serde_json::json!({"filename": "a.txt", "content_base64": "aGVsbG8="})),
        );

        let id = capability.invoke(&call).await.unwrap();
        assert_eq!(storage.retrieve(&id).await.unwrap(), b"hello");
        assert_eq!(storage.status(&id), Some(DocumentStatus::Received));
    }

    #[tokio::test]
    async fn test_persist_rejects_bad_base64() {
        let capability = PersistDocument::new(Arc::new(InMemoryDocumentStorage::new()));
        let call = CapabilityCall::new(
            InstanceId::new(),
            "DOCUMENT_PERSISTED",
            Arc::new(serde_json::json!({"filename": "a.txt", "content_base64": "***"})),
        );

        let err = capability.invoke(&call).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_compensate_marks_failed() {
        let storage = Arc::new(InMemoryDocumentStorage::new());
        let id = storage.persist("a.txt", b"x".to_vec(), "k").await.unwrap();

        let capability = PersistDocument::new(storage.clone());
        let call = CompensationCall::new(
            InstanceId::new(),
            "DOCUMENT_PERSISTED",
            id.clone(),
            Arc::new(serde_json::json!({})),
        );
        capability.compensate(&call).await.unwrap();
        capability.compensate(&call).await.unwrap();

        assert_eq!(storage.status(&id), Some(DocumentStatus::Failed));
    }
}
