//! Document processing: persist, extract, OCR, classify, review, finalize.
//!
//! The review gate waits for a human decision; when none arrives within the
//! window the document is rejected with the configured reason. Only the
//! persisted document has a compensating action (it is marked failed).

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::capabilities::notification::{
    Notifier, RecipientFields, SendCancellation, SendConfirmation,
};
use crate::capabilities::processing::{DocumentProcessor, ProcessDocument, ProcessingStep};
use crate::capabilities::review::{RequestReview, ReviewDesk};
use crate::capabilities::storage::{DocumentStorage, PersistDocument};
use crate::errors::RegistryError;
use crate::gate::ExternalGate;
use crate::pipeline::{StageRegistry, StageSpec};

/// Registry name.
pub const DOCUMENT_PIPELINE: &str = "document";
/// Stored; its token is the document id.
pub const DOCUMENT_PERSISTED: &str = "DOCUMENT_PERSISTED";
/// Size, digest and line count extracted.
pub const METADATA_EXTRACTED: &str = "METADATA_EXTRACTED";
/// Text recognised.
pub const OCR_COMPLETED: &str = "OCR_COMPLETED";
/// Category assigned.
pub const DOCUMENT_CLASSIFIED: &str = "DOCUMENT_CLASSIFIED";
/// The human review gate.
pub const REVIEW: &str = "REVIEW";
/// Review decision applied.
pub const DOCUMENT_FINALIZED: &str = "DOCUMENT_FINALIZED";
/// Submitter told.
pub const SUBMITTER_NOTIFIED: &str = "SUBMITTER_NOTIFIED";

/// Request payload of the document pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRequest {
    /// Original file name.
    pub filename: String,
    /// Document bytes, standard base64.
    pub content_base64: String,
    /// Who uploaded it; receives notifications.
    pub submitter: String,
}

impl DocumentRequest {
    /// Creates a request from raw bytes.
    #[must_use]
    pub fn from_bytes(
        filename: impl Into<String>,
        content: &[u8],
        submitter: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(content),
            submitter: submitter.into(),
        }
    }

    /// Returns the JSON payload the stages decode.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "filename": self.filename,
            "content_base64": self.content_base64,
            "submitter": self.submitter,
        })
    }
}

/// The services the document pipeline calls.
#[derive(Debug, Clone)]
pub struct DocumentServices {
    /// Document store.
    pub storage: Arc<dyn DocumentStorage>,
    /// Metadata, OCR, classification and finalization.
    pub processor: Arc<dyn DocumentProcessor>,
    /// Where review requests go.
    pub desk: Arc<dyn ReviewDesk>,
    /// Sends outcome notices.
    pub notifier: Arc<dyn Notifier>,
}

/// Builds the document processing registry.
///
/// # Errors
///
/// Only fails if the stage table itself is inconsistent.
pub fn document_registry(services: &DocumentServices) -> Result<StageRegistry, RegistryError> {
    let recipients = RecipientFields::new("filename", "submitter");
    let step = |step| {
        Arc::new(ProcessDocument::new(
            Arc::clone(&services.processor),
            step,
            DOCUMENT_PERSISTED,
        ))
    };

    StageRegistry::builder(DOCUMENT_PIPELINE)
        .stage(StageSpec::compensated(
            DOCUMENT_PERSISTED,
            Arc::new(PersistDocument::new(Arc::clone(&services.storage))),
        ))
        .stage(StageSpec::action(METADATA_EXTRACTED, step(ProcessingStep::ExtractMetadata)))
        .stage(StageSpec::action(OCR_COMPLETED, step(ProcessingStep::Ocr)))
        .stage(StageSpec::action(DOCUMENT_CLASSIFIED, step(ProcessingStep::Classify)))
        .gate(ExternalGate::new(
            REVIEW,
            Arc::new(RequestReview::new(Arc::clone(&services.desk), DOCUMENT_PERSISTED)),
        ))
        .stage(StageSpec::action(DOCUMENT_FINALIZED, step(ProcessingStep::Finalize)))
        .stage(StageSpec::notify(
            SUBMITTER_NOTIFIED,
            Arc::new(SendConfirmation::new(Arc::clone(&services.notifier), recipients.clone())),
        ))
        .failure_notification(Arc::new(SendCancellation::new(
            Arc::clone(&services.notifier),
            recipients,
        )))
        .build()
}
