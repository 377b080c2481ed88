//! Document processing: metadata, OCR, classification and finalization.
//!
//! None of these stages has external side effects beyond the document
//! status, so only finalization touches the store.

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::storage::{DocumentStatus, DocumentStorage};
use super::{CapabilityCall, ForwardCapability, ProgressReporter};
use crate::core::Decision;
use crate::errors::CapabilityError;

const CAPABILITY: &str = "processing";

/// Facts extracted from a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Content size.
    pub size_bytes: usize,
    /// SHA-256 of the content, hex encoded.
    pub sha256: String,
    /// Number of lines.
    pub line_count: usize,
}

/// Classification of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentCategory {
    /// A bill.
    Invoice,
    /// A proof of payment.
    Receipt,
    /// An agreement.
    Contract,
    /// Anything else.
    General,
}

impl fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invoice => write!(f, "INVOICE"),
            Self::Receipt => write!(f, "RECEIPT"),
            Self::Contract => write!(f, "CONTRACT"),
            Self::General => write!(f, "GENERAL"),
        }
    }
}

fn category_rules() -> &'static [(Regex, DocumentCategory)] {
    static RULES: OnceLock<Vec<(Regex, DocumentCategory)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"(?i)\binvoice\b|\bamount due\b", DocumentCategory::Invoice),
            (r"(?i)\breceipt\b|\bpaid\b", DocumentCategory::Receipt),
            (r"(?i)\bcontract\b|\bagreement\b", DocumentCategory::Contract),
        ]
        .into_iter()
        .filter_map(|(pattern, category)| Regex::new(pattern).ok().map(|re| (re, category)))
        .collect()
    })
}

/// Classifies text by the first matching keyword rule.
#[must_use]
pub fn classify_text(text: &str) -> DocumentCategory {
    category_rules()
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map_or(DocumentCategory::General, |(_, category)| *category)
}

/// The processing service.
#[async_trait]
pub trait DocumentProcessor: Send + Sync + fmt::Debug {
    /// Computes metadata of a stored document.
    async fn extract_metadata(&self, id: &str) -> Result<DocumentMetadata, CapabilityError>;

    /// Extracts text, reporting progress as it goes.
    async fn perform_ocr(
        &self,
        id: &str,
        progress: &ProgressReporter,
    ) -> Result<String, CapabilityError>;

    /// Classifies extracted text.
    async fn classify(&self, id: &str, text: &str) -> Result<DocumentCategory, CapabilityError>;

    /// Applies the review decision and returns the final status.
    async fn finalize(
        &self,
        id: &str,
        decision: &Decision,
    ) -> Result<DocumentStatus, CapabilityError>;

    /// Returns previously extracted text.
    fn ocr_text(&self, id: &str) -> Option<String>;
}

/// Processor reading content from a [`DocumentStorage`].
///
/// OCR treats the stored bytes as UTF-8 text and reports progress in
/// quarters.
#[derive(Debug)]
pub struct LocalDocumentProcessor {
    storage: Arc<dyn DocumentStorage>,
    texts: Mutex<HashMap<String, String>>,
}

impl LocalDocumentProcessor {
    /// Creates a processor over a store.
    pub fn new(storage: Arc<dyn DocumentStorage>) -> Self {
        Self {
            storage,
            texts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DocumentProcessor for LocalDocumentProcessor {
    async fn extract_metadata(&self, id: &str) -> Result<DocumentMetadata, CapabilityError> {
        let content = self.storage.retrieve(id).await?;
        self.storage.update_status(id, DocumentStatus::Processing).await?;
        Ok(DocumentMetadata {
            size_bytes: content.len(),
            sha256: hex::encode(Sha256::digest(&content)),
            line_count: content.split(|b| *b == b'\n').count(),
        })
    }

    async fn perform_ocr(
        &self,
        id: &str,
        progress: &ProgressReporter,
    ) -> Result<String, CapabilityError> {
        let content = self.storage.retrieve(id).await?;
        let text = String::from_utf8_lossy(&content).into_owned();
        if text.trim().is_empty() {
            return Err(CapabilityError::rejected(CAPABILITY, "no text found"));
        }

        for quarter in 1..=4u8 {
            tokio::task::yield_now().await;
            progress.report(quarter * 25);
        }

        self.texts.lock().insert(id.to_string(), text.clone());
        Ok(text)
    }

    async fn classify(&self, _id: &str, text: &str) -> Result<DocumentCategory, CapabilityError> {
        Ok(classify_text(text))
    }

    async fn finalize(
        &self,
        id: &str,
        decision: &Decision,
    ) -> Result<DocumentStatus, CapabilityError> {
        let status = if decision.approved {
            DocumentStatus::Processed
        } else {
            DocumentStatus::Rejected
        };
        self.storage.update_status(id, status).await?;
        Ok(status)
    }

    fn ocr_text(&self, id: &str) -> Option<String> {
        self.texts.lock().get(id).cloned()
    }
}

/// Which processing step a [`ProcessDocument`] stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStep {
    /// Metadata extraction.
    ExtractMetadata,
    /// OCR with progress.
    Ocr,
    /// Keyword classification of the OCR text.
    Classify,
    /// Applying the review decision.
    Finalize,
}

/// Stage capability running one processing step on the persisted document.
#[derive(Debug, Clone)]
pub struct ProcessDocument {
    processor: Arc<dyn DocumentProcessor>,
    step: ProcessingStep,
    document_stage: String,
}

impl ProcessDocument {
    /// Creates a step reading the document id from `document_stage`'s token.
    pub fn new(
        processor: Arc<dyn DocumentProcessor>,
        step: ProcessingStep,
        document_stage: impl Into<String>,
    ) -> Self {
        Self {
            processor,
            step,
            document_stage: document_stage.into(),
        }
    }
}

#[async_trait]
impl ForwardCapability for ProcessDocument {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError> {
        let id = call.require_token(&self.document_stage, CAPABILITY)?;

        match self.step {
            ProcessingStep::ExtractMetadata => {
                let metadata = self.processor.extract_metadata(id).await?;
                serde_json::to_string(&metadata)
                    .map_err(|e| CapabilityError::invalid_request(CAPABILITY, e.to_string()))
            }
            ProcessingStep::Ocr => {
                let text = self.processor.perform_ocr(id, &call.progress).await?;
                Ok(format!("ocr:{id}:{}", text.chars().count()))
            }
            ProcessingStep::Classify => {
                let text = match self.processor.ocr_text(id) {
                    Some(text) => text,
                    None => self.processor.perform_ocr(id, &ProgressReporter::noop()).await?,
                };
                Ok(self.processor.classify(id, &text).await?.to_string())
            }
            ProcessingStep::Finalize => {
                let decision = call.decision.as_ref().ok_or_else(|| {
                    CapabilityError::invalid_request(
                        CAPABILITY,
                        "finalize requires a review decision",
                    )
                })?;
                let status = self.processor.finalize(id, decision).await?;
                Ok(format!("{status:?}").to_uppercase())
            }
        }
    }
}
