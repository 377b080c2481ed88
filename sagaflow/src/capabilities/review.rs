//! Review desk: asks an external reviewer for a decision.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{CapabilityCall, ForwardCapability};
use crate::errors::CapabilityError;
use crate::utils::service_token;

const CAPABILITY: &str = "review";

/// A review request recorded by the in-memory desk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    /// Reviewed subject.
    pub subject: String,
    /// Correlation token the reviewer answers with.
    pub correlation: String,
}

/// An external review queue. The decision arrives later through the
/// control plane; requesting a review never waits for it.
#[async_trait]
pub trait ReviewDesk: Send + Sync + fmt::Debug {
    /// Queues a review and returns its correlation token.
    async fn request_review(
        &self,
        subject: &str,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError>;
}

#[derive(Debug, Default)]
struct Queue {
    requests: Vec<ReviewRequest>,
    by_key: HashMap<String, String>,
}

/// In-memory review queue.
#[derive(Debug, Default)]
pub struct InMemoryReviewDesk {
    queue: Mutex<Queue>,
}

impl InMemoryReviewDesk {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every request received.
    #[must_use]
    pub fn requests(&self) -> Vec<ReviewRequest> {
        self.queue.lock().requests.clone()
    }
}

#[async_trait]
impl ReviewDesk for InMemoryReviewDesk {
    async fn request_review(
        &self,
        subject: &str,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError> {
        let mut queue = self.queue.lock();
        if let Some(correlation) = queue.by_key.get(idempotency_key) {
            return Ok(correlation.clone());
        }

        let correlation = service_token("review");
        queue.requests.push(ReviewRequest {
            subject: subject.to_string(),
            correlation: correlation.clone(),
        });
        queue.by_key.insert(idempotency_key.to_string(), correlation.clone());
        Ok(correlation)
    }
}

/// Gate requester asking for review of the subject produced by an earlier stage.
#[derive(Debug, Clone)]
pub struct RequestReview {
    desk: Arc<dyn ReviewDesk>,
    subject_stage: String,
}

impl RequestReview {
    /// Creates the requester.
    pub fn new(desk: Arc<dyn ReviewDesk>, subject_stage: impl Into<String>) -> Self {
        Self {
            desk,
            subject_stage: subject_stage.into(),
        }
    }
}

#[async_trait]
impl ForwardCapability for RequestReview {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError> {
        let subject = call.require_token(&self.subject_stage, CAPABILITY)?;
        self.desk.request_review(subject, &call.idempotency_key).await
    }
}
