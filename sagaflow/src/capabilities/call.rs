//! Call payloads handed to capabilities.

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::context::InstanceId;
use crate::core::Decision;
use crate::errors::CapabilityError;
use crate::utils::idempotency_key;

/// Callback through which a long-running capability reports progress.
#[derive(Clone)]
pub struct ProgressReporter(Arc<dyn Fn(u8) + Send + Sync>);

impl ProgressReporter {
    /// Wraps a callback receiving a percentage.
    pub fn new(f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// A reporter that discards updates.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Reports progress; values above 100 are clamped.
    pub fn report(&self, percent: u8) {
        (self.0)(percent.min(100));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressReporter")
    }
}

/// Input to a forward action.
#[derive(Debug, Clone)]
pub struct CapabilityCall {
    /// Instance the call belongs to.
    pub instance_id: InstanceId,
    /// Stage (or gate) name.
    pub stage: String,
    /// The request the instance was started with.
    pub request: Arc<serde_json::Value>,
    /// Tokens of the stages completed before this one.
    pub tokens: BTreeMap<String, String>,
    /// The gate decision, for post-gate stages.
    pub decision: Option<Decision>,
    /// The failure reason, for the failure notification.
    pub failure_reason: Option<String>,
    /// 1-based attempt number under the retry policy.
    pub attempt: u32,
    /// Deterministic key; identical across re-deliveries.
    pub idempotency_key: String,
    /// Progress callback.
    pub progress: ProgressReporter,
}

impl CapabilityCall {
    /// Creates a first-attempt forward call.
    #[must_use]
    pub fn new(
        instance_id: InstanceId,
        stage: impl Into<String>,
        request: Arc<serde_json::Value>,
    ) -> Self {
        let stage = stage.into();
        Self {
            idempotency_key: idempotency_key(instance_id, &stage, "forward"),
            instance_id,
            stage,
            request,
            tokens: BTreeMap::new(),
            decision: None,
            failure_reason: None,
            attempt: 1,
            progress: ProgressReporter::noop(),
        }
    }

    /// Re-derives the idempotency key for a different action on the stage.
    #[must_use]
    pub fn with_action(mut self, action: &str) -> Self {
        self.idempotency_key = idempotency_key(self.instance_id, &self.stage, action);
        self
    }

    /// Sets the tokens of earlier stages.
    #[must_use]
    pub fn with_tokens(mut self, tokens: BTreeMap<String, String>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Sets the gate decision.
    #[must_use]
    pub fn with_decision(mut self, decision: Option<Decision>) -> Self {
        self.decision = decision;
        self
    }

    /// Sets the failure reason.
    #[must_use]
    pub fn with_failure_reason(mut self, reason: Option<String>) -> Self {
        self.failure_reason = reason;
        self
    }

    /// Sets the progress callback.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Returns a copy for the given attempt.
    #[must_use]
    pub fn for_attempt(&self, attempt: u32) -> Self {
        let mut call = self.clone();
        call.attempt = attempt;
        call
    }

    /// Returns the token of an earlier stage.
    #[must_use]
    pub fn token(&self, stage: &str) -> Option<&str> {
        self.tokens.get(stage).map(String::as_str)
    }

    /// Returns the token of an earlier stage or an invalid-request error.
    pub fn require_token(&self, stage: &str, capability: &str) -> Result<&str, CapabilityError> {
        self.token(stage).ok_or_else(|| {
            CapabilityError::invalid_request(capability, format!("missing token of stage {stage}"))
        })
    }

    /// Decodes the request into the view a capability needs.
    pub fn decode<T: DeserializeOwned>(&self, capability: &str) -> Result<T, CapabilityError> {
        serde_json::from_value(self.request.as_ref().clone())
            .map_err(|e| CapabilityError::invalid_request(capability, e.to_string()))
    }
}

/// Input to a compensating action.
#[derive(Debug, Clone)]
pub struct CompensationCall {
    /// Instance the call belongs to.
    pub instance_id: InstanceId,
    /// Stage being compensated.
    pub stage: String,
    /// Token returned by the forward action.
    pub token: String,
    /// The request the instance was started with.
    pub request: Arc<serde_json::Value>,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Deterministic key; identical across re-deliveries.
    pub idempotency_key: String,
}

impl CompensationCall {
    /// Creates a first-attempt compensation call.
    #[must_use]
    pub fn new(
        instance_id: InstanceId,
        stage: impl Into<String>,
        token: impl Into<String>,
        request: Arc<serde_json::Value>,
    ) -> Self {
        let stage = stage.into();
        Self {
            idempotency_key: idempotency_key(instance_id, &stage, "compensate"),
            instance_id,
            stage,
            token: token.into(),
            request,
            attempt: 1,
        }
    }

    /// Returns a copy for the given attempt.
    #[must_use]
    pub fn for_attempt(&self, attempt: u32) -> Self {
        let mut call = self.clone();
        call.attempt = attempt;
        call
    }
}
