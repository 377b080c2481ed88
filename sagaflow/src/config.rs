//! Pipeline configuration records.
//!
//! Every field has a serde default so partial JSON documents are accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::core::Decision;
use crate::errors::SagaflowError;

pub use crate::pipeline::{JitterStrategy, RetryPolicy};

/// Comments on the decision synthesized when the window expires.
pub const DEFAULT_TIMEOUT_REASON: &str = "decision window expired";

fn default_gate_timeout_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_timeout_reason() -> String {
    DEFAULT_TIMEOUT_REASON.to_string()
}

/// Decision-window configuration of a gate.
///
/// When the window elapses without a delivered decision the gate proceeds
/// with a rejecting decision whose comments are `timeout_reason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// How long to wait for an external decision.
    #[serde(default = "default_gate_timeout_ms")]
    pub timeout_ms: u64,
    /// Comments carried by the synthesized decision.
    #[serde(default = "default_timeout_reason")]
    pub timeout_reason: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_gate_timeout_ms(),
            timeout_reason: default_timeout_reason(),
        }
    }
}

impl GateConfig {
    /// Sets the decision window.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the comments of the synthesized decision.
    #[must_use]
    pub fn with_timeout_reason(mut self, reason: impl Into<String>) -> Self {
        self.timeout_reason = reason.into();
        self
    }

    /// Returns the decision window.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Builds the deterministic default decision.
    #[must_use]
    pub fn default_decision(&self, at: DateTime<Utc>) -> Decision {
        Decision::reject(self.timeout_reason.clone()).decided_at(at)
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Policy for forward actions without an override.
    #[serde(default)]
    pub forward_retry: RetryPolicy,
    /// Per-stage forward policy overrides keyed by stage name.
    #[serde(default)]
    pub stage_retry: HashMap<String, RetryPolicy>,
    /// Policy for compensating actions.
    #[serde(default = "RetryPolicy::single_attempt")]
    pub compensation_retry: RetryPolicy,
    /// Policy for notify stages and the failure notification.
    #[serde(default = "RetryPolicy::single_attempt")]
    pub notification_retry: RetryPolicy,
    /// Gate decision window.
    #[serde(default)]
    pub gate: GateConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            forward_retry: RetryPolicy::default(),
            stage_retry: HashMap::new(),
            compensation_retry: RetryPolicy::single_attempt(),
            notification_retry: RetryPolicy::single_attempt(),
            gate: GateConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns `SagaflowError::Config` if the document does not decode.
    pub fn from_json_str(json: &str) -> Result<Self, SagaflowError> {
        serde_json::from_str(json).map_err(|e| SagaflowError::Config(e.to_string()))
    }

    /// Sets the default forward policy.
    #[must_use]
    pub fn with_forward_retry(mut self, policy: RetryPolicy) -> Self {
        self.forward_retry = policy;
        self
    }

    /// Overrides the forward policy of one stage.
    #[must_use]
    pub fn with_stage_retry(mut self, stage: impl Into<String>, policy: RetryPolicy) -> Self {
        self.stage_retry.insert(stage.into(), policy);
        self
    }

    /// Sets the compensation policy.
    #[must_use]
    pub fn with_compensation_retry(mut self, policy: RetryPolicy) -> Self {
        self.compensation_retry = policy;
        self
    }

    /// Sets the notification policy.
    #[must_use]
    pub fn with_notification_retry(mut self, policy: RetryPolicy) -> Self {
        self.notification_retry = policy;
        self
    }

    /// Sets the gate configuration.
    #[must_use]
    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    /// Returns the forward policy for a stage.
    #[must_use]
    pub fn forward_policy(&self, stage: &str) -> &RetryPolicy {
        self.stage_retry.get(stage).unwrap_or(&self.forward_retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_gate_decision_rejects() {
        let config = GateConfig::default();
        let decision = config.default_decision(Utc::now());

        assert!(!decision.approved);
        assert_eq!(decision.comments, "decision window expired");
    }

    #[test]
    fn test_compensation_defaults_to_single_attempt() {
        let config = PipelineConfig::default();
        assert_eq!(config.compensation_retry.max_attempts, 1);
        assert_eq!(config.forward_retry.max_attempts, 3);
    }

    #[test]
    fn test_from_json_partial() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "stage_retry": {"SHIPMENT_SCHEDULED": {"max_attempts": 7}},
                "gate": {"timeout_ms": 5000}
            }"#,
        )
        .unwrap();

        assert_eq!(config.forward_policy("SHIPMENT_SCHEDULED").max_attempts, 7);
        assert_eq!(config.forward_policy("PAYMENT_CHARGED").max_attempts, 3);
        assert_eq!(config.gate.timeout(), Duration::from_secs(5));
        assert_eq!(config.gate.timeout_reason, DEFAULT_TIMEOUT_REASON);
        assert_eq!(config.compensation_retry.max_attempts, 1);
    }

    #[test]
    fn test_from_json_invalid() {
        let err = PipelineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, SagaflowError::Config(_)));
    }
}
