//! The external decision gate.
//!
//! `request()` notifies an external decision-maker and returns a
//! correlation token without waiting. `wait()` suspends until a decision is
//! delivered through the control plane, the decision window elapses, or
//! cancellation is observed. An elapsed window is not an error: the gate
//! proceeds with the deterministic default decision of its [`GateConfig`].

use chrono::Utc;
use std::fmt;
use std::sync::Arc;

use crate::capabilities::{CapabilityCall, ForwardCapability};
use crate::config::GateConfig;
use crate::control::PipelineHandle;
use crate::core::Decision;
use crate::errors::CapabilityError;
use crate::pipeline::RetryPolicy;
use crate::substrate::ExecutionSubstrate;

/// How a gate wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// A decision was delivered in time.
    Decided(Decision),
    /// The window elapsed; carries the synthesized default decision.
    TimedOut(Decision),
    /// Cancellation was observed while waiting.
    Cancelled,
}

impl GateOutcome {
    /// Returns the decision, unless cancelled.
    #[must_use]
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::Decided(d) | Self::TimedOut(d) => Some(d),
            Self::Cancelled => None,
        }
    }
}

/// A suspension point awaiting an external decision.
#[derive(Clone)]
pub struct ExternalGate {
    name: String,
    order: Option<u32>,
    requester: Arc<dyn ForwardCapability>,
    config: Option<GateConfig>,
}

impl fmt::Debug for ExternalGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalGate")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("requester", &self.requester.name())
            .field("config", &self.config)
            .finish()
    }
}

impl ExternalGate {
    /// Creates a gate whose request is sent through `requester`.
    #[must_use]
    pub fn new(name: impl Into<String>, requester: Arc<dyn ForwardCapability>) -> Self {
        Self {
            name: name.into(),
            order: None,
            requester,
            config: None,
        }
    }

    /// Sets an explicit order.
    #[must_use]
    pub fn with_order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }

    /// Overrides the pipeline-level gate configuration.
    #[must_use]
    pub fn with_config(mut self, config: GateConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Returns the gate name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the order.
    #[must_use]
    pub fn order(&self) -> Option<u32> {
        self.order
    }

    pub(crate) fn set_order(&mut self, order: u32) {
        self.order = Some(order);
    }

    /// Returns the gate's own configuration, falling back to `default`.
    #[must_use]
    pub fn config_or<'a>(&'a self, default: &'a GateConfig) -> &'a GateConfig {
        self.config.as_ref().unwrap_or(default)
    }

    /// Sends the review request and returns its correlation token.
    ///
    /// # Errors
    ///
    /// Returns the requester's error once `policy` is exhausted.
    pub async fn request<S: ExecutionSubstrate>(
        &self,
        substrate: &S,
        policy: &RetryPolicy,
        call: &CapabilityCall,
    ) -> Result<String, CapabilityError> {
        let call = call.clone().with_action("request");
        let requester = self.requester.clone();
        let key = call.idempotency_key.clone();

        substrate
            .call(policy, &key, |attempt| {
                let call = call.for_attempt(attempt);
                let requester = requester.clone();
                async move { requester.invoke(&call).await }
            })
            .await
    }

    /// Waits for a decision, the window to elapse, or cancellation.
    pub async fn wait<S: ExecutionSubstrate>(
        &self,
        handle: &PipelineHandle,
        substrate: &S,
        config: &GateConfig,
    ) -> GateOutcome {
        let mut timer = substrate.sleep(config.timeout());

        loop {
            let notified = handle.notified();
            if let Some(outcome) = handle.poll_gate() {
                return outcome;
            }

            tokio::select! {
                () = &mut timer => {
                    return handle.resolve_gate_timeout(config.default_decision(Utc::now()));
                }
                () = notified => {}
            }
        }
    }
}
