//! Test-only failure injection.
//!
//! A [`FailureSwitchboard`] is shared between an orchestrator and the
//! handles it creates. The `injectFailure` signal arms a stage for one
//! instance; the [`FailureInjector`] wrapped around that stage's forward
//! action then rejects every invocation for that instance.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::capabilities::{CapabilityCall, ForwardCapability};
use crate::context::InstanceId;
use crate::errors::CapabilityError;

/// Reason carried by injected rejections.
pub const INJECTED_FAILURE: &str = "injected failure";

/// The set of armed `(instance, stage)` pairs.
#[derive(Debug, Default)]
pub struct FailureSwitchboard {
    armed: Mutex<HashSet<(InstanceId, String)>>,
}

impl FailureSwitchboard {
    /// Creates an empty switchboard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `stage` for `instance_id`. Idempotent.
    pub fn arm(&self, instance_id: InstanceId, stage: &str) {
        self.armed.lock().insert((instance_id, stage.to_string()));
    }

    /// Returns true if `stage` is armed for `instance_id`.
    #[must_use]
    pub fn is_armed(&self, instance_id: InstanceId, stage: &str) -> bool {
        self.armed.lock().contains(&(instance_id, stage.to_string()))
    }

    /// Wraps a forward action so it honours this switchboard.
    pub fn wrap(self: &Arc<Self>, inner: Arc<dyn ForwardCapability>) -> Arc<dyn ForwardCapability> {
        Arc::new(FailureInjector {
            inner,
            switchboard: Arc::clone(self),
        })
    }
}

/// Forward-action override that rejects armed stages.
#[derive(Debug)]
pub struct FailureInjector {
    inner: Arc<dyn ForwardCapability>,
    switchboard: Arc<FailureSwitchboard>,
}

#[async_trait]
impl ForwardCapability for FailureInjector {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError> {
        if self.switchboard.is_armed(call.instance_id, &call.stage) {
            tracing::debug!(instance_id = %call.instance_id, stage = %call.stage, "Injected failure");
            return Err(CapabilityError::rejected(self.inner.name(), INJECTED_FAILURE));
        }
        self.inner.invoke(call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl ForwardCapability for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError> {
            Ok(call.stage.clone())
        }
    }

    #[tokio::test]
    async fn test_injector_only_affects_armed_instance() {
        let switchboard = Arc::new(FailureSwitchboard::new());
        let capability = switchboard.wrap(Arc::new(Echo));

        let armed = InstanceId::new();
        let other = InstanceId::new();
        switchboard.arm(armed, "SHIP");

        let request = Arc::new(serde_json::json!({}));
        let err = capability
            .invoke(&CapabilityCall::new(armed, "SHIP", request.clone()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CapabilityError::Rejected { ref reason, .. } if reason == INJECTED_FAILURE
        ));

        let token = capability
            .invoke(&CapabilityCall::new(other, "SHIP", request.clone()))
            .await
            .unwrap();
        assert_eq!(token, "SHIP");

        let token = capability
            .invoke(&CapabilityCall::new(armed, "PAY", request))
            .await
            .unwrap();
        assert_eq!(token, "PAY");
    }
}
