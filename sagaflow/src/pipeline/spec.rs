//! Stage specifications.

use std::fmt;
use std::sync::Arc;

use super::RetryPolicy;
use crate::capabilities::{CompensatingCapability, ForwardCapability};

/// Whether a stage failure triggers compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageKind {
    /// A failure fails the pipeline and compensates earlier stages.
    #[default]
    Action,
    /// Best effort: a failure is recorded as a warning and the pipeline
    /// continues.
    Notify,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action => write!(f, "action"),
            Self::Notify => write!(f, "notify"),
        }
    }
}

/// Specification for a single stage. Immutable configuration.
#[derive(Clone)]
pub struct StageSpec {
    /// The unique name of the stage; also its completed-step key.
    pub name: String,
    /// Explicit position; assigned by the registry builder when `None`.
    pub order: Option<u32>,
    /// The kind of stage.
    pub kind: StageKind,
    /// Forward action.
    pub forward: Arc<dyn ForwardCapability>,
    /// Optional compensating action.
    pub compensation: Option<Arc<dyn CompensatingCapability>>,
    /// Forward retry override.
    pub retry: Option<RetryPolicy>,
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("kind", &self.kind)
            .field("forward", &self.forward.name())
            .field("compensation", &self.compensation.as_ref().map(|c| c.name().to_string()))
            .field("retry", &self.retry)
            .finish()
    }
}

impl StageSpec {
    /// Creates an action stage without a compensating action.
    #[must_use]
    pub fn action(name: impl Into<String>, forward: Arc<dyn ForwardCapability>) -> Self {
        Self {
            name: name.into(),
            order: None,
            kind: StageKind::Action,
            forward,
            compensation: None,
            retry: None,
        }
    }

    /// Creates an action stage whose capability also compensates.
    #[must_use]
    pub fn compensated<C>(name: impl Into<String>, capability: Arc<C>) -> Self
    where
        C: ForwardCapability + CompensatingCapability + 'static,
    {
        let compensation: Arc<dyn CompensatingCapability> = capability.clone();
        Self::action(name, capability).with_compensation(compensation)
    }

    /// Creates a best-effort notify stage.
    #[must_use]
    pub fn notify(name: impl Into<String>, forward: Arc<dyn ForwardCapability>) -> Self {
        Self {
            kind: StageKind::Notify,
            ..Self::action(name, forward)
        }
    }

    /// Sets the compensating action.
    #[must_use]
    pub fn with_compensation(mut self, compensation: Arc<dyn CompensatingCapability>) -> Self {
        self.compensation = Some(compensation);
        self
    }

    /// Sets an explicit order.
    #[must_use]
    pub fn with_order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }

    /// Overrides the forward retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Returns true for best-effort stages.
    #[must_use]
    pub fn is_notify(&self) -> bool {
        self.kind == StageKind::Notify
    }
}
