//! The durable-execution interface the orchestrator consumes.
//!
//! A production substrate provides at-least-once calls with retry, durable
//! timers and crash-safe checkpoints. [`LocalSubstrate`] provides the same
//! contract in-process on tokio.

mod local;

pub use local::LocalSubstrate;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::context::ContextSnapshot;
use crate::errors::CapabilityError;
use crate::pipeline::RetryPolicy;

/// Primitives supplied by the execution substrate.
#[async_trait]
pub trait ExecutionSubstrate: Send + Sync + 'static {
    /// Runs `operation` under `policy`, passing the 1-based attempt number.
    ///
    /// `key` identifies the logical call; re-deliveries reuse it.
    async fn call<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        key: &str,
        operation: F,
    ) -> Result<T, CapabilityError>
    where
        T: Send,
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = Result<T, CapabilityError>> + Send;

    /// Suspends for `duration` on a durable timer.
    async fn sleep(&self, duration: Duration);

    /// Persists a resumption checkpoint.
    async fn checkpoint(&self, snapshot: &ContextSnapshot);
}
