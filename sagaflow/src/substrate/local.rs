//! In-process substrate on tokio.

use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::ExecutionSubstrate;
use crate::context::{ContextSnapshot, InstanceId};
use crate::errors::CapabilityError;
use crate::pipeline::{with_retry, RetryPolicy};

/// Substrate backed by tokio timers and an in-memory checkpoint table.
///
/// Keeps the latest checkpoint per instance so a crashed instance can be
/// restarted from it.
#[derive(Debug, Default)]
pub struct LocalSubstrate {
    checkpoints: DashMap<InstanceId, ContextSnapshot>,
    checkpoint_count: AtomicUsize,
}

impl LocalSubstrate {
    /// Creates a substrate with no checkpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the latest checkpoint of an instance.
    #[must_use]
    pub fn latest_checkpoint(&self, id: InstanceId) -> Option<ContextSnapshot> {
        self.checkpoints.get(&id).map(|entry| entry.value().clone())
    }

    /// Returns the number of checkpoints taken across all instances.
    #[must_use]
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoint_count.load(Ordering::Relaxed)
    }

    /// Drops the checkpoint of an instance.
    pub fn forget(&self, id: InstanceId) {
        self.checkpoints.remove(&id);
    }
}

#[async_trait]
impl ExecutionSubstrate for LocalSubstrate {
    async fn call<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        key: &str,
        operation: F,
    ) -> Result<T, CapabilityError>
    where
        T: Send,
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = Result<T, CapabilityError>> + Send,
    {
        with_retry(policy, key, operation).await
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn checkpoint(&self, snapshot: &ContextSnapshot) {
        tracing::trace!(
            instance_id = %snapshot.context.id(),
            suspension = %snapshot.suspension,
            "Checkpoint"
        );
        self.checkpoints.insert(snapshot.context.id(), snapshot.clone());
        self.checkpoint_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PipelineContext, SuspensionPoint};
    use crate::pipeline::JitterStrategy;

    #[tokio::test]
    async fn test_checkpoint_keeps_latest() {
        let substrate = LocalSubstrate::new();
        let ctx = PipelineContext::new(InstanceId::new(), "order", serde_json::json!({}));
        let id = ctx.id();

        substrate
            .checkpoint(&ContextSnapshot::new(
                ctx.clone(),
                SuspensionPoint::StageBoundary(0),
                Vec::new(),
            ))
            .await;
        substrate
            .checkpoint(&ContextSnapshot::new(ctx, SuspensionPoint::StageBoundary(1), Vec::new()))
            .await;

        assert_eq!(substrate.checkpoint_count(), 2);
        assert_eq!(
            substrate.latest_checkpoint(id).unwrap().suspension,
            SuspensionPoint::StageBoundary(1)
        );

        substrate.forget(id);
        assert!(substrate.latest_checkpoint(id).is_none());
    }

    #[tokio::test]
    async fn test_call_retries_transient() {
        let substrate = LocalSubstrate::new();
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_interval_ms(1)
            .with_jitter(JitterStrategy::None);

        let result = substrate
            .call(&policy, "k", |attempt| async move {
                if attempt == 1 {
                    Err(CapabilityError::transient("x", "blip"))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_uses_tokio_clock() {
        let substrate = LocalSubstrate::new();
        let before = tokio::time::Instant::now();
        substrate.sleep(Duration::from_secs(3600)).await;
        assert!(before.elapsed() >= Duration::from_secs(3600));
    }
}
