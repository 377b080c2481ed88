//! The pipeline surface: start instances, reach them, await their results.
//!
//! Every instance runs on its own tokio task. The instance table keeps its
//! handle until the result has been retrieved, after which the instance is
//! forgotten.

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::context::{ContextSnapshot, InstanceId};
use crate::control::PipelineHandle;
use crate::core::{PipelineResult, PipelineStatus, Priority};
use crate::errors::SagaflowError;
use crate::pipeline::Orchestrator;
use crate::substrate::{ExecutionSubstrate, LocalSubstrate};

/// The instance's task outcome. Cloneable so a dropped waiter loses nothing.
type TaskOutcome = Shared<BoxFuture<'static, Result<PipelineResult, String>>>;

struct InstanceEntry {
    handle: PipelineHandle,
    outcome: TaskOutcome,
}

/// Runs instances of one pipeline definition.
pub struct PipelineRuntime<S: ExecutionSubstrate = LocalSubstrate> {
    orchestrator: Arc<Orchestrator<S>>,
    instances: DashMap<InstanceId, InstanceEntry>,
}

impl<S: ExecutionSubstrate> fmt::Debug for PipelineRuntime<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRuntime")
            .field("orchestrator", &self.orchestrator)
            .field("instances", &self.instances.len())
            .finish()
    }
}

impl<S: ExecutionSubstrate> PipelineRuntime<S> {
    /// Creates a runtime around an orchestrator.
    #[must_use]
    pub fn new(orchestrator: Orchestrator<S>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            instances: DashMap::new(),
        }
    }

    /// Returns the orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator<S>> {
        &self.orchestrator
    }

    /// Starts an instance at normal priority and returns its id.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, request: Value) -> InstanceId {
        self.start_with_priority(request, Priority::Normal)
    }

    /// Starts an instance at the given priority and returns its id.
    pub fn start_with_priority(&self, request: Value, priority: Priority) -> InstanceId {
        let handle = self.orchestrator.prepare(request, priority);
        info!(instance_id = %handle.instance_id(), pipeline = %handle.pipeline(), "Instance accepted");
        self.spawn(handle)
    }

    /// Resumes an instance from its latest checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `SagaflowError::Internal` if the instance is already running
    /// in this runtime.
    pub fn resume(&self, snapshot: ContextSnapshot) -> Result<InstanceId, SagaflowError> {
        let id = snapshot.context.id();
        if self.instances.contains_key(&id) {
            return Err(SagaflowError::Internal(format!(
                "instance {id} is already running"
            )));
        }
        info!(instance_id = %id, suspension = %snapshot.suspension, "Instance resumed from checkpoint");
        Ok(self.spawn(self.orchestrator.restore(snapshot)))
    }

    fn spawn(&self, handle: PipelineHandle) -> InstanceId {
        let id = handle.instance_id();
        let orchestrator = Arc::clone(&self.orchestrator);
        let task_handle = handle.clone();
        let task = tokio::spawn(async move { orchestrator.execute(&task_handle).await });
        let outcome = task.map(|joined| joined.map_err(|e| e.to_string())).boxed().shared();

        self.instances.insert(id, InstanceEntry { handle, outcome });
        id
    }

    /// Returns the control-plane handle of a live instance.
    ///
    /// # Errors
    ///
    /// Returns `SagaflowError::NotFound` for unknown or retrieved instances.
    pub fn handle(&self, id: InstanceId) -> Result<PipelineHandle, SagaflowError> {
        self.instances
            .get(&id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| SagaflowError::NotFound(id.to_string()))
    }

    /// Waits for an instance to finish and returns its result.
    ///
    /// The instance is forgotten once its result has been retrieved.
    /// Dropping the returned future before it resolves leaves the instance
    /// in the table, so a later call still gets the result.
    ///
    /// # Errors
    ///
    /// Returns `SagaflowError::NotFound` for unknown or already retrieved
    /// instances and `SagaflowError::Internal` if its task panicked.
    pub async fn await_result(&self, id: InstanceId) -> Result<PipelineResult, SagaflowError> {
        let outcome = self
            .instances
            .get(&id)
            .map(|entry| entry.outcome.clone())
            .ok_or_else(|| SagaflowError::NotFound(id.to_string()))?;

        let outcome = outcome.await;
        self.instances.remove(&id);

        match outcome {
            Ok(result) => {
                debug!(instance_id = %id, status = %result.status, "Result retrieved");
                Ok(result)
            }
            Err(e) => {
                error!(instance_id = %id, error = %e, "Instance task failed");
                Err(SagaflowError::Internal(format!("instance {id} task failed: {e}")))
            }
        }
    }

    /// Waits for every live instance and returns their results by id order.
    pub async fn await_all(&self) -> Vec<Result<PipelineResult, SagaflowError>> {
        let ids: Vec<InstanceId> = self.list().into_iter().map(|(id, _)| id).collect();
        futures::future::join_all(ids.into_iter().map(|id| self.await_result(id))).await
    }

    /// Lists live instances with their current status, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<(InstanceId, PipelineStatus)> {
        let mut instances: Vec<_> = self
            .instances
            .iter()
            .map(|entry| (*entry.key(), entry.handle.status()))
            .collect();
        instances.sort_by_key(|(id, _)| *id);
        instances
    }

    /// Returns the number of live instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns true if no instance is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilityCall, ForwardCapability};
    use crate::config::PipelineConfig;
    use crate::errors::CapabilityError;
    use crate::pipeline::{StageRegistry, StageSpec};
    use crate::testing::BlockingCapability;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl ForwardCapability for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError> {
            Ok(call.request["value"].to_string())
        }
    }

    fn runtime() -> PipelineRuntime {
        let registry = StageRegistry::builder("echo")
            .stage(StageSpec::action("ECHO", Arc::new(Echo)))
            .build()
            .unwrap();
        PipelineRuntime::new(Orchestrator::new(
            registry,
            Arc::new(LocalSubstrate::new()),
            PipelineConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_start_and_await() {
        let runtime = runtime();
        let id = runtime.start(json!({"value": 7}));

        assert!(runtime.handle(id).is_ok());
        let result = runtime.await_result(id).await.unwrap();

        assert_eq!(result.instance_id, id);
        assert_eq!(result.token("ECHO"), Some("7"));
        assert!(runtime.is_empty());
    }

    #[tokio::test]
    async fn test_result_is_retrieved_once() {
        let runtime = runtime();
        let id = runtime.start(json!({"value": 1}));
        runtime.await_result(id).await.unwrap();

        assert!(matches!(runtime.await_result(id).await, Err(SagaflowError::NotFound(_))));
        assert!(matches!(runtime.handle(id), Err(SagaflowError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let runtime = runtime();
        let ids: Vec<_> = (0..5).map(|i| runtime.start(json!({"value": i}))).collect();
        assert_eq!(runtime.len(), 5);

        let results = runtime.await_all().await;
        assert_eq!(results.len(), 5);
        for result in results {
            let result = result.unwrap();
            assert!(ids.contains(&result.instance_id));
            assert!(result.is_success());
        }
    }

    #[tokio::test]
    async fn test_dropped_await_keeps_result() {
        let gate = Arc::new(BlockingCapability::new("slow", "done"));
        let registry = StageRegistry::builder("blocking")
            .stage(StageSpec::action("SLOW", gate.clone()))
            .build()
            .unwrap();
        let runtime = PipelineRuntime::new(Orchestrator::new(
            registry,
            Arc::new(LocalSubstrate::new()),
            PipelineConfig::default(),
        ));

        let id = runtime.start(json!({}));
        gate.entered().await;
        let early = tokio::time::timeout(Duration::from_millis(10), runtime.await_result(id)).await;
        assert!(early.is_err());
        assert_eq!(runtime.len(), 1);

        gate.release();
        let result = runtime.await_result(id).await.unwrap();
        assert_eq!(result.token("SLOW"), Some("done"));
        assert!(runtime.is_empty());
    }

    #[tokio::test]
    async fn test_resume_rejects_live_instance() {
        let runtime = runtime();
        let id = runtime.start(json!({"value": 1}));
        let snapshot = runtime.handle(id).unwrap().snapshot();

        assert!(runtime.resume(snapshot).is_err());
        runtime.await_result(id).await.unwrap();
    }
}
