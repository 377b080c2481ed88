//! Pipeline definition and execution.
//!
//! This module provides:
//! - Stage specifications and the validated stage registry
//! - Retry policies and the reliable-call helper
//! - The orchestrator and its compensation path

mod compensation;
mod orchestrator;
mod registry;
mod retry;
mod spec;

pub use compensation::FAILURE_NOTIFICATION;
pub use orchestrator::Orchestrator;
pub use registry::{RegistryEntry, StageRegistry, StageRegistryBuilder};
pub use retry::{should_retry, with_retry, JitterStrategy, RetryDecision, RetryPolicy, RetryState};
pub use spec::{StageKind, StageSpec};
