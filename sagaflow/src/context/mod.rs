//! Per-instance state.
//!
//! This module provides:
//! - Instance identifiers
//! - The mutable `PipelineContext` record and its invariants
//! - Serializable snapshots used as resumption checkpoints

mod identity;
mod pipeline_context;
mod snapshot;

pub use identity::InstanceId;
pub use pipeline_context::{ContextError, PipelineContext};
pub use snapshot::{ContextSnapshot, SuspensionPoint};
