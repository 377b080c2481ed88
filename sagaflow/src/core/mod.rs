//! Core domain model types for sagaflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Pipeline status and priority enums
//! - Decisions delivered to the gate
//! - Completed-step and compensation records
//! - The terminal pipeline result

mod decision;
mod result;
mod status;
mod step;

pub use decision::{Decision, DecisionSource};
pub use result::{PipelineResult, PipelineTimestamps};
pub use status::{PipelineStatus, Priority};
pub use step::{CompensationOutcome, CompensationRecord, CompletedStep};
