//! The control plane of a running instance.
//!
//! Queries read the context, signals set flags the orchestrator observes at
//! its next checkpoint, and updates are validated before they mutate.

mod handle;
mod updates;
pub mod validators;

pub use handle::PipelineHandle;
pub use validators::{SET_PRIORITY, SUBMIT_DECISION};
