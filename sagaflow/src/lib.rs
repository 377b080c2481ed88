//! # Sagaflow
//!
//! A compensating multi-stage pipeline orchestrator.
//!
//! Sagaflow drives an ordered sequence of externally-effectful stages and
//! keeps them consistent when something goes wrong:
//!
//! - **Ordered stages**: each stage binds a forward action and an optional
//!   compensating action; completed stages are rolled back in reverse order
//!   when a later stage fails or the instance is cancelled
//! - **Control plane**: queries, signals and validated updates act on a
//!   running instance through a cloneable handle
//! - **External gate**: an instance can suspend for a human decision, with
//!   a deterministic default decision when the window elapses
//! - **Substrate interface**: reliable calls, durable timers and
//!   checkpoints come from an [`ExecutionSubstrate`](substrate::ExecutionSubstrate)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sagaflow::prelude::*;
//!
//! let registry = StageRegistry::builder("order")
//!     .stage(StageSpec::compensated("PAYMENT_CHARGED", charge))
//!     .stage(StageSpec::compensated("INVENTORY_RESERVED", reserve))
//!     .stage(StageSpec::notify("CONFIRMATION_SENT", confirm))
//!     .build()?;
//!
//! let runtime = PipelineRuntime::new(Orchestrator::new(
//!     registry,
//!     Arc::new(LocalSubstrate::new()),
//!     PipelineConfig::default(),
//! ));
//!
//! let id = runtime.start(request);
//! runtime.handle(id)?.set_priority(Priority::High)?;
//! let result = runtime.await_result(id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod capabilities;
pub mod config;
pub mod context;
pub mod control;
pub mod core;
pub mod errors;
pub mod events;
pub mod gate;
pub mod observability;
pub mod pipeline;
pub mod pipelines;
pub mod runtime;
pub mod substrate;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::capabilities::{
        CapabilityCall, CompensatingCapability, CompensationCall, ForwardCapability,
        ProgressReporter,
    };
    pub use crate::config::{GateConfig, PipelineConfig};
    pub use crate::context::{ContextSnapshot, InstanceId, PipelineContext, SuspensionPoint};
    pub use crate::control::PipelineHandle;
    pub use crate::core::{
        CompensationOutcome, CompensationRecord, CompletedStep, Decision, DecisionSource,
        PipelineResult, PipelineStatus, Priority,
    };
    pub use crate::errors::{
        CapabilityError, FailureKind, RegistryError, SagaflowError, UpdateRejection,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::gate::{ExternalGate, GateOutcome};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{Orchestrator, RetryPolicy, StageRegistry, StageSpec};
    pub use crate::runtime::PipelineRuntime;
    pub use crate::substrate::{ExecutionSubstrate, LocalSubstrate};
}
