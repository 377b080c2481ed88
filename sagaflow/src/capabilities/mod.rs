//! Capability interfaces and the services behind them.
//!
//! A capability is an external operation a stage invokes: a forward action
//! returning a token and, optionally, a compensating action that undoes it
//! given that token. Both must tolerate re-delivery of the same call.
//!
//! Each domain service owns its own store behind a mutex; the orchestrator
//! never shares mutable state with them.

mod call;
pub mod inventory;
pub mod notification;
pub mod payment;
pub mod processing;
pub mod review;
pub mod shipping;
pub mod storage;

pub use call::{CapabilityCall, CompensationCall, ProgressReporter};

use async_trait::async_trait;
use std::fmt;

use crate::errors::CapabilityError;

/// The forward action of a stage.
#[async_trait]
pub trait ForwardCapability: Send + Sync + fmt::Debug {
    /// Capability name used in errors and logs.
    fn name(&self) -> &str;

    /// Performs the action and returns its result token.
    async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError>;
}

/// The compensating action of a stage.
#[async_trait]
pub trait CompensatingCapability: Send + Sync + fmt::Debug {
    /// Capability name used in errors and logs.
    fn name(&self) -> &str;

    /// Undoes the forward action identified by `call.token`.
    async fn compensate(&self, call: &CompensationCall) -> Result<(), CapabilityError>;
}
