//! Testing utilities for sagaflow pipelines.
//!
//! This module provides:
//! - Scripted, blocking and logging capability doubles
//! - Fixtures wiring the bundled pipelines to in-memory services
//! - Assertions over pipeline results
//! - The failure switchboard behind `injectFailure` (test builds and the
//!   `test-hooks` feature only)

mod assertions;
mod fixtures;
#[cfg(any(test, feature = "test-hooks"))]
mod injection;
mod mocks;

pub use assertions::{
    assert_compensated, assert_completed_stages, assert_failure_mentions,
    assert_reverse_compensation, assert_status, assert_strictly_increasing,
};
pub use fixtures::{
    DocumentFixture, OrderFixture, BROKE_CUSTOMER, SOLD_OUT_SKU, UNDELIVERABLE_ADDRESS,
};
#[cfg(any(test, feature = "test-hooks"))]
pub use injection::{FailureInjector, FailureSwitchboard, INJECTED_FAILURE};
pub use mocks::{BlockingCapability, CallKind, CallLog, CallRecord, ScriptedCapability};
