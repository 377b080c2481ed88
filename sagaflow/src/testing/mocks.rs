//! Test doubles for capabilities.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::capabilities::{
    CapabilityCall, CompensatingCapability, CompensationCall, ForwardCapability,
};
use crate::errors::CapabilityError;

/// Which side of a capability was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// The forward action.
    Forward,
    /// The compensating action.
    Compensate,
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Forward or compensating.
    pub kind: CallKind,
    /// Stage the call was made for.
    pub stage: String,
    /// Token handed to a compensation.
    pub token: Option<String>,
    /// Attempt number.
    pub attempt: u32,
}

/// A shared, ordered log of invocations across capabilities.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    records: Arc<Mutex<Vec<CallRecord>>>,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn record(&self, record: CallRecord) {
        self.records.lock().push(record);
    }

    /// Returns every record in invocation order.
    #[must_use]
    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().clone()
    }

    /// Returns the stages whose forward action was invoked, in order.
    #[must_use]
    pub fn forward_stages(&self) -> Vec<String> {
        self.of_kind(CallKind::Forward)
            .into_iter()
            .map(|r| r.stage)
            .collect()
    }

    /// Returns `(stage, token)` of every compensation, in order.
    #[must_use]
    pub fn compensations(&self) -> Vec<(String, String)> {
        self.of_kind(CallKind::Compensate)
            .into_iter()
            .map(|r| (r.stage, r.token.unwrap_or_default()))
            .collect()
    }

    fn of_kind(&self, kind: CallKind) -> Vec<CallRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// A capability whose outcomes are scripted per call.
///
/// Scripted outcomes are consumed in order; once exhausted, every call
/// returns the fallback outcome.
#[derive(Debug)]
pub struct ScriptedCapability {
    name: String,
    script: Mutex<VecDeque<Result<String, CapabilityError>>>,
    fallback: Result<String, CapabilityError>,
    compensation: Mutex<Result<(), CapabilityError>>,
    own: CallLog,
    shared: Option<CallLog>,
}

impl ScriptedCapability {
    /// A capability that always returns `token`.
    #[must_use]
    pub fn succeeding(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_fallback(name, Ok(token.into()))
    }

    /// A capability that always rejects with `reason`.
    #[must_use]
    pub fn rejecting(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let name = name.into();
        let fallback = Err(CapabilityError::rejected(name.clone(), reason));
        Self::with_fallback(name, fallback)
    }

    fn with_fallback(name: impl Into<String>, fallback: Result<String, CapabilityError>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            compensation: Mutex::new(Ok(())),
            own: CallLog::new(),
            shared: None,
        }
    }

    /// Queues an outcome ahead of the fallback.
    #[must_use]
    pub fn then(self, outcome: Result<String, CapabilityError>) -> Self {
        self.script.lock().push_back(outcome);
        self
    }

    /// Makes every compensation fail with `reason`.
    #[must_use]
    pub fn with_failing_compensation(self, reason: impl Into<String>) -> Self {
        *self.compensation.lock() = Err(CapabilityError::rejected(self.name.clone(), reason));
        self
    }

    /// Records invocations into a shared log.
    #[must_use]
    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.shared = Some(log.clone());
        self
    }

    /// Returns the number of forward invocations.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.own.forward_stages().len()
    }

    /// Returns the tokens handed to this capability's compensations.
    #[must_use]
    pub fn compensated_tokens(&self) -> Vec<String> {
        self.own
            .compensations()
            .into_iter()
            .map(|(_, token)| token)
            .collect()
    }

    fn record(&self, record: CallRecord) {
        if let Some(shared) = &self.shared {
            shared.record(record.clone());
        }
        self.own.record(record);
    }
}

#[async_trait]
impl ForwardCapability for ScriptedCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError> {
        self.record(CallRecord {
            kind: CallKind::Forward,
            stage: call.stage.clone(),
            token: None,
            attempt: call.attempt,
        });
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl CompensatingCapability for ScriptedCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn compensate(&self, call: &CompensationCall) -> Result<(), CapabilityError> {
        self.record(CallRecord {
            kind: CallKind::Compensate,
            stage: call.stage.clone(),
            token: Some(call.token.clone()),
            attempt: call.attempt,
        });
        self.compensation.lock().clone()
    }
}

/// A capability that parks inside its forward or compensating action until
/// released.
///
/// Lets a test act on the control plane while a stage or compensation is in
/// flight.
#[derive(Debug)]
pub struct BlockingCapability {
    name: String,
    token: String,
    entered: Notify,
    release: Notify,
    compensations: AtomicUsize,
}

impl BlockingCapability {
    /// Creates a capability that returns `token` once released.
    #[must_use]
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            entered: Notify::new(),
            release: Notify::new(),
            compensations: AtomicUsize::new(0),
        }
    }

    /// Resolves once the forward action has been entered.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets the parked action return. Each call releases one invocation.
    pub fn release(&self) {
        self.release.notify_one();
    }

    /// Returns how many compensations ran to completion.
    #[must_use]
    pub fn compensations(&self) -> usize {
        self.compensations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForwardCapability for BlockingCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _call: &CapabilityCall) -> Result<String, CapabilityError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.token.clone())
    }
}

#[async_trait]
impl CompensatingCapability for BlockingCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn compensate(&self, _call: &CompensationCall) -> Result<(), CapabilityError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.compensations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
