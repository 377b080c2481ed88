//! Best-effort notifications: confirmation and cancellation messages.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{CapabilityCall, ForwardCapability};
use crate::errors::CapabilityError;
use crate::utils::service_token;

const CAPABILITY: &str = "notification";

/// Kind of message sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The work completed.
    Confirmation,
    /// The work was rolled back.
    Cancellation,
}

/// A message recorded by the in-memory notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    /// Message kind.
    pub kind: NotificationKind,
    /// Order or document reference.
    pub reference: String,
    /// Recipient address.
    pub recipient: String,
    /// Message body.
    pub body: String,
}

/// An external messaging service. Notifications cannot be undone.
#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Sends a completion message.
    async fn send_confirmation(
        &self,
        reference: &str,
        recipient: &str,
        body: &str,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError>;

    /// Sends a rollback message.
    async fn send_cancellation(
        &self,
        reference: &str,
        recipient: &str,
        reason: &str,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError>;
}

#[derive(Debug, Default)]
struct Outbox {
    sent: Vec<SentNotification>,
    by_key: HashMap<String, String>,
}

/// In-memory notifier; can simulate an outage.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    outbox: Mutex<Outbox>,
    unavailable: AtomicBool,
}

impl InMemoryNotifier {
    /// Creates a working notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles the simulated outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns every message sent, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentNotification> {
        self.outbox.lock().sent.clone()
    }

    /// Returns messages of one kind.
    #[must_use]
    pub fn sent_of_kind(&self, kind: NotificationKind) -> Vec<SentNotification> {
        self.outbox
            .lock()
            .sent
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }

    fn send(
        &self,
        kind: NotificationKind,
        reference: &str,
        recipient: &str,
        body: &str,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CapabilityError::transient(CAPABILITY, "mail relay unavailable"));
        }

        let mut outbox = self.outbox.lock();
        if let Some(token) = outbox.by_key.get(idempotency_key) {
            return Ok(token.clone());
        }

        let token = service_token("msg");
        outbox.sent.push(SentNotification {
            kind,
            reference: reference.to_string(),
            recipient: recipient.to_string(),
            body: body.to_string(),
        });
        outbox.by_key.insert(idempotency_key.to_string(), token.clone());
        Ok(token)
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send_confirmation(
        &self,
        reference: &str,
        recipient: &str,
        body: &str,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError> {
        self.send(NotificationKind::Confirmation, reference, recipient, body, idempotency_key)
    }

    async fn send_cancellation(
        &self,
        reference: &str,
        recipient: &str,
        reason: &str,
        idempotency_key: &str,
    ) -> Result<String, CapabilityError> {
        self.send(NotificationKind::Cancellation, reference, recipient, reason, idempotency_key)
    }
}

/// Where to read the reference and recipient from in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientFields {
    /// Field holding the order or document reference.
    pub reference: String,
    /// Field holding the recipient address.
    pub recipient: String,
}

impl RecipientFields {
    /// Creates a field mapping.
    #[must_use]
    pub fn new(reference: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            recipient: recipient.into(),
        }
    }

    fn resolve(&self, call: &CapabilityCall) -> Result<(String, String), CapabilityError> {
        let field = |name: &str| {
            call.request
                .get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    CapabilityError::invalid_request(CAPABILITY, format!("missing field {name}"))
                })
        };
        Ok((field(&self.reference)?, field(&self.recipient)?))
    }
}

/// Notify-class stage sending the completion message.
#[derive(Debug, Clone)]
pub struct SendConfirmation {
    notifier: Arc<dyn Notifier>,
    fields: RecipientFields,
}

impl SendConfirmation {
    /// Creates the capability.
    pub fn new(notifier: Arc<dyn Notifier>, fields: RecipientFields) -> Self {
        Self { notifier, fields }
    }
}

#[async_trait]
impl ForwardCapability for SendConfirmation {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError> {
        let (reference, recipient) = self.fields.resolve(call)?;
        let mut body = call
            .tokens
            .iter()
            .map(|(stage, token)| format!("{stage}={token}"))
            .collect::<Vec<_>>()
            .join(", ");
        if let Some(decision) = &call.decision {
            let verdict = if decision.approved { "approved" } else { "rejected" };
            body = format!("{body}; review {verdict}: {}", decision.comments);
        }
        self.notifier
            .send_confirmation(&reference, &recipient, &body, &call.idempotency_key)
            .await
    }
}

/// Failure notification sent after compensation.
#[derive(Debug, Clone)]
pub struct SendCancellation {
    notifier: Arc<dyn Notifier>,
    fields: RecipientFields,
}

impl SendCancellation {
    /// Creates the capability.
    pub fn new(notifier: Arc<dyn Notifier>, fields: RecipientFields) -> Self {
        Self { notifier, fields }
    }
}

#[async_trait]
impl ForwardCapability for SendCancellation {
    fn name(&self) -> &str {
        CAPABILITY
    }

    async fn invoke(&self, call: &CapabilityCall) -> Result<String, CapabilityError> {
        let (reference, recipient) = self.fields.resolve(call)?;
        let reason = call.failure_reason.as_deref().unwrap_or("cancelled");
        self.notifier
            .send_cancellation(&reference, &recipient, reason, &call.idempotency_key)
            .await
    }
}
