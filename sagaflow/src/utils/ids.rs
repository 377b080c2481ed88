//! Identifier helpers: idempotency keys and service tokens.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::context::InstanceId;

/// Derives the deterministic idempotency key of one capability action.
///
/// The key is `sha256("{instance}:{stage}:{action}")` in lowercase hex, so a
/// re-delivered call carries the same key as the original.
#[must_use]
pub fn idempotency_key(instance_id: InstanceId, stage: &str, action: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(instance_id.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(stage.as_bytes());
    hasher.update(b":");
    hasher.update(action.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generates an opaque service token such as `pay_3f2a9c1e0b7d`.
#[must_use]
pub fn service_token(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &id[..12])
}
