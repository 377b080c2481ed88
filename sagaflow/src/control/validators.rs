//! Pre-mutation validation of control-plane updates.
//!
//! Validators are pure: they inspect the context and payload and either
//! accept or return a structured rejection. Callers run them under the same
//! lock as the mutation they guard.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::context::PipelineContext;
use crate::core::{Decision, PipelineStatus, Priority};
use crate::errors::UpdateRejection;
use crate::utils::{parse_timestamp, timestamps::parse_unix};

/// Update name of `setPriority`.
pub const SET_PRIORITY: &str = "setPriority";

/// Update name of `submitDecision`.
pub const SUBMIT_DECISION: &str = "submitDecision";

/// Longest accepted decision comment, in bytes.
pub const MAX_COMMENT_LEN: usize = 4096;

/// How far in the future a decision timestamp may lie.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

fn invalid(update: &str, reason: impl Into<String>) -> UpdateRejection {
    UpdateRejection::InvalidValue {
        update: update.to_string(),
        reason: reason.into(),
    }
}

fn malformed(update: &str, reason: impl Into<String>) -> UpdateRejection {
    UpdateRejection::MalformedPayload {
        update: update.to_string(),
        reason: reason.into(),
    }
}

fn ensure_not_terminal(ctx: &PipelineContext, update: &str) -> Result<(), UpdateRejection> {
    if ctx.is_terminal() {
        return Err(UpdateRejection::TerminalStatus {
            update: update.to_string(),
            status: ctx.status(),
        });
    }
    Ok(())
}

/// Validates `setPriority` against the current context.
///
/// # Errors
///
/// Rejects when the instance is terminal.
pub fn validate_set_priority(ctx: &PipelineContext) -> Result<(), UpdateRejection> {
    ensure_not_terminal(ctx, SET_PRIORITY)
}

/// Validates `submitDecision` against the current context.
///
/// # Errors
///
/// Rejects when the instance is terminal, is not awaiting a decision,
/// already has a decision, or the decision's comments or timestamp are out
/// of range.
pub fn validate_submit_decision(
    ctx: &PipelineContext,
    decision: &Decision,
    now: DateTime<Utc>,
) -> Result<(), UpdateRejection> {
    ensure_not_terminal(ctx, SUBMIT_DECISION)?;

    if ctx.status() != PipelineStatus::AwaitingDecision {
        return Err(UpdateRejection::NotAwaitingDecision {
            update: SUBMIT_DECISION.to_string(),
            status: ctx.status(),
        });
    }
    if ctx.pending_decision().is_some() || ctx.decision().is_some() {
        return Err(UpdateRejection::DecisionAlreadySubmitted {
            update: SUBMIT_DECISION.to_string(),
        });
    }

    if decision.comments.len() > MAX_COMMENT_LEN {
        return Err(invalid(
            SUBMIT_DECISION,
            format!("comments exceed {MAX_COMMENT_LEN} bytes"),
        ));
    }
    if decision.decided_at < ctx.timestamps().created_at {
        return Err(invalid(SUBMIT_DECISION, "decided_at precedes the pipeline start"));
    }
    if decision.decided_at > now + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
        return Err(invalid(SUBMIT_DECISION, "decided_at lies in the future"));
    }
    Ok(())
}

/// Decodes a `setPriority` payload.
///
/// Accepts `"HIGH"` or `{"priority": "HIGH"}`, case-insensitively.
///
/// # Errors
///
/// Rejects null, non-string values and unknown priorities.
pub fn parse_priority(payload: &Value) -> Result<Priority, UpdateRejection> {
    let raw = match payload {
        Value::Null => {
            return Err(UpdateRejection::MissingPayload {
                update: SET_PRIORITY.to_string(),
            })
        }
        Value::String(s) => s.as_str(),
        Value::Object(map) => match map.get("priority") {
            Some(Value::String(s)) => s.as_str(),
            Some(Value::Null) | None => {
                return Err(UpdateRejection::MissingPayload {
                    update: SET_PRIORITY.to_string(),
                })
            }
            Some(other) => {
                return Err(malformed(
                    SET_PRIORITY,
                    format!("priority must be a string, got {other}"),
                ))
            }
        },
        other => return Err(malformed(SET_PRIORITY, format!("expected a string, got {other}"))),
    };

    raw.parse::<Priority>().map_err(|e| invalid(SET_PRIORITY, e))
}

/// Decodes a `submitDecision` payload.
///
/// `approved` is required. `comments` defaults to empty and `decided_at`
/// (RFC 3339 string or Unix timestamp) defaults to `now`.
///
/// # Errors
///
/// Rejects null, non-object payloads and fields of the wrong type.
pub fn parse_decision(payload: &Value, now: DateTime<Utc>) -> Result<Decision, UpdateRejection> {
    let map = match payload {
        Value::Null => {
            return Err(UpdateRejection::MissingPayload {
                update: SUBMIT_DECISION.to_string(),
            })
        }
        Value::Object(map) => map,
        other => return Err(malformed(SUBMIT_DECISION, format!("expected an object, got {other}"))),
    };

    let approved = match map.get("approved") {
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            return Err(malformed(
                SUBMIT_DECISION,
                format!("approved must be a boolean, got {other}"),
            ))
        }
        None => return Err(malformed(SUBMIT_DECISION, "missing field 'approved'")),
    };

    let comments = match map.get("comments") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            return Err(malformed(
                SUBMIT_DECISION,
                format!("comments must be a string, got {other}"),
            ))
        }
    };

    let decided_at = match map.get("decided_at") {
        None | Some(Value::Null) => now,
        Some(Value::String(s)) => {
            parse_timestamp(s).map_err(|e| malformed(SUBMIT_DECISION, e.to_string()))?
        }
        Some(Value::Number(n)) => {
            let secs = n.as_i64().ok_or_else(|| {
                malformed(
                    SUBMIT_DECISION,
                    format!("decided_at must be an integer, got {n}"),
                )
            })?;
            parse_unix(secs).map_err(|e| malformed(SUBMIT_DECISION, e.to_string()))?
        }
        Some(other) => {
            return Err(malformed(
                SUBMIT_DECISION,
                format!("decided_at has the wrong type: {other}"),
            ))
        }
    };

    Ok(Decision {
        approved,
        comments,
        decided_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InstanceId;
    use serde_json::json;

    fn awaiting() -> PipelineContext {
        let mut ctx = PipelineContext::new(InstanceId::new(), "doc", json!({}));
        ctx.transition(PipelineStatus::Running).unwrap();
        ctx.transition(PipelineStatus::AwaitingDecision).unwrap();
        ctx
    }

    #[test]
    fn test_parse_priority_forms() {
        assert_eq!(parse_priority(&json!("high")).unwrap(), Priority::High);
        assert_eq!(parse_priority(&json!({"priority": "LOW"})).unwrap(), Priority::Low);
    }

    #[test]
    fn test_parse_priority_rejections() {
        assert!(matches!(
            parse_priority(&Value::Null),
            Err(UpdateRejection::MissingPayload { .. })
        ));
        assert!(matches!(parse_priority(&json!(3)), Err(UpdateRejection::MalformedPayload { .. })));
        assert!(matches!(
            parse_priority(&json!("URGENT")),
            Err(UpdateRejection::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_priority(&json!({"priority": null})),
            Err(UpdateRejection::MissingPayload { .. })
        ));
    }

    #[test]
    fn test_parse_decision() {
        let now = Utc::now();
        let decision = parse_decision(&json!({"approved": true, "comments": "ok"}), now).unwrap();
        assert!(decision.approved);
        assert_eq!(decision.comments, "ok");
        assert_eq!(decision.decided_at, now);

        let decision = parse_decision(
            &json!({"approved": false, "decided_at": "2024-03-01T10:00:00Z"}),
            now,
        )
        .unwrap();
        assert_eq!(decision.decided_at.timestamp(), 1_709_287_200);
    }

    #[test]
    fn test_parse_decision_rejections() {
        let now = Utc::now();
        assert!(matches!(
            parse_decision(&Value::Null, now),
            Err(UpdateRejection::MissingPayload { .. })
        ));
        assert!(matches!(
            parse_decision(&json!([]), now),
            Err(UpdateRejection::MalformedPayload { .. })
        ));
        assert!(matches!(
            parse_decision(&json!({"comments": "x"}), now),
            Err(UpdateRejection::MalformedPayload { .. })
        ));
        assert!(matches!(
            parse_decision(&json!({"approved": "yes"}), now),
            Err(UpdateRejection::MalformedPayload { .. })
        ));
        assert!(matches!(
            parse_decision(&json!({"approved": true, "decided_at": "soon"}), now),
            Err(UpdateRejection::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_validate_decision_status() {
        let ctx = PipelineContext::new(InstanceId::new(), "doc", json!({}));
        let err = validate_submit_decision(&ctx, &Decision::approve("ok"), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            UpdateRejection::NotAwaitingDecision {
                status: PipelineStatus::Pending,
                ..
            }
        ));
    }

    #[test]
    fn test_validate_decision_once() {
        let mut ctx = awaiting();
        validate_submit_decision(&ctx, &Decision::approve("ok"), Utc::now()).unwrap();

        ctx.offer_decision(Decision::approve("ok")).unwrap();
        let err = validate_submit_decision(&ctx, &Decision::reject("no"), Utc::now()).unwrap_err();
        assert!(matches!(err, UpdateRejection::DecisionAlreadySubmitted { .. }));
    }

    #[test]
    fn test_validate_decision_values() {
        let ctx = awaiting();
        let now = Utc::now();

        let long = Decision::approve("x".repeat(MAX_COMMENT_LEN + 1));
        assert!(matches!(
            validate_submit_decision(&ctx, &long, now),
            Err(UpdateRejection::InvalidValue { .. })
        ));

        let stale =
            Decision::approve("ok").decided_at(ctx.timestamps().created_at - Duration::hours(1));
        assert!(validate_submit_decision(&ctx, &stale, now).is_err());

        let future = Decision::approve("ok").decided_at(now + Duration::hours(1));
        assert!(validate_submit_decision(&ctx, &future, now).is_err());
    }

    #[test]
    fn test_validate_priority_terminal() {
        let mut ctx = awaiting();
        validate_set_priority(&ctx).unwrap();
        ctx.fail(crate::errors::FailureKind::Business, "x").unwrap();
        assert!(matches!(
            validate_set_priority(&ctx),
            Err(UpdateRejection::TerminalStatus { status: PipelineStatus::Failed, .. })
        ));
    }
}
