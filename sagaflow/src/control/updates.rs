//! Validated updates: `setPriority` and `submitDecision`.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::validators::{
    parse_decision, parse_priority, validate_set_priority, validate_submit_decision, SET_PRIORITY,
    SUBMIT_DECISION,
};
use super::PipelineHandle;
use crate::core::{Decision, Priority};
use crate::errors::UpdateRejection;

impl PipelineHandle {
    /// `setPriority`: replaces the priority and returns the previous one.
    ///
    /// # Errors
    ///
    /// Rejected once the instance is terminal. A rejected update leaves the
    /// context untouched.
    pub fn set_priority(&self, priority: Priority) -> Result<Priority, UpdateRejection> {
        let outcome = self.write_context(|ctx| {
            validate_set_priority(ctx)?;
            ctx.set_priority(priority)
                .map_err(|_| UpdateRejection::TerminalStatus {
                    update: SET_PRIORITY.to_string(),
                    status: ctx.status(),
                })
        });

        match outcome {
            Ok(previous) => {
                info!(
                    instance_id = %self.instance_id(),
                    previous = %previous,
                    priority = %priority,
                    "Priority updated"
                );
                Ok(previous)
            }
            Err(rejection) => Err(self.rejected(rejection)),
        }
    }

    /// `submitDecision`: delivers the external decision to a waiting gate.
    ///
    /// Accepted at most once, and only while the instance is awaiting a
    /// decision. Acceptance wakes the gate.
    ///
    /// # Errors
    ///
    /// See [`validate_submit_decision`] for the rejection conditions.
    pub fn submit_decision(&self, decision: Decision) -> Result<(), UpdateRejection> {
        let approved = decision.approved;
        let outcome = self.write_context(|ctx| {
            validate_submit_decision(ctx, &decision, Utc::now())?;
            ctx.offer_decision(decision)
                .map_err(|_| UpdateRejection::TerminalStatus {
                    update: SUBMIT_DECISION.to_string(),
                    status: ctx.status(),
                })
        });

        match outcome {
            Ok(()) => {
                info!(instance_id = %self.instance_id(), approved, "Decision accepted");
                self.wake();
                Ok(())
            }
            Err(rejection) => Err(self.rejected(rejection)),
        }
    }

    /// Dispatches an update by name with a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUpdate` for unrecognized names, payload errors for
    /// undecodable payloads, and the validator's rejection otherwise.
    pub fn handle_update(&self, name: &str, payload: &Value) -> Result<Value, UpdateRejection> {
        match name {
            SET_PRIORITY => {
                let priority = parse_priority(payload).map_err(|r| self.rejected(r))?;
                let previous = self.set_priority(priority)?;
                Ok(json!({ "previous": previous, "priority": priority }))
            }
            SUBMIT_DECISION => {
                let decision = parse_decision(payload, Utc::now()).map_err(|r| self.rejected(r))?;
                self.submit_decision(decision)?;
                Ok(json!({ "accepted": true }))
            }
            other => Err(self.rejected(UpdateRejection::UnknownUpdate {
                update: other.to_string(),
            })),
        }
    }

    fn rejected(&self, rejection: UpdateRejection) -> UpdateRejection {
        warn!(
            instance_id = %self.instance_id(),
            update = rejection.update(),
            reason = %rejection,
            "Update rejected"
        );
        rejection
    }
}
