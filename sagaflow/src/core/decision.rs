//! Decision records delivered to the gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An externally produced decision, delivered through the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the reviewed work is approved.
    pub approved: bool,
    /// Free-form reviewer comments.
    #[serde(default)]
    pub comments: String,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    /// Creates an approving decision stamped with the current time.
    #[must_use]
    pub fn approve(comments: impl Into<String>) -> Self {
        Self {
            approved: true,
            comments: comments.into(),
            decided_at: Utc::now(),
        }
    }

    /// Creates a rejecting decision stamped with the current time.
    #[must_use]
    pub fn reject(comments: impl Into<String>) -> Self {
        Self {
            approved: false,
            comments: comments.into(),
            decided_at: Utc::now(),
        }
    }

    /// Overrides the decision time.
    #[must_use]
    pub fn decided_at(mut self, at: DateTime<Utc>) -> Self {
        self.decided_at = at;
        self
    }
}

/// How the gate obtained its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Delivered by an external decision-maker.
    External,
    /// Synthesized because the decision window elapsed.
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_constructors() {
        assert!(Decision::approve("looks good").approved);
        assert!(!Decision::reject("blurry scan").approved);
    }

    #[test]
    fn test_decision_deserialize_without_comments() {
        let decision: Decision = serde_json::from_value(serde_json::json!({
            "approved": true,
            "decided_at": "2024-03-01T10:00:00Z",
        }))
        .unwrap();

        assert!(decision.approved);
        assert!(decision.comments.is_empty());
    }
}
