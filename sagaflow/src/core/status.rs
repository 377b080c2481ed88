//! Pipeline status and priority enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The lifecycle status of a pipeline instance.
///
/// `Pending -> Running -> {AwaitingDecision ->} Completed | Failed | Cancelled`.
/// `Failed` and `Cancelled` are only reached through compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    /// Created but not yet started.
    #[default]
    Pending,
    /// Executing forward stages.
    Running,
    /// Suspended at the gate, waiting for an external decision.
    AwaitingDecision,
    /// Every required stage succeeded.
    Completed,
    /// A stage failed and compensation ran.
    Failed,
    /// Cancellation was observed and compensation ran.
    Cancelled,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::AwaitingDecision => write!(f, "awaiting_decision"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl PipelineStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use PipelineStatus::{AwaitingDecision, Cancelled, Completed, Failed, Pending, Running};

        match (self, next) {
            (Pending, Running) => true,
            // Cancellation may be observed before the first stage boundary.
            (Pending, Failed | Cancelled) => true,
            (Running, AwaitingDecision | Completed | Failed | Cancelled) => true,
            (AwaitingDecision, Running | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

/// Scheduling priority of a pipeline instance, settable while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Background work.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Expedited.
    High,
    /// Expedited ahead of everything else.
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Normal => write!(f, "NORMAL"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "NORMAL" => Ok(Self::Normal),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(PipelineStatus::AwaitingDecision.to_string(), "awaiting_decision");
        assert_eq!(PipelineStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(PipelineStatus::Completed.is_terminal());
        assert!(PipelineStatus::Failed.is_terminal());
        assert!(PipelineStatus::Cancelled.is_terminal());
        assert!(!PipelineStatus::Pending.is_terminal());
        assert!(!PipelineStatus::Running.is_terminal());
        assert!(!PipelineStatus::AwaitingDecision.is_terminal());
    }

    #[test]
    fn test_status_transitions() {
        assert!(PipelineStatus::Pending.can_transition_to(PipelineStatus::Running));
        assert!(PipelineStatus::Running.can_transition_to(PipelineStatus::AwaitingDecision));
        assert!(PipelineStatus::AwaitingDecision.can_transition_to(PipelineStatus::Running));
        assert!(!PipelineStatus::Pending.can_transition_to(PipelineStatus::Completed));
        assert!(!PipelineStatus::Completed.can_transition_to(PipelineStatus::Failed));
        assert!(!PipelineStatus::Cancelled.can_transition_to(PipelineStatus::Running));
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&PipelineStatus::AwaitingDecision).unwrap();
        assert_eq!(json, r#""AWAITING_DECISION""#);

        let back: PipelineStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PipelineStatus::AwaitingDecision);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("high".parse::<Priority>(), Ok(Priority::High));
        assert_eq!(" CRITICAL ".parse::<Priority>(), Ok(Priority::Critical));
        assert!("urgent".parse::<Priority>().is_err());
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
