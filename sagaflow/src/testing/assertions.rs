//! Assertions over pipeline results.

use crate::core::{PipelineResult, PipelineStatus};

/// Asserts the terminal status.
pub fn assert_status(result: &PipelineResult, expected: PipelineStatus) {
    assert_eq!(
        result.status, expected,
        "Expected status {expected}, got {} (failure: {:?})",
        result.status, result.failure_reason
    );
}

/// Asserts the completed stages, in completion order.
pub fn assert_completed_stages(result: &PipelineResult, expected: &[&str]) {
    assert_eq!(result.completed_stage_names(), expected, "Unexpected completed stages");
}

/// Asserts that completed stage orders are strictly increasing.
pub fn assert_strictly_increasing(result: &PipelineResult) {
    for pair in result.completed_steps.windows(2) {
        assert!(
            pair[0].order < pair[1].order,
            "Stage {} (order {}) completed before {} (order {})",
            pair[0].stage_name,
            pair[0].order,
            pair[1].stage_name,
            pair[1].order
        );
    }
}

/// Asserts the stages whose compensating action was invoked, in order.
pub fn assert_compensated(result: &PipelineResult, expected: &[&str]) {
    let attempted: Vec<&str> = result
        .compensations
        .iter()
        .filter(|record| record.outcome.was_attempted())
        .map(|record| record.stage_name.as_str())
        .collect();
    assert_eq!(attempted, expected, "Unexpected compensations");
}

/// Asserts that compensation visited the completed steps in exact reverse.
pub fn assert_reverse_compensation(result: &PipelineResult) {
    let mut expected: Vec<&str> = result.completed_stage_names();
    expected.reverse();
    let visited: Vec<&str> = result
        .compensations
        .iter()
        .map(|record| record.stage_name.as_str())
        .collect();
    assert_eq!(visited, expected, "Compensation did not mirror completed steps");
}

/// Asserts that the failure reason mentions `fragment`, case-insensitively.
pub fn assert_failure_mentions(result: &PipelineResult, fragment: &str) {
    let reason = result
        .failure_reason
        .as_deref()
        .unwrap_or_else(|| panic!("Expected a failure reason, status is {}", result.status));
    assert!(
        reason.to_lowercase().contains(&fragment.to_lowercase()),
        "Failure reason '{reason}' does not mention '{fragment}'"
    );
}
