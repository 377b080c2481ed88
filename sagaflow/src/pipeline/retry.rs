//! Retry policy and the reliable-call loop.
//!
//! Provides automatic retry handling for transient capability faults with
//! exponential backoff and configurable jitter. Business rejections are
//! never retried.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::errors::CapabilityError;

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_interval_ms() -> u64 {
    100
}

fn default_backoff_coefficient() -> f64 {
    2.0
}

fn default_max_interval_ms() -> u64 {
    10_000
}

/// Retry policy attached to a capability invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    /// Multiplier applied to the delay after each retry.
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            backoff_coefficient: default_backoff_coefficient(),
            max_interval_ms: default_max_interval_ms(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn single_attempt() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts. Zero is treated as one.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the initial retry delay.
    #[must_use]
    pub fn with_initial_interval_ms(mut self, delay: u64) -> Self {
        self.initial_interval_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_interval_ms(mut self, delay: u64) -> Self {
        self.max_interval_ms = delay;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the delay before the retry that follows `attempt` (1-based),
    /// before jitter.
    #[must_use]
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let coefficient = if self.backoff_coefficient < 1.0 {
            1.0
        } else {
            self.backoff_coefficient
        };
        #[allow(clippy::cast_precision_loss)]
        let raw = self.initial_interval_ms as f64 * coefficient.powi(exponent);
        let capped = raw.min(self.max_interval_ms as f64);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = capped.max(0.0) as u64;
        delay
    }
}

/// State tracking for one reliable call.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Attempts performed so far.
    pub attempt: u32,
    previous_delay_ms: Option<u64>,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if retries are exhausted.
    #[must_use]
    pub fn is_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.attempt >= policy.max_attempts
    }

    /// Calculates the delay before the next attempt, applying jitter.
    pub fn next_delay(&mut self, policy: &RetryPolicy) -> Duration {
        let delay = policy.base_delay_ms(self.attempt);
        let base = policy.initial_interval_ms;

        let jittered = match policy.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = self.previous_delay_ms.unwrap_or(base);
                let upper = prev.saturating_mul(3).min(policy.max_interval_ms);
                if upper <= base {
                    base
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                }
            }
        };

        self.previous_delay_ms = Some(jittered);
        Duration::from_millis(jittered)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Decides whether a failed attempt is retried.
#[must_use]
pub fn should_retry(
    state: &mut RetryState,
    policy: &RetryPolicy,
    error: &CapabilityError,
) -> RetryDecision {
    if !error.is_retryable() {
        return RetryDecision::NotRetryable;
    }
    if state.is_exhausted(policy) {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry(state.next_delay(policy))
}

/// Executes an operation under a retry policy.
///
/// The operation receives the 1-based attempt number. Transient errors are
/// retried until the policy is exhausted, at which point the last error is
/// returned as [`CapabilityError::Exhausted`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    key: &str,
    mut operation: F,
) -> Result<T, CapabilityError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let mut state = RetryState::new();

    loop {
        state.attempt += 1;
        match operation(state.attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => match should_retry(&mut state, policy, &e) {
                RetryDecision::Retry(delay) => {
                    tracing::debug!(
                        key,
                        attempt = state.attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    tracing::warn!(key, attempts = state.attempt, error = %e, "Retry policy exhausted");
                    return Err(e.exhausted(state.attempt));
                }
                RetryDecision::NotRetryable => return Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(attempts)
            .with_initial_interval_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval_ms, 100);
        assert_eq!(policy.jitter, JitterStrategy::Full);
    }

    #[test]
    fn test_retry_policy_deserialize_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.max_interval_ms, 10_000);
    }

    #[test]
    fn test_base_delay_exponential() {
        let policy = RetryPolicy::new().with_initial_interval_ms(100);
        assert_eq!(policy.base_delay_ms(1), 100);
        assert_eq!(policy.base_delay_ms(2), 200);
        assert_eq!(policy.base_delay_ms(3), 400);
    }

    #[test]
    fn test_base_delay_capped() {
        let policy = RetryPolicy::new()
            .with_initial_interval_ms(1000)
            .with_max_interval_ms(5000);
        assert_eq!(policy.base_delay_ms(10), 5000);
    }

    #[test]
    fn test_full_jitter_bounded() {
        let policy = RetryPolicy::new().with_initial_interval_ms(100);
        let mut state = RetryState::new();
        state.attempt = 1;
        for _ in 0..10 {
            assert!(state.next_delay(&policy) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_rejection_not_retryable() {
        let mut state = RetryState::new();
        let decision = should_retry(
            &mut state,
            &RetryPolicy::default(),
            &CapabilityError::rejected("payment", "declined"),
        );
        assert_eq!(decision, RetryDecision::NotRetryable);
    }

    #[tokio::test]
    async fn test_with_retry_success_after_transient() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&fast(5), "test", |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(CapabilityError::transient("shipping", "timeout"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = with_retry(&fast(3), "test", |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(CapabilityError::transient("shipping", "timeout")) }
        })
        .await;

        assert!(matches!(result, Err(CapabilityError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_rejection() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = with_retry(&fast(5), "test", |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(CapabilityError::rejected("payment", "insufficient funds")) }
        })
        .await;

        assert!(matches!(result, Err(CapabilityError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
