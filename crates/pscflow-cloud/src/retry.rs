//! Retry scheduling for classified apply failures

use crate::classify::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff scheme applied to retryable categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffScheme {
    /// `attempt × base_delay`
    #[default]
    Linear,
    /// Each retryable category waits its own flat `base_delay` per retry
    PerCategory,
}

/// Retry policy, fixed per resource folder for the lifetime of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of apply attempts per phase (>= 1)
    pub max_attempts: u32,

    /// Base delay between attempts, in seconds
    pub base_delay_secs: u64,

    #[serde(default)]
    pub scheme: BackoffScheme,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_secs: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_secs,
            scheme: BackoffScheme::Linear,
        }
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self::new(1, 0)
    }

    pub fn with_scheme(mut self, scheme: BackoffScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 60)
    }
}

/// Outcome of a retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,

    /// Wait before the next attempt
    pub delay: Duration,

    /// Try a direct capability activation call before waiting
    pub activate_capabilities: bool,
}

impl RetryDecision {
    fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
            activate_capabilities: false,
        }
    }
}

/// Decide whether attempt `attempt` (1-based) that failed with `category` is retried
pub fn should_retry(category: ErrorCategory, attempt: u32, policy: &RetryPolicy) -> RetryDecision {
    match category {
        ErrorCategory::PermissionDenied
        | ErrorCategory::Unclassified
        | ErrorCategory::AsyncOperationInProgress
        | ErrorCategory::AsyncOperationAccepted => RetryDecision::stop(),
        ErrorCategory::CapabilityPropagating => {
            if attempt >= policy.max_attempts {
                return RetryDecision::stop();
            }
            let delay = match policy.scheme {
                BackoffScheme::Linear => policy.base_delay().saturating_mul(attempt),
                BackoffScheme::PerCategory => policy.base_delay(),
            };
            RetryDecision {
                retry: true,
                delay,
                activate_capabilities: attempt == 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_capability_first_retry_is_linear_and_activates() {
        let policy = RetryPolicy::new(3, 60);
        let decision = should_retry(ErrorCategory::CapabilityPropagating, 1, &policy);
        assert!(decision.retry);
        assert_eq!(decision.delay, Duration::from_secs(60));
        assert!(decision.activate_capabilities);

        let decision = should_retry(ErrorCategory::CapabilityPropagating, 2, &policy);
        assert!(decision.retry);
        assert_eq!(decision.delay, Duration::from_secs(120));
        assert!(!decision.activate_capabilities);
    }

    #[test]
    fn test_capability_exhausted() {
        let policy = RetryPolicy::new(3, 60);
        assert!(!should_retry(ErrorCategory::CapabilityPropagating, 3, &policy).retry);
    }

    #[test]
    fn test_per_category_is_flat() {
        let policy = RetryPolicy::new(4, 30).with_scheme(BackoffScheme::PerCategory);
        let decision = should_retry(ErrorCategory::CapabilityPropagating, 3, &policy);
        assert!(decision.retry);
        assert_eq!(decision.delay, Duration::from_secs(30));
    }

    #[test]
    fn test_huge_delay_saturates() {
        let policy = RetryPolicy::new(u32::MAX, u64::MAX);
        let decision = should_retry(ErrorCategory::CapabilityPropagating, 7, &policy);
        assert!(decision.retry);
        assert_eq!(decision.delay, Duration::MAX);
    }

    #[test]
    fn test_terminal_categories_never_retry() {
        let policy = RetryPolicy::new(10, 1);
        for category in [
            ErrorCategory::PermissionDenied,
            ErrorCategory::Unclassified,
            ErrorCategory::AsyncOperationAccepted,
            ErrorCategory::AsyncOperationInProgress,
        ] {
            assert_eq!(should_retry(category, 1, &policy), RetryDecision::stop());
        }
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::new(0, 5);
        assert_eq!(policy.max_attempts, 1);
        assert!(!should_retry(ErrorCategory::CapabilityPropagating, 1, &policy).retry);
    }

    #[test]
    fn test_policy_yaml_shape() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 5, "base_delay_secs": 10}"#).unwrap();
        assert_eq!(policy.scheme, BackoffScheme::Linear);
        assert_eq!(policy.max_attempts, 5);
    }

    proptest! {
        #[test]
        fn prop_never_retries_at_or_past_max(max in 1u32..20, extra in 0u32..20, base in 0u64..600) {
            let policy = RetryPolicy::new(max, base);
            let decision = should_retry(ErrorCategory::CapabilityPropagating, max + extra, &policy);
            prop_assert!(!decision.retry);
        }
    }
}
