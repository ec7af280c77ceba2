//! Retry policy configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{MatrixError, MatrixResult};

/// Bounded fixed-interval retry policy.
///
/// `max_attempts` counts the initial attempt, so a policy of 5 means one try
/// plus up to four retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Must be at least 1.
    pub max_attempts: u32,

    /// Pause between attempts in seconds.
    pub interval_secs: u64,
}

impl RetryPolicy {
    /// Create a validated policy.
    pub fn new(max_attempts: u32, interval_secs: u64) -> MatrixResult<Self> {
        let policy = Self {
            max_attempts,
            interval_secs,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// A policy that runs the operation exactly once.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            interval_secs: 0,
        }
    }

    /// Reject policies that would never run the operation.
    pub fn validate(&self) -> MatrixResult<()> {
        if self.max_attempts == 0 {
            return Err(MatrixError::Config(
                "retry policy max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Pause between attempts.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(matches!(
            RetryPolicy::new(0, 10),
            Err(MatrixError::Config(_))
        ));
    }

    #[test]
    fn test_default_is_one_try_plus_four_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_once() {
        assert_eq!(RetryPolicy::once().max_attempts, 1);
    }
}
