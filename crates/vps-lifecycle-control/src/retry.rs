//! Bounded retry policies for lifecycle jobs.
//!
//! A job gets a fixed number of attempts. After a failed attempt the job is
//! re-queued with the delay at that attempt's position in the backoff
//! schedule; the last delay repeats if the schedule is shorter than the
//! number of retries. Once the attempts are spent the job is abandoned and
//! the service is handed to an operator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Attempts and delays for one kind of job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before each retry, in seconds.
    pub backoff_secs: Vec<u64>,
}

impl RetryPolicy {
    /// Create a policy from attempts and a backoff schedule in seconds.
    #[must_use]
    pub fn new(max_attempts: u32, backoff_secs: impl Into<Vec<u64>>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_secs: backoff_secs.into(),
        }
    }

    /// Suspend, unsuspend and terminate: 3 attempts, 1 / 5 / 15 minutes apart.
    #[must_use]
    pub fn lifecycle() -> Self {
        Self::new(3, [60, 300, 900])
    }

    /// Cleanup: 2 attempts, 5 / 15 minutes apart.
    #[must_use]
    pub fn cleanup() -> Self {
        Self::new(2, [300, 900])
    }

    /// The backoff schedule as durations.
    #[must_use]
    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_secs
            .iter()
            .copied()
            .map(Duration::from_secs)
            .collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::lifecycle()
    }
}

/// The delay before retrying after `attempt` (0-based) failed, or `None` if
/// no attempts remain.
#[must_use]
pub fn next_delay(attempt: u32, max_attempts: u32, backoff: &[Duration]) -> Option<Duration> {
    if attempt.saturating_add(1) >= max_attempts {
        return None;
    }
    let index = usize::try_from(attempt).unwrap_or(usize::MAX);
    Some(
        backoff
            .get(index)
            .or_else(|| backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_policy_retries_twice() {
        let policy = RetryPolicy::lifecycle();
        let backoff = policy.backoff();

        assert_eq!(next_delay(0, policy.max_attempts, &backoff), Some(Duration::from_secs(60)));
        assert_eq!(next_delay(1, policy.max_attempts, &backoff), Some(Duration::from_secs(300)));
        assert_eq!(next_delay(2, policy.max_attempts, &backoff), None);
    }

    #[test]
    fn cleanup_policy_retries_once() {
        let policy = RetryPolicy::cleanup();
        let backoff = policy.backoff();

        assert_eq!(next_delay(0, 2, &backoff), Some(Duration::from_secs(300)));
        assert_eq!(next_delay(1, 2, &backoff), None);
    }

    #[test]
    fn short_schedule_repeats_last_delay() {
        let backoff = [Duration::from_secs(10)];
        assert_eq!(next_delay(3, 10, &backoff), Some(Duration::from_secs(10)));
        assert_eq!(next_delay(0, 3, &[]), Some(Duration::ZERO));
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, []).max_attempts, 1);
    }
}
