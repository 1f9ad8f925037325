// ABOUTME: Retry attempt bookkeeping and duration accounting for deployers.
// ABOUTME: Attempt durations accumulate across retries for failure reporting.

use std::time::Duration;

use crate::provider::RetryPolicy;
use crate::state::{LinkComponentCompletionDurations, ResourceCompletionDurations};

/// Tracks retry attempts for one deploy sub-phase.
///
/// One instance exists per phase per element; the attempt counter starts
/// at 1 for the first attempt.
#[derive(Clone, Debug)]
pub struct RetryInfo {
    pub attempt: u32,
    pub exceeded_max_retries: bool,
    pub policy: RetryPolicy,
    /// Durations of the attempts made so far, in fractional milliseconds.
    pub attempt_durations_ms: Vec<f64>,
}

impl RetryInfo {
    pub fn new(policy: RetryPolicy) -> Self {
        RetryInfo {
            attempt: 1,
            exceeded_max_retries: false,
            policy,
            attempt_durations_ms: Vec::new(),
        }
    }

    /// Advances to the next attempt, recording the duration of the one
    /// that just failed.
    pub fn next_attempt(&self, attempt_duration: Duration) -> Self {
        let mut attempt_durations_ms = self.attempt_durations_ms.clone();
        attempt_durations_ms.push(fractional_millis(attempt_duration));
        let attempt = self.attempt + 1;
        RetryInfo {
            attempt,
            exceeded_max_retries: attempt > self.policy.max_retries,
            policy: self.policy.clone(),
            attempt_durations_ms,
        }
    }
}

pub(crate) fn fractional_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Durations for a retry-failure message: accumulated attempt durations,
/// no total until the phase finishes or the retry limit is exceeded.
pub(crate) fn component_retry_durations(retry: &RetryInfo) -> LinkComponentCompletionDurations {
    LinkComponentCompletionDurations {
        total_duration_ms: None,
        attempt_durations_ms: retry.attempt_durations_ms.clone(),
    }
}

/// Durations for a finished phase, folding in the current attempt.
pub(crate) fn component_finished_durations(
    retry: &RetryInfo,
    current_attempt: Duration,
) -> LinkComponentCompletionDurations {
    let mut attempt_durations_ms = retry.attempt_durations_ms.clone();
    attempt_durations_ms.push(fractional_millis(current_attempt));
    LinkComponentCompletionDurations {
        total_duration_ms: Some(attempt_durations_ms.iter().sum()),
        attempt_durations_ms,
    }
}

/// Durations once the retry limit is exceeded: the total is the sum of
/// every recorded attempt.
pub(crate) fn component_exceeded_durations(retry: &RetryInfo) -> LinkComponentCompletionDurations {
    LinkComponentCompletionDurations {
        total_duration_ms: Some(retry.attempt_durations_ms.iter().sum()),
        attempt_durations_ms: retry.attempt_durations_ms.clone(),
    }
}

pub(crate) fn resource_retry_durations(retry: &RetryInfo) -> ResourceCompletionDurations {
    ResourceCompletionDurations {
        total_duration_ms: None,
        attempt_durations_ms: retry.attempt_durations_ms.clone(),
    }
}

pub(crate) fn resource_exceeded_durations(retry: &RetryInfo) -> ResourceCompletionDurations {
    ResourceCompletionDurations {
        total_duration_ms: Some(retry.attempt_durations_ms.iter().sum()),
        attempt_durations_ms: retry.attempt_durations_ms.clone(),
    }
}

pub(crate) fn resource_finished_durations(
    retry: &RetryInfo,
    current_attempt: Duration,
) -> ResourceCompletionDurations {
    let mut attempt_durations_ms = retry.attempt_durations_ms.clone();
    attempt_durations_ms.push(fractional_millis(current_attempt));
    ResourceCompletionDurations {
        total_duration_ms: Some(attempt_durations_ms.iter().sum()),
        attempt_durations_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_exceed_after_max_retries() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };
        let mut retry = RetryInfo::new(policy);
        assert_eq!(retry.attempt, 1);

        retry = retry.next_attempt(Duration::from_millis(10));
        assert_eq!(retry.attempt, 2);
        assert!(!retry.exceeded_max_retries);

        retry = retry.next_attempt(Duration::from_millis(10));
        assert_eq!(retry.attempt, 3);
        assert!(!retry.exceeded_max_retries);

        retry = retry.next_attempt(Duration::from_millis(10));
        assert_eq!(retry.attempt, 4);
        assert!(retry.exceeded_max_retries);
        assert_eq!(retry.attempt_durations_ms.len(), 3);
    }

    #[test]
    fn finished_durations_sum_all_attempts() {
        let mut retry = RetryInfo::new(RetryPolicy::default());
        retry = retry.next_attempt(Duration::from_millis(100));
        retry = retry.next_attempt(Duration::from_millis(200));

        let durations = component_finished_durations(&retry, Duration::from_millis(300));
        assert_eq!(durations.attempt_durations_ms.len(), 3);
        let total = durations.total_duration_ms.unwrap();
        assert!((total - 600.0).abs() < 1.0, "total was {total}");
    }
}
