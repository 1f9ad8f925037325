// ABOUTME: Retry policy configuration and backoff wait calculation.
// ABOUTME: Exponential backoff capped at a maximum interval, no jitter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Policy governing retries of transient provider failures.
///
/// The engine treats the policy as opaque apart from feeding it to
/// [`calculate_retry_wait`]; providers may override the engine default per
/// resource or link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub first_retry_interval: Duration,
    pub backoff_rate: f64,
    #[serde(with = "humantime_serde")]
    pub max_retry_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            first_retry_interval: Duration::from_secs(2),
            backoff_rate: 2.0,
            max_retry_interval: Duration::from_secs(60),
        }
    }
}

/// Wait time before the given attempt number (1-based).
pub fn calculate_retry_wait(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let wait = policy.first_retry_interval.as_secs_f64() * policy.backoff_rate.powi(exponent);
    let capped = wait.min(policy.max_retry_interval.as_secs_f64());
    Duration::from_secs_f64(capped.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            first_retry_interval: Duration::from_secs(2),
            backoff_rate: 2.0,
            max_retry_interval: Duration::from_secs(10),
        };

        assert_eq!(calculate_retry_wait(&policy, 1), Duration::from_secs(2));
        assert_eq!(calculate_retry_wait(&policy, 2), Duration::from_secs(4));
        assert_eq!(calculate_retry_wait(&policy, 3), Duration::from_secs(8));
        assert_eq!(calculate_retry_wait(&policy, 4), Duration::from_secs(10));
        assert_eq!(calculate_retry_wait(&policy, 9), Duration::from_secs(10));
    }

    #[test]
    fn policy_parses_humantime_intervals() {
        let yaml = r#"
maxRetries: 3
firstRetryInterval: 250ms
backoffRate: 1.5
maxRetryInterval: 30s
"#;
        let policy: RetryPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.first_retry_interval, Duration::from_millis(250));
        assert_eq!(policy.max_retry_interval, Duration::from_secs(30));
    }

    #[test]
    fn omitted_fields_use_defaults() {
        let policy: RetryPolicy = serde_yaml::from_str("maxRetries: 7").unwrap();
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.first_retry_interval, Duration::from_secs(2));
        assert_eq!(policy.backoff_rate, 2.0);
    }
}
