// ABOUTME: Provider error taxonomy for deploy and destroy operations.
// ABOUTME: Retryable, terminal-with-reasons, or fatal contract violations.

use thiserror::Error;

/// Errors a provider may return from any deploy, destroy or link update
/// hook.
///
/// The engine handles each variant differently: retryable failures are
/// retried with backoff and never escape the deployer, terminal failures
/// are reported as structured failure statuses, and fatal errors abort the
/// whole operation on the error channel because they indicate a broken
/// provider contract the engine chooses not to mask.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("retryable provider failure: {reason}")]
    Retryable { reason: String },

    #[error("provider operation failed: {}", failure_reasons.join("; "))]
    Terminal { failure_reasons: Vec<String> },

    #[error("fatal provider error: {message}")]
    Fatal { message: String },
}

impl ProviderError {
    pub fn retryable(reason: impl Into<String>) -> Self {
        ProviderError::Retryable {
            reason: reason.into(),
        }
    }

    pub fn terminal<I, S>(failure_reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProviderError::Terminal {
            failure_reasons: failure_reasons.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ProviderError::Fatal {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_error_joins_failure_reasons() {
        let err = ProviderError::terminal(["access denied", "quota exceeded"]);
        assert_eq!(
            err.to_string(),
            "provider operation failed: access denied; quota exceeded"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn retryable_error_is_retryable() {
        assert!(ProviderError::retryable("throttled").is_retryable());
    }
}
