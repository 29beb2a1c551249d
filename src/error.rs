use thiserror::Error;

/// Failure taxonomy for history reconstruction.
///
/// Only [`HistoryError::Configuration`] is meant to reach the caller. Everything else is
/// absorbed by tier fallback or per-chain degradation.
#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    #[error("{provider} unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("{provider} rate limited")]
    RateLimited { provider: String },

    #[error("{provider} returned HTTP {status}: {message}")]
    Upstream {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("{provider} returned malformed data: {message}")]
    Decode { provider: String, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// How the retry layer should treat a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    RateLimit,
    Server,
    Fatal,
}

impl HistoryError {
    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn decode(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classify an HTTP status: 429 is a rate limit, other non-success codes are upstream failures.
    pub fn from_status(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        let provider = provider.into();
        if status == 429 {
            Self::RateLimited { provider }
        } else {
            Self::Upstream {
                provider,
                status,
                message: message.into(),
            }
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimited { .. } => RetryClass::RateLimit,
            Self::Upstream { status, .. } if *status >= 500 => RetryClass::Server,
            Self::Transport { .. } => RetryClass::Server,
            _ => RetryClass::Fatal,
        }
    }

    /// Configuration errors signal caller or programmer error and must propagate.
    pub fn is_hard_failure(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Collapse a retryable error into `ProviderUnavailable` once retries are exhausted.
    pub fn exhausted(self, attempts: u32) -> Self {
        match self {
            Self::RateLimited { provider } => Self::ProviderUnavailable {
                provider,
                message: format!("still rate limited after {} attempts", attempts),
            },
            Self::Upstream {
                provider,
                status,
                message,
            } => Self::ProviderUnavailable {
                provider,
                message: format!("HTTP {} after {} attempts: {}", status, attempts, message),
            },
            Self::Transport { provider, message } => Self::ProviderUnavailable {
                provider,
                message: format!("{} (after {} attempts)", message, attempts),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            HistoryError::from_status("prices", 429, "slow down").retry_class(),
            RetryClass::RateLimit
        );
        assert_eq!(
            HistoryError::from_status("prices", 503, "maintenance").retry_class(),
            RetryClass::Server
        );
        assert_eq!(
            HistoryError::from_status("prices", 404, "not found").retry_class(),
            RetryClass::Fatal
        );
    }

    #[test]
    fn test_rate_limit_degenerates_to_unavailable() {
        let err = HistoryError::RateLimited {
            provider: "snapshots".to_string(),
        }
        .exhausted(3);
        assert!(matches!(err, HistoryError::ProviderUnavailable { .. }));
        assert!(!err.is_hard_failure());
    }

    #[test]
    fn test_only_configuration_is_hard() {
        assert!(HistoryError::Configuration("unsupported chain 'foo'".to_string()).is_hard_failure());
        assert!(!HistoryError::Timeout {
            provider: "rpc:ethereum".to_string(),
            timeout_ms: 10_000
        }
        .is_hard_failure());
    }
}
