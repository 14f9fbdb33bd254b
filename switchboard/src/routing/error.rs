//! Provider and router error types.

use std::time::Duration;

use crate::config::ConfigError;

/// A failed call to a single upstream provider.
///
/// Every variant counts as a failure for metrics and health purposes; the
/// router fails over on all of them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Whether the same request could plausibly succeed if sent again.
    ///
    /// Client-side 4xx errors (other than 408/429) and malformed responses
    /// are not; the router still fails over to a different provider.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) | Self::Unavailable(_) => true,
            Self::Status { status, .. } => matches!(*status, 408 | 429) || *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("routing weights must be non-negative and sum to 1.0, got sum {sum}")]
    InvalidWeights { sum: f64 },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("provider already registered: {0}")]
    DuplicateProvider(String),

    #[error("no providers registered")]
    NoProviders,

    #[error(
        "no healthy provider available (tried: [{}]){}",
        .tried.join(", "),
        .last_error.as_ref().map(|e| format!(", last error: {e}")).unwrap_or_default()
    )]
    NoHealthyProvider {
        tried: Vec<String>,
        last_error: Option<String>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("decision log I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProviderError::Status {
            status: 503,
            message: "overloaded".into()
        }
        .is_retryable());
        assert!(ProviderError::Status {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(!ProviderError::Status {
            status: 400,
            message: "bad prompt".into()
        }
        .is_retryable());
        assert!(!ProviderError::InvalidResponse("no choices".into()).is_retryable());
    }

    #[test]
    fn test_no_healthy_provider_names_tried() {
        let err = RouterError::NoHealthyProvider {
            tried: vec!["a".into(), "b".into()],
            last_error: Some("HTTP 500: boom".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("[a, b]"), "{msg}");
        assert!(msg.contains("HTTP 500: boom"), "{msg}");

        let bare = RouterError::NoHealthyProvider {
            tried: vec![],
            last_error: None,
        };
        assert_eq!(bare.to_string(), "no healthy provider available (tried: [])");
    }
}
