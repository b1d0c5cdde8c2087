use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors surfaced to the framing layer.
///
/// The framing layer maps these onto HTTP status codes; the core only
/// guarantees a stable kind string per variant via [`Error::error_type`].
#[derive(Debug, Error)]
pub enum Error {
    /// Request failed validation before any routing took place.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Endpoint, batch, webhook, or delivery not accessible to the caller.
    #[error("{0} not found")]
    NotFound(String),

    /// The router exhausted every candidate for this request.
    #[error("No model available for this request: {0}")]
    NoModelAvailable(String),

    /// Provider returned a non-retriable failure.
    #[error("Upstream error from '{model}': {message}")]
    Upstream { model: String, message: String },

    /// Provider exceeded the configured timeout.
    #[error("Upstream '{model}' timed out after {timeout_ms}ms")]
    UpstreamTimeout { model: String, timeout_ms: u64 },

    /// Per-endpoint or per-owner limit hit.
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String, retry_after_secs: Option<u64> },

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// Invariant violation inside the gateway.
    /// If Some(message), it is safe to show to the caller.
    #[error("Internal error")]
    Internal(Option<String>),
}

impl Error {
    /// Stable kind string for the framing layer and for analytics records.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::NoModelAvailable(_) => "no_model_available",
            Self::Upstream { .. } => "upstream_error",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the router may swallow this error and try the next candidate.
    pub fn is_candidate_retriable(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::UpstreamTimeout { .. })
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(message)) => message.clone(),
            Self::Internal(None) => "Internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_types_are_stable() {
        let cases = [
            (Error::InvalidRequest("x".into()), "invalid_request"),
            (Error::NotFound("endpoint".into()), "not_found"),
            (Error::NoModelAvailable("all candidates failed".into()), "no_model_available"),
            (
                Error::Upstream {
                    model: "openai/gpt-4o".into(),
                    message: "boom".into(),
                },
                "upstream_error",
            ),
            (
                Error::UpstreamTimeout {
                    model: "openai/gpt-4o".into(),
                    timeout_ms: 5000,
                },
                "upstream_timeout",
            ),
            (
                Error::RateLimited {
                    message: "slow down".into(),
                    retry_after_secs: Some(30),
                },
                "rate_limited",
            ),
            (Error::Cancelled, "cancelled"),
            (Error::Internal(None), "internal"),
        ];

        for (error, kind) in cases {
            assert_eq!(error.error_type(), kind);
        }
    }

    #[test]
    fn only_upstream_failures_are_candidate_retriable() {
        assert!(
            Error::UpstreamTimeout {
                model: "m".into(),
                timeout_ms: 1
            }
            .is_candidate_retriable()
        );
        assert!(
            Error::Upstream {
                model: "m".into(),
                message: "x".into()
            }
            .is_candidate_retriable()
        );
        assert!(!Error::Cancelled.is_candidate_retriable());
        assert!(!Error::InvalidRequest("x".into()).is_candidate_retriable());
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        insta::assert_snapshot!(Error::Internal(None).client_message(), @"Internal error");

        let provider_message = Error::Internal(Some("quota exhausted".into()));
        insta::assert_snapshot!(provider_message.client_message(), @"quota exhausted");
    }
}
