//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility: these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur while talking to the model provider.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The provider rejected the request because of rate limiting (HTTP 429).
    #[error("rate limited by provider{}", retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited {
        retry_after_secs: Option<u64>,
    },

    /// The provider did not answer within the per-call timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// TCP/HTTP connection to the provider failed, or it reported itself unavailable.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The provider rejected the request outright. Retrying will not help.
    #[error("provider error{}: {reason}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    ProviderError {
        status: Option<u16>,
        reason: String,
    },

    /// SSE stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },

    /// The caller cancelled the turn while the call was in flight.
    #[error("request cancelled")]
    Cancelled,
}

impl InferenceError {
    /// Whether the retry policy should try this call again.
    ///
    /// Rate limits and timeouts are the documented transient cases. Connection
    /// failures (including 502/503 from a proxy in front of the provider) are
    /// treated the same way.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::RateLimited { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::ConnectionFailed { .. }
        )
    }

    /// Map a non-2xx HTTP status from the provider onto the error taxonomy.
    pub fn from_status(status: u16, body: String, retry_after_secs: Option<u64>, endpoint: &str) -> Self {
        match status {
            429 => InferenceError::RateLimited { retry_after_secs },
            408 | 504 => InferenceError::Timeout { duration_secs: 0 },
            502 | 503 => InferenceError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: format!("HTTP {status}: {body}"),
            },
            _ => InferenceError::ProviderError {
                status: Some(status),
                reason: body,
            },
        }
    }
}
