//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility: these types carry the context needed to
//! build meaningful log entries.

use thiserror::Error;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The endpoint answered 2xx but the body is not a usable completion.
    #[error("malformed completion response: {reason}")]
    MalformedResponse {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// Whether retrying the same request later could succeed.
    ///
    /// Not acted on by the loop driver (no retries); surfaced in logs.
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. } => true,
            InferenceError::HttpError { status, .. } => *status == 429 || *status >= 500,
            InferenceError::MalformedResponse { .. } | InferenceError::ConfigError { .. } => false,
        }
    }
}
