//! Agent Core error types.
//!
//! Only request-fatal conditions live here. Per-server and per-call failures
//! are turned into data (pool failures, error-shaped tool results) before
//! they reach the driver.

use thiserror::Error;

use crate::inference::errors::InferenceError;

/// Errors that end an orchestration request.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Every descriptor in a non-empty batch failed to connect.
    #[error("Failed to connect to any configured MCP server.")]
    NoServersAvailable,

    /// The completion call failed outright.
    #[error("model request failed: {0}")]
    UpstreamModel(#[from] InferenceError),

    /// The inbound request cannot be processed.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}
