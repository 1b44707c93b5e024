//! MCP Client error types.

use thiserror::Error;

/// Coarse classification of an [`McpError`].
///
/// Configuration and connection failures are scoped to one server; invocation
/// failures are scoped to one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed descriptor: bad env JSON, missing executable, unsupported file type.
    Configuration,
    /// Spawn failure, handshake failure, transport loss, or connect timeout.
    Connection,
    /// A single tool call failed.
    Invocation,
}

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server descriptor cannot be turned into a runnable command.
    #[error("invalid configuration for server '{server}': {reason}")]
    ConfigError {
        server: String,
        reason: String,
    },

    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// The connection attempt did not settle within the connect timeout.
    #[error("server '{name}' did not connect within {timeout_ms}ms")]
    ConnectTimeout {
        name: String,
        timeout_ms: u64,
    },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// The connection was already closed when a request was attempted.
    #[error("connection to server '{server}' is closed")]
    ConnectionClosed {
        server: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Tool not exposed by any connected server.
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        name: String,
    },

    /// Tool call arguments could not be used.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// The tool ran and reported a failure (`isError: true`).
    #[error("tool '{tool}' failed: {message}")]
    ToolFailed {
        tool: String,
        message: String,
    },

    /// A tool call exceeded the configured invocation timeout.
    #[error("tool call '{tool}' timed out after {timeout_ms}ms")]
    Timeout {
        tool: String,
        timeout_ms: u64,
    },
}

impl McpError {
    /// Classify this error per the configuration / connection / invocation split.
    pub fn category(&self) -> ErrorCategory {
        match self {
            McpError::ConfigError { .. } => ErrorCategory::Configuration,
            McpError::SpawnFailed { .. }
            | McpError::InitFailed { .. }
            | McpError::ConnectTimeout { .. } => ErrorCategory::Connection,
            McpError::TransportError { .. }
            | McpError::ConnectionClosed { .. }
            | McpError::ServerError { .. }
            | McpError::UnknownTool { .. }
            | McpError::InvalidArguments { .. }
            | McpError::ToolFailed { .. }
            | McpError::Timeout { .. } => ErrorCategory::Invocation,
        }
    }

    /// Shorthand for a configuration error on `server`.
    pub fn config(server: &str, reason: impl Into<String>) -> Self {
        McpError::ConfigError {
            server: server.to_string(),
            reason: reason.into(),
        }
    }
}
