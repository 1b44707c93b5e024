//! Shared types for the agent core.
//!
//! The inbound chat request, the outbound event frames, and the per-call
//! results passed from the executor to the loop driver.

use serde::{Deserialize, Serialize};

use crate::inference::types::ChatMessage;
use crate::mcp_client::types::ServerDescriptor;

// ─── Request ─────────────────────────────────────────────────────────────────

/// One orchestration request: a message history plus the servers to use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// May be empty; the conversation then runs without tools.
    #[serde(default)]
    pub servers: Vec<ServerDescriptor>,
}

// ─── Event Frames ────────────────────────────────────────────────────────────

/// One frame of the outbound stream.
///
/// A handled run ends with exactly one `Done`; a fatal run ends with one
/// `Error` and no `Done`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    Message { message: ChatMessage },
    Error { error: String },
    Done,
}

impl ChatEvent {
    pub fn message(message: ChatMessage) -> Self {
        ChatEvent::Message { message }
    }

    pub fn error(error: impl Into<String>) -> Self {
        ChatEvent::Error {
            error: error.into(),
        }
    }

    /// Whether this frame ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Error { .. } | ChatEvent::Done)
    }
}

// ─── Tool Results ────────────────────────────────────────────────────────────

/// How one tool call settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success(String),
    Error(String),
}

/// Result of one tool call, consumed by the loop driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    /// The server the call was routed to; `None` if it never got that far.
    pub server_name: Option<String>,
    pub outcome: ToolOutcome,
}

impl ToolCallResult {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }

    /// The `tool` message appended to the history for this call.
    pub fn into_message(self) -> ChatMessage {
        let content = match self.outcome {
            ToolOutcome::Success(text) => text,
            ToolOutcome::Error(message) => format!("Error: {message}"),
        };
        ChatMessage::tool_result(self.call_id, content)
    }
}
