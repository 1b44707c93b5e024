//! Agent Core: orchestration layer for mcp-relay.
//!
//! Submodules:
//! - `driver`: Conversation loop state machine with an injectable pass budget
//! - `executor`: Concurrent tool-call fan-out with per-call failure isolation
//! - `types`: Inbound request, outbound event frames, tool results
//! - `errors`: Request-fatal error types

pub mod driver;
pub mod errors;
pub mod executor;
pub mod types;

// Re-exports for convenience
pub use driver::{ConversationDriver, IterationBudget, Termination, DEFAULT_MAX_ITERATIONS};
pub use errors::AgentError;
pub use executor::ToolExecutor;
pub use types::{ChatEvent, ChatRequest, ToolCallResult, ToolOutcome};
