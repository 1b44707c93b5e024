//! Inference Client: OpenAI-compatible API client for the completion model.
//!
//! This module handles all communication with the model endpoint:
//! - Non-streaming chat completions carrying the tool catalog
//! - Completion response parsing into assistant messages
//! - Configuration loading from `relay.yaml`
//!
//! The client speaks the OpenAI Chat Completions API, so the model is
//! interchangeable via config.

pub mod client;
pub mod config;
pub mod errors;
pub mod response;
pub mod types;

// Re-exports for convenience
pub use client::{CompletionModel, InferenceClient};
pub use config::{ModelConfig, OrchestrationConfig, RelayConfig};
pub use errors::InferenceError;
pub use types::{ChatMessage, Role, ToolCallRequest, ToolDefinition};
