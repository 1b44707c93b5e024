//! MCP Client: JSON-RPC over stdio transport for MCP server management.
//!
//! This module handles:
//! - Spawning MCP server child processes with a scoped environment
//! - JSON-RPC 2.0 communication over process stdio
//! - Concurrent pool construction with per-server timeouts and failure isolation
//! - Tool aggregation, collision detection, and name-based routing
//!
//! A pool lives for exactly one orchestration request; the agent driver
//! builds it, routes tool calls through the registry, and shuts it down.

pub mod connection;
pub mod environment;
pub mod errors;
pub mod launcher;
pub mod pool;
pub mod registry;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use connection::{ConnectOptions, Connector, McpConnection, StdioConnector, ToolServer};
pub use errors::{ErrorCategory, McpError};
pub use pool::{probe_servers, ActiveConnection, PoolFailure, ProbeStatus, ServerPool, ServerProbe};
pub use registry::{ToolCollision, ToolOwner, ToolRegistry, ToolResolution};
pub use types::{CallToolResult, EnvSource, McpToolDefinition, ServerDescriptor};
