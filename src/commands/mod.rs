//! Entry points driven by the `mcp-relay` binary.
//!
//! Each command takes already-loaded configuration and returns data; the
//! binary owns argument parsing and output formatting.

pub mod chat;
pub mod probe;

pub use chat::{build_driver, start_chat, EVENT_CHANNEL_CAPACITY};
pub use probe::{probe, ProbeRequest};
