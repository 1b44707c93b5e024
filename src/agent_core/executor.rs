//! ToolExecutor: runs one model response's tool calls against the pool.
//!
//! Every call in a batch is started at once and the batch settles when all of
//! them have. A failing call becomes an error-shaped result; it never aborts
//! the batch. Results come back in request order.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;

use crate::inference::types::ToolCallRequest;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::pool::ServerPool;
use crate::mcp_client::registry::{ToolRegistry, ToolResolution};

use super::types::{ToolCallResult, ToolOutcome};

/// Dispatches tool calls to the connection that owns each tool.
pub struct ToolExecutor<'a> {
    registry: &'a ToolRegistry,
    pool: &'a ServerPool,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(registry: &'a ToolRegistry, pool: &'a ServerPool) -> Self {
        Self { registry, pool }
    }

    /// Run every call concurrently; one result per call, same order.
    pub async fn execute(&self, calls: &[ToolCallRequest]) -> Vec<ToolCallResult> {
        futures::future::join_all(calls.iter().map(|call| self.execute_single(call))).await
    }

    /// Parse → resolve → invoke, with every failure captured as data.
    pub async fn execute_single(&self, call: &ToolCallRequest) -> ToolCallResult {
        let start = Instant::now();
        let tool_name = call.function.name.as_str();

        let (server_name, outcome) = match self.dispatch(call).await {
            Ok((server, text)) => (Some(server), ToolOutcome::Success(text)),
            Err((server, err)) => {
                tracing::warn!(
                    tool = %tool_name,
                    call_id = %call.id,
                    server = server.as_deref().unwrap_or("-"),
                    category = ?err.category(),
                    error = %err,
                    "tool call failed"
                );
                (server, ToolOutcome::Error(err.to_string()))
            }
        };

        tracing::info!(
            tool = %tool_name,
            call_id = %call.id,
            server = server_name.as_deref().unwrap_or("-"),
            ok = matches!(outcome, ToolOutcome::Success(_)),
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "tool call settled"
        );

        ToolCallResult {
            call_id: call.id.clone(),
            tool_name: tool_name.to_string(),
            server_name,
            outcome,
        }
    }

    async fn dispatch(
        &self,
        call: &ToolCallRequest,
    ) -> Result<(String, String), (Option<String>, McpError)> {
        let tool_name = call.function.name.as_str();

        // 1. Parse arguments before touching the pool
        let arguments = parse_arguments(tool_name, &call.function.arguments).map_err(|e| (None, e))?;

        // 2. Resolve the owning connection
        let resolution = self.registry.resolve(tool_name);
        if let ToolResolution::Collision { winner, shadowed } = &resolution {
            tracing::debug!(
                tool = %tool_name,
                winner = %winner.server_name,
                shadowed = shadowed.len(),
                "routing colliding tool to first server"
            );
        }
        let owner = resolution.into_owner().map_err(|e| (None, e))?;
        let server = Some(owner.server_name.clone());
        let connection = self.pool.get(owner.index).ok_or_else(|| {
            (
                server.clone(),
                McpError::ConnectionClosed {
                    server: owner.server_name.clone(),
                },
            )
        })?;

        // 3. Invoke; a panicking adapter is contained to this call
        let invoked = AssertUnwindSafe(connection.invoke(tool_name, arguments))
            .catch_unwind()
            .await;
        match invoked {
            Ok(Ok(result)) => Ok((owner.server_name, result.render_text())),
            Ok(Err(e)) => Err((server, e)),
            Err(_) => Err((
                server,
                McpError::TransportError {
                    server: owner.server_name.clone(),
                    reason: "adapter panicked during tool call".into(),
                },
            )),
        }
    }
}

/// Decode a call's raw argument text into a JSON object.
///
/// Blank text is treated as `{}`. Anything that is not valid JSON, or is
/// valid JSON but not an object, is rejected.
pub fn parse_arguments(tool_name: &str, raw: &str) -> Result<serde_json::Value, McpError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }

    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| McpError::InvalidArguments {
            tool: tool_name.to_string(),
            reason: format!("arguments are not valid JSON ({e})"),
        })?;

    if !value.is_object() {
        return Err(McpError::InvalidArguments {
            tool: tool_name.to_string(),
            reason: "arguments must be a JSON object".into(),
        });
    }
    Ok(value)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
