//! Protocol client adapter: one MCP server subprocess.
//!
//! `connect` resolves the descriptor into a command, spawns it with a merged
//! environment, performs the `initialize` handshake and lists tools. `invoke`
//! sends one `tools/call`. `close` terminates the process and is idempotent.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use super::environment::{ambient_snapshot, merge_environment, parse_env, EnvMap};
use super::errors::McpError;
use super::launcher::{launcher_for, resolve_executable};
use super::transport::{extract_result, StdioTransport};
use super::types::{
    CallToolResult, InitializeResult, ListToolsResult, McpToolDefinition, ServerDescriptor,
    ServerInfo, PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Grace period between closing stdin and force-killing the process.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How long to wait for trailing stderr after a failed handshake.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Number of stderr lines kept for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Upper bound on `tools/list` pages, against servers that repeat a cursor.
const MAX_TOOL_PAGES: usize = 64;

// ─── Seams ───────────────────────────────────────────────────────────────────

/// A connected server that can run tools.
///
/// Implemented by [`McpConnection`]; the pool, registry and executor only
/// depend on this trait.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// The descriptor name this server was connected under.
    fn server_name(&self) -> &str;

    /// Tools discovered during the handshake, in server order.
    fn tools(&self) -> &[McpToolDefinition];

    /// Invoke one tool. No retries.
    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError>;

    /// Terminate the server. Calling it again is a no-op.
    async fn close(&mut self);
}

/// Opens a [`ToolServer`] for a descriptor.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &ServerDescriptor) -> Result<Box<dyn ToolServer>, McpError>;
}

// ─── Options ─────────────────────────────────────────────────────────────────

/// Settings shared by every connection of one request.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Fallback root for relative executable paths.
    pub working_root: PathBuf,
    /// Snapshot of the ambient environment the overrides are merged onto.
    pub ambient_env: EnvMap,
    /// Per-call limit for `tools/call`; `None` waits indefinitely.
    pub invocation_timeout: Option<Duration>,
}

impl ConnectOptions {
    /// Options rooted at `working_root` with a fresh ambient snapshot.
    pub fn new(working_root: impl Into<PathBuf>) -> Self {
        Self {
            working_root: working_root.into(),
            ambient_env: ambient_snapshot(),
            invocation_timeout: None,
        }
    }

    pub fn with_invocation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.invocation_timeout = timeout;
        self
    }
}

/// [`Connector`] that spawns real subprocesses over stdio.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    options: ConnectOptions,
}

impl StdioConnector {
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(&self, descriptor: &ServerDescriptor) -> Result<Box<dyn ToolServer>, McpError> {
        let conn = McpConnection::connect(descriptor, &self.options).await?;
        Ok(Box::new(conn))
    }
}

// ─── Stderr capture ──────────────────────────────────────────────────────────

/// Drains a child's stderr into debug logs and keeps the last few lines.
struct StderrTail {
    lines: Arc<StdMutex<VecDeque<String>>>,
    task: JoinHandle<()>,
}

impl StderrTail {
    fn capture(server_name: &str, stderr: ChildStderr) -> Self {
        let lines: Arc<StdMutex<VecDeque<String>>> = Arc::default();
        let sink = Arc::clone(&lines);
        let server = server_name.to_string();

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                tracing::debug!(server = %server, stderr = %line, "server stderr");
                let mut tail = sink.lock().unwrap_or_else(|p| p.into_inner());
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });

        Self { lines, task }
    }

    /// Wait briefly for the process to finish writing, then format the tail.
    async fn drain_suffix(&mut self) -> String {
        let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut self.task).await;
        let tail = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        if tail.is_empty() {
            String::new()
        } else {
            let joined = tail.iter().cloned().collect::<Vec<_>>().join("\n");
            format!(" | stderr: {}", joined.trim())
        }
    }
}

impl Drop for StderrTail {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ─── McpConnection ───────────────────────────────────────────────────────────

/// A running MCP server process with its transport and tool definitions.
pub struct McpConnection {
    server_name: String,
    process: Option<Child>,
    transport: Option<StdioTransport>,
    stderr: Option<StderrTail>,
    tools: Vec<McpToolDefinition>,
    server_info: Option<ServerInfo>,
    invocation_timeout: Option<Duration>,
    closed: bool,
}

impl McpConnection {
    /// Spawn the server described by `descriptor` and complete the handshake.
    ///
    /// On handshake failure the process is closed before the error is
    /// returned. If this future is dropped mid-way (connect timeout), the
    /// child is killed on drop.
    pub async fn connect(
        descriptor: &ServerDescriptor,
        options: &ConnectOptions,
    ) -> Result<Self, McpError> {
        let name = descriptor.name.as_str();

        let overrides = parse_env(name, &descriptor.env)?;
        let script = resolve_executable(name, &descriptor.path, &options.working_root)?;
        let launcher = launcher_for(name, &script)?;
        let env = merge_environment(&options.ambient_env, &overrides);

        let mut cmd = Command::new(&launcher.program);
        cmd.args(launcher.args_for(&script))
            .env_clear()
            .envs(&env)
            .kill_on_drop(true)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        tracing::info!(
            server = name,
            program = %launcher.program,
            script = %script.display(),
            env_overrides = overrides.len(),
            "spawning MCP server"
        );

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{} {}: {e}", launcher.program, script.display()),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;
        let stderr = child.stderr.take().map(|s| StderrTail::capture(name, s));

        let mut conn = Self {
            server_name: name.to_string(),
            process: Some(child),
            transport: Some(StdioTransport::new(name, stdin, stdout)),
            stderr,
            tools: Vec::new(),
            server_info: None,
            invocation_timeout: options.invocation_timeout,
            closed: false,
        };

        if let Err(e) = conn.handshake().await {
            conn.close().await;
            let suffix = match conn.stderr.as_mut() {
                Some(tail) => tail.drain_suffix().await,
                None => String::new(),
            };
            tracing::warn!(server = name, error = %e, "MCP handshake failed");
            let reason = match e {
                McpError::InitFailed { reason, .. } => reason,
                other => other.to_string(),
            };
            return Err(McpError::InitFailed {
                name: name.to_string(),
                reason: format!("{reason}{suffix}"),
            });
        }

        tracing::info!(
            server = name,
            tool_count = conn.tools.len(),
            server_info = ?conn.server_info,
            "MCP server connected"
        );

        Ok(conn)
    }

    /// Server identity reported during `initialize`, if any.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn transport(&self) -> Result<&StdioTransport, McpError> {
        match (&self.transport, self.closed) {
            (Some(t), false) => Ok(t),
            _ => Err(McpError::ConnectionClosed {
                server: self.server_name.clone(),
            }),
        }
    }

    /// `initialize` → `notifications/initialized` → `tools/list`.
    async fn handshake(&mut self) -> Result<(), McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let transport = self.transport()?;
        let response = transport.request("initialize", Some(params)).await?;
        let result = extract_result(response)?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InitFailed {
                name: self.server_name.clone(),
                reason: format!("failed to parse initialize response: {e}"),
            })?;

        if let Some(version) = &init.protocol_version {
            if version != PROTOCOL_VERSION {
                tracing::debug!(server = %self.server_name, version = %version, "server negotiated a different protocol version");
            }
        }

        transport.notify("notifications/initialized", None).await?;
        let tools = self.list_tools().await?;

        self.server_info = init.server_info;
        self.tools = tools;
        Ok(())
    }

    /// Fetch every page of `tools/list`.
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        let transport = self.transport()?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let response = transport.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(extract_result(response)?)
                .map_err(|e| McpError::InitFailed {
                    name: self.server_name.clone(),
                    reason: format!("failed to parse tools/list response: {e}"),
                })?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(server = %self.server_name, pages = MAX_TOOL_PAGES, "tools/list pagination cut short");
        Ok(tools)
    }
}

#[async_trait]
impl ToolServer for McpConnection {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn tools(&self) -> &[McpToolDefinition] {
        &self.tools
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        let transport = self.transport()?;
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let request = transport.request("tools/call", Some(params));
        let response = match self.invocation_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| McpError::Timeout {
                    tool: tool_name.to_string(),
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })??,
            None => request.await?,
        };

        let result: CallToolResult = serde_json::from_value(extract_result(response)?)
            .map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("malformed tools/call result: {e}"),
            })?;

        if result.is_error {
            return Err(McpError::ToolFailed {
                tool: tool_name.to_string(),
                message: result.render_text(),
            });
        }

        Ok(result)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(transport) = &self.transport {
            transport.close_stdin().await;
        }

        if let Some(mut child) = self.process.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server = %self.server_name, %status, "MCP server exited");
                }
                _ => {
                    tracing::debug!(server = %self.server_name, "MCP server did not exit, killing");
                    let _ = child.kill().await;
                }
            }
        }

        self.transport = None;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
