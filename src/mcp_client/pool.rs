//! Server pool: one connection per descriptor, connected concurrently.
//!
//! A pool is built for a single orchestration request and torn down when that
//! request finishes. Individual failures are recorded and excluded; they never
//! abort the batch.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::connection::{Connector, ToolServer};
use super::errors::McpError;
use super::types::{CallToolResult, McpToolDefinition, ServerDescriptor};

/// Default per-server connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ─── ActiveConnection ────────────────────────────────────────────────────────

/// A server that connected within the timeout, owned by the pool.
pub struct ActiveConnection {
    position: usize,
    server_name: String,
    tool_names: HashSet<String>,
    handle: Box<dyn ToolServer>,
}

impl ActiveConnection {
    fn new(position: usize, server_name: &str, handle: Box<dyn ToolServer>) -> Self {
        let tool_names = handle.tools().iter().map(|t| t.name.clone()).collect();
        Self {
            position,
            server_name: server_name.to_string(),
            tool_names,
            handle,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Index of the descriptor this connection came from.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Tool definitions in the order the server listed them.
    pub fn tools(&self) -> &[McpToolDefinition] {
        self.handle.tools()
    }

    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.tool_names.contains(tool_name)
    }

    /// Invoke a tool on this server.
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        self.handle.call_tool(tool_name, arguments).await
    }
}

impl std::fmt::Debug for ActiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveConnection")
            .field("position", &self.position)
            .field("server_name", &self.server_name)
            .field("tools", &self.tool_names.len())
            .finish()
    }
}

/// A descriptor that did not make it into the pool.
#[derive(Debug)]
pub struct PoolFailure {
    /// Index of the descriptor in the input list.
    pub position: usize,
    pub server_name: String,
    pub error: McpError,
}

// ─── ServerPool ──────────────────────────────────────────────────────────────

/// Connected servers for one request, in descriptor order.
#[derive(Debug, Default)]
pub struct ServerPool {
    connections: Vec<ActiveConnection>,
}

impl ServerPool {
    /// Connect every descriptor concurrently and wait for all of them to settle.
    ///
    /// Each attempt is bounded by `connect_timeout`; a timed-out attempt is
    /// dropped, which kills any child it spawned. Connections keep descriptor
    /// order regardless of completion order. When several descriptors share a
    /// name, the first one that connects is kept; later successes under that
    /// name are closed and recorded as configuration failures.
    pub async fn initialize_all(
        connector: &dyn Connector,
        descriptors: &[ServerDescriptor],
        connect_timeout: Duration,
    ) -> (Self, Vec<PoolFailure>) {
        let timeout_ms = u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX);
        let attempts = descriptors.iter().enumerate().map(|(position, descriptor)| async move {
            let outcome =
                match tokio::time::timeout(connect_timeout, connector.connect(descriptor)).await {
                    Ok(result) => result,
                    Err(_) => Err(McpError::ConnectTimeout {
                        name: descriptor.name.clone(),
                        timeout_ms,
                    }),
                };
            (position, descriptor, outcome)
        });

        let mut seen = HashSet::new();
        let mut connections = Vec::new();
        let mut duplicates = Vec::new();
        let mut failures = Vec::new();

        // join_all yields in input order, so "first" means descriptor order.
        for (position, descriptor, outcome) in futures::future::join_all(attempts).await {
            let error = match outcome {
                Ok(handle) if seen.insert(descriptor.name.as_str()) => {
                    connections.push(ActiveConnection::new(position, &descriptor.name, handle));
                    continue;
                }
                Ok(handle) => {
                    duplicates.push(handle);
                    McpError::config(
                        &descriptor.name,
                        "duplicate server name; an earlier descriptor already connected under it",
                    )
                }
                Err(error) => error,
            };

            tracing::warn!(
                server = %descriptor.name,
                category = ?error.category(),
                error = %error,
                "server excluded from pool"
            );
            failures.push(PoolFailure {
                position,
                server_name: descriptor.name.clone(),
                error,
            });
        }

        if !duplicates.is_empty() {
            futures::future::join_all(duplicates.iter_mut().map(|h| h.close())).await;
        }

        tracing::info!(
            requested = descriptors.len(),
            connected = connections.len(),
            failed = failures.len(),
            "server pool initialized"
        );

        (Self { connections }, failures)
    }

    pub fn connections(&self) -> &[ActiveConnection] {
        &self.connections
    }

    pub fn get(&self, index: usize) -> Option<&ActiveConnection> {
        self.connections.get(index)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.server_name()).collect()
    }

    /// Close every connection concurrently and empty the pool.
    ///
    /// Calling it on an empty or already shut down pool does nothing.
    pub async fn shutdown(&mut self) {
        if self.connections.is_empty() {
            return;
        }

        let count = self.connections.len();
        futures::future::join_all(self.connections.iter_mut().map(|c| c.handle.close())).await;
        self.connections.clear();

        tracing::info!(closed = count, "server pool shut down");
    }
}

// ─── Capability Probe ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Connected,
    Error,
}

/// Snapshot of one server's reachability and tools.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProbe {
    pub server_name: String,
    pub tools: Vec<McpToolDefinition>,
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Connect to every descriptor, report what each one offers, then disconnect.
///
/// One entry per descriptor, in input order. The probe pool is always shut
/// down before returning.
pub async fn probe_servers(
    connector: &dyn Connector,
    descriptors: &[ServerDescriptor],
    connect_timeout: Duration,
) -> Vec<ServerProbe> {
    let (mut pool, failures) =
        ServerPool::initialize_all(connector, descriptors, connect_timeout).await;
    let checked_at = Utc::now();

    let mut slots: Vec<Option<ServerProbe>> = vec![None; descriptors.len()];
    for conn in pool.connections() {
        slots[conn.position()] = Some(ServerProbe {
            server_name: conn.server_name().to_string(),
            tools: conn.tools().to_vec(),
            status: ProbeStatus::Connected,
            error: None,
            checked_at,
        });
    }
    for failure in failures {
        slots[failure.position] = Some(ServerProbe {
            server_name: failure.server_name,
            tools: Vec::new(),
            status: ProbeStatus::Error,
            error: Some(failure.error.to_string()),
            checked_at,
        });
    }

    pool.shutdown().await;
    slots.into_iter().flatten().collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::errors::ErrorCategory;
    use crate::mcp_client::test_support::{descriptor, FakeConnector};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_partial_failure_excludes_failed_server() {
        let connector = FakeConnector::new()
            .ready("alpha", &["lookup"])
            .failing("beta", "spawn exploded");

        let (pool, failures) = ServerPool::initialize_all(
            &connector,
            &[descriptor("alpha"), descriptor("beta")],
            TIMEOUT,
        )
        .await;

        assert_eq!(pool.server_names(), vec!["alpha"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].server_name, "beta");
        assert_eq!(failures[0].position, 1);
        assert_eq!(failures[0].error.category(), ErrorCategory::Connection);
    }

    #[tokio::test]
    async fn test_pool_keeps_descriptor_order() {
        let connector = FakeConnector::new()
            .slow("slow", &["a"], Duration::from_millis(80))
            .ready("fast", &["b"]);

        let (pool, failures) = ServerPool::initialize_all(
            &connector,
            &[descriptor("slow"), descriptor("fast")],
            TIMEOUT,
        )
        .await;

        assert!(failures.is_empty());
        assert_eq!(pool.server_names(), vec!["slow", "fast"]);
        assert_eq!(pool.get(0).unwrap().position(), 0);
    }

    #[tokio::test]
    async fn test_connect_timeout_reports_milliseconds() {
        let connector = FakeConnector::new().hanging("stuck");
        let (_, failures) = ServerPool::initialize_all(
            &connector,
            &[descriptor("stuck")],
            Duration::from_millis(150),
        )
        .await;

        assert!(matches!(
            failures[0].error,
            McpError::ConnectTimeout { timeout_ms: 150, .. }
        ));
        assert!(failures[0].error.to_string().contains("150ms"));
    }

    #[tokio::test]
    async fn test_connect_timeout_is_a_failure() {
        let connector = FakeConnector::new()
            .hanging("stuck")
            .ready("ok", &["ping"]);

        let (pool, failures) = ServerPool::initialize_all(
            &connector,
            &[descriptor("stuck"), descriptor("ok")],
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(pool.server_names(), vec!["ok"]);
        assert!(matches!(failures[0].error, McpError::ConnectTimeout { .. }));
    }

    #[tokio::test]
    async fn test_all_failures_leave_pool_empty() {
        let connector = FakeConnector::new();
        let (pool, failures) =
            ServerPool::initialize_all(&connector, &[descriptor("missing")], TIMEOUT).await;

        assert!(pool.is_empty());
        assert_eq!(failures[0].error.category(), ErrorCategory::Configuration);
    }

    #[tokio::test]
    async fn test_empty_descriptor_list() {
        let connector = FakeConnector::new();
        let (pool, failures) = ServerPool::initialize_all(&connector, &[], TIMEOUT).await;
        assert!(pool.is_empty());
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_first_wins() {
        let connector = FakeConnector::new().ready("twin", &["x"]);
        let mut second = descriptor("twin");
        second.id = "other".into();

        let (pool, failures) =
            ServerPool::initialize_all(&connector, &[descriptor("twin"), second], TIMEOUT).await;

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(0).unwrap().position(), 0);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].position, 1);
        assert_eq!(failures[0].error.category(), ErrorCategory::Configuration);
        // the losing duplicate was connected, then closed
        assert_eq!(connector.log.closes(), vec!["twin"]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_each_connection_once() {
        let connector = FakeConnector::new()
            .ready("alpha", &["a"])
            .ready("beta", &["b"]);
        let (mut pool, _) = ServerPool::initialize_all(
            &connector,
            &[descriptor("alpha"), descriptor("beta")],
            TIMEOUT,
        )
        .await;

        pool.shutdown().await;
        pool.shutdown().await;

        let mut closes = connector.log.closes();
        closes.sort();
        assert_eq!(closes, vec!["alpha", "beta"]);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_has_tool_and_invoke() {
        let connector = FakeConnector::new().ready("alpha", &["lookup"]);
        let (mut pool, _) =
            ServerPool::initialize_all(&connector, &[descriptor("alpha")], TIMEOUT).await;

        let conn = pool.get(0).unwrap();
        assert!(conn.has_tool("lookup"));
        assert!(!conn.has_tool("missing"));

        let result = conn.invoke("lookup", serde_json::json!({})).await.unwrap();
        assert_eq!(result.render_text(), "alpha:lookup");
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_probe_reports_in_descriptor_order() {
        let connector = FakeConnector::new()
            .failing("broken", "no interpreter")
            .ready("notes", &["add_note", "list_notes"]);

        let probes = probe_servers(
            &connector,
            &[descriptor("broken"), descriptor("notes")],
            TIMEOUT,
        )
        .await;

        assert_eq!(probes.len(), 2);
        assert_eq!(probes[0].server_name, "broken");
        assert_eq!(probes[0].status, ProbeStatus::Error);
        assert!(probes[0].error.as_deref().unwrap().contains("no interpreter"));
        assert_eq!(probes[1].status, ProbeStatus::Connected);
        assert_eq!(probes[1].tools.len(), 2);

        // probe never leaves connections open
        assert_eq!(connector.log.closes(), vec!["notes"]);

        let json = serde_json::to_value(&probes[1]).unwrap();
        assert_eq!(json["serverName"], "notes");
        assert_eq!(json["status"], "connected");
        assert!(json.get("error").is_none());
        assert!(json.get("checkedAt").is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_live_pool_with_one_unreachable_server() {
        use crate::mcp_client::connection::{ConnectOptions, StdioConnector};
        use crate::mcp_client::test_support::write_fake_server;

        let tmp = tempfile::TempDir::new().unwrap();
        let script = write_fake_server(tmp.path(), "fake.sh");

        let mut good = descriptor("good");
        good.path = script.to_string_lossy().into_owned();
        let mut bad = descriptor("bad");
        bad.path = "does/not/exist.js".into();

        let connector = StdioConnector::new(ConnectOptions::new(tmp.path()));
        let (mut pool, failures) =
            ServerPool::initialize_all(&connector, &[good, bad], TIMEOUT).await;

        assert_eq!(pool.server_names(), vec!["good"]);
        assert!(pool.get(0).unwrap().has_tool("lookup"));
        assert_eq!(failures[0].server_name, "bad");
        pool.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_live_duplicate_name_falls_back_to_reachable_descriptor() {
        use crate::mcp_client::connection::{ConnectOptions, StdioConnector};
        use crate::mcp_client::test_support::write_fake_server;

        let tmp = tempfile::TempDir::new().unwrap();
        let script = write_fake_server(tmp.path(), "fake.sh");

        let mut broken = descriptor("x");
        broken.path = "does/not/exist.js".into();
        let mut reachable = descriptor("x");
        reachable.path = script.to_string_lossy().into_owned();

        let connector = StdioConnector::new(ConnectOptions::new(tmp.path()));
        let (mut pool, failures) =
            ServerPool::initialize_all(&connector, &[broken, reachable], TIMEOUT).await;

        assert_eq!(pool.server_names(), vec!["x"]);
        assert_eq!(pool.get(0).unwrap().position(), 1);
        assert!(pool.get(0).unwrap().has_tool("lookup"));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].position, 0);
        assert_eq!(failures[0].error.category(), ErrorCategory::Configuration);
        pool.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_live_connect_timeout_kills_child() {
        use crate::mcp_client::connection::{ConnectOptions, StdioConnector};
        use crate::mcp_client::test_support::{process_is_gone, write_silent_server};

        let tmp = tempfile::TempDir::new().unwrap();
        let pid_file = tmp.path().join("silent.pid");
        let script = write_silent_server(tmp.path(), "silent.sh", &pid_file);

        let mut silent = descriptor("silent");
        silent.path = script.to_string_lossy().into_owned();

        let connector = StdioConnector::new(ConnectOptions::new(tmp.path()));
        let (pool, failures) =
            ServerPool::initialize_all(&connector, &[silent], Duration::from_millis(300)).await;

        assert!(pool.is_empty());
        assert!(matches!(failures[0].error, McpError::ConnectTimeout { .. }));

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        assert!(!pid.is_empty());

        // kill_on_drop sends SIGKILL; reaping may lag a little
        let mut gone = false;
        for _ in 0..50 {
            if process_is_gone(&pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "child {pid} still running after connect timeout");
    }
}
