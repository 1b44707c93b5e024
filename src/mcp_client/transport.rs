//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with MCP server child processes:
//! - Writing JSON-RPC requests and notifications to stdin
//! - Reading JSON-RPC responses from stdout on a background task
//! - Line-delimited JSON protocol (one JSON object per line)
//!
//! Several requests may be in flight on one transport; each response is
//! routed to its waiter by `id`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ─── Pending Table ───────────────────────────────────────────────────────────

/// Waiters for in-flight requests, plus whether stdout has reached EOF.
#[derive(Default)]
struct PendingTable {
    waiters: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

type SharedPending = Arc<StdMutex<PendingTable>>;

fn lock_table(pending: &SharedPending) -> MutexGuard<'_, PendingTable> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a waiter if its request future is dropped before the response.
struct WaiterGuard<'a> {
    pending: &'a SharedPending,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        lock_table(self.pending).waiters.remove(&self.id);
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    server_name: String,
    next_id: AtomicU64,
    writer: Mutex<Option<BoxedWriter>>,
    pending: SharedPending,
    reader_task: JoinHandle<()>,
}

impl StdioTransport {
    /// Create a transport over any line-oriented byte stream pair.
    ///
    /// Spawns the reader task immediately; must be called inside a Tokio runtime.
    pub fn new<W, R>(server_name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending: SharedPending = Arc::default();
        let reader_task = tokio::spawn(read_loop(
            server_name.to_string(),
            BufReader::new(reader),
            Arc::clone(&pending),
        ));

        Self {
            server_name: server_name.to_string(),
            next_id: AtomicU64::new(1),
            writer: Mutex::new(Some(Box::new(writer))),
            pending,
            reader_task,
        }
    }

    /// Send a JSON-RPC request and wait for the response with the same `id`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        {
            let mut table = lock_table(&self.pending);
            if table.closed {
                return Err(self.stdout_closed());
            }
            table.waiters.insert(id, tx);
        }
        let _guard = WaiterGuard {
            pending: &self.pending,
            id,
        };

        let line = serde_json::to_string(&req).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;
        self.write_line(line).await?;

        tracing::trace!(server = %self.server_name, id, method, "request sent");

        rx.await.map_err(|_| self.stdout_closed())
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let line = serde_json::to_string(&notification).map_err(|e| {
            McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to serialize notification: {e}"),
            }
        })?;
        self.write_line(line).await
    }

    /// Close the write side so the server sees EOF on stdin.
    ///
    /// Safe to call repeatedly.
    pub async fn close_stdin(&self) {
        let mut writer = self.writer.lock().await;
        if let Some(mut w) = writer.take() {
            let _ = w.shutdown().await;
        }
    }

    async fn write_line(&self, mut line: String) -> Result<(), McpError> {
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| McpError::ConnectionClosed {
            server: self.server_name.clone(),
        })?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to flush stdin: {e}"),
            })
    }

    fn stdout_closed(&self) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason: "server stdout closed (process may have exited)".into(),
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Route every response line to its waiter until stdout closes.
///
/// Lines that are not JSON-RPC responses (server logging, notifications,
/// server-initiated requests) are skipped.
async fn read_loop<R>(server_name: String, mut reader: BufReader<R>, pending: SharedPending)
where
    R: AsyncRead + Unpin,
{
    let mut line_buf = String::new();

    loop {
        line_buf.clear();
        match reader.read_line(&mut line_buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(server = %server_name, error = %e, "failed to read server stdout");
                break;
            }
        }

        let trimmed = line_buf.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
            Ok(resp) => {
                let waiter = lock_table(&pending).waiters.remove(&resp.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => {
                        tracing::debug!(server = %server_name, id = resp.id, "response for unknown request id");
                    }
                }
            }
            Err(_) => {
                tracing::trace!(server = %server_name, line = %trimmed, "skipping non-response stdout line");
            }
        }
    }

    let mut table = lock_table(&pending);
    table.closed = true;
    // Dropping the senders wakes every waiter with an error.
    table.waiters.clear();
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
