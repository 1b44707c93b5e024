//! In-memory and on-disk fixtures shared by the unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::connection::{Connector, ToolServer};
use super::errors::McpError;
use super::types::{CallToolResult, EnvSource, McpToolDefinition, ServerDescriptor};

/// A line-oriented MCP server written in POSIX sh.
///
/// Answers `initialize`, `tools/list` (tools `lookup`, `explode`, `env_token`)
/// and `tools/call`. Notifications carry no id and are ignored.
pub const FAKE_SERVER_SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"0.1.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"lookup","description":"Look up a key","inputSchema":{"type":"object","properties":{"key":{"type":"string"}}}},{"name":"explode","inputSchema":{"type":"object"}},{"name":"env_token","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"name":"lookup"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"value-for-key"}]}}\n' "$id" ;;
    *'"name":"explode"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"kaboom"}],"isError":true}}\n' "$id" ;;
    *'"name":"env_token"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"%s"}]}}\n' "$id" "$RELAY_TEST_TOKEN" ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"Method not found"}}\n' "$id" ;;
  esac
done
"#;

/// Write [`FAKE_SERVER_SCRIPT`] into `dir` and return its path.
pub fn write_fake_server(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, FAKE_SERVER_SCRIPT).unwrap();
    path
}

/// Write a server that prints to stderr and exits before the handshake.
pub fn write_crashing_server(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, "#!/bin/sh\necho 'boom: missing API key' >&2\nexit 1\n").unwrap();
    path
}

/// Write a server that records its PID in `pid_file`, then reads stdin
/// forever without answering.
pub fn write_silent_server(dir: &Path, file_name: &str, pid_file: &Path) -> PathBuf {
    let path = dir.join(file_name);
    let script = format!(
        "#!/bin/sh\necho $$ > '{}'\nwhile IFS= read -r line; do :; done\n",
        pid_file.display()
    );
    std::fs::write(&path, script).unwrap();
    path
}

/// Whether `pid` no longer names a live process. A zombie awaiting reaping
/// counts as gone.
#[cfg(unix)]
pub fn process_is_gone(pid: &str) -> bool {
    let alive = std::process::Command::new("kill")
        .args(["-0", pid])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if !alive {
        return true;
    }
    std::process::Command::new("ps")
        .args(["-o", "stat=", "-p", pid])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).trim_start().starts_with('Z'))
        .unwrap_or(false)
}

pub fn descriptor(name: &str) -> ServerDescriptor {
    ServerDescriptor {
        id: format!("{name}-id"),
        name: name.to_string(),
        path: format!("/servers/{name}/index.js"),
        env: EnvSource::default(),
        market_id: None,
    }
}

pub fn tool(name: &str) -> McpToolDefinition {
    McpToolDefinition {
        name: name.to_string(),
        description: Some(format!("{name} tool")),
        input_schema: serde_json::json!({"type": "object", "properties": {}}),
    }
}

// ─── Fake servers ────────────────────────────────────────────────────────────

/// Calls and closes observed across every fake server of one connector.
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    pub calls: Arc<Mutex<Vec<(String, String, serde_json::Value)>>>,
    pub closes: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<(String, String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn closes(&self) -> Vec<String> {
        self.closes.lock().unwrap().clone()
    }
}

/// How a fake server answers one tool.
#[derive(Debug, Clone)]
pub enum FakeReply {
    Text(String),
    Fail(String),
    /// Reply with text after a delay.
    Slow(Duration, String),
}

pub struct FakeServer {
    name: String,
    tools: Vec<McpToolDefinition>,
    replies: HashMap<String, FakeReply>,
    log: CallLog,
    closed: bool,
}

#[async_trait]
impl ToolServer for FakeServer {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> &[McpToolDefinition] {
        &self.tools
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        self.log
            .calls
            .lock()
            .unwrap()
            .push((self.name.clone(), tool_name.to_string(), arguments));

        let text = match self.replies.get(tool_name) {
            Some(FakeReply::Text(text)) => text.clone(),
            Some(FakeReply::Slow(delay, text)) => {
                tokio::time::sleep(*delay).await;
                text.clone()
            }
            Some(FakeReply::Fail(message)) => {
                return Err(McpError::ToolFailed {
                    tool: tool_name.to_string(),
                    message: message.clone(),
                })
            }
            None => format!("{}:{tool_name}", self.name),
        };

        Ok(CallToolResult {
            content: vec![serde_json::json!({"type": "text", "text": text})],
            is_error: false,
        })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.log.closes.lock().unwrap().push(self.name.clone());
    }
}

#[derive(Debug, Clone)]
enum Behavior {
    Ready {
        tools: Vec<McpToolDefinition>,
        replies: HashMap<String, FakeReply>,
        delay: Duration,
    },
    Fail(String),
    Hang,
}

/// [`Connector`] whose servers are scripted per descriptor name.
///
/// Unknown names fail like a missing executable.
#[derive(Debug, Default, Clone)]
pub struct FakeConnector {
    behaviors: HashMap<String, Behavior>,
    pub log: CallLog,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(mut self, name: &str, tools: &[&str]) -> Self {
        self.behaviors.insert(
            name.to_string(),
            Behavior::Ready {
                tools: tools.iter().map(|t| tool(t)).collect(),
                replies: HashMap::new(),
                delay: Duration::ZERO,
            },
        );
        self
    }

    /// Connects successfully, but only after `delay`.
    pub fn slow(mut self, name: &str, tools: &[&str], delay: Duration) -> Self {
        self.behaviors.insert(
            name.to_string(),
            Behavior::Ready {
                tools: tools.iter().map(|t| tool(t)).collect(),
                replies: HashMap::new(),
                delay,
            },
        );
        self
    }

    pub fn reply(mut self, name: &str, tool_name: &str, reply: FakeReply) -> Self {
        if let Some(Behavior::Ready { replies, .. }) = self.behaviors.get_mut(name) {
            replies.insert(tool_name.to_string(), reply);
        }
        self
    }

    pub fn failing(mut self, name: &str, reason: &str) -> Self {
        self.behaviors
            .insert(name.to_string(), Behavior::Fail(reason.to_string()));
        self
    }

    pub fn hanging(mut self, name: &str) -> Self {
        self.behaviors.insert(name.to_string(), Behavior::Hang);
        self
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, descriptor: &ServerDescriptor) -> Result<Box<dyn ToolServer>, McpError> {
        match self.behaviors.get(&descriptor.name) {
            Some(Behavior::Ready {
                tools,
                replies,
                delay,
            }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                Ok(Box::new(FakeServer {
                    name: descriptor.name.clone(),
                    tools: tools.clone(),
                    replies: replies.clone(),
                    log: self.log.clone(),
                    closed: false,
                }))
            }
            Some(Behavior::Fail(reason)) => Err(McpError::SpawnFailed {
                name: descriptor.name.clone(),
                reason: reason.clone(),
            }),
            Some(Behavior::Hang) => std::future::pending().await,
            None => Err(McpError::config(
                &descriptor.name,
                format!("executable '{}' not found", descriptor.path),
            )),
        }
    }
}
