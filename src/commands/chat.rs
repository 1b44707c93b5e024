//! Chat command: wires the configured model and the stdio connector into a
//! `ConversationDriver` and runs one request on a background task.
//!
//! The caller owns the receiving end of the event channel. Dropping it
//! cancels the run; the driver still tears down every spawned server.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::agent_core::{ChatEvent, ChatRequest, ConversationDriver, IterationBudget, Termination};
use crate::inference::config::RelayConfig;
use crate::inference::errors::InferenceError;
use crate::inference::InferenceClient;
use crate::mcp_client::connection::{ConnectOptions, StdioConnector};

/// Frames buffered between the driver and the consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Build a driver from the loaded configuration.
pub fn build_driver(config: &RelayConfig) -> Result<ConversationDriver, InferenceError> {
    let model = InferenceClient::from_config(config.model.clone())?;
    let orchestration = &config.orchestration;

    let options = ConnectOptions::new(orchestration.working_root())
        .with_invocation_timeout(orchestration.invocation_timeout());
    let connector = StdioConnector::new(options);

    Ok(ConversationDriver::new(Arc::new(model), Arc::new(connector))
        .with_budget(IterationBudget::new(orchestration.max_iterations))
        .with_connect_timeout(orchestration.connect_timeout()))
}

/// Start one request. Frames arrive on the returned receiver; the handle
/// resolves to how the run ended.
pub fn start_chat(
    driver: ConversationDriver,
    request: ChatRequest,
) -> (mpsc::Receiver<ChatEvent>, JoinHandle<Termination>) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "chat",
        request_id = %request_id,
        servers = request.servers.len(),
        messages = request.messages.len()
    );

    let handle = tokio::spawn(
        async move {
            tracing::info!("chat request started");
            let termination = driver.run(request, tx).await;
            tracing::info!(termination = ?termination, "chat request finished");
            termination
        }
        .instrument(span),
    );

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::client::CompletionModel;
    use crate::inference::types::{ChatMessage, ToolCallRequest, ToolDefinition};
    use crate::mcp_client::test_support::{descriptor, FakeConnector};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Calls `lookup` once, then answers with whatever the tool returned.
    struct EchoModel {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl CompletionModel for EchoModel {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> Result<ChatMessage, InferenceError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                return Ok(ChatMessage {
                    tool_calls: Some(vec![ToolCallRequest::new("call_1", "lookup", "{}")]),
                    ..ChatMessage::assistant("")
                });
            }
            let last = messages
                .last()
                .and_then(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ChatMessage::assistant(format!("tool said {last}")))
        }
    }

    fn driver(connector: FakeConnector) -> ConversationDriver {
        ConversationDriver::new(
            Arc::new(EchoModel {
                calls: Mutex::new(0),
            }),
            Arc::new(connector),
        )
    }

    #[tokio::test]
    async fn test_start_chat_streams_frames_until_done() {
        let connector = FakeConnector::new().ready("alpha", &["lookup"]);
        let request = ChatRequest {
            messages: vec![ChatMessage::user("look it up")],
            servers: vec![descriptor("alpha")],
        };

        let (mut rx, handle) = start_chat(driver(connector), request);
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }

        assert_eq!(frames.len(), 4);
        assert_eq!(frames.last(), Some(&ChatEvent::Done));
        match &frames[2] {
            ChatEvent::Message { message } => {
                assert_eq!(message.content.as_deref(), Some("tool said alpha:lookup"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(matches!(handle.await.unwrap(), Termination::Completed));
    }

    #[tokio::test]
    async fn test_start_chat_reports_unreachable_servers() {
        let connector = FakeConnector::new().failing("alpha", "no such file");
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            servers: vec![descriptor("alpha")],
        };

        let (mut rx, handle) = start_chat(driver(connector), request);
        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            ChatEvent::error("Failed to connect to any configured MCP server.")
        );
        assert!(rx.recv().await.is_none());
        assert!(matches!(handle.await.unwrap(), Termination::Fatal(_)));
    }

    #[test]
    fn test_build_driver_from_config() {
        let config = RelayConfig::from_yaml_str(
            "model:\n  base_url: http://127.0.0.1:1/v1\n  model_name: test\norchestration:\n  max_iterations: 3\n",
        )
        .unwrap();
        assert!(build_driver(&config).is_ok());
    }
}
