//! OpenAI-compatible inference client.
//!
//! Sends non-streaming chat completion requests carrying the conversation
//! history and the tool catalog, and returns the assistant message.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::config::ModelConfig;
use super::errors::InferenceError;
use super::response::parse_completion_response;
use super::types::{ChatCompletionRequest, ChatMessage, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ─── CompletionModel ─────────────────────────────────────────────────────────

/// The completion-model collaborator used by the conversation loop.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Run one completion over the full history. An empty `tools` slice
    /// means the request carries no tools at all.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, InferenceError>;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for an OpenAI-compatible `chat/completions` endpoint.
pub struct InferenceClient {
    http: HttpClient,
    config: ModelConfig,
}

impl InferenceClient {
    /// Create a client from the model configuration.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn from_config(config: ModelConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config })
    }

    /// The configured model name.
    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl CompletionModel for InferenceClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, InferenceError> {
        let url = self.completions_url();
        let body = ChatCompletionRequest::new(
            &self.config.model_name,
            messages,
            tools,
            self.config.temperature,
            self.config.max_tokens,
        );

        // Log the request metadata (not the full body; it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = tools.len(),
            "model request"
        );

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = self.config.api_key() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.config.request_timeout_secs,
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let err = InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            };
            tracing::warn!(status = status.as_u16(), transient = err.is_transient(), "model request failed");
            return Err(err);
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::MalformedResponse {
                reason: format!("failed to read response body: {e}"),
            })?;

        parse_completion_response(&body_text)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
