//! Completion response parsing.
//!
//! Turns a non-streaming `chat/completions` body into the assistant
//! `ChatMessage` appended to the conversation.

use serde::Deserialize;
use uuid::Uuid;

use super::errors::InferenceError;
use super::types::{ChatMessage, FunctionCall, Role, ToolCallRequest};

/// Parse a completion body into an assistant message.
///
/// Tool calls without an id get a generated `call_<uuid>` so the tool
/// results can reference them. Arguments are kept as the raw text the model
/// produced.
pub fn parse_completion_response(body: &str) -> Result<ChatMessage, InferenceError> {
    #[derive(Deserialize)]
    struct CompletionResponse {
        #[serde(default)]
        choices: Vec<CompletionChoice>,
        #[serde(default)]
        error: Option<serde_json::Value>,
    }

    #[derive(Deserialize)]
    struct CompletionChoice {
        message: CompletionMessage,
        #[serde(default)]
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct CompletionMessage {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        tool_calls: Option<Vec<RawToolCall>>,
    }

    #[derive(Deserialize)]
    struct RawToolCall {
        #[serde(default)]
        id: Option<String>,
        function: FunctionCall,
    }

    let resp: CompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("failed to parse completion response: {e}"),
        })?;

    let Some(choice) = resp.choices.into_iter().next() else {
        let reason = match resp.error {
            Some(err) => format!("endpoint returned an error: {err}"),
            None => "empty choices array".to_string(),
        };
        return Err(InferenceError::MalformedResponse { reason });
    };

    let tool_calls: Vec<ToolCallRequest> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let id = tc
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4()));
            ToolCallRequest::new(id, tc.function.name, tc.function.arguments)
        })
        .collect();

    tracing::debug!(
        finish_reason = choice.finish_reason.as_deref().unwrap_or("none"),
        tool_calls = tool_calls.len(),
        "completion parsed"
    );

    let content = choice.message.content.filter(|c| !c.is_empty());

    Ok(ChatMessage {
        role: Role::Assistant,
        content,
        tool_call_id: None,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_only_response() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello!"},
                "finish_reason": "stop"
            }]
        }"#;
        let msg = parse_completion_response(body).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content.as_deref(), Some("Hello!"));
        assert!(msg.tool_calls.is_none());
    }

    #[test]
    fn test_tool_calls_keep_raw_arguments() {
        let body = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "call_a", "type": "function",
                         "function": {"name": "lookup", "arguments": "{\"key\":\"k\"}"}},
                        {"id": "call_b", "type": "function",
                         "function": {"name": "lookup", "arguments": "{bad json"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let msg = parse_completion_response(body).unwrap();
        let calls = msg.requested_tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].function.arguments, "{\"key\":\"k\"}");
        assert_eq!(calls[1].function.arguments, "{bad json");
        assert!(msg.content.is_none());
    }

    #[test]
    fn test_missing_tool_call_id_is_generated() {
        let body = r#"{"choices": [{"message": {"tool_calls": [
            {"function": {"name": "ping", "arguments": "{}"}},
            {"id": "", "function": {"name": "ping", "arguments": "{}"}}
        ]}}]}"#;
        let msg = parse_completion_response(body).unwrap();
        let calls = msg.requested_tool_calls();
        assert!(calls[0].id.starts_with("call_"));
        assert!(calls[1].id.starts_with("call_"));
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn test_empty_choices_is_malformed() {
        let err = parse_completion_response(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, InferenceError::MalformedResponse { .. }));
    }

    #[test]
    fn test_error_object_in_success_body() {
        let err =
            parse_completion_response(r#"{"error": {"message": "model overloaded"}}"#).unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn test_invalid_json_body() {
        assert!(parse_completion_response("<html>502</html>").is_err());
    }
}
