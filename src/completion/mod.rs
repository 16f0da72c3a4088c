pub mod ollama;
pub mod openai;

use crate::config::{AgentConfig, RegisteredModel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One element of a structured tool result or message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
    Image { image_url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn text(value: impl Into<String>) -> Self {
        MessageContent::Text(value.into())
    }

    /// Plain-text rendering: text parts concatenated, non-text parts
    /// serialised as JSON. Used wherever a provider needs a flat string.
    pub fn flatten(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => {
                let text_parts: Vec<&str> = parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text { text } => Some(text.as_str()),
                        ContentPart::Image { .. } => None,
                    })
                    .collect();
                if text_parts.is_empty() {
                    serde_json::to_string(parts).unwrap_or_default()
                } else {
                    text_parts.join("\n\n")
                }
            }
        }
    }
}

/// A tool invocation emitted by the model. `arguments` is the raw JSON text;
/// the dispatcher owns parsing so malformed arguments become a recoverable
/// tool reply rather than a dead turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }
}

/// Tool surface advertised to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
    pub total_tokens: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AssistantMessage {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub message: AssistantMessage,
    pub usage: TokenUsage,
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// The backend rejected the prompt as oversized. Surfaced as its own
    /// kind so the orchestrator can dump the offending messages and abort
    /// without retrying.
    #[error("context window exceeded")]
    ContextWindowExceeded,

    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

/// Uniform interface over chat-completion backends with function calling.
///
/// Adapters also own the shape in which tool results are re-sent to the
/// model, because that is exactly where backends differ.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<CompletionOutcome, CompletionError>;

    /// Render the reply messages for one assistant message's tool calls.
    /// Replies must keep the originating call order.
    fn render_tool_replies(
        &self,
        calls: &[ToolCall],
        results: &[MessageContent],
        original_query: &str,
    ) -> Vec<Message>;
}

/// Backends whose native tool calling is unreliable get the fallback
/// adapter. The check mirrors the historical model-name convention
/// (`ollama_chat/<model>` etc.).
pub fn is_fallback_model(model: &RegisteredModel) -> bool {
    model.provider == "ollama" || model.model_name.to_lowercase().contains("ollama")
}

pub fn provider_for_model(
    model: &RegisteredModel,
    agent: &AgentConfig,
) -> Arc<dyn CompletionProvider> {
    if is_fallback_model(model) {
        Arc::new(ollama::OllamaCompletions::new(
            model.api_base.clone(),
            model.model_name.clone(),
            model.api_key.clone(),
            agent.num_ctx,
        ))
    } else {
        Arc::new(openai::OpenAiCompletions::new(
            model.api_base.clone(),
            model.model_name.clone(),
            model.api_key.clone(),
        ))
    }
}

/// Classify a provider HTTP failure. Context-limit rejections arrive as 400
/// or 413 with a recognisable body; everything else is an opaque provider
/// error carrying the status and body for the logs.
pub fn classify_http_error(status: u16, body: &str) -> CompletionError {
    let lowered = body.to_lowercase();
    let context_limit = (status == 400 || status == 413)
        && (lowered.contains("context")
            || lowered.contains("token")
            || lowered.contains("too long")
            || lowered.contains("max_tokens")
            || lowered.contains("content_too_large"));
    if context_limit {
        CompletionError::ContextWindowExceeded
    } else {
        CompletionError::Provider(anyhow::anyhow!("provider error ({}): {}", status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_concatenates_text_parts() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "first".to_string(),
            },
            ContentPart::Image {
                image_url: "data:image/png;base64,xyz".to_string(),
            },
            ContentPart::Text {
                text: "second".to_string(),
            },
        ]);
        assert_eq!(content.flatten(), "first\n\nsecond");
    }

    #[test]
    fn flatten_serialises_image_only_results() {
        let content = MessageContent::Parts(vec![ContentPart::Image {
            image_url: "data:image/png;base64,xyz".to_string(),
        }]);
        let flattened = content.flatten();
        assert!(flattened.contains("image_url"));
        serde_json::from_str::<Vec<ContentPart>>(&flattened).unwrap();
    }

    #[test]
    fn context_limit_classification_matches_status_and_body() {
        assert!(matches!(
            classify_http_error(400, "maximum context length exceeded"),
            CompletionError::ContextWindowExceeded
        ));
        assert!(matches!(
            classify_http_error(413, "content_too_large"),
            CompletionError::ContextWindowExceeded
        ));
        assert!(matches!(
            classify_http_error(400, "invalid request"),
            CompletionError::Provider(_)
        ));
        assert!(matches!(
            classify_http_error(500, "context deadline"),
            CompletionError::Provider(_)
        ));
    }

    #[test]
    fn fallback_selection_is_by_model_family() {
        let ollama = RegisteredModel {
            id: "m1".to_string(),
            provider: "ollama".to_string(),
            api_base: "http://localhost:11434".to_string(),
            model_name: "qwen3:32b".to_string(),
            api_key: None,
        };
        let litellm_style = RegisteredModel {
            id: "m2".to_string(),
            provider: "openai".to_string(),
            api_base: "http://localhost:4000".to_string(),
            model_name: "ollama_chat/qwen3:32b".to_string(),
            api_key: None,
        };
        let openai = RegisteredModel {
            id: "m3".to_string(),
            provider: "openai".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            model_name: "gpt-4.1".to_string(),
            api_key: Some("sk-test".to_string()),
        };
        assert!(is_fallback_model(&ollama));
        assert!(is_fallback_model(&litellm_style));
        assert!(!is_fallback_model(&openai));
    }

    #[test]
    fn message_serialisation_omits_empty_tool_fields() {
        let msg = Message::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }
}
