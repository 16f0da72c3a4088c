use super::{
    classify_http_error, AssistantMessage, CompletionError, CompletionOutcome, CompletionProvider,
    Message, MessageContent, Role, TokenUsage, ToolCall, ToolDefinition,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Fallback adapter for the Ollama family, whose native tool calling is too
/// unreliable to drive the loop the generic way. Tool results are re-injected
/// as `user` messages that restate the original query and pin the model to
/// the retrieved text; generation runs at temperature 0 with a fixed context
/// window.
#[derive(Clone)]
pub struct OllamaCompletions {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    num_ctx: usize,
}

impl OllamaCompletions {
    pub fn new(base_url: String, model: String, api_key: Option<String>, num_ctx: usize) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            // "qwen3:32b" from "ollama_chat/qwen3:32b"
            model: model.rsplit('/').next().unwrap_or(&model).to_string(),
            api_key,
            num_ctx,
        }
    }
}

pub fn grounding_reply(tool_content: &str, original_query: &str) -> String {
    format!(
        "RETRIEVED INFORMATION:\n\n{tool_content}\n\nNow answer this query: '{original_query}' using ONLY the retrieved information above. Do not use your own knowledge."
    )
}

#[async_trait]
impl CompletionProvider for OllamaCompletions {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<CompletionOutcome, CompletionError> {
        let total_len: usize = messages.iter().map(|m| m.content.flatten().len()).sum();
        tracing::info!(
            "Ollama Request: model={}, messages={}, total_chars={}",
            self.model,
            messages.len(),
            total_len
        );

        let url = format!("{}/api/chat", self.base_url);
        let req = ChatRequest {
            model: self.model.clone(),
            messages: messages.iter().map(WireMessage::from_message).collect(),
            tools: tools.iter().map(WireTool::from_definition).collect(),
            stream: false,
            options: ChatOptions {
                // Deterministic grounding to the retrieved data.
                temperature: 0.0,
                num_ctx: self.num_ctx,
            },
        };

        let mut rb = self.http.post(url).json(&req);
        if let Some(key) = &self.api_key {
            rb = rb.header("Authorization", format!("Bearer {}", key));
        }
        let resp = rb
            .send()
            .await
            .map_err(|e| CompletionError::Provider(e.into()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_http_error(status.as_u16(), &text));
        }

        let payload: ChatResponse = resp
            .json()
            .await
            .map_err(|e| CompletionError::Provider(e.into()))?;

        // Ollama tool calls carry no id; synthesize stable per-message ids so
        // downstream bookkeeping stays uniform across adapters.
        let tool_calls = payload
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, c)| ToolCall {
                id: format!("call-{i}"),
                name: c.function.name,
                arguments: serde_json::to_string(&c.function.arguments).unwrap_or_default(),
            })
            .collect();

        Ok(CompletionOutcome {
            message: AssistantMessage {
                content: payload.message.content,
                tool_calls,
            },
            usage: TokenUsage {
                prompt_tokens: payload.prompt_eval_count.map(|v| v as usize),
                completion_tokens: payload.eval_count.map(|v| v as usize),
                total_tokens: match (payload.prompt_eval_count, payload.eval_count) {
                    (Some(p), Some(c)) => Some((p + c) as usize),
                    _ => None,
                },
            },
        })
    }

    fn render_tool_replies(
        &self,
        calls: &[ToolCall],
        results: &[MessageContent],
        original_query: &str,
    ) -> Vec<Message> {
        calls
            .iter()
            .zip(results.iter())
            .map(|(_call, result)| {
                let tool_content = result.flatten();
                Message::user(grounding_reply(&tool_content, original_query))
            })
            .collect()
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_ctx: usize,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: JsonValue,
}

impl WireTool {
    fn from_definition(def: &ToolDefinition) -> Self {
        Self {
            r#type: "function".to_string(),
            function: WireFunctionDef {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl WireMessage {
    fn from_message(msg: &Message) -> Self {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            // Chronological user-role injection replaces tool messages on
            // this wire, but history copied verbatim may still carry them.
            Role::Tool => "user",
        };
        Self {
            role: role.to_string(),
            content: msg.content.flatten(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    function: ResponseFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ResponseFunctionCall {
    name: String,
    #[serde(default)]
    arguments: JsonValue,
}
