use super::{
    classify_http_error, AssistantMessage, CompletionError, CompletionOutcome, CompletionProvider,
    ContentPart, Message, MessageContent, Role, TokenUsage, ToolCall, ToolDefinition,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Generic adapter for OpenAI-compatible backends with native function
/// calling: tool calls come back inside the assistant message, tool results
/// are re-sent as `role=tool` messages carrying the `tool_call_id`.
#[derive(Clone)]
pub struct OpenAiCompletions {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompletions {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletions {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<CompletionOutcome, CompletionError> {
        let total_len: usize = messages.iter().map(|m| m.content.flatten().len()).sum();
        tracing::info!(
            "OpenAI Request: model={}, messages={}, tools={}, total_chars={}",
            self.model,
            messages.len(),
            tools.len(),
            total_len
        );

        let url = format!("{}/chat/completions", self.base_url);
        let req = OaiRequest {
            model: self.model.clone(),
            messages: messages.iter().map(OaiMessage::from_message).collect(),
            stream: false,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(OaiTool::from_definition).collect())
            },
            tool_choice: if tools.is_empty() {
                None
            } else {
                Some("auto".to_string())
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

        let payload: OaiChatResponse = resp
            .json()
            .await
            .map_err(|e| CompletionError::Provider(e.into()))?;
        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CompletionError::Provider(anyhow::anyhow!("empty choices")))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        Ok(CompletionOutcome {
            message: AssistantMessage {
                content: choice.message.content.unwrap_or_default(),
                tool_calls,
            },
            usage: payload
                .usage
                .map(|u| TokenUsage {
                    prompt_tokens: u.prompt_tokens.map(|v| v as usize),
                    completion_tokens: u.completion_tokens.map(|v| v as usize),
                    total_tokens: u.total_tokens.map(|v| v as usize),
                })
                .unwrap_or_default(),
        })
    }

    fn render_tool_replies(
        &self,
        calls: &[ToolCall],
        results: &[MessageContent],
        _original_query: &str,
    ) -> Vec<Message> {
        calls
            .iter()
            .zip(results.iter())
            .map(|(call, result)| {
                // Tool content is always a parts list on this wire.
                let content = match result {
                    MessageContent::Text(text) => MessageContent::Parts(vec![ContentPart::Text {
                        text: text.clone(),
                    }]),
                    parts => parts.clone(),
                };
                Message {
                    role: Role::Tool,
                    content,
                    tool_calls: Vec::new(),
                    tool_call_id: Some(call.id.clone()),
                    name: Some(call.name.clone()),
                }
            })
            .collect()
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct OaiRequest {
    model: String,
    messages: Vec<OaiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OaiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Serialize)]
struct OaiTool {
    r#type: String,
    function: OaiFunctionDef,
}

#[derive(Debug, Serialize)]
struct OaiFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl OaiTool {
    fn from_definition(def: &ToolDefinition) -> Self {
        Self {
            r#type: "function".to_string(),
            function: OaiFunctionDef {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct OaiMessage {
    role: String,
    content: OaiContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OaiContent {
    Text(String),
    Parts(Vec<OaiContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OaiContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: OaiImageUrl },
}

#[derive(Debug, Serialize)]
struct OaiImageUrl {
    url: String,
}

impl OaiMessage {
    fn from_message(msg: &Message) -> Self {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let content = match &msg.content {
            MessageContent::Text(text) => OaiContent::Text(text.clone()),
            MessageContent::Parts(parts) => OaiContent::Parts(
                parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => OaiContentPart::Text { text: text.clone() },
                        ContentPart::Image { image_url } => OaiContentPart::ImageUrl {
                            image_url: OaiImageUrl {
                                url: image_url.clone(),
                            },
                        },
                    })
                    .collect(),
            ),
        };
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|c| OaiToolCall {
                        id: c.id.clone(),
                        r#type: "function".to_string(),
                        function: OaiFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect(),
            )
        };
        Self {
            role: role.to_string(),
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
            name: msg.name.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OaiToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: OaiFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct OaiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OaiChatResponse {
    choices: Vec<OaiChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Debug, Deserialize)]
struct OaiChoice {
    message: OaiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OaiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}
