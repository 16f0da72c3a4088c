pub mod parse;

use crate::auth::AuthContext;
use crate::completion::{
    CompletionError, CompletionProvider, Message, MessageContent, Role, ToolCall,
};
use crate::store::models::ChatMessage;
use crate::tools::{SourceMap, ToolError, ToolRegistry};
use chrono::Utc;
use parse::{parse_display_objects, raw_text_object, DisplayObject, AGENT_RESPONSE_SOURCE};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are Morphik, an intelligent research assistant. Your role is to answer the following query: {query}

GROUNDING RULES:
- ONLY answer based on information retrieved from tools (retrieve_chunks, retrieve_document, etc.)
- DO NOT use your own knowledge or make assumptions
- If the retrieved information does not contain the answer, say that the information was not found
- NEVER invent information that is not present in the tool results

You can use the following tools to help answer user queries:
{bullet_lines}

TOOL SELECTION GUIDE:
- Use retrieve_chunks as the primary tool for almost all queries: facts, figures, lists, specifications
- Use knowledge_graph_query only for complex relationships and multi-entity connections
- Only call list_graphs before knowledge_graph_query if you actually need to query graphs

Use function calls to gather information before responding.

When you have gathered information using tools, provide a final response as a JSON array of display objects:

```json
[
  {
    "type": "text",
    "content": "Your answer in markdown, STRICTLY based on the retrieved information",
    "source": "source-id-from-chunks"
  }
]
```

For text objects the content is markdown. For image objects the content describes the exact part you want to extract from the source chunk; be as precise as possible and make sure the corresponding source is an image. Always cite sources and provide accurate information STRICTLY from the retrieved chunks."#;

pub fn system_prompt(query: &str, bullet_lines: &str) -> String {
    SYSTEM_PROMPT_TEMPLATE
        .replace("{query}", query)
        .replace("{bullet_lines}", bullet_lines)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Raw,
    #[default]
    Formatted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHistoryEntry {
    pub tool_name: String,
    pub tool_args: JsonValue,
    pub tool_result: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(rename = "sourceId")]
    pub source_id: String,
    #[serde(rename = "documentName")]
    pub document_name: String,
    #[serde(rename = "documentId")]
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    pub response: String,
    pub display_objects: Vec<DisplayObject>,
    pub tool_history: Vec<ToolHistoryEntry>,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("context window exceeded")]
    ContextWindowExceeded,
    #[error("unknown tool requested by model: {0}")]
    UnknownTool(String),
    #[error(transparent)]
    Provider(anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The tool-loop orchestrator: interleaves model calls and tool dispatches
/// until the model stops calling tools, then parses the terminal content
/// into display objects and assembles the source list.
pub struct Agent {
    registry: Arc<ToolRegistry>,
    provider: Arc<dyn CompletionProvider>,
    max_iters: usize,
    debug_log_dir: PathBuf,
}

impl Agent {
    pub fn new(
        registry: Arc<ToolRegistry>,
        provider: Arc<dyn CompletionProvider>,
        max_iters: usize,
        debug_log_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            provider,
            max_iters,
            debug_log_dir,
        }
    }

    pub async fn run(
        &self,
        query: &str,
        auth: &AuthContext,
        conversation_history: &[ChatMessage],
        display_mode: DisplayMode,
    ) -> Result<AgentOutput, AgentError> {
        // Per-run state; nothing here outlives the request.
        let mut source_map = SourceMap::new();
        let mut tool_history: Vec<ToolHistoryEntry> = Vec::new();

        let mut messages = vec![Message::system(system_prompt(
            query,
            &self.registry.bullet_lines(),
        ))];
        // History is copied verbatim, except the trailing message, which is
        // the current user query the caller already appended.
        let history_end = conversation_history.len().saturating_sub(1);
        for stored in &conversation_history[..history_end] {
            messages.push(stored_to_message(stored));
        }
        messages.push(Message::user(query));

        let tool_defs = self.registry.definitions();

        for iteration in 0..self.max_iters {
            info!(
                "Agent iteration {}: sending {} messages",
                iteration + 1,
                messages.len()
            );
            let outcome = match self.provider.complete(&messages, &tool_defs).await {
                Ok(outcome) => outcome,
                Err(CompletionError::ContextWindowExceeded) => {
                    self.dump_oversized_messages(&messages);
                    return Err(AgentError::ContextWindowExceeded);
                }
                Err(CompletionError::Provider(e)) => return Err(AgentError::Provider(e)),
            };

            let assistant = outcome.message;
            if assistant.tool_calls.is_empty() {
                info!("No tool calls detected, returning final content");
                return Ok(self.finalize(
                    &assistant.content,
                    display_mode,
                    source_map,
                    tool_history,
                ));
            }

            info!("Tool calls detected: {} calls", assistant.tool_calls.len());
            messages.push(Message {
                role: Role::Assistant,
                content: MessageContent::Text(assistant.content.clone()),
                tool_calls: assistant.tool_calls.clone(),
                tool_call_id: None,
                name: None,
            });

            // Dispatch sequentially so replies land in call order.
            let mut results: Vec<MessageContent> = Vec::new();
            for call in &assistant.tool_calls {
                let result = match self
                    .registry
                    .dispatch(&call.name, &call.arguments, auth, &mut source_map)
                    .await
                {
                    Ok(result) => result,
                    Err(ToolError::Unknown(tool)) => return Err(AgentError::UnknownTool(tool)),
                    Err(ToolError::Failed(e)) => {
                        warn!("Tool {} failed: {:#}", call.name, e);
                        MessageContent::text(format!("Error executing tool {}: {}", call.name, e))
                    }
                };
                tool_history.push(ToolHistoryEntry {
                    tool_name: call.name.clone(),
                    tool_args: serde_json::from_str(&call.arguments)
                        .unwrap_or(JsonValue::String(call.arguments.clone())),
                    tool_result: serde_json::to_value(&result).unwrap_or(JsonValue::Null),
                });
                results.push(result);
            }

            let replies =
                self.provider
                    .render_tool_replies(&assistant.tool_calls, &results, query);
            messages.extend(replies);
        }

        // Safety cap reached: close the run with a synthetic final message
        // instead of an error.
        warn!(
            "Agent reached the iteration cap of {} without a final answer",
            self.max_iters
        );
        let fallback = "I was unable to produce a final answer within the allowed number of tool iterations. Please narrow the question and try again.";
        Ok(self.finalize(fallback, display_mode, source_map, tool_history))
    }

    fn finalize(
        &self,
        content: &str,
        display_mode: DisplayMode,
        source_map: SourceMap,
        tool_history: Vec<ToolHistoryEntry>,
    ) -> AgentOutput {
        let mut display_objects = parse_display_objects(content);
        if display_objects.is_empty() {
            display_objects.push(raw_text_object(content));
        }
        if display_mode == DisplayMode::Formatted {
            display_objects = crop_images(display_objects);
        }

        // Sources: ids cited by display objects first, then the rest of the
        // per-run source map; each id appears at most once.
        let mut seen: HashSet<String> = HashSet::new();
        let mut sources: Vec<SourceRef> = Vec::new();
        for obj in &display_objects {
            if obj.source == AGENT_RESPONSE_SOURCE || seen.contains(&obj.source) {
                continue;
            }
            seen.insert(obj.source.clone());
            sources.push(match source_map.get(&obj.source) {
                Some(info) => SourceRef {
                    source_id: obj.source.clone(),
                    document_name: info.document_name.clone(),
                    document_id: info.document_id.clone(),
                    content: info.content.clone(),
                },
                None => source_ref_from_id(&obj.source),
            });
        }

        if seen.insert(AGENT_RESPONSE_SOURCE.to_string()) {
            sources.push(SourceRef {
                source_id: AGENT_RESPONSE_SOURCE.to_string(),
                document_name: "Agent Response".to_string(),
                document_id: "system".to_string(),
                content: Some(content.to_string()),
            });
        }

        for (source_id, info) in source_map.iter() {
            if seen.insert(source_id.clone()) {
                sources.push(SourceRef {
                    source_id: source_id.clone(),
                    document_name: info.document_name.clone(),
                    document_id: info.document_id.clone(),
                    content: None,
                });
            }
        }

        let text_contents: Vec<&str> = display_objects
            .iter()
            .filter(|obj| obj.kind == "text" && !obj.content.is_empty())
            .map(|obj| obj.content.as_str())
            .collect();
        let response = if !text_contents.is_empty() {
            text_contents.join("\n\n")
        } else if !display_objects.is_empty() && display_objects.iter().any(|o| o.kind == "image") {
            "I've found relevant information in the documents. Please see the display objects above for details.".to_string()
        } else {
            content.to_string()
        };

        AgentOutput {
            response,
            display_objects,
            tool_history,
            sources,
        }
    }

    fn dump_oversized_messages(&self, messages: &[Message]) {
        let result = (|| -> anyhow::Result<PathBuf> {
            std::fs::create_dir_all(&self.debug_log_dir)?;
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            let path = self
                .debug_log_dir
                .join(format!("agent_messages_{timestamp}.json"));
            std::fs::write(&path, serde_json::to_string_pretty(messages)?)?;
            Ok(path)
        })();
        match result {
            Ok(path) => info!("Saved oversized message list to {:?}", path),
            Err(e) => warn!("Failed to persist oversized message list: {}", e),
        }
    }
}

/// `formatted` display mode runs image display objects through the PDF
/// post-processor; cropping policy lives with that collaborator, so the
/// core hands the objects through unchanged.
fn crop_images(display_objects: Vec<DisplayObject>) -> Vec<DisplayObject> {
    display_objects
}

/// Derive a source reference from a bare `doc<ID>-<locator>` id that the
/// model cited without a matching source-map entry.
fn source_ref_from_id(source_id: &str) -> SourceRef {
    if let Some((prefix, _)) = source_id.split_once('-') {
        let doc_id = prefix.strip_prefix("doc").unwrap_or(prefix);
        SourceRef {
            source_id: source_id.to_string(),
            document_name: format!("Document {doc_id}"),
            document_id: doc_id.to_string(),
            content: None,
        }
    } else {
        SourceRef {
            source_id: source_id.to_string(),
            document_name: "Referenced Source".to_string(),
            document_id: "unknown".to_string(),
            content: None,
        }
    }
}

fn stored_to_message(stored: &ChatMessage) -> Message {
    let role = match stored.role.as_str() {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    };
    let tool_calls: Vec<ToolCall> = stored
        .tool_calls
        .as_ref()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| serde_json::from_value(c.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    Message {
        role,
        content: MessageContent::Text(stored.content.clone()),
        tool_calls,
        tool_call_id: stored.tool_call_id.clone(),
        name: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{AssistantMessage, CompletionOutcome, TokenUsage, ToolDefinition};
    use crate::completion::ollama::grounding_reply;
    use crate::config::GraphMode;
    use crate::retrieval::test_support::{text_chunk, MockDocumentService};
    use crate::store::test_support::{developer_auth, open_store};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted provider: pops outcomes in order and records every message
    /// list it was called with.
    struct MockProvider {
        outcomes: Mutex<Vec<Result<CompletionOutcome, CompletionError>>>,
        requests: Mutex<Vec<Vec<Message>>>,
        fallback: bool,
    }

    impl MockProvider {
        fn scripted(outcomes: Vec<Result<CompletionOutcome, CompletionError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                requests: Mutex::new(Vec::new()),
                fallback: false,
            }
        }

        fn fallback(outcomes: Vec<Result<CompletionOutcome, CompletionError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                requests: Mutex::new(Vec::new()),
                fallback: true,
            }
        }
    }

    fn final_outcome(content: &str) -> Result<CompletionOutcome, CompletionError> {
        Ok(CompletionOutcome {
            message: AssistantMessage {
                content: content.to_string(),
                tool_calls: vec![],
            },
            usage: TokenUsage::default(),
        })
    }

    fn tool_outcome(calls: Vec<ToolCall>) -> Result<CompletionOutcome, CompletionError> {
        Ok(CompletionOutcome {
            message: AssistantMessage {
                content: String::new(),
                tool_calls: calls,
            },
            usage: TokenUsage::default(),
        })
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[async_trait]
    impl CompletionProvider for MockProvider {
        async fn complete(
            &self,
            messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<CompletionOutcome, CompletionError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                return final_outcome("done");
            }
            outcomes.remove(0)
        }

        fn render_tool_replies(
            &self,
            calls: &[ToolCall],
            results: &[MessageContent],
            original_query: &str,
        ) -> Vec<Message> {
            if self.fallback {
                calls
                    .iter()
                    .zip(results.iter())
                    .map(|(_c, r)| Message::user(grounding_reply(&r.flatten(), original_query)))
                    .collect()
            } else {
                calls
                    .iter()
                    .zip(results.iter())
                    .map(|(c, r)| Message {
                        role: Role::Tool,
                        content: r.clone(),
                        tool_calls: vec![],
                        tool_call_id: Some(c.id.clone()),
                        name: Some(c.name.clone()),
                    })
                    .collect()
            }
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        debug_dir: tempfile::TempDir,
        registry: Arc<ToolRegistry>,
    }

    fn fixture() -> Fixture {
        let (dir, store) = open_store(false);
        let registry = Arc::new(ToolRegistry::new(
            Arc::new(store),
            Arc::new(MockDocumentService::with_chunks(vec![text_chunk(
                "A", 1, "X is Y",
            )])),
            None,
            None,
            GraphMode::Local,
        ));
        Fixture {
            _dir: dir,
            debug_dir: tempfile::tempdir().unwrap(),
            registry,
        }
    }

    fn agent(fixture: &Fixture, provider: Arc<MockProvider>) -> Agent {
        Agent::new(
            fixture.registry.clone(),
            provider,
            10,
            fixture.debug_dir.path().to_path_buf(),
        )
    }

    #[tokio::test]
    async fn two_turn_loop_with_one_tool_call() {
        let fx = fixture();
        let provider = Arc::new(MockProvider::scripted(vec![
            tool_outcome(vec![call("call_1", "retrieve_chunks", r#"{"query":"X","k":4}"#)]),
            final_outcome(r#"[{"type":"text","content":"X is Y","source":"docA-chunk1"}]"#),
        ]));
        let auth = developer_auth("dev1", None);

        let output = agent(&fx, provider.clone())
            .run("what is X", &auth, &[], DisplayMode::Raw)
            .await
            .unwrap();

        assert_eq!(output.response, "X is Y");
        assert_eq!(output.tool_history.len(), 1);
        assert_eq!(output.tool_history[0].tool_name, "retrieve_chunks");
        let cited = output
            .sources
            .iter()
            .find(|s| s.source_id == "docA-chunk1")
            .expect("cited source present");
        assert_eq!(cited.document_id, "A");
        assert_eq!(cited.content.as_deref(), Some("X is Y"));

        // Source ids are unique in the final output.
        let mut ids: Vec<&str> = output.sources.iter().map(|s| s.source_id.as_str()).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }

    #[tokio::test]
    async fn fallback_adapter_reinjects_query_as_user_message() {
        let fx = fixture();
        let provider = Arc::new(MockProvider::fallback(vec![
            tool_outcome(vec![call("call-0", "retrieve_chunks", r#"{"query":"X"}"#)]),
            final_outcome(r#"[{"type":"text","content":"X is Y","source":"docA-chunk1"}]"#),
        ]));
        let auth = developer_auth("dev1", None);

        agent(&fx, provider.clone())
            .run("what is X", &auth, &[], DisplayMode::Raw)
            .await
            .unwrap();

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second_turn = &requests[1];
        let injected = second_turn
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .expect("re-injected user message");
        let text = injected.content.flatten();
        assert!(text.starts_with("RETRIEVED INFORMATION:"));
        assert!(text.ends_with(
            "Now answer this query: 'what is X' using ONLY the retrieved information above. Do not use your own knowledge."
        ));
        assert!(injected.tool_call_id.is_none());
    }

    #[tokio::test]
    async fn tool_replies_preserve_call_order() {
        let fx = fixture();
        let provider = Arc::new(MockProvider::scripted(vec![
            tool_outcome(vec![
                call("call_1", "retrieve_chunks", r#"{"query":"a"}"#),
                call("call_2", "list_graphs", "{}"),
                call("call_3", "list_documents", "{}"),
            ]),
            final_outcome("done"),
        ]));
        let auth = developer_auth("dev1", None);

        agent(&fx, provider.clone())
            .run("q", &auth, &[], DisplayMode::Raw)
            .await
            .unwrap();

        let requests = provider.requests.lock().unwrap();
        let second_turn = &requests[1];
        let reply_ids: Vec<&str> = second_turn
            .iter()
            .filter(|m| matches!(m.role, Role::Tool))
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(reply_ids, vec!["call_1", "call_2", "call_3"]);

        // The assistant message that issued the calls precedes every reply.
        let assistant_idx = second_turn
            .iter()
            .position(|m| matches!(m.role, Role::Assistant))
            .unwrap();
        let last_reply_idx = second_turn
            .iter()
            .rposition(|m| matches!(m.role, Role::Tool))
            .unwrap();
        assert!(assistant_idx < last_reply_idx);
    }

    #[tokio::test]
    async fn tool_failure_becomes_reply_and_loop_continues() {
        let fx = fixture();
        let provider = Arc::new(MockProvider::scripted(vec![
            tool_outcome(vec![call("call_1", "execute_code", r#"{"code":"print(1)"}"#)]),
            final_outcome("no sandbox available"),
        ]));
        let auth = developer_auth("dev1", None);

        let output = agent(&fx, provider.clone())
            .run("run this", &auth, &[], DisplayMode::Raw)
            .await
            .unwrap();

        assert_eq!(output.response, "no sandbox available");
        let requests = provider.requests.lock().unwrap();
        let reply = requests[1]
            .iter()
            .find(|m| matches!(m.role, Role::Tool))
            .unwrap();
        assert!(reply.content.flatten().contains("Error executing tool execute_code"));
    }

    #[tokio::test]
    async fn unknown_tool_aborts_the_run() {
        let fx = fixture();
        let provider = Arc::new(MockProvider::scripted(vec![tool_outcome(vec![call(
            "call_1",
            "drop_everything",
            "{}",
        )])]));
        let auth = developer_auth("dev1", None);

        let err = agent(&fx, provider)
            .run("q", &auth, &[], DisplayMode::Raw)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn context_window_error_dumps_messages_and_surfaces() {
        let fx = fixture();
        let provider = Arc::new(MockProvider::scripted(vec![Err(
            CompletionError::ContextWindowExceeded,
        )]));
        let auth = developer_auth("dev1", None);

        let err = agent(&fx, provider)
            .run("q", &auth, &[], DisplayMode::Raw)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ContextWindowExceeded));

        let dumped: Vec<_> = std::fs::read_dir(fx.debug_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("agent_messages_")
            })
            .collect();
        assert_eq!(dumped.len(), 1, "offending messages are persisted");
    }

    #[tokio::test]
    async fn iteration_cap_yields_synthetic_final_message() {
        let fx = fixture();
        let endless: Vec<_> = (0..20)
            .map(|i| {
                tool_outcome(vec![call(
                    &format!("call_{i}"),
                    "list_graphs",
                    "{}",
                )])
            })
            .collect();
        let provider = Arc::new(MockProvider::scripted(endless));
        let auth = developer_auth("dev1", None);

        let agent = Agent::new(
            fx.registry.clone(),
            provider,
            3,
            fx.debug_dir.path().to_path_buf(),
        );
        let output = agent.run("q", &auth, &[], DisplayMode::Raw).await.unwrap();
        assert!(output.response.contains("allowed number of tool iterations"));
        assert_eq!(output.tool_history.len(), 3);
    }

    #[tokio::test]
    async fn history_is_copied_verbatim_minus_trailing_query() {
        let fx = fixture();
        let provider = Arc::new(MockProvider::scripted(vec![final_outcome("done")]));
        let auth = developer_auth("dev1", None);

        let mut assistant_with_calls = ChatMessage::assistant("");
        assistant_with_calls.tool_calls = Some(vec![serde_json::json!({
            "id": "call_7", "name": "retrieve_chunks", "arguments": "{\"query\":\"old\"}"
        })]);
        let tool_reply = ChatMessage {
            role: "tool".to_string(),
            content: "old result".to_string(),
            timestamp: Utc::now(),
            tool_calls: None,
            tool_call_id: Some("call_7".to_string()),
            agent_data: None,
        };
        let history = vec![
            ChatMessage::user("earlier question"),
            assistant_with_calls,
            tool_reply,
            ChatMessage::assistant("earlier answer"),
            ChatMessage::user("what is X"),
        ];

        agent(&fx, provider.clone())
            .run("what is X", &auth, &history, DisplayMode::Raw)
            .await
            .unwrap();

        let requests = provider.requests.lock().unwrap();
        let msgs = &requests[0];
        assert!(matches!(msgs[0].role, Role::System));
        assert_eq!(msgs[1].content.flatten(), "earlier question");
        assert_eq!(msgs[2].tool_calls.len(), 1);
        assert_eq!(msgs[2].tool_calls[0].id, "call_7");
        assert_eq!(msgs[3].tool_call_id.as_deref(), Some("call_7"));
        assert_eq!(msgs[4].content.flatten(), "earlier answer");
        // The trailing stored user turn is replaced by the live query.
        assert_eq!(msgs.last().unwrap().content.flatten(), "what is X");
        assert_eq!(msgs.len(), 6);
    }

    #[tokio::test]
    async fn plain_text_final_content_falls_back_to_raw_object() {
        let fx = fixture();
        let provider = Arc::new(MockProvider::scripted(vec![final_outcome(
            "X is Y, plainly.",
        )]));
        let auth = developer_auth("dev1", None);

        let output = agent(&fx, provider)
            .run("what is X", &auth, &[], DisplayMode::Formatted)
            .await
            .unwrap();
        assert_eq!(output.display_objects.len(), 1);
        assert_eq!(output.display_objects[0].source, AGENT_RESPONSE_SOURCE);
        assert_eq!(output.response, "X is Y, plainly.");
        let agent_source = output
            .sources
            .iter()
            .find(|s| s.source_id == AGENT_RESPONSE_SOURCE)
            .unwrap();
        assert_eq!(agent_source.document_id, "system");
    }
}
