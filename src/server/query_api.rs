use super::AppState;
use crate::agent::{AgentError, DisplayMode};
use crate::auth::AuthContext;
use crate::cache::HotCache;
use crate::error::ApiError;
use crate::retrieval::{ChunkSource, CompletionQueryRequest, QueryOutput};
use crate::store::models::ChatMessage;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

/// Single-turn RAG query: retrieve, compose, and stream or return the
/// completion, with durable chat history on both sides of the turn.
pub async fn query_completion(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<CompletionQueryRequest>,
) -> Result<Response, ApiError> {
    validate_prompt_overrides(&request.prompt_overrides)?;

    let mut history: Vec<ChatMessage> = Vec::new();
    let history_key = request.chat_id.as_ref().map(|id| HotCache::chat_key(id));
    if let Some(chat_id) = &request.chat_id {
        history = load_history(&state, chat_id, &auth).await?;
        history.push(ChatMessage::user(request.query.clone()));
    }

    state.usage.check_and_increment(&auth, "query", 1)?;

    let started = Instant::now();
    let result = state
        .docs
        .query(&auth, &request, &history)
        .await
        .map_err(ApiError::Internal)?;

    match result {
        QueryOutput::Stream { tokens, sources } => Ok(stream_query_response(
            state,
            auth,
            request,
            history,
            history_key,
            tokens,
            sources,
            started,
        )),
        QueryOutput::Completion(response) => {
            if let (Some(chat_id), Some(_)) = (&request.chat_id, &history_key) {
                history.push(ChatMessage::assistant(response.completion.clone()));
                persist_history(&state, chat_id, &auth, &history).await;
            }
            let tokens_used = response.usage.get("total_tokens").copied().unwrap_or(0);
            state.usage.record(
                &auth,
                "query",
                "success",
                started.elapsed().as_millis() as u64,
                tokens_used,
                json!({"streaming": false, "sources": response.sources.len()}),
                None,
            );
            Ok(Json(response).into_response())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn stream_query_response(
    state: Arc<AppState>,
    auth: AuthContext,
    request: CompletionQueryRequest,
    mut history: Vec<ChatMessage>,
    history_key: Option<String>,
    mut tokens: crate::retrieval::TokenStream,
    sources: Vec<ChunkSource>,
    started: Instant,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(64);

    tokio::spawn(async move {
        let mut full_content = String::new();

        while let Some(item) = tokens.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("token stream failed: {:#}", e);
                    let event = sse_json(&json!({"type": "error", "content": e.to_string()}));
                    let _ = tx.send(Ok(event)).await;
                    // Generation failed: the turn is not persisted.
                    return;
                }
            };
            full_content.push_str(&chunk);
            let event = sse_json(&json!({"type": "assistant", "content": chunk}));
            if tx.send(Ok(event)).await.is_err() {
                // Client disconnected: drop the upstream stream and leave
                // the conversation untouched.
                info!("client disconnected mid-stream; discarding partial turn");
                return;
            }
        }

        let sources_info: Vec<JsonValue> = sources
            .iter()
            .map(|s| {
                json!({
                    "document_id": s.document_id,
                    "chunk_number": s.chunk_number,
                    "score": s.score,
                })
            })
            .collect();
        let done = sse_json(&json!({"type": "done", "sources": sources_info}));
        if tx.send(Ok(done)).await.is_err() {
            return;
        }

        // Persist only after the stream has fully drained.
        if let (Some(chat_id), Some(_)) = (&request.chat_id, &history_key) {
            history.push(ChatMessage::assistant(full_content.clone()));
            persist_history(&state, chat_id, &auth, &history).await;
        }
        state.usage.record(
            &auth,
            "query",
            "success",
            started.elapsed().as_millis() as u64,
            0,
            json!({"streaming": true, "sources": sources.len()}),
            None,
        );
    });

    Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn sse_json(value: &JsonValue) -> Event {
    Event::default().data(value.to_string())
}

#[derive(Debug, Deserialize)]
pub struct AgentQueryRequest {
    pub query: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub display_mode: DisplayMode,
}

pub async fn agent_query(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<AgentQueryRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let mut history: Vec<ChatMessage> = Vec::new();
    if let Some(chat_id) = &request.chat_id {
        history = load_history(&state, chat_id, &auth).await?;
        history.push(ChatMessage::user(request.query.clone()));
    }

    state.usage.check_and_increment(&auth, "agent", 1)?;

    let started = Instant::now();
    let output = state
        .agent
        .run(&request.query, &auth, &history, request.display_mode)
        .await
        .map_err(|e| match e {
            AgentError::ContextWindowExceeded => ApiError::ContextWindowExceeded,
            AgentError::UnknownTool(tool) => {
                ApiError::Internal(anyhow::anyhow!("model requested unknown tool {tool}"))
            }
            AgentError::Provider(e) | AgentError::Internal(e) => ApiError::Internal(e),
        })?;

    if let Some(chat_id) = &request.chat_id {
        let mut assistant = ChatMessage::assistant(output.response.clone());
        assistant.agent_data = Some(json!({
            "display_objects": output.display_objects,
            "tool_history": output.tool_history,
            "sources": output.sources,
        }));
        history.push(assistant);
        persist_history(&state, chat_id, &auth, &history).await;
    }

    state.usage.record(
        &auth,
        "agent",
        "success",
        started.elapsed().as_millis() as u64,
        0,
        json!({"tool_calls": output.tool_history.len()}),
        None,
    );

    Ok(Json(serde_json::to_value(output).map_err(|e| {
        ApiError::Internal(anyhow::anyhow!("failed to serialise agent output: {e}"))
    })?))
}

/// Load history through the hot cache, falling back to the store on a miss
/// and re-populating the cache.
pub(super) async fn load_history(
    state: &AppState,
    chat_id: &str,
    auth: &AuthContext,
) -> Result<Vec<ChatMessage>, ApiError> {
    let key = HotCache::chat_key(chat_id);
    if let Some(cached) = state.cache.get(&key).await {
        match serde_json::from_str(&cached) {
            Ok(history) => return Ok(history),
            Err(e) => warn!("discarding unreadable cached history for {}: {}", chat_id, e),
        }
    }
    let stored = state
        .store
        .get_chat_history(chat_id, auth.user_id.as_deref(), auth.app_id.as_deref())?
        .unwrap_or_default();
    if !stored.is_empty() {
        if let Ok(serialised) = serde_json::to_string(&stored) {
            state.cache.set(&key, serialised).await;
        }
    }
    Ok(stored)
}

/// Write-through: cache first, then the authoritative store.
pub(super) async fn persist_history(
    state: &AppState,
    chat_id: &str,
    auth: &AuthContext,
    history: &[ChatMessage],
) {
    let key = HotCache::chat_key(chat_id);
    if let Ok(serialised) = serde_json::to_string(history) {
        state.cache.set(&key, serialised).await;
    }
    state.store.upsert_chat_history(
        chat_id,
        auth.user_id.as_deref(),
        auth.app_id.as_deref(),
        history,
    );
}

/// Prompt overrides are user-supplied templates layered over the query
/// pipeline; malformed overrides are rejected before any work happens.
pub(super) fn validate_prompt_overrides(overrides: &Option<JsonValue>) -> Result<(), ApiError> {
    let Some(value) = overrides else {
        return Ok(());
    };
    let JsonValue::Object(map) = value else {
        return Err(ApiError::Validation(
            "prompt_overrides must be an object".to_string(),
        ));
    };
    for (key, section) in map {
        match key.as_str() {
            "query" | "entity_extraction" | "entity_resolution" => {
                if !section.is_object() {
                    return Err(ApiError::Validation(format!(
                        "prompt_overrides.{key} must be an object"
                    )));
                }
                if let Some(template) = section.get("prompt_template") {
                    let Some(template) = template.as_str() else {
                        return Err(ApiError::Validation(format!(
                            "prompt_overrides.{key}.prompt_template must be a string"
                        )));
                    };
                    if key == "query"
                        && (!template.contains("{question}") || !template.contains("{context}"))
                    {
                        return Err(ApiError::Validation(
                            "query prompt_template must contain {question} and {context} placeholders"
                                .to_string(),
                        ));
                    }
                }
            }
            other => {
                return Err(ApiError::Validation(format!(
                    "unknown prompt override section: {other}"
                )));
            }
        }
    }
    Ok(())
}
