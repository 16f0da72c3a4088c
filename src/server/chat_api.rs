use super::query_api::load_history;
use super::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::store::models::{ChatConversationSummary, ChatMessage};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Returns the conversation's messages, or an empty list when the
/// conversation does not exist (or is not visible to the caller).
pub async fn get_chat_history_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    Ok(Json(load_history(&state, &chat_id, &auth).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListChatsParams {
    #[serde(default = "default_chat_limit")]
    limit: usize,
}

fn default_chat_limit() -> usize {
    100
}

pub async fn list_chats_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Query(params): Query<ListChatsParams>,
) -> Result<Json<Vec<ChatConversationSummary>>, ApiError> {
    let summaries = state.store.list_chat_conversations(
        auth.user_id.as_deref(),
        auth.app_id.as_deref(),
        params.limit,
    )?;
    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
pub struct ChatTitleRequest {
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct ChatTitleResponse {
    pub status: String,
    pub message: String,
    pub title: String,
}

pub async fn update_chat_title_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(chat_id): Path<String>,
    Json(request): Json<ChatTitleRequest>,
) -> Result<Json<ChatTitleResponse>, ApiError> {
    if request.title.trim().is_empty() {
        return Err(ApiError::Validation("title must not be empty".to_string()));
    }
    let updated = state.store.update_chat_title(
        &chat_id,
        auth.user_id.as_deref(),
        auth.app_id.as_deref(),
        request.title.trim(),
    )?;
    if !updated {
        return Err(ApiError::NotFound);
    }
    Ok(Json(ChatTitleResponse {
        status: "success".to_string(),
        message: format!("Title updated for chat {chat_id}"),
        title: request.title.trim().to_string(),
    }))
}
