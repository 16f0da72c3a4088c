use super::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::retrieval::{
    BatchChunkSource, ChunkGroup, ChunkResult, DocumentResult, GroupedChunkResponse,
    RetrieveRequest,
};
use crate::store::models::Document;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

pub async fn retrieve_chunks(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<Vec<ChunkResult>>, ApiError> {
    let chunks = state
        .docs
        .retrieve_chunks(&auth, &request)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(chunks))
}

pub async fn retrieve_chunks_grouped(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<GroupedChunkResponse>, ApiError> {
    let chunks = state
        .docs
        .retrieve_chunks(&auth, &request)
        .await
        .map_err(ApiError::Internal)?;

    // Group by document, preserving relevance order within and across groups.
    let mut groups: Vec<ChunkGroup> = Vec::new();
    for chunk in &chunks {
        match groups.iter_mut().find(|g| g.document_id == chunk.document_id) {
            Some(group) => group.chunks.push(chunk.clone()),
            None => groups.push(ChunkGroup {
                document_id: chunk.document_id.clone(),
                filename: chunk.filename.clone(),
                chunks: vec![chunk.clone()],
            }),
        }
    }
    Ok(Json(GroupedChunkResponse { chunks, groups }))
}

pub async fn retrieve_docs(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<Vec<DocumentResult>>, ApiError> {
    let docs = state
        .docs
        .retrieve_docs(&auth, &request)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(docs))
}

#[derive(Debug, Deserialize)]
pub struct BatchDocumentsRequest {
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub folder_name: Option<JsonValue>,
    #[serde(default)]
    pub end_user_id: Option<String>,
}

pub async fn batch_get_documents(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<BatchDocumentsRequest>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let system_filters = scope_filters(request.folder_name.as_ref(), request.end_user_id.as_deref());
    let docs = state
        .store
        .get_documents_by_id(&request.document_ids, &auth, &system_filters)?;
    Ok(Json(docs))
}

#[derive(Debug, Deserialize)]
pub struct BatchChunksRequest {
    pub sources: Vec<BatchChunkSource>,
    #[serde(default)]
    pub folder_name: Option<JsonValue>,
    #[serde(default)]
    pub end_user_id: Option<String>,
    #[serde(default)]
    pub use_colpali: Option<bool>,
}

pub async fn batch_get_chunks(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<BatchChunksRequest>,
) -> Result<Json<Vec<ChunkResult>>, ApiError> {
    let chunks = state
        .docs
        .batch_chunks(
            &auth,
            &request.sources,
            request.folder_name.as_ref(),
            request.end_user_id.as_deref(),
            request.use_colpali,
        )
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(chunks))
}

/// Optional folder/end-user scoping shared by the batch endpoints.
pub(super) fn scope_filters(
    folder_name: Option<&JsonValue>,
    end_user_id: Option<&str>,
) -> Map<String, JsonValue> {
    let mut filters = Map::new();
    if let Some(folder) = folder_name {
        if !folder.is_null() {
            filters.insert("folder_name".to_string(), folder.clone());
        }
    }
    if let Some(end_user) = end_user_id {
        filters.insert(
            "end_user_id".to_string(),
            JsonValue::String(end_user.to_string()),
        );
    }
    filters
}
