use super::retrieve_api::scope_filters;
use super::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::store::documents::DocumentUpdate;
use crate::store::models::Document;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ListDocumentsRequest {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub filters: Option<JsonValue>,
    #[serde(default)]
    pub folder_name: Option<JsonValue>,
    #[serde(default)]
    pub end_user_id: Option<String>,
}

fn default_limit() -> usize {
    100
}

pub async fn list_documents_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<ListDocumentsRequest>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let filters = match request.filters {
        Some(JsonValue::Object(map)) => map,
        Some(_) => {
            return Err(ApiError::Validation("filters must be an object".to_string()));
        }
        None => Map::new(),
    };
    let system_filters = scope_filters(request.folder_name.as_ref(), request.end_user_id.as_deref());
    let docs = state
        .store
        .list_documents(&auth, request.skip, request.limit, &filters, &system_filters)?;
    Ok(Json(docs))
}

pub async fn get_document_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(document_id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    state
        .store
        .get_document(&document_id, &auth)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn get_document_status_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(document_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let doc = state
        .store
        .get_document(&document_id, &auth)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(json!({
        "document_id": doc.external_id,
        "status": doc.system_metadata.status,
        "updated_at": doc.system_metadata.updated_at,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FilenameParams {
    #[serde(default)]
    pub folder_name: Option<JsonValue>,
    #[serde(default)]
    pub end_user_id: Option<String>,
}

pub async fn get_document_by_filename_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(filename): Path<String>,
    Query(params): Query<FilenameParams>,
) -> Result<Json<Document>, ApiError> {
    let system_filters = scope_filters(params.folder_name.as_ref(), params.end_user_id.as_deref());
    state
        .store
        .get_document_by_filename(&filename, &auth, &system_filters)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[derive(Debug, Serialize)]
pub struct DocumentDeleteResponse {
    pub status: String,
    pub message: String,
}

pub async fn delete_document_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentDeleteResponse>, ApiError> {
    if !state.store.delete_document(&document_id, &auth)? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(DocumentDeleteResponse {
        status: "success".to_string(),
        message: format!("Document {document_id} deleted successfully"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMetadataRequest {
    pub metadata: Map<String, JsonValue>,
}

pub async fn update_document_metadata_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(document_id): Path<String>,
    Json(request): Json<UpdateMetadataRequest>,
) -> Result<Json<Document>, ApiError> {
    let update = DocumentUpdate {
        metadata: Some(request.metadata),
        ..Default::default()
    };
    state
        .store
        .update_document(&document_id, &auth, update)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}
