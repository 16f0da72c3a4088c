use super::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::store::models::{
    AccessControl, Graph, GraphEntity, GraphRelationship, Owner, SystemMetadata,
};
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct GraphCreateRequest {
    pub name: String,
    #[serde(default)]
    pub entities: Vec<GraphEntity>,
    #[serde(default)]
    pub relationships: Vec<GraphRelationship>,
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub filters: Option<JsonValue>,
}

pub async fn create_graph_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<GraphCreateRequest>,
) -> Result<Json<Graph>, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::Validation("graph name must not be empty".to_string()));
    }
    let now = Utc::now();
    let graph = Graph {
        id: uuid::Uuid::new_v4().to_string(),
        name: request.name.trim().to_string(),
        owner: Owner {
            entity_type: auth.entity_type.to_string(),
            id: auth.entity_id.clone(),
        },
        entities: request.entities,
        relationships: request.relationships,
        document_ids: request.document_ids,
        filters: request.filters,
        system_metadata: SystemMetadata::new(),
        access_control: AccessControl::default(),
        created_at: now,
        updated_at: now,
    };
    state
        .store
        .store_graph(graph.clone(), &auth)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(Json(graph))
}

pub async fn list_graphs_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<Json<Vec<Graph>>, ApiError> {
    Ok(Json(state.store.list_graphs(&auth, &Map::new())?))
}

pub async fn get_graph_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(name): Path<String>,
) -> Result<Json<Graph>, ApiError> {
    state
        .store
        .get_graph(&name, &auth, &Map::new())?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn delete_graph_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(name): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    if !state.store.delete_graph(&name, &auth)? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({
        "status": "success",
        "message": format!("Graph {name} deleted successfully"),
    })))
}
