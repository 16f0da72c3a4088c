use super::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::store::models::ModelConfigRecord;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Registered chat models available to this deployment.
pub async fn list_models_api(
    State(state): State<Arc<AppState>>,
    _auth: AuthContext,
) -> Json<JsonValue> {
    let chat_models: Vec<JsonValue> = state
        .settings
        .models
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "provider": m.provider,
                "model_name": m.model_name,
            })
        })
        .collect();
    let providers: BTreeSet<&str> = state
        .settings
        .models
        .iter()
        .map(|m| m.provider.as_str())
        .collect();
    Json(json!({
        "chat_models": chat_models,
        "embedding_models": [],
        "default_models": { "agent": state.settings.agent.model },
        "providers": providers,
    }))
}

/// Model configs are per-user, per-app rows; the caller's scope is taken
/// from the token rather than the request body.
fn config_scope(auth: &AuthContext) -> (String, String) {
    let user_id = auth
        .user_id
        .clone()
        .unwrap_or_else(|| auth.entity_id.clone());
    let app_id = auth
        .app_id
        .clone()
        .unwrap_or_else(|| "default".to_string());
    (user_id, app_id)
}

#[derive(Debug, Deserialize)]
pub struct ModelConfigCreateRequest {
    pub provider: String,
    pub config_data: JsonValue,
}

pub async fn create_model_config_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<ModelConfigCreateRequest>,
) -> Result<Json<ModelConfigRecord>, ApiError> {
    let (user_id, app_id) = config_scope(&auth);
    let now = Utc::now();
    let record = ModelConfigRecord {
        id: uuid::Uuid::new_v4().to_string(),
        user_id,
        app_id,
        provider: request.provider,
        config_data: request.config_data,
        created_at: now,
        updated_at: now,
    };
    state.store.store_model_config(&record)?;
    Ok(Json(record))
}

pub async fn list_model_configs_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<Json<Vec<ModelConfigRecord>>, ApiError> {
    let (user_id, app_id) = config_scope(&auth);
    Ok(Json(state.store.get_model_configs(&user_id, &app_id)?))
}

pub async fn get_model_config_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(config_id): Path<String>,
) -> Result<Json<ModelConfigRecord>, ApiError> {
    let (user_id, app_id) = config_scope(&auth);
    state
        .store
        .get_model_config(&config_id, &user_id, &app_id)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[derive(Debug, Deserialize)]
pub struct ModelConfigUpdateRequest {
    pub config_data: JsonValue,
}

pub async fn update_model_config_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(config_id): Path<String>,
    Json(request): Json<ModelConfigUpdateRequest>,
) -> Result<Json<ModelConfigRecord>, ApiError> {
    let (user_id, app_id) = config_scope(&auth);
    if !state
        .store
        .update_model_config(&config_id, &user_id, &app_id, request.config_data)?
    {
        return Err(ApiError::NotFound);
    }
    state
        .store
        .get_model_config(&config_id, &user_id, &app_id)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn delete_model_config_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(config_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let (user_id, app_id) = config_scope(&auth);
    if !state
        .store
        .delete_model_config(&config_id, &user_id, &app_id)?
    {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({
        "status": "success",
        "message": format!("Model config {config_id} deleted"),
    })))
}
