use super::AppState;
use crate::auth::{self, AuthContext, Permission, TokenClaims};
use crate::error::ApiError;
use crate::store::configs::AppDeleteSummary;
use crate::store::models::AppRecord;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::{Form, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::info;

fn clean_name(name: &str) -> String {
    name.replace(' ', "_").to_lowercase()
}

#[derive(Debug, Deserialize)]
pub struct LocalUriForm {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_expiry_days")]
    pub expiry_days: i64,
}

fn default_name() -> String {
    "admin".to_string()
}

fn default_expiry_days() -> i64 {
    30
}

/// Issue a development URI for a self-hosted instance. This endpoint is the
/// local bootstrap path and deliberately takes no bearer token.
pub async fn generate_local_uri(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LocalUriForm>,
) -> Result<Json<JsonValue>, ApiError> {
    let name = clean_name(&form.name);
    let claims = TokenClaims::developer(&name, None, form.expiry_days);
    let token = auth::encode_token(&claims, &state.settings.auth.jwt_secret)?;
    let uri = auth::connection_uri(&name, &token, &state.settings.api.host, state.settings.api.port);
    Ok(Json(json!({ "uri": uri })))
}

#[derive(Debug, Deserialize)]
pub struct CloudUriRequest {
    pub app_id: String,
    pub name: String,
    pub user_id: String,
    #[serde(default = "default_expiry_days")]
    pub expiry_days: i64,
}

/// Issue a URI for a cloud-hosted application. The caller's bearer token
/// must belong to the target user or carry admin permissions; accounts are
/// held to their application quota.
pub async fn generate_cloud_uri(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CloudUriRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthenticated("missing authorization header".to_string()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthenticated("invalid authorization header".to_string()))?;
    let caller = auth::decode_token(token, &state.settings.auth.jwt_secret)?;

    let caller_user = caller.user_id.as_deref().unwrap_or(&caller.entity_id);
    if caller_user != request.user_id && !caller.has_permission(Permission::Admin) {
        return Err(ApiError::Forbidden(
            "you can only create apps for your own account unless you have admin permissions"
                .to_string(),
        ));
    }

    let name = clean_name(&request.name);

    // Re-issuing a URI for an existing app is allowed; only new apps count
    // against the account tier.
    let existing = state.store.find_app_by_name(&request.user_id, &name)?;
    if existing.is_none() {
        let count = state.store.count_apps_for_user(&request.user_id)?;
        if count >= state.settings.limits.apps_per_account {
            return Err(ApiError::Forbidden(
                "application limit reached for this account tier".to_string(),
            ));
        }
    }

    let claims = TokenClaims::developer(
        &request.user_id,
        Some(request.app_id.clone()),
        request.expiry_days,
    );
    let token = auth::encode_token(&claims, &state.settings.auth.jwt_secret)?;
    let uri = auth::connection_uri(&name, &token, &state.settings.api.host, state.settings.api.port);

    state.store.store_app(&AppRecord {
        app_id: request.app_id.clone(),
        user_id: request.user_id.clone(),
        name: name.clone(),
        uri: uri.clone(),
        created_at: existing.map(|a| a.created_at).unwrap_or_else(Utc::now),
    })?;
    info!("Issued cloud URI for app {} ({})", request.app_id, name);

    Ok(Json(json!({ "uri": uri, "app_id": request.app_id })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteAppParams {
    pub app_name: String,
}

/// Delete a provisioned application and every resource stamped with its
/// app_id, returning the per-entity deletion counts.
pub async fn delete_cloud_app(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Query(params): Query<DeleteAppParams>,
) -> Result<Json<JsonValue>, ApiError> {
    let user_id = auth.user_id.as_deref().unwrap_or(&auth.entity_id);
    let app = state
        .store
        .find_app_by_name(user_id, &clean_name(&params.app_name))?
        .ok_or(ApiError::NotFound)?;

    let summary: AppDeleteSummary = state.store.delete_app_resources(&app)?;
    Ok(Json(json!({
        "status": "success",
        "app_id": app.app_id,
        "app_name": app.name,
        "documents_deleted": summary.documents_deleted,
        "folders_deleted": summary.folders_deleted,
        "graphs_deleted": summary.graphs_deleted,
        "conversations_deleted": summary.conversations_deleted,
    })))
}
