mod chat_api;
mod documents_api;
mod folders_api;
mod graphs_api;
mod models_api;
mod query_api;
mod retrieve_api;
mod uri_api;
mod workflows_api;

use crate::agent::Agent;
use crate::auth::AuthContext;
use crate::cache::HotCache;
use crate::config::Settings;
use crate::error::ApiError;
use crate::retrieval::DocumentService;
use crate::store::MetadataStore;
use crate::usage::UsageTracker;
use axum::extract::{Query, State};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use chat_api::{get_chat_history_api, list_chats_api, update_chat_title_api};
use documents_api::{
    delete_document_api, get_document_api, get_document_by_filename_api, get_document_status_api,
    list_documents_api, update_document_metadata_api,
};
use folders_api::{
    add_document_to_folder_api, create_folder_api, delete_folder_api, disassociate_workflow_api,
    get_folder_api, list_folder_summaries_api, list_folders_api, remove_document_from_folder_api,
    set_folder_rule_api, associate_workflow_api,
};
use graphs_api::{create_graph_api, delete_graph_api, get_graph_api, list_graphs_api};
use models_api::{
    create_model_config_api, delete_model_config_api, get_model_config_api, list_model_configs_api,
    list_models_api, update_model_config_api,
};
use query_api::{agent_query, query_completion};
use retrieve_api::{
    batch_get_chunks, batch_get_documents, retrieve_chunks, retrieve_chunks_grouped, retrieve_docs,
};
use uri_api::{delete_cloud_app, generate_cloud_uri, generate_local_uri};
use workflows_api::{
    create_workflow_api, create_workflow_run_api, delete_workflow_api, delete_workflow_run_api,
    get_workflow_api, get_workflow_run_api, list_workflow_runs_api, list_workflows_api,
    update_workflow_api,
};

pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<MetadataStore>,
    pub cache: Arc<HotCache>,
    pub docs: Arc<dyn DocumentService>,
    pub usage: Arc<UsageTracker>,
    pub agent: Arc<Agent>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Retrieval
        .route("/retrieve/chunks", post(retrieve_chunks))
        .route("/retrieve/chunks/grouped", post(retrieve_chunks_grouped))
        .route("/retrieve/docs", post(retrieve_docs))
        .route("/batch/documents", post(batch_get_documents))
        .route("/batch/chunks", post(batch_get_chunks))
        // Query + agent
        .route("/query", post(query_completion))
        .route("/agent", post(agent_query))
        // Chat history
        .route("/chat/{chat_id}", get(get_chat_history_api))
        .route("/chats", get(list_chats_api))
        .route("/chats/{chat_id}/title", patch(update_chat_title_api))
        // Documents
        .route("/documents/list", post(list_documents_api))
        .route("/documents/filename/{filename}", get(get_document_by_filename_api))
        .route("/documents/{document_id}", get(get_document_api))
        .route("/documents/{document_id}/status", get(get_document_status_api))
        .route("/documents/{document_id}", delete(delete_document_api))
        .route(
            "/documents/{document_id}/update_metadata",
            post(update_document_metadata_api),
        )
        // Folders
        .route("/folders", post(create_folder_api))
        .route("/folders", get(list_folders_api))
        .route("/folders/summary", get(list_folder_summaries_api))
        .route("/folders/{folder_id}", get(get_folder_api))
        .route("/folders/{folder_id}", delete(delete_folder_api))
        .route(
            "/folders/{folder_id}/documents/{document_id}",
            post(add_document_to_folder_api),
        )
        .route(
            "/folders/{folder_id}/documents/{document_id}",
            delete(remove_document_from_folder_api),
        )
        .route("/folders/{folder_id}/rules", post(set_folder_rule_api))
        .route(
            "/folders/{folder_id}/workflows/{workflow_id}",
            post(associate_workflow_api),
        )
        .route(
            "/folders/{folder_id}/workflows/{workflow_id}",
            delete(disassociate_workflow_api),
        )
        // Graphs
        .route("/graphs", post(create_graph_api))
        .route("/graphs", get(list_graphs_api))
        .route("/graph/{name}", get(get_graph_api))
        .route("/graph/{name}", delete(delete_graph_api))
        // Workflows
        .route("/workflows", post(create_workflow_api))
        .route("/workflows", get(list_workflows_api))
        .route("/workflows/{workflow_id}", get(get_workflow_api))
        .route("/workflows/{workflow_id}", axum::routing::put(update_workflow_api))
        .route("/workflows/{workflow_id}", delete(delete_workflow_api))
        .route("/workflows/{workflow_id}/runs", post(create_workflow_run_api))
        .route("/workflows/{workflow_id}/runs", get(list_workflow_runs_api))
        .route("/workflows/runs/{run_id}", get(get_workflow_run_api))
        .route("/workflows/runs/{run_id}", delete(delete_workflow_run_api))
        // Model registry + per-user model configs
        .route("/models", get(list_models_api))
        .route("/model_config", post(create_model_config_api))
        .route("/model_config", get(list_model_configs_api))
        .route("/model_config/{config_id}", get(get_model_config_api))
        .route("/model_config/{config_id}", axum::routing::put(update_model_config_api))
        .route("/model_config/{config_id}", delete(delete_model_config_api))
        // URIs + cloud control plane
        .route("/local/generate_uri", post(generate_local_uri))
        .route("/cloud/generate_uri", post(generate_cloud_uri))
        .route("/cloud/apps", delete(delete_cloud_app))
        // Telemetry
        .route("/usage/stats", get(get_usage_stats))
        .route("/usage/recent", get(get_recent_usage))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let host = state.settings.api.host.clone();
    let port = state.settings.api.port;
    info!("morphik server starting on port {}...", port);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    info!("Server running on http://{}:{}", host, port);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "message": "Service is running" }))
}

async fn get_usage_stats(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<Json<std::collections::BTreeMap<String, u64>>, ApiError> {
    let user_id = auth.user_id.as_deref().unwrap_or(&auth.entity_id);
    Ok(Json(state.store.usage_totals(user_id)?))
}

#[derive(Debug, Deserialize)]
struct RecentUsageParams {
    #[serde(default = "default_usage_limit")]
    limit: usize,
}

fn default_usage_limit() -> usize {
    100
}

async fn get_recent_usage(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Query(params): Query<RecentUsageParams>,
) -> Result<Json<Vec<crate::store::models::UsageLogRecord>>, ApiError> {
    let user_id = auth.user_id.as_deref().unwrap_or(&auth.entity_id);
    Ok(Json(state.store.recent_usage(user_id, params.limit)?))
}
