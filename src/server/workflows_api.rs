use super::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::store::models::{Owner, Workflow, WorkflowRun, WorkflowRunStatus};
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct WorkflowCreateRequest {
    pub name: String,
    #[serde(default)]
    pub definition: JsonValue,
}

pub async fn create_workflow_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<WorkflowCreateRequest>,
) -> Result<Json<Workflow>, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::Validation("workflow name must not be empty".to_string()));
    }
    let now = Utc::now();
    let workflow = Workflow {
        id: uuid::Uuid::new_v4().to_string(),
        name: request.name.trim().to_string(),
        owner: Owner {
            entity_type: auth.entity_type.to_string(),
            id: auth.entity_id.clone(),
        },
        app_id: auth.app_id.clone(),
        definition: request.definition,
        created_at: now,
        updated_at: now,
    };
    state.store.store_workflow(workflow.clone(), &auth)?;
    Ok(Json(workflow))
}

pub async fn list_workflows_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<Json<Vec<Workflow>>, ApiError> {
    Ok(Json(state.store.list_workflows(&auth)?))
}

pub async fn get_workflow_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(workflow_id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    state
        .store
        .get_workflow(&workflow_id, &auth)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[derive(Debug, Deserialize)]
pub struct WorkflowUpdateRequest {
    pub definition: JsonValue,
}

pub async fn update_workflow_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(workflow_id): Path<String>,
    Json(request): Json<WorkflowUpdateRequest>,
) -> Result<Json<Workflow>, ApiError> {
    state
        .store
        .update_workflow(&workflow_id, request.definition, &auth)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn delete_workflow_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(workflow_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    if !state.store.delete_workflow(&workflow_id, &auth)? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({
        "status": "success",
        "message": format!("Workflow {workflow_id} deleted successfully"),
    })))
}

#[derive(Debug, Deserialize)]
pub struct WorkflowRunCreateRequest {
    #[serde(default)]
    pub payload: JsonValue,
}

pub async fn create_workflow_run_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(workflow_id): Path<String>,
    Json(request): Json<WorkflowRunCreateRequest>,
) -> Result<Json<WorkflowRun>, ApiError> {
    let workflow = state
        .store
        .get_workflow(&workflow_id, &auth)?
        .ok_or(ApiError::NotFound)?;
    let run = WorkflowRun {
        id: uuid::Uuid::new_v4().to_string(),
        workflow_id: workflow.id.clone(),
        owner: workflow.owner.clone(),
        status: WorkflowRunStatus::Queued,
        payload: request.payload,
        error: None,
        started_at: Utc::now(),
        finished_at: None,
    };
    state.store.store_workflow_run(run.clone(), &auth)?;
    Ok(Json(run))
}

pub async fn list_workflow_runs_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(workflow_id): Path<String>,
) -> Result<Json<Vec<WorkflowRun>>, ApiError> {
    Ok(Json(state.store.list_workflow_runs(&workflow_id, &auth)?))
}

pub async fn get_workflow_run_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(run_id): Path<String>,
) -> Result<Json<WorkflowRun>, ApiError> {
    state
        .store
        .get_workflow_run(&run_id, &auth)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn delete_workflow_run_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(run_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    if !state.store.delete_workflow_run(&run_id, &auth)? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({
        "status": "success",
        "message": format!("Workflow run {run_id} deleted successfully"),
    })))
}
