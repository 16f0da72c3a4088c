use super::AppState;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::retrieval::DocumentService;
use crate::store::documents::DocumentUpdate;
use crate::store::models::{AccessControl, Folder, FolderSummary, Owner, SystemMetadata};
use crate::store::MetadataStore;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
pub struct FolderCreateRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FolderActionResponse {
    pub status: String,
    pub message: String,
}

fn ok(message: String) -> Json<FolderActionResponse> {
    Json(FolderActionResponse {
        status: "success".to_string(),
        message,
    })
}

pub async fn create_folder_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<FolderCreateRequest>,
) -> Result<Json<Folder>, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::Validation("folder name must not be empty".to_string()));
    }
    let folder = Folder {
        id: uuid::Uuid::new_v4().to_string(),
        name: request.name.trim().to_string(),
        description: request.description,
        owner: Owner {
            entity_type: auth.entity_type.to_string(),
            id: auth.entity_id.clone(),
        },
        document_ids: Vec::new(),
        system_metadata: SystemMetadata::new(),
        access_control: AccessControl::default(),
        rules: Vec::new(),
        workflow_ids: Vec::new(),
    };
    Ok(Json(state.store.create_folder(folder, &auth)?))
}

pub async fn list_folders_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<Json<Vec<Folder>>, ApiError> {
    Ok(Json(state.store.list_folders(&auth, &Map::new())?))
}

pub async fn list_folder_summaries_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<Json<Vec<FolderSummary>>, ApiError> {
    Ok(Json(state.store.list_folder_summaries(&auth)?))
}

pub async fn get_folder_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(folder_id): Path<String>,
) -> Result<Json<Folder>, ApiError> {
    state
        .store
        .get_folder(&folder_id, &auth)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// Delete a folder by name. The folder is emptied first (its documents are
/// detached and deleted one by one), then the folder row is removed; the
/// store refuses to drop a non-empty folder.
pub async fn delete_folder_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(folder_name): Path<String>,
) -> Result<Json<FolderActionResponse>, ApiError> {
    let folder = state
        .store
        .get_folder_by_name(&folder_name, &auth)?
        .ok_or(ApiError::NotFound)?;

    for document_id in &folder.document_ids {
        if !state
            .store
            .remove_document_from_folder(&folder.id, document_id, &auth)?
        {
            error!("Failed to remove document {} from folder {}", document_id, folder.id);
            return Err(ApiError::Internal(anyhow::anyhow!(
                "failed to remove document {document_id} from folder"
            )));
        }
        if !state.store.delete_document(document_id, &auth)? {
            error!("Failed to delete document {}", document_id);
            return Err(ApiError::Internal(anyhow::anyhow!(
                "failed to delete document {document_id}"
            )));
        }
    }

    if !state.store.delete_folder(&folder.id, &auth)? {
        return Err(ApiError::Forbidden(
            "folder deletion requires admin access".to_string(),
        ));
    }
    Ok(ok(format!("Folder {} deleted successfully", folder.id)))
}

pub async fn add_document_to_folder_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((folder_id, document_id)): Path<(String, String)>,
) -> Result<Json<FolderActionResponse>, ApiError> {
    if !state
        .store
        .add_document_to_folder(&folder_id, &document_id, &auth)?
    {
        return Err(ApiError::NotFound);
    }
    Ok(ok(format!("Document {document_id} added to folder {folder_id}")))
}

pub async fn remove_document_from_folder_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((folder_id, document_id)): Path<(String, String)>,
) -> Result<Json<FolderActionResponse>, ApiError> {
    if !state
        .store
        .remove_document_from_folder(&folder_id, &document_id, &auth)?
    {
        return Err(ApiError::NotFound);
    }
    Ok(ok(format!(
        "Document {document_id} removed from folder {folder_id}"
    )))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default)]
    pub schema: Map<String, JsonValue>,
}

#[derive(Debug, Deserialize)]
pub struct SetFolderRuleRequest {
    pub rules: Vec<FolderRule>,
}

#[derive(Debug, Deserialize)]
pub struct SetFolderRuleParams {
    #[serde(default = "default_apply_to_existing")]
    pub apply_to_existing: bool,
}

fn default_apply_to_existing() -> bool {
    true
}

#[derive(Debug, Default, Serialize)]
pub struct RuleProcessingResults {
    pub processed: usize,
    pub errors: Vec<RuleProcessingError>,
}

#[derive(Debug, Serialize)]
pub struct RuleProcessingError {
    pub document_id: String,
    pub error: String,
}

/// Set extraction rules on a folder. Unless `apply_to_existing=false`, the
/// metadata-extraction rules are also re-run against every document already
/// in the folder, and the per-document outcomes are reported back.
pub async fn set_folder_rule_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(folder_id): Path<String>,
    Query(params): Query<SetFolderRuleParams>,
    Json(request): Json<SetFolderRuleRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let folder = state
        .store
        .get_folder(&folder_id, &auth)?
        .ok_or(ApiError::NotFound)?;

    let rules_json: Vec<JsonValue> = request
        .rules
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<_, _>>()
        .map_err(|e| ApiError::Internal(e.into()))?;
    if !state.store.set_folder_rules(&folder_id, rules_json, &auth)? {
        return Err(ApiError::NotFound);
    }
    info!(
        "Updated folder {} with {} rules",
        folder_id,
        request.rules.len()
    );

    let mut processing_results = RuleProcessingResults::default();
    if params.apply_to_existing && !folder.document_ids.is_empty() {
        info!(
            "Applying rules to {} existing documents in folder",
            folder.document_ids.len()
        );
        processing_results = apply_rules_to_documents(
            &state.store,
            state.docs.as_ref(),
            &auth,
            &folder.document_ids,
            &request.rules,
        )
        .await?;
    }

    let updated = state
        .store
        .get_folder(&folder_id, &auth)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(json!({
        "status": "success",
        "message": "Rules set successfully",
        "folder_id": folder_id,
        "rules": updated.rules,
        "processing_results": processing_results,
    })))
}

const RULE_MAX_RETRIES: u32 = 3;
const RULE_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Re-run metadata-extraction rules over existing folder documents.
/// Extraction failures are retried with exponential backoff and collected
/// per document; a bad document never fails the whole request.
async fn apply_rules_to_documents(
    store: &MetadataStore,
    docs: &dyn DocumentService,
    auth: &AuthContext,
    document_ids: &[String],
    rules: &[FolderRule],
) -> Result<RuleProcessingResults, ApiError> {
    let mut results = RuleProcessingResults::default();
    let documents = store.get_documents_by_id(document_ids, auth, &Map::new())?;

    'documents: for doc in documents {
        let content = doc
            .system_metadata
            .content
            .clone()
            .filter(|c| !c.is_empty());
        let Some(content) = content else {
            let error = format!(
                "No content found in system_metadata for document {}",
                doc.external_id
            );
            warn!("{error}");
            results.errors.push(RuleProcessingError {
                document_id: doc.external_id.clone(),
                error,
            });
            continue;
        };

        for rule in rules.iter().filter(|r| r.rule_type == "metadata_extraction") {
            let schema = JsonValue::Object(rule.schema.clone());
            let mut extracted: Option<Map<String, JsonValue>> = None;
            let mut last_error: Option<anyhow::Error> = None;

            for attempt in 0..RULE_MAX_RETRIES {
                if attempt > 0 {
                    let delay = RULE_RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    info!(
                        "Retry {}/{} for document {} after {:?}",
                        attempt, RULE_MAX_RETRIES, doc.external_id, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                match docs.extract_metadata(auth, &content, &schema).await {
                    Ok(metadata) => {
                        extracted = Some(metadata);
                        break;
                    }
                    Err(e) => {
                        warn!(
                            "Metadata extraction attempt {} failed for document {}: {:#}",
                            attempt + 1,
                            doc.external_id,
                            e
                        );
                        last_error = Some(e);
                    }
                }
            }

            let Some(metadata) = extracted else {
                results.errors.push(RuleProcessingError {
                    document_id: doc.external_id.clone(),
                    error: format!(
                        "Failed to extract metadata after {} attempts: {}",
                        RULE_MAX_RETRIES,
                        last_error.map(|e| e.to_string()).unwrap_or_default()
                    ),
                });
                continue 'documents;
            };
            if metadata.is_empty() {
                continue;
            }

            // update_document merges the extracted fields into the existing
            // metadata and leaves system content untouched.
            let update = DocumentUpdate {
                metadata: Some(metadata),
                ..Default::default()
            };
            if store.update_document(&doc.external_id, auth, update)?.is_some() {
                results.processed += 1;
            } else {
                results.errors.push(RuleProcessingError {
                    document_id: doc.external_id.clone(),
                    error: "Failed to update document metadata".to_string(),
                });
            }
        }
    }

    Ok(results)
}

pub async fn associate_workflow_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((folder_id, workflow_id)): Path<(String, String)>,
) -> Result<Json<FolderActionResponse>, ApiError> {
    if state.store.get_workflow(&workflow_id, &auth)?.is_none() {
        return Err(ApiError::NotFound);
    }
    if !state
        .store
        .associate_workflow(&folder_id, &workflow_id, &auth, true)?
    {
        return Err(ApiError::NotFound);
    }
    Ok(ok(format!(
        "Workflow {workflow_id} associated with folder {folder_id}"
    )))
}

pub async fn disassociate_workflow_api(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((folder_id, workflow_id)): Path<(String, String)>,
) -> Result<Json<FolderActionResponse>, ApiError> {
    if !state
        .store
        .associate_workflow(&folder_id, &workflow_id, &auth, false)?
    {
        return Err(ApiError::NotFound);
    }
    Ok(ok(format!(
        "Workflow {workflow_id} removed from folder {folder_id}"
    )))
}
