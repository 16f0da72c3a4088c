pub mod defs;
mod graph;

use crate::auth::AuthContext;
use crate::completion::{ContentPart, MessageContent, ToolDefinition};
use crate::config::GraphMode;
use crate::retrieval::{
    DocumentService, GraphApiClient, RetrieveRequest, SandboxClient,
};
use crate::store::models::{Document, Owner};
use crate::store::MetadataStore;
use anyhow::Result;
use defs::{RetrieveMode, ToolInvocation, ToolParseError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info};

/// Where a source id points: one chunk, one analysis pass, or a whole
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLocator {
    Chunk(i64),
    Analysis(String),
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub document_id: String,
    pub document_name: String,
    pub locator: SourceLocator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Per-run accumulation of source evidence, in insertion order. Lives only
/// for the duration of one agent run and is never persisted.
#[derive(Debug, Default)]
pub struct SourceMap {
    entries: Vec<(String, SourceInfo)>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source_id: String, info: SourceInfo) {
        if let Some(existing) = self.entries.iter_mut().find(|(id, _)| *id == source_id) {
            existing.1 = info;
        } else {
            self.entries.push((source_id, info));
        }
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceInfo> {
        self.entries
            .iter()
            .find(|(id, _)| id == source_id)
            .map(|(_, info)| info)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SourceInfo)> {
        self.entries.iter().map(|(id, info)| (id, info))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The model asked for a tool that does not exist. Hard failure.
    #[error("unknown tool: {0}")]
    Unknown(String),
    /// The handler failed. Recovered into the conversation as a textual
    /// tool reply so the model can react.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// The agent's tool surface: declarations advertised to the model plus the
/// dispatcher routing invocations to their handlers. Immutable after
/// startup.
pub struct ToolRegistry {
    store: Arc<MetadataStore>,
    docs: Arc<dyn DocumentService>,
    sandbox: Option<SandboxClient>,
    graph_api: Option<GraphApiClient>,
    graph_mode: GraphMode,
}

impl ToolRegistry {
    pub fn new(
        store: Arc<MetadataStore>,
        docs: Arc<dyn DocumentService>,
        sandbox: Option<SandboxClient>,
        graph_api: Option<GraphApiClient>,
        graph_mode: GraphMode,
    ) -> Self {
        Self {
            store,
            docs,
            sandbox,
            graph_api,
            graph_mode,
        }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        defs::definitions(self.graph_mode)
    }

    pub fn bullet_lines(&self) -> String {
        defs::bullet_lines(self.graph_mode)
    }

    /// Route one tool invocation. Arguments arrive as raw JSON text from the
    /// model; sanitisation and validation happen here so every caller gets
    /// the same defensive behaviour.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments_json: &str,
        auth: &AuthContext,
        source_map: &mut SourceMap,
    ) -> Result<MessageContent, ToolError> {
        let mut arguments: JsonValue = if arguments_json.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(arguments_json)
                .map_err(|e| anyhow::anyhow!("arguments are not valid JSON: {e}"))?
        };

        // The model sometimes routes retrieve_document's argument into
        // retrieve_chunks; drop the stray field before validation.
        if name == "retrieve_chunks" {
            if let Some(obj) = arguments.as_object_mut() {
                if obj.remove("document_id").is_some() {
                    debug!("dropped stray document_id from retrieve_chunks arguments");
                }
            }
        }

        let invocation = ToolInvocation::parse(name, arguments).map_err(|e| match e {
            ToolParseError::UnknownTool(tool) => ToolError::Unknown(tool),
            invalid => ToolError::Failed(anyhow::anyhow!(invalid.to_string())),
        })?;

        info!("Executing tool: {}", name);
        self.execute(invocation, auth, source_map)
            .await
            .map_err(ToolError::Failed)
    }

    async fn execute(
        &self,
        invocation: ToolInvocation,
        auth: &AuthContext,
        source_map: &mut SourceMap,
    ) -> Result<MessageContent> {
        match invocation {
            ToolInvocation::RetrieveChunks(args) => {
                let request = RetrieveRequest {
                    query: args.query,
                    filters: args.filters,
                    k: args.k,
                    min_score: args.min_score,
                    use_reranking: None,
                    use_colpali: args.use_colpali,
                    folder_name: args.folder_name,
                    end_user_id: args.end_user_id,
                    graph_name: None,
                    hop_depth: None,
                    include_paths: None,
                };
                let chunks = self.docs.retrieve_chunks(auth, &request).await?;
                if chunks.is_empty() {
                    return Ok(MessageContent::text("No relevant chunks found."));
                }

                let mut parts = Vec::new();
                for chunk in chunks {
                    let source_id = format!("doc{}-chunk{}", chunk.document_id, chunk.chunk_number);
                    let document_name = chunk
                        .filename
                        .clone()
                        .unwrap_or_else(|| format!("Document {}", chunk.document_id));
                    if chunk.is_image() {
                        parts.push(ContentPart::Image {
                            image_url: chunk.content.clone(),
                        });
                    } else {
                        parts.push(ContentPart::Text {
                            text: format!("Source: {}\n{}", source_id, chunk.content),
                        });
                    }
                    source_map.insert(
                        source_id,
                        SourceInfo {
                            document_id: chunk.document_id.clone(),
                            document_name,
                            locator: SourceLocator::Chunk(chunk.chunk_number),
                            content: Some(chunk.content),
                        },
                    );
                }
                Ok(MessageContent::Parts(parts))
            }

            ToolInvocation::RetrieveDocument(args) => match args.mode {
                RetrieveMode::Content => {
                    let content = self.docs.document_content(auth, &args.document_id).await?;
                    let source_id = format!("doc{}-full", args.document_id);
                    source_map.insert(
                        source_id,
                        SourceInfo {
                            document_id: args.document_id.clone(),
                            document_name: format!("Full Document {}", args.document_id),
                            locator: SourceLocator::Full,
                            content: None,
                        },
                    );
                    Ok(MessageContent::Text(content))
                }
                RetrieveMode::Metadata => {
                    let Some(doc) = self.store.get_document(&args.document_id, auth)? else {
                        anyhow::bail!("document {} not found", args.document_id);
                    };
                    Ok(MessageContent::Text(serde_json::to_string_pretty(&json!({
                        "external_id": doc.external_id,
                        "filename": doc.filename,
                        "content_type": doc.content_type,
                        "metadata": doc.metadata,
                        "folder_name": doc.system_metadata.folder_name,
                        "created_at": doc.system_metadata.created_at,
                        "updated_at": doc.system_metadata.updated_at,
                    }))?))
                }
            },

            ToolInvocation::DocumentAnalyzer(args) => {
                let analysis = self
                    .docs
                    .analyze_document(auth, &args.document_id, args.analysis_type)
                    .await?;
                let source_id = format!("doc{}-{}", args.document_id, args.analysis_type);
                source_map.insert(
                    source_id,
                    SourceInfo {
                        document_id: args.document_id.clone(),
                        document_name: format!(
                            "Document {} ({})",
                            args.document_id, args.analysis_type
                        ),
                        locator: SourceLocator::Analysis(args.analysis_type.to_string()),
                        content: None,
                    },
                );
                Ok(MessageContent::Text(analysis))
            }

            ToolInvocation::ExecuteCode(args) => {
                let Some(sandbox) = &self.sandbox else {
                    anyhow::bail!("code execution sandbox is not configured");
                };
                Ok(MessageContent::Text(sandbox.execute(&args.code).await?))
            }

            ToolInvocation::KnowledgeGraphQuery(args) => {
                let graph = match &args.graph_name {
                    Some(name) => self
                        .store
                        .get_graph(name, auth, &Map::new())?
                        .ok_or_else(|| anyhow::anyhow!("graph '{}' not found", name))?,
                    None => self
                        .store
                        .list_graphs(auth, &Map::new())?
                        .into_iter()
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("no graphs available"))?,
                };
                Ok(MessageContent::Text(graph::run_graph_query(&graph, &args)?))
            }

            ToolInvocation::GraphApiRetrieve(args) => {
                let Some(api) = &self.graph_api else {
                    anyhow::bail!("remote graph api is not configured");
                };
                Ok(MessageContent::Text(
                    api.retrieve(auth, &args.query, args.graph_name.as_deref())
                        .await?,
                ))
            }

            ToolInvocation::ListGraphs => {
                let graphs = self.store.list_graphs(auth, &Map::new())?;
                let listing: Vec<_> = graphs
                    .iter()
                    .map(|g| {
                        json!({
                            "name": g.name,
                            "entities": g.entities.len(),
                            "relationships": g.relationships.len(),
                        })
                    })
                    .collect();
                Ok(MessageContent::Text(serde_json::to_string_pretty(&listing)?))
            }

            ToolInvocation::ListDocuments(args) => {
                let filters = match args.filters {
                    Some(JsonValue::Object(map)) => map,
                    _ => Map::new(),
                };
                let docs = self.store.list_documents(auth, 0, 100, &filters, &Map::new())?;
                let listing: Vec<_> = docs
                    .iter()
                    .map(|d| {
                        json!({
                            "document_id": d.external_id,
                            "filename": d.filename,
                            "content_type": d.content_type,
                            "folder_name": d.system_metadata.folder_name,
                        })
                    })
                    .collect();
                Ok(MessageContent::Text(serde_json::to_string_pretty(&listing)?))
            }

            ToolInvocation::SaveToMemory(args) => {
                let mut doc = Document::new(
                    uuid::Uuid::new_v4().to_string(),
                    Owner {
                        entity_type: auth.entity_type.to_string(),
                        id: auth.entity_id.clone(),
                    },
                    "text/plain".to_string(),
                );
                doc.metadata
                    .insert("memory".to_string(), JsonValue::Bool(true));
                doc.metadata
                    .insert("key".to_string(), JsonValue::String(args.key.clone()));
                doc.system_metadata.content = Some(args.value);
                let id = doc.external_id.clone();
                self.store.store_document(doc, auth)?;
                Ok(MessageContent::Text(format!(
                    "Saved memory '{}' as document {}",
                    args.key, id
                )))
            }
        }
    }
}
