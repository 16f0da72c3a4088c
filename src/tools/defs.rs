use crate::completion::ToolDefinition;
use crate::config::GraphMode;
use crate::retrieval::AnalysisType;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

fn default_k() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrieveChunksArgs {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub filters: Option<JsonValue>,
    #[serde(default)]
    pub min_score: f64,
    #[serde(default)]
    pub folder_name: Option<JsonValue>,
    #[serde(default)]
    pub end_user_id: Option<String>,
    #[serde(default)]
    pub use_colpali: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieveMode {
    #[default]
    Content,
    Metadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrieveDocumentArgs {
    pub document_id: String,
    #[serde(default)]
    pub mode: RetrieveMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentAnalyzerArgs {
    pub document_id: String,
    #[serde(default = "default_analysis")]
    pub analysis_type: AnalysisType,
}

fn default_analysis() -> AnalysisType {
    AnalysisType::Full
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCodeArgs {
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphQueryType {
    ListEntities,
    Entity,
    Path,
    Subgraph,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeGraphQueryArgs {
    pub query_type: GraphQueryType,
    #[serde(default)]
    pub start_nodes: Vec<String>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub graph_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphApiRetrieveArgs {
    pub query: String,
    #[serde(default)]
    pub graph_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDocumentsArgs {
    #[serde(default)]
    pub filters: Option<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveToMemoryArgs {
    pub key: String,
    pub value: String,
}

/// Closed union over every tool the agent can invoke. The dispatcher is an
/// exhaustive match over this enum; the JSON schemas advertised to the model
/// are generated next to the variants they describe.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    RetrieveChunks(RetrieveChunksArgs),
    RetrieveDocument(RetrieveDocumentArgs),
    DocumentAnalyzer(DocumentAnalyzerArgs),
    ExecuteCode(ExecuteCodeArgs),
    KnowledgeGraphQuery(KnowledgeGraphQueryArgs),
    GraphApiRetrieve(GraphApiRetrieveArgs),
    ListGraphs,
    ListDocuments(ListDocumentsArgs),
    SaveToMemory(SaveToMemoryArgs),
}

#[derive(Debug, thiserror::Error)]
pub enum ToolParseError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
}

impl ToolInvocation {
    pub fn parse(name: &str, arguments: JsonValue) -> Result<Self, ToolParseError> {
        fn args<T: serde::de::DeserializeOwned>(
            tool: &str,
            value: JsonValue,
        ) -> Result<T, ToolParseError> {
            serde_json::from_value(value).map_err(|e| ToolParseError::InvalidArguments {
                tool: tool.to_string(),
                message: e.to_string(),
            })
        }

        match name {
            "retrieve_chunks" => Ok(Self::RetrieveChunks(args(name, arguments)?)),
            "retrieve_document" => Ok(Self::RetrieveDocument(args(name, arguments)?)),
            "document_analyzer" => Ok(Self::DocumentAnalyzer(args(name, arguments)?)),
            "execute_code" => Ok(Self::ExecuteCode(args(name, arguments)?)),
            "knowledge_graph_query" => Ok(Self::KnowledgeGraphQuery(args(name, arguments)?)),
            "graph_api_retrieve" => Ok(Self::GraphApiRetrieve(args(name, arguments)?)),
            "list_graphs" => Ok(Self::ListGraphs),
            "list_documents" => Ok(Self::ListDocuments(args(name, arguments)?)),
            "save_to_memory" => Ok(Self::SaveToMemory(args(name, arguments)?)),
            other => Err(ToolParseError::UnknownTool(other.to_string())),
        }
    }
}

/// The advertised tool surface. Exactly one of `knowledge_graph_query` /
/// `graph_api_retrieve` is present, selected by the process-wide graph mode.
pub fn definitions(graph_mode: GraphMode) -> Vec<ToolDefinition> {
    let mut defs = vec![
        ToolDefinition {
            name: "retrieve_chunks".to_string(),
            description: "Retrieve relevant text and image chunks from the knowledge base"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"},
                    "k": {"type": "integer", "description": "Number of chunks to retrieve"},
                    "filters": {"type": "object", "description": "Metadata filters"},
                    "min_score": {"type": "number", "description": "Minimum similarity score"},
                    "folder_name": {"type": "string", "description": "Folder to scope the search to"},
                    "end_user_id": {"type": "string", "description": "End-user to scope the search to"},
                    "use_colpali": {"type": "boolean", "description": "Use multimodal embeddings"}
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "retrieve_document".to_string(),
            description: "Get the full content or metadata of a document".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "document_id": {"type": "string", "description": "Id of the document"},
                    "mode": {"type": "string", "enum": ["content", "metadata"]}
                },
                "required": ["document_id"]
            }),
        },
        ToolDefinition {
            name: "document_analyzer".to_string(),
            description:
                "Analyze a document for entities, facts, summary, sentiment, or full analysis"
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "document_id": {"type": "string", "description": "Id of the document"},
                    "analysis_type": {
                        "type": "string",
                        "enum": ["entities", "facts", "summary", "sentiment", "full"]
                    }
                },
                "required": ["document_id"]
            }),
        },
        ToolDefinition {
            name: "execute_code".to_string(),
            description: "Run Python code in a safe sandbox".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "Code to execute"}
                },
                "required": ["code"]
            }),
        },
    ];

    match graph_mode {
        GraphMode::Api => defs.push(ToolDefinition {
            name: "graph_api_retrieve".to_string(),
            description: "Retrieve answers from a remote knowledge graph".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Natural-language graph question"},
                    "graph_name": {"type": "string", "description": "Graph to query"}
                },
                "required": ["query"]
            }),
        }),
        GraphMode::Local => defs.push(ToolDefinition {
            name: "knowledge_graph_query".to_string(),
            description:
                "Query the knowledge graph for entities, paths, subgraphs, or list entities"
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query_type": {
                        "type": "string",
                        "enum": ["list_entities", "entity", "path", "subgraph"]
                    },
                    "start_nodes": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Entity labels the query starts from"
                    },
                    "max_depth": {"type": "integer", "description": "Maximum traversal depth"},
                    "graph_name": {"type": "string", "description": "Graph to query"}
                },
                "required": ["query_type"]
            }),
        }),
    }

    defs.extend([
        ToolDefinition {
            name: "list_graphs".to_string(),
            description: "List available knowledge graphs".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: "save_to_memory".to_string(),
            description: "Save important information to persistent memory".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "Label for the memory entry"},
                    "value": {"type": "string", "description": "Content to remember"}
                },
                "required": ["key", "value"]
            }),
        },
        ToolDefinition {
            name: "list_documents".to_string(),
            description: "List documents accessible to you".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filters": {"type": "object", "description": "Metadata filters"}
                }
            }),
        },
    ]);

    defs
}

/// Tool bullet list interpolated into the agent system prompt.
pub fn bullet_lines(graph_mode: GraphMode) -> String {
    let mut bullets = vec![
        "- retrieve_chunks: retrieve relevant text and image chunks from the knowledge base",
        "- retrieve_document: get full document content or metadata",
        "- document_analyzer: analyze documents for entities, facts, summary, sentiment, or full analysis",
        "- execute_code: run Python code in a safe sandbox",
    ];
    match graph_mode {
        GraphMode::Api => {
            bullets.push("- graph_api_retrieve: retrieve answers from a remote knowledge graph")
        }
        GraphMode::Local => bullets.push(
            "- knowledge_graph_query: query the knowledge graph for entities, paths, subgraphs, or list entities",
        ),
    }
    bullets.extend([
        "- list_graphs: list available knowledge graphs",
        "- save_to_memory: save important information to persistent memory",
        "- list_documents: list documents accessible to you",
    ]);
    bullets.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_tools_are_mutually_exclusive() {
        let local: Vec<String> = definitions(GraphMode::Local)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert!(local.contains(&"knowledge_graph_query".to_string()));
        assert!(!local.contains(&"graph_api_retrieve".to_string()));

        let api: Vec<String> = definitions(GraphMode::Api)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert!(api.contains(&"graph_api_retrieve".to_string()));
        assert!(!api.contains(&"knowledge_graph_query".to_string()));
    }

    // Every advertised schema must round back into the invocation union, so
    // the model can never be offered a tool the dispatcher rejects.
    #[test]
    fn every_advertised_tool_parses() {
        for mode in [GraphMode::Local, GraphMode::Api] {
            for def in definitions(mode) {
                let minimal = match def.name.as_str() {
                    "retrieve_chunks" => json!({"query": "x"}),
                    "retrieve_document" => json!({"document_id": "d1"}),
                    "document_analyzer" => json!({"document_id": "d1"}),
                    "execute_code" => json!({"code": "print(1)"}),
                    "knowledge_graph_query" => json!({"query_type": "list_entities"}),
                    "graph_api_retrieve" => json!({"query": "x"}),
                    "list_graphs" => json!({}),
                    "list_documents" => json!({}),
                    "save_to_memory" => json!({"key": "k", "value": "v"}),
                    other => panic!("unexpected tool {other}"),
                };
                ToolInvocation::parse(&def.name, minimal)
                    .unwrap_or_else(|e| panic!("{}: {e}", def.name));
            }
        }
    }

    #[test]
    fn unknown_tool_is_rejected() {
        assert!(matches!(
            ToolInvocation::parse("drop_all_tables", json!({})),
            Err(ToolParseError::UnknownTool(_))
        ));
    }

    #[test]
    fn invalid_arguments_name_the_tool() {
        let err = ToolInvocation::parse("retrieve_document", json!({"mode": "content"})).unwrap_err();
        match err {
            ToolParseError::InvalidArguments { tool, .. } => assert_eq!(tool, "retrieve_document"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn retrieve_chunks_defaults_match_retrieval_defaults() {
        let args: RetrieveChunksArgs = serde_json::from_value(json!({"query": "x"})).unwrap();
        assert_eq!(args.k, 4);
        assert_eq!(args.min_score, 0.0);
        assert!(args.folder_name.is_none());
    }
}
