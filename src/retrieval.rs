use crate::auth::AuthContext;
use crate::store::models::ChatMessage;
use anyhow::Result;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::pin::Pin;
use tokio_util::codec::{FramedRead, LinesCodec};

fn default_k() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    #[serde(default)]
    pub filters: Option<JsonValue>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub min_score: f64,
    #[serde(default)]
    pub use_reranking: Option<bool>,
    #[serde(default)]
    pub use_colpali: Option<bool>,
    /// Scalar folder name or a list of alternatives.
    #[serde(default)]
    pub folder_name: Option<JsonValue>,
    #[serde(default)]
    pub end_user_id: Option<String>,
    #[serde(default)]
    pub graph_name: Option<String>,
    #[serde(default)]
    pub hop_depth: Option<u32>,
    #[serde(default)]
    pub include_paths: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub content: String,
    pub score: f64,
    pub document_id: String,
    pub chunk_number: i64,
    #[serde(default)]
    pub metadata: JsonValue,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl ChunkResult {
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentContent {
    #[serde(rename = "type")]
    pub content_type: String, // "url" | "string"
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    pub score: f64,
    pub document_id: String,
    #[serde(default)]
    pub metadata: JsonValue,
    pub content: DocumentContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkGroup {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub chunks: Vec<ChunkResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedChunkResponse {
    pub chunks: Vec<ChunkResult>,
    pub groups: Vec<ChunkGroup>,
}

/// Reference to one retrieved chunk, reported back to clients as a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSource {
    pub document_id: String,
    pub chunk_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchChunkSource {
    pub document_id: String,
    pub chunk_number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionQueryRequest {
    pub query: String,
    #[serde(default)]
    pub filters: Option<JsonValue>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub min_score: f64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub use_reranking: Option<bool>,
    #[serde(default)]
    pub use_colpali: Option<bool>,
    #[serde(default)]
    pub graph_name: Option<String>,
    #[serde(default)]
    pub hop_depth: Option<u32>,
    #[serde(default)]
    pub include_paths: Option<bool>,
    #[serde(default)]
    pub prompt_overrides: Option<JsonValue>,
    #[serde(default)]
    pub folder_name: Option<JsonValue>,
    #[serde(default)]
    pub end_user_id: Option<String>,
    #[serde(default)]
    pub schema: Option<JsonValue>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub stream_response: Option<bool>,
    #[serde(default)]
    pub llm_config: Option<JsonValue>,
    #[serde(default)]
    pub padding: Option<u32>,
    #[serde(default)]
    pub inline_citations: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub completion: String,
    #[serde(default)]
    pub usage: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub sources: Vec<ChunkSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Result of a single-turn query: a finished completion, or a token stream
/// plus the sources that retrieval already resolved.
pub enum QueryOutput {
    Completion(CompletionResponse),
    Stream {
        tokens: TokenStream,
        sources: Vec<ChunkSource>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Entities,
    Facts,
    Summary,
    Sentiment,
    Full,
}

impl std::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnalysisType::Entities => "entities",
            AnalysisType::Facts => "facts",
            AnalysisType::Summary => "summary",
            AnalysisType::Sentiment => "sentiment",
            AnalysisType::Full => "full",
        };
        write!(f, "{s}")
    }
}

/// Retrieval + generation collaborator. Parsing, chunking, embedding, the
/// vector store and reranking all live behind this interface; the core only
/// consumes it.
#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn retrieve_chunks(
        &self,
        auth: &AuthContext,
        request: &RetrieveRequest,
    ) -> Result<Vec<ChunkResult>>;

    async fn retrieve_docs(
        &self,
        auth: &AuthContext,
        request: &RetrieveRequest,
    ) -> Result<Vec<DocumentResult>>;

    async fn batch_chunks(
        &self,
        auth: &AuthContext,
        sources: &[BatchChunkSource],
        folder_name: Option<&JsonValue>,
        end_user_id: Option<&str>,
        use_colpali: Option<bool>,
    ) -> Result<Vec<ChunkResult>>;

    /// Full text content of a document.
    async fn document_content(&self, auth: &AuthContext, document_id: &str) -> Result<String>;

    async fn analyze_document(
        &self,
        auth: &AuthContext,
        document_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<String>;

    /// Run a metadata-extraction schema against raw document content,
    /// returning the extracted fields.
    async fn extract_metadata(
        &self,
        auth: &AuthContext,
        content: &str,
        schema: &JsonValue,
    ) -> Result<Map<String, JsonValue>>;

    async fn query(
        &self,
        auth: &AuthContext,
        request: &CompletionQueryRequest,
        history: &[ChatMessage],
    ) -> Result<QueryOutput>;
}

/// HTTP client for a retrieval engine running as a sidecar service. The
/// caller identity travels along so the engine can apply its own scoping.
pub struct RemoteDocumentService {
    http: Client,
    base_url: String,
}

impl RemoteDocumentService {
    pub fn new(base_url: String) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        auth: &AuthContext,
        body: &JsonValue,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(url)
            .header("X-Auth-Context", serde_json::to_string(auth)?)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("retrieval engine error ({}): {}", status, text);
        }
        Ok(resp.json().await?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum EngineStreamEvent {
    Sources { sources: Vec<ChunkSource> },
    Assistant { content: String },
    Done,
    Error { content: String },
}

#[async_trait]
impl DocumentService for RemoteDocumentService {
    async fn retrieve_chunks(
        &self,
        auth: &AuthContext,
        request: &RetrieveRequest,
    ) -> Result<Vec<ChunkResult>> {
        self.post_json("/retrieve/chunks", auth, &serde_json::to_value(request)?)
            .await
    }

    async fn retrieve_docs(
        &self,
        auth: &AuthContext,
        request: &RetrieveRequest,
    ) -> Result<Vec<DocumentResult>> {
        self.post_json("/retrieve/docs", auth, &serde_json::to_value(request)?)
            .await
    }

    async fn batch_chunks(
        &self,
        auth: &AuthContext,
        sources: &[BatchChunkSource],
        folder_name: Option<&JsonValue>,
        end_user_id: Option<&str>,
        use_colpali: Option<bool>,
    ) -> Result<Vec<ChunkResult>> {
        let body = serde_json::json!({
            "sources": sources,
            "folder_name": folder_name,
            "end_user_id": end_user_id,
            "use_colpali": use_colpali,
        });
        self.post_json("/batch/chunks", auth, &body).await
    }

    async fn document_content(&self, auth: &AuthContext, document_id: &str) -> Result<String> {
        let body = serde_json::json!({ "document_id": document_id });
        let payload: JsonValue = self.post_json("/documents/content", auth, &body).await?;
        Ok(payload
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn analyze_document(
        &self,
        auth: &AuthContext,
        document_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<String> {
        let body = serde_json::json!({
            "document_id": document_id,
            "analysis_type": analysis_type,
        });
        let payload: JsonValue = self.post_json("/documents/analyze", auth, &body).await?;
        Ok(payload
            .get("analysis")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn extract_metadata(
        &self,
        auth: &AuthContext,
        content: &str,
        schema: &JsonValue,
    ) -> Result<Map<String, JsonValue>> {
        let body = serde_json::json!({ "content": content, "schema": schema });
        let payload: JsonValue = self
            .post_json("/rules/metadata_extraction", auth, &body)
            .await?;
        match payload.get("metadata") {
            Some(JsonValue::Object(map)) => Ok(map.clone()),
            _ => Ok(Map::new()),
        }
    }

    async fn query(
        &self,
        auth: &AuthContext,
        request: &CompletionQueryRequest,
        history: &[ChatMessage],
    ) -> Result<QueryOutput> {
        let mut body = serde_json::to_value(request)?;
        body["history"] = serde_json::to_value(history)?;

        if request.stream_response != Some(true) {
            let response: CompletionResponse = self.post_json("/query", auth, &body).await?;
            return Ok(QueryOutput::Completion(response));
        }

        let url = format!("{}/query", self.base_url);
        let resp = self
            .http
            .post(url)
            .header("X-Auth-Context", serde_json::to_string(auth)?)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("retrieval engine error ({}): {}", status, text);
        }

        let byte_stream = resp
            .bytes_stream()
            .map(|item| item.map_err(std::io::Error::other));
        let reader = tokio_util::io::StreamReader::new(byte_stream);
        let lines = FramedRead::new(reader, LinesCodec::new());

        let mut events = Box::pin(lines.filter_map(|line_result| async move {
            let line = match line_result {
                Ok(l) => l,
                Err(e) => return Some(Err(anyhow::anyhow!("stream error: {}", e))),
            };
            let data = line.trim().strip_prefix("data: ")?.trim().to_string();
            if data.is_empty() {
                return None;
            }
            match serde_json::from_str::<EngineStreamEvent>(&data) {
                Ok(event) => Some(Ok(event)),
                Err(e) => Some(Err(anyhow::anyhow!("stream parse error: {} (data: {})", e, data))),
            }
        }));

        // The engine announces the resolved sources before the first token.
        let sources = match events.next().await {
            Some(Ok(EngineStreamEvent::Sources { sources })) => sources,
            Some(Ok(other)) => {
                anyhow::bail!("retrieval engine stream opened without sources: {:?}", other)
            }
            Some(Err(e)) => return Err(e),
            None => anyhow::bail!("retrieval engine closed the stream before sources"),
        };

        let tokens: TokenStream = Box::pin(events.filter_map(|event| async move {
            match event {
                Ok(EngineStreamEvent::Assistant { content }) => Some(Ok(content)),
                Ok(EngineStreamEvent::Done) => None,
                Ok(EngineStreamEvent::Sources { .. }) => None,
                Ok(EngineStreamEvent::Error { content }) => {
                    Some(Err(anyhow::anyhow!("generation error: {}", content)))
                }
                Err(e) => Some(Err(e)),
            }
        }));

        Ok(QueryOutput::Stream { tokens, sources })
    }
}

/// Remote code-execution sandbox, contract only.
pub struct SandboxClient {
    http: Client,
    base_url: String,
}

impl SandboxClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn execute(&self, code: &str) -> Result<String> {
        let url = format!("{}/execute", self.base_url);
        let resp = self
            .http
            .post(url)
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("sandbox error ({}): {}", status, text);
        }
        let payload: JsonValue = resp.json().await?;
        Ok(payload
            .get("output")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

/// Remote knowledge-graph API used when graphs are hosted externally.
pub struct GraphApiClient {
    http: Client,
    base_url: String,
}

impl GraphApiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn retrieve(
        &self,
        auth: &AuthContext,
        query: &str,
        graph_name: Option<&str>,
    ) -> Result<String> {
        let url = format!("{}/graph/retrieve", self.base_url);
        let resp = self
            .http
            .post(url)
            .header("X-Auth-Context", serde_json::to_string(auth)?)
            .json(&serde_json::json!({ "query": query, "graph_name": graph_name }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("graph api error ({}): {}", status, text);
        }
        let payload: JsonValue = resp.json().await?;
        Ok(payload
            .get("answer")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Scripted document service for orchestrator and pipeline tests.
    pub struct MockDocumentService {
        pub chunks: Vec<ChunkResult>,
        pub query_outputs: Mutex<Vec<QueryOutput>>,
        pub queries_seen: Mutex<Vec<CompletionQueryRequest>>,
        /// Scripted `extract_metadata` outcomes, popped in order; when the
        /// script runs out, extraction succeeds with no fields.
        pub metadata_extractions: Mutex<Vec<Result<Map<String, JsonValue>>>>,
    }

    impl MockDocumentService {
        pub fn new() -> Self {
            Self::with_chunks(Vec::new())
        }

        pub fn with_chunks(chunks: Vec<ChunkResult>) -> Self {
            Self {
                chunks,
                query_outputs: Mutex::new(Vec::new()),
                queries_seen: Mutex::new(Vec::new()),
                metadata_extractions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DocumentService for MockDocumentService {
        async fn retrieve_chunks(
            &self,
            _auth: &AuthContext,
            request: &RetrieveRequest,
        ) -> Result<Vec<ChunkResult>> {
            Ok(self.chunks.iter().take(request.k).cloned().collect())
        }

        async fn retrieve_docs(
            &self,
            _auth: &AuthContext,
            _request: &RetrieveRequest,
        ) -> Result<Vec<DocumentResult>> {
            Ok(Vec::new())
        }

        async fn batch_chunks(
            &self,
            _auth: &AuthContext,
            sources: &[BatchChunkSource],
            _folder_name: Option<&JsonValue>,
            _end_user_id: Option<&str>,
            _use_colpali: Option<bool>,
        ) -> Result<Vec<ChunkResult>> {
            Ok(self
                .chunks
                .iter()
                .filter(|c| {
                    sources
                        .iter()
                        .any(|s| s.document_id == c.document_id && s.chunk_number == c.chunk_number)
                })
                .cloned()
                .collect())
        }

        async fn document_content(
            &self,
            _auth: &AuthContext,
            document_id: &str,
        ) -> Result<String> {
            Ok(format!("full content of {document_id}"))
        }

        async fn analyze_document(
            &self,
            _auth: &AuthContext,
            document_id: &str,
            analysis_type: AnalysisType,
        ) -> Result<String> {
            Ok(format!("{analysis_type} analysis of {document_id}"))
        }

        async fn extract_metadata(
            &self,
            _auth: &AuthContext,
            _content: &str,
            _schema: &JsonValue,
        ) -> Result<Map<String, JsonValue>> {
            let mut scripted = self.metadata_extractions.lock().unwrap();
            if scripted.is_empty() {
                return Ok(Map::new());
            }
            scripted.remove(0)
        }

        async fn query(
            &self,
            _auth: &AuthContext,
            request: &CompletionQueryRequest,
            _history: &[ChatMessage],
        ) -> Result<QueryOutput> {
            self.queries_seen.lock().unwrap().push(request.clone());
            let mut outputs = self.query_outputs.lock().unwrap();
            if outputs.is_empty() {
                anyhow::bail!("mock document service has no scripted query output");
            }
            Ok(outputs.remove(0))
        }
    }

    pub fn text_chunk(document_id: &str, chunk_number: i64, content: &str) -> ChunkResult {
        ChunkResult {
            content: content.to_string(),
            score: 0.9,
            document_id: document_id.to_string(),
            chunk_number,
            metadata: serde_json::json!({}),
            content_type: "text/plain".to_string(),
            filename: Some(format!("{document_id}.txt")),
            download_url: None,
        }
    }
}
