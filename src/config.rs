use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Deployment mode. Cloud mode enables per-user quotas and the end-user
/// access-control shortcut; self-hosted mode keeps both disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    SelfHosted,
    Cloud,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    pub api: ApiConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sandbox: Option<SandboxConfig>,
    #[serde(default)]
    pub models: Vec<RegisteredModel>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_mode() -> Mode {
    Mode::SelfHosted
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// When true, every request is served under a fixed developer identity.
    /// Only sensible for local single-user deployments.
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default = "default_dev_entity_id")]
    pub dev_entity_id: String,
    #[serde(default)]
    pub dev_app_id: Option<String>,
}

fn default_dev_entity_id() -> String {
    "dev_user".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    /// Id of the registered model the agent runs on.
    pub model: String,
    /// Safety cap on model-call iterations within one agent run.
    #[serde(default = "default_max_iters")]
    pub max_iters: usize,
    /// Context window forced onto the fallback (Ollama) adapter.
    #[serde(default = "default_num_ctx")]
    pub num_ctx: usize,
    /// Directory where oversized message lists are dumped for debugging.
    #[serde(default = "default_debug_log_dir")]
    pub debug_log_dir: PathBuf,
}

fn default_max_iters() -> usize {
    10
}

fn default_num_ctx() -> usize {
    16384
}

fn default_debug_log_dir() -> PathBuf {
    PathBuf::from("debug_logs")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "agent_model".to_string(),
            max_iters: default_max_iters(),
            num_ctx: default_num_ctx(),
            debug_log_dir: default_debug_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GraphMode {
    #[default]
    Local,
    Api,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GraphConfig {
    #[serde(default)]
    pub mode: GraphMode,
    /// Base URL of the remote graph API; required when `mode = "api"`.
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".local/share")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("morphik");
        Self {
            db_path: dir.join("metadata.redb"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// TTL for hot chat-history entries, in seconds. The metadata store stays
    /// authoritative, so eviction is never observable.
    #[serde(default = "default_chat_ttl_secs")]
    pub chat_ttl_secs: u64,
}

fn default_chat_ttl_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chat_ttl_secs: default_chat_ttl_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Per-user daily query calls permitted in cloud mode.
    #[serde(default = "default_query_limit")]
    pub queries_per_day: u64,
    /// Per-user daily agent calls permitted in cloud mode.
    #[serde(default = "default_agent_limit")]
    pub agent_calls_per_day: u64,
    /// Applications a single account may provision in cloud mode.
    #[serde(default = "default_app_limit")]
    pub apps_per_account: u64,
}

fn default_query_limit() -> u64 {
    500
}

fn default_agent_limit() -> u64 {
    100
}

fn default_app_limit() -> u64 {
    5
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            queries_per_day: default_query_limit(),
            agent_calls_per_day: default_agent_limit(),
            apps_per_account: default_app_limit(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Base URL of the retrieval engine (parsing, embedding, vector search
    /// and completion live there; this service only consumes its API).
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Base URL of the code-execution sandbox.
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegisteredModel {
    pub id: String,
    pub provider: String, // "ollama" | "openai"
    pub api_base: String,
    pub model_name: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub retention_days: Option<u64>,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.unwrap_or_else(|| Path::new("morphik.toml"));
        if !config_path.exists() {
            anyhow::bail!("config file not found at {:?}", config_path);
        }
        let content = fs::read_to_string(config_path)?;
        let mut settings: Settings = toml::from_str(&content)?;

        // Secrets may come from the environment instead of the config file.
        if let Ok(secret) = std::env::var("JWT_SECRET_KEY") {
            settings.auth.jwt_secret = secret;
        }
        for model in &mut settings.models {
            if model.api_key.is_none() {
                let var = format!("{}_API_KEY", model.id.to_uppercase().replace('-', "_"));
                if let Ok(key) = std::env::var(&var) {
                    model.api_key = Some(key);
                }
            }
        }

        if settings.graph.mode == GraphMode::Api && settings.graph.api_base.is_none() {
            anyhow::bail!("graph.mode = \"api\" requires graph.api_base to be set");
        }

        Ok(settings)
    }

    pub fn registered_model(&self, id: &str) -> Option<&RegisteredModel> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn is_cloud(&self) -> bool {
        self.mode == Mode::Cloud
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml_src = r#"
            mode = "cloud"

            [api]
            host = "0.0.0.0"
            port = 8000

            [auth]
            jwt_secret = "secret"

            [agent]
            model = "agent_model"

            [retrieval]
            url = "http://localhost:9000"

            [[models]]
            id = "agent_model"
            provider = "ollama"
            api_base = "http://localhost:11434"
            model_name = "ollama_chat/qwen3:32b"
        "#;
        let settings: Settings = toml::from_str(toml_src).unwrap();
        assert_eq!(settings.mode, Mode::Cloud);
        assert_eq!(settings.agent.max_iters, 10);
        assert_eq!(settings.agent.num_ctx, 16384);
        assert_eq!(settings.cache.chat_ttl_secs, 3600);
        assert!(settings.registered_model("agent_model").is_some());
        assert!(settings.registered_model("missing").is_none());
    }

    #[test]
    fn graph_mode_defaults_to_local() {
        let toml_src = r#"
            [api]
            host = "127.0.0.1"
            port = 8000

            [auth]
            jwt_secret = "secret"

            [retrieval]
            url = "http://localhost:9000"
        "#;
        let settings: Settings = toml::from_str(toml_src).unwrap();
        assert_eq!(settings.graph.mode, GraphMode::Local);
        assert_eq!(settings.mode, Mode::SelfHosted);
    }
}
