mod agent;
mod auth;
mod cache;
mod completion;
mod config;
mod error;
mod logging;
mod retrieval;
mod server;
mod store;
mod tools;
mod usage;

use crate::agent::Agent;
use crate::cache::HotCache;
use crate::completion::provider_for_model;
use crate::config::Settings;
use crate::retrieval::{DocumentService, GraphApiClient, RemoteDocumentService, SandboxClient};
use crate::server::AppState;
use crate::store::MetadataStore;
use crate::tools::ToolRegistry;
use crate::usage::UsageTracker;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "morphik", about = "Multi-tenant RAG service with an agentic query loop")]
struct Cli {
    /// Path to the configuration file (defaults to ./morphik.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server.
    Serve,
    /// Print a developer connection URI for this instance.
    GenerateUri {
        #[arg(long, default_value = "admin")]
        name: String,
        #[arg(long, default_value_t = 30)]
        expiry_days: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let (_log_guard, log_dir) = logging::init(&settings.logging)?;
            info!("Logging to {:?}", log_dir);
            serve(settings).await
        }
        Command::GenerateUri { name, expiry_days } => {
            let name = name.replace(' ', "_").to_lowercase();
            let claims = auth::TokenClaims::developer(&name, None, expiry_days);
            let token = auth::encode_token(&claims, &settings.auth.jwt_secret)?;
            let uri =
                auth::connection_uri(&name, &token, &settings.api.host, settings.api.port);
            println!("{uri}");
            Ok(())
        }
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    let store = Arc::new(MetadataStore::open(
        &settings.storage.db_path,
        settings.is_cloud(),
    )?);
    let cache = Arc::new(HotCache::new(Some(Duration::from_secs(
        settings.cache.chat_ttl_secs,
    ))));
    let docs: Arc<dyn DocumentService> =
        Arc::new(RemoteDocumentService::new(settings.retrieval.url.clone()));
    let sandbox = settings
        .sandbox
        .as_ref()
        .map(|s| SandboxClient::new(s.url.clone()));
    let graph_api = settings
        .graph
        .api_base
        .as_ref()
        .map(|url| GraphApiClient::new(url.clone()));

    let registry = Arc::new(ToolRegistry::new(
        store.clone(),
        docs.clone(),
        sandbox,
        graph_api,
        settings.graph.mode,
    ));

    let model = settings
        .registered_model(&settings.agent.model)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "agent model '{}' not found in registered models",
                settings.agent.model
            )
        })?;
    let provider = provider_for_model(model, &settings.agent);
    let agent = Arc::new(Agent::new(
        registry,
        provider,
        settings.agent.max_iters,
        settings.agent.debug_log_dir.clone(),
    ));

    let usage = Arc::new(UsageTracker::new(
        store.clone(),
        settings.limits.clone(),
        settings.mode,
    ));

    let state = Arc::new(AppState {
        settings: settings.clone(),
        store,
        cache,
        docs,
        usage,
        agent,
    });
    server::start_server(state).await
}
