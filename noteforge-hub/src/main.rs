//! Standalone MCP Hub Server (C15): exposes the built-in memory and
//! retrieval tools described by the gateway's tool contract over SSE,
//! backed by a configured [`noteforge_storage::MemoryStorage`] and the
//! Hub-local Markdown vector index.

mod config;
mod kb_index;
mod mcp_registry;
mod reindex_jobs;
mod tools;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use noteforge_mcp::hub::registry::ToolRegistry;
use noteforge_mcp::hub::{router, AppState};
use noteforge_storage::vector_store::InfinityEmbeddingProvider;
use noteforge_storage::{build_storage, MemoryStorage, StorageKind, VectorStoreSettings};

use config::HubConfig;
use kb_index::KbIndex;
use mcp_registry::McpServerRegistry;
use reindex_jobs::ReindexJobs;

const SERVER_NAME: &str = "noteforge-hub";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Noteforge MCP Hub: the memory/retrieval gateway the bot talks to.
#[derive(Parser, Debug)]
#[command(name = "noteforge-hub", version, about, long_about = None)]
struct Cli {
    /// Path to the Hub's TOML configuration file.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Address to bind the SSE/HTTP gateway to, overriding config.
    #[arg(long)]
    bind_addr: Option<String>,

    /// Increase verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let mut hub_config = HubConfig::load(&config_path).map_err(|e| {
        tracing::error!("configuration error: {e}");
        anyhow::anyhow!("configuration error: {e}")
    })?;
    if let Some(bind_addr) = cli.bind_addr {
        hub_config.bind_addr = bind_addr;
    }

    let data_root = hub_config.resolved_data_root();
    std::fs::create_dir_all(&data_root)?;

    let vector_settings = VectorStoreSettings {
        endpoint: hub_config.vector_store.endpoint.clone(),
        embedding_model: hub_config.vector_store.embedding_model.clone(),
    };
    // `mem-agent` storage delegates to an external Agent binary, which is
    // wired up on the bot side, not here; the Hub has no Agent to run one
    // against, so it serves memory storage as json or vector only.
    let storage: Arc<dyn MemoryStorage> = Arc::from(
        build_storage(StorageKind::Json, &data_root, &vector_settings, None)
            .map_err(|e| anyhow::anyhow!("failed to open memory storage: {e}"))?,
    );

    let kb_index = Arc::new(KbIndex::new(
        data_root.join("vector"),
        Box::new(InfinityEmbeddingProvider::new(
            hub_config.vector_store.endpoint.clone(),
            hub_config.vector_store.embedding_model.clone(),
        )),
    )?);

    let reindex_jobs = Arc::new(ReindexJobs::new());
    let mcp_registry = Arc::new(
        McpServerRegistry::load(data_root.join("mcp_servers.json"), hub_config.mcp_servers.clone())
            .map_err(|e| anyhow::anyhow!("failed to load mcp server registry: {e}"))?,
    );

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(tools::StoreMemoryTool::new(storage.clone())));
    registry.register(Arc::new(tools::RetrieveMemoryTool::new(storage.clone())));
    registry.register(Arc::new(tools::ListCategoriesTool::new(storage)));
    registry.register(Arc::new(tools::VectorSearchTool::new(kb_index.clone())));
    registry.register(Arc::new(tools::ReindexVectorTool::new(kb_index, reindex_jobs.clone())));
    registry.register(Arc::new(tools::GetReindexStatusTool::new(reindex_jobs)));
    registry.register(Arc::new(tools::ListMcpServersTool::new(mcp_registry.clone())));
    registry.register(Arc::new(tools::GetMcpServerTool::new(mcp_registry.clone())));
    registry.register(Arc::new(tools::RegisterMcpServerTool::new(mcp_registry.clone())));
    registry.register(Arc::new(tools::SetMcpServerEnabledTool::enable(mcp_registry.clone())));
    registry.register(Arc::new(tools::SetMcpServerEnabledTool::disable(mcp_registry)));

    let state = Arc::new(AppState::new(Arc::new(registry), SERVER_NAME, SERVER_VERSION));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&hub_config.bind_addr).await.map_err(|e| {
        tracing::error!("failed to bind {}: {e}", hub_config.bind_addr);
        anyhow::anyhow!("fatal runtime error: {e}")
    })?;
    tracing::info!(addr = %hub_config.bind_addr, "noteforge-hub listening");

    axum::serve(listener, app).await.map_err(|e| anyhow::anyhow!("fatal runtime error: {e}"))?;
    Ok(())
}
