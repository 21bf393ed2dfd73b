//! Genesis server binary
//!
//! Wires the pieces together: configuration from environment, tool
//! registry scan, LLM client, in-memory repositories, orchestrator graph
//! and the axum API.

use anyhow::Context;
use clap::Parser;
use genesis_checkpoint::InMemorySaver;
use genesis_llm::{LlmConfig, OpenAiCompatChat};
use genesis_orchestrator::api::{build_router, AppState};
use genesis_orchestrator::repo::memory::{
    InMemoryChatRepo, InMemoryMessageRepo, InMemoryStateRepo, InMemoryVectorStore,
};
use genesis_orchestrator::{GenesisConfig, Orchestrator};
use genesis_tools::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "genesis-server", about = "Conversational task orchestrator")]
struct Args {
    /// Address to bind the HTTP server on.
    #[arg(long, default_value = "0.0.0.0:8000", env = "GENESIS_BIND_ADDR")]
    bind: String,

    /// Tools directory override (defaults to <project_root>/tools).
    #[arg(long)]
    tools_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = GenesisConfig::from_env();
    if let Some(tools_dir) = args.tools_dir {
        config.tools_dir = tools_dir;
    }

    let mut registry = ToolRegistry::new();
    if config.tools_dir.exists() {
        let count = registry
            .register_dir(&config.tools_dir)
            .context("tool registration failed")?;
        info!(
            count,
            dir = %config.tools_dir.display(),
            tools = ?registry.names(),
            "tool registry loaded"
        );
    } else {
        warn!(dir = %config.tools_dir.display(), "tools directory missing; registry is empty");
    }

    let llm_config = LlmConfig::from_env().context("LLM configuration")?;
    let llm = Arc::new(OpenAiCompatChat::new(llm_config).context("LLM client")?);

    // One vector store shared by the precedent node and the API.
    let vectors = Arc::new(InMemoryVectorStore::new());

    let orchestrator = Arc::new(Orchestrator::new(
        llm,
        Arc::new(registry),
        vectors.clone(),
        Arc::new(InMemorySaver::new()),
        config.clone(),
    )?);

    let state = AppState {
        orchestrator,
        chats: Arc::new(InMemoryChatRepo::new()),
        messages: Arc::new(InMemoryMessageRepo::new()),
        states: Arc::new(InMemoryStateRepo::new()),
        vectors,
        config,
    };

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!(addr = %args.bind, "genesis server listening");
    axum::serve(listener, router).await?;
    Ok(())
}
