use anyhow::{Context, Result};
use std::sync::Arc;

use stablecoin_assistant::config::Config;
use stablecoin_assistant::controller::RunController;
use stablecoin_assistant::registry::ToolRegistry;
use stablecoin_assistant::server::{self, AppState};
use stablecoin_assistant::tools::HttpDataSources;
use stablecoin_assistant::transport::OpenAiAssistants;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();
    let addr = config.bind_addr().with_context(|| {
        format!(
            "Invalid server.bind '{}' (expected host:port)",
            config.server.bind
        )
    })?;

    let sources = HttpDataSources::new(&config.data_sources)?;
    let registry = Arc::new(ToolRegistry::new(Arc::new(sources)));

    let assistants = OpenAiAssistants::connect(
        &config.openai,
        config.polling.clone(),
        &registry.definitions(),
    )
    .await
    .context("Failed to prepare the assistant")?;
    tracing::info!(assistant_id = %assistants.assistant_id(), "Assistant ready");

    let controller = Arc::new(RunController::new(Arc::new(assistants), registry));

    server::serve(AppState::new(controller), addr, shutdown_signal()).await?;
    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
