//! Entry point for the orchestrator service (spec.md §4.6-§4.8).

use std::time::Instant;

use tracing_subscriber::EnvFilter;

use tts_gateway_core::orchestrator::{build_router, OrchestratorConfig, OrchestratorState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = OrchestratorConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);

    let state = OrchestratorState {
        config,
        http: reqwest::Client::new(),
        started_at: Instant::now(),
    };

    tracing::info!(%addr, "orchestrator listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let router = build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
