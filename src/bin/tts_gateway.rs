//! Entry point for the TTS gateway service (spec.md §4). Mirrors
//! `src/bin/server.rs::main`'s init order: logging, config, shared state,
//! router, background tasks, serve.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use tts_gateway_core::gateway::{build_router, cleanup_loop, GatewayConfig, GatewayState};
use tts_gateway_core::metrics::Metrics;
use tts_gateway_core::session::SessionManager;
use tts_gateway_core::tts::AnyEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GatewayConfig::from_env();
    let engine = AnyEngine::from_env()?;
    let engine_name = engine.name();

    let state = GatewayState {
        sessions: Arc::new(SessionManager::new(config.session_ttl_s, config.cache_size)),
        engine: Arc::new(engine),
        metrics: Arc::new(Metrics::new()),
        chunk_bytes: config.chunk_bytes,
        send_queue_hwm: config.send_queue_hwm,
        engine_name,
        version: config.version.clone(),
        started_at: Instant::now(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup_handle = tokio::spawn(cleanup_loop(state.sessions.clone(), config.cleanup_interval_s, shutdown_rx));

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, engine = engine_name, "tts gateway listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let router = build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = cleanup_handle.await;
    Ok(())
}
