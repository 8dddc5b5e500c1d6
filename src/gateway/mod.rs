//! The TTS gateway service: `/tts` (WebSocket), `/healthz`, `/metrics`.
//! Router assembly follows `src/server/mod.rs::start`'s shape (routes +
//! `CorsLayer` + `TraceLayer` over a shared `State`).

mod health;
mod synth;
mod ws;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::Metrics;
use crate::session::SessionManager;
use crate::tts::AnyEngine;

#[derive(Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub session_ttl_s: u64,
    pub cache_size: usize,
    pub chunk_bytes: usize,
    pub send_queue_hwm: u64,
    pub version: String,
    pub cleanup_interval_s: u64,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        GatewayConfig {
            host: std::env::var("WS_TTS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("WS_TTS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(9000),
            session_ttl_s: std::env::var("TTS_SESSION_TTL_S")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            cache_size: std::env::var("TTS_CACHE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(64),
            chunk_bytes: std::env::var("TTS_CHUNK_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8192),
            send_queue_hwm: std::env::var("TTS_SEND_QUEUE_HWM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024),
            version: std::env::var("WS_TTS_VERSION").unwrap_or_else(|_| "dev".to_string()),
            cleanup_interval_s: std::env::var("TTS_CLEANUP_INTERVAL_S")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}

#[derive(Clone)]
pub struct GatewayState {
    pub sessions: Arc<SessionManager>,
    pub engine: Arc<AnyEngine>,
    pub metrics: Arc<Metrics>,
    pub chunk_bytes: usize,
    pub send_queue_hwm: u64,
    pub engine_name: &'static str,
    pub version: String,
    pub started_at: Instant,
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/tts", get(tts_ws_handler))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn tts_ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_socket(socket, state))
}

async fn healthz(State(state): State<GatewayState>) -> impl IntoResponse {
    let backend = health::probe(state.engine_name);
    Json(json!({
        "status": "ok",
        "engine": state.engine_name,
        "version": state.version,
        "uptime_s": state.started_at.elapsed().as_secs_f64(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "engine_binary_exists": backend.engine_binary_exists,
        "engine_model_exists": backend.engine_model_exists,
        "engine_model_sample_rate": backend.engine_model_sample_rate,
    }))
}

async fn metrics_endpoint(State(state): State<GatewayState>) -> impl IntoResponse {
    let body = state.metrics.render_prometheus().await;
    (
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Background sweep, spawned once at startup, mirroring
/// `CronHeartbeat::run`'s `select! { sleep, shutdown }` loop.
pub async fn cleanup_loop(sessions: Arc<SessionManager>, interval_s: u64, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_s.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let expired = sessions.sweep_expired().await;
                if !expired.is_empty() {
                    tracing::debug!(count = expired.len(), "swept idle tts sessions");
                }
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_env_has_spec_defaults_when_unset() {
        // Defaults must match spec.md §4.5/§6 regardless of test run order,
        // so only assert the ones not plausibly overridden by the ambient
        // test environment.
        std::env::remove_var("TTS_CACHE_SIZE");
        std::env::remove_var("TTS_SEND_QUEUE_HWM");
        let cfg = GatewayConfig::from_env();
        assert_eq!(cfg.cache_size, 64);
        assert_eq!(cfg.send_queue_hwm, 1024);
    }
}
