//! The orchestrator service: terminates the end client's `/chat` WebSocket,
//! streams an upstream chat-completions response, and bridges flushed text
//! to the TTS gateway's `/tts` WebSocket, relaying its audio back to the
//! client untouched. Grounded on `orchestrator/server.py::create_app` /
//! `ws_chat`; router assembly follows the same `TraceLayer` + `CorsLayer`
//! shape as `src/gateway/mod.rs::build_router`.

mod bridge;
pub mod llm;

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::protocol::{ChatMessage, ChatRequest, ErrorCode};
use llm::{FlushConfig, LlmStreamConfig};

const CANCEL_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const BRIDGE_COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct OrchestratorConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub ws_tts_url: String,
    pub allow_client_tts_url: bool,
    pub flush: std::sync::Arc<FlushConfig>,
    pub llm: std::sync::Arc<LlmStreamConfig>,
}

impl OrchestratorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(OrchestratorConfig {
            host: std::env::var("ORCH_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("ORCH_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(9100),
            api_key: std::env::var("ORCH_API_KEY").ok().filter(|s| !s.is_empty()),
            ws_tts_url: std::env::var("WS_TTS_URL").unwrap_or_else(|_| "ws://localhost:9000/tts".to_string()),
            allow_client_tts_url: bool_env("ALLOW_CLIENT_TTS_URL", false),
            flush: std::sync::Arc::new(FlushConfig {
                min_chars: std::env::var("TTS_FLUSH_MIN_CHARS").ok().and_then(|v| v.parse().ok()).unwrap_or(12),
                on_punct: bool_env("TTS_FLUSH_ON_PUNCT", true),
            }),
            llm: std::sync::Arc::new(LlmStreamConfig::from_env()?),
        })
    }
}

fn bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[derive(Clone)]
pub struct OrchestratorState {
    pub config: OrchestratorConfig,
    pub http: reqwest::Client,
    pub started_at: Instant,
}

pub fn build_router(state: OrchestratorState) -> Router {
    Router::new()
        .route("/chat", get(chat_ws_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz(State(state): State<OrchestratorState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime_s": state.started_at.elapsed().as_secs_f64(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
struct AuthQuery {
    #[serde(default)]
    api_key: Option<String>,
}

fn is_authorized(config: &OrchestratorConfig, headers: &HeaderMap, query: &AuthQuery) -> bool {
    let Some(expected) = &config.api_key else {
        return true;
    };
    if query.api_key.as_deref() == Some(expected.as_str()) {
        return true;
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

async fn chat_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<OrchestratorState>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !is_authorized(&state.config, &headers, &query) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: OrchestratorState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let request: ChatRequest = match ws_rx.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
            Ok(req) => req,
            Err(e) => {
                let _ = send_error(&mut ws_tx, ErrorCode::BadRequest, &e.to_string()).await;
                return;
            }
        },
        _ => {
            let _ = send_error(&mut ws_tx, ErrorCode::BadRequest, "expected a chat_request frame first").await;
            return;
        }
    };

    let (client_out_tx, mut client_out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(json) = client_out_rx.recv().await {
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let start_msg = ChatMessage::OrchestratorStart {
        session_id: request.session_id.clone(),
        tts_flush_min_chars: state.config.flush.min_chars,
        tts_flush_on_punct: state.config.flush.on_punct,
    };
    send_json(&client_out_tx, &start_msg);

    let (stop_tx, stop_rx) = watch::channel(false);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (tts_text_tx, tts_text_rx) = mpsc::unbounded_channel::<Option<String>>();

    // Reads the rest of the client's frames looking only for `cancel`; the
    // request frame is already consumed above, matching `ws_chat`'s split
    // between the initial `recv()` and the background cancel listener.
    let cancel_listener = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            if let Message::Text(text) = msg {
                if matches!(serde_json::from_str::<ChatMessage>(&text), Ok(ChatMessage::Cancel)) {
                    let _ = cancel_tx.send(true);
                    let _ = stop_tx.send(true);
                    break;
                }
            }
        }
    });

    let ws_tts_url = if state.config.allow_client_tts_url {
        request.ws_tts_url.clone().unwrap_or_else(|| state.config.ws_tts_url.clone())
    } else {
        state.config.ws_tts_url.clone()
    };

    if !is_valid_ws_url(&ws_tts_url) {
        send_json(&client_out_tx, &ChatMessage::OrchestratorError {
            code: ErrorCode::BadRequest,
            message: format!("invalid ws_tts_url: {ws_tts_url}"),
        });
        cancel_listener.abort();
        drop(client_out_tx);
        let _ = writer.await;
        return;
    }

    let bridge_config = bridge::BridgeConfig {
        ws_tts_url,
        session_id: request.session_id.clone(),
        audio_format: request.audio_format,
        sample_rate: request.sample_rate,
        channels: request.channels,
    };
    let bridge_client_out = client_out_tx.clone();
    let bridge_task = tokio::spawn(bridge::run(bridge_config, tts_text_rx, bridge_client_out, cancel_rx));

    let llm_config = state.config.llm.clone();
    let flush_config = state.config.flush.clone();
    let http = state.http.clone();
    let llm_client_out = client_out_tx.clone();
    let prompt = request.prompt.clone();
    let llm_stop_rx = stop_rx.clone();
    let mut llm_task = tokio::spawn(async move {
        llm::stream_deltas(
            &http,
            &llm_config,
            &prompt,
            &llm_client_out,
            &tts_text_tx,
            &flush_config,
            llm_stop_rx,
        )
        .await
    });

    let mut stop_rx_for_race = stop_rx.clone();
    let started = Instant::now();
    let cancelled_by_client;

    tokio::select! {
        result = &mut llm_task => {
            cancelled_by_client = false;
            match result {
                Ok(Ok(outcome)) => {
                    let done = ChatMessage::LlmDone {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        full_text_len: outcome.full_text.chars().count(),
                        tool_calls: outcome.tool_calls,
                    };
                    send_json(&client_out_tx, &done);
                }
                Ok(Err(e)) => {
                    send_json(&client_out_tx, &ChatMessage::OrchestratorError {
                        code: ErrorCode::LlmParseError,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(session_id = %request.session_id, error = %e, "llm streaming task failed");
                }
            }
        }
        _ = stop_rx_for_race.changed() => {
            cancelled_by_client = true;
            llm_task.abort();
            send_json(&client_out_tx, &ChatMessage::OrchestratorCancelled);
        }
    }

    let bridge_timeout = if cancelled_by_client {
        CANCEL_DRAIN_TIMEOUT
    } else {
        BRIDGE_COMPLETION_TIMEOUT
    };
    let bridge_abort = bridge_task.abort_handle();
    if tokio::time::timeout(bridge_timeout, bridge_task).await.is_err() {
        bridge_abort.abort();
        tracing::warn!(session_id = %request.session_id, "tts bridge did not complete within timeout");
    }

    cancel_listener.abort();
    drop(client_out_tx);
    let _ = writer.await;
}

/// A client-supplied `ws_tts_url` only reaches the bridge when
/// `ALLOW_CLIENT_TTS_URL=true` (spec.md §4.8); still reject anything that
/// isn't a `ws`/`wss` URL so a malformed value doesn't surface as a
/// confusing connect error deep inside `tokio-tungstenite`.
fn is_valid_ws_url(raw: &str) -> bool {
    matches!(url::Url::parse(raw), Ok(u) if u.scheme() == "ws" || u.scheme() == "wss")
}

fn send_json(out: &mpsc::UnboundedSender<String>, msg: &ChatMessage) {
    if let Ok(json) = serde_json::to_string(msg) {
        let _ = out.send(json);
    }
}

async fn send_error(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    code: ErrorCode,
    message: &str,
) -> Result<(), axum::Error> {
    let msg = ChatMessage::OrchestratorError { code, message: message.to_string() };
    let json = serde_json::to_string(&msg).expect("ChatMessage always serializes");
    ws_tx.send(Message::Text(json.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: Option<&str>) -> OrchestratorConfig {
        OrchestratorConfig {
            host: "0.0.0.0".into(),
            port: 9100,
            api_key: api_key.map(String::from),
            ws_tts_url: "ws://localhost:9000/tts".into(),
            allow_client_tts_url: false,
            flush: std::sync::Arc::new(FlushConfig { min_chars: 12, on_punct: true }),
            llm: std::sync::Arc::new(LlmStreamConfig {
                base_url: "http://localhost:8082".into(),
                api_key: "k".into(),
                model: "m".into(),
            }),
        }
    }

    #[test]
    fn no_api_key_configured_allows_any_request() {
        let cfg = config(None);
        let headers = HeaderMap::new();
        assert!(is_authorized(&cfg, &headers, &AuthQuery { api_key: None }));
    }

    #[test]
    fn query_param_must_match_configured_key() {
        let cfg = config(Some("secret"));
        let headers = HeaderMap::new();
        assert!(is_authorized(&cfg, &headers, &AuthQuery { api_key: Some("secret".into()) }));
        assert!(!is_authorized(&cfg, &headers, &AuthQuery { api_key: Some("wrong".into()) }));
    }

    #[test]
    fn bearer_header_is_accepted_as_alternative_to_query_param() {
        let cfg = config(Some("secret"));
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        assert!(is_authorized(&cfg, &headers, &AuthQuery { api_key: None }));
    }

    #[test]
    fn ws_url_validation_accepts_ws_and_wss_only() {
        assert!(is_valid_ws_url("ws://localhost:9000/tts"));
        assert!(is_valid_ws_url("wss://gateway.internal/tts"));
        assert!(!is_valid_ws_url("http://localhost:9000/tts"));
        assert!(!is_valid_ws_url("not a url"));
    }
}
