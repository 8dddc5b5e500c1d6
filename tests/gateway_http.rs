//! Integration tests for the TTS gateway's HTTP surface, exercised through
//! the full router (no bound socket needed) the way
//! `examples/mmogr-gglib/crates/gglib-axum/tests/integration_routes.rs`
//! drives its server with `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use tts_gateway_core::gateway::{build_router, GatewayState};
use tts_gateway_core::metrics::Metrics;
use tts_gateway_core::session::SessionManager;
use tts_gateway_core::tts::{AnyEngine, DummyEngine};

fn test_state() -> GatewayState {
    GatewayState {
        sessions: Arc::new(SessionManager::new(60, 8)),
        engine: Arc::new(AnyEngine::Dummy(DummyEngine::new())),
        metrics: Arc::new(Metrics::new()),
        chunk_bytes: 8192,
        send_queue_hwm: 1024,
        engine_name: "dummy",
        version: "test".to_string(),
        started_at: Instant::now(),
    }
}

#[tokio::test]
async fn healthz_reports_dummy_engine_with_no_file_fields() {
    let app = build_router(test_state());

    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["engine"], "dummy");
    assert!(json["engine_binary_exists"].is_null());
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text_with_no_traffic() {
    let app = build_router(test_state());

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("# TYPE ws_gateway_active_connections gauge"));
    assert!(text.contains("ws_gateway_active_connections 0"));
    assert!(text.contains("# TYPE ws_gateway_ttfa_ms summary"));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = build_router(test_state());

    let response = app
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
