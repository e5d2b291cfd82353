//! Integration tests for the roomcast-cast HTTP API
//!
//! Drives the router directly with `tower::ServiceExt::oneshot`.

mod helpers;

use axum::http::StatusCode;
use roomcast_cast::api::{create_router, AppContext};
use roomcast_cast::cast::CastEngine;
use roomcast_cast::config::Config;
use roomcast_cast::SharedState;
use serde_json::{json, Value};
use std::sync::Arc;

/// Router around an engine whose sink port refuses connections
async fn setup_test_server(config: Config) -> (axum::Router, Arc<CastEngine>) {
    let state = Arc::new(SharedState::new());
    let engine = Arc::new(
        CastEngine::from_config(&config, Arc::clone(&state))
            .await
            .expect("Failed to create engine"),
    );
    let router = create_router(AppContext {
        state,
        engine: Arc::clone(&engine),
    });
    (router, engine)
}

async fn refusing_config() -> Config {
    let mut config = Config::default();
    config.sink.port = helpers::refused_port().await;
    config.sink.connect_timeout_ms = 500;
    config
}

async fn make_request(
    app: &axum::Router,
    method: &str,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Option<Value>) {
    use axum::body::Body;
    use http::{Method, Request};
    use tower::ServiceExt;

    let method = match method {
        "GET" => Method::GET,
        "POST" => Method::POST,
        _ => panic!("Unsupported method"),
    };

    let mut request = Request::builder().method(method).uri(path);
    let request = match body {
        Some(json_body) => {
            request = request.header("content-type", "application/json");
            request.body(Body::from(json_body.to_string())).unwrap()
        }
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json_body = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(&body).ok()
    };

    (status, json_body)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = setup_test_server(refusing_config().await).await;

    let (status, body) = make_request(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    let body = body.expect("Expected response body");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["module"], "roomcast-cast");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_build_info_endpoint() {
    let (app, _) = setup_test_server(refusing_config().await).await;

    let (status, body) = make_request(&app, "GET", "/build_info", None).await;

    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert!(body["git_hash"].is_string());
    assert!(body["build_profile"].is_string());
}

#[tokio::test]
async fn test_status_without_session() {
    let (app, _) = setup_test_server(refusing_config().await).await;

    let (status, body) = make_request(&app, "GET", "/api/v1/cast/status", None).await;

    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["active"], false);
    assert_eq!(body["enabled"], true);
    assert_eq!(body["message"], "No active stream");
}

#[tokio::test]
async fn test_stop_without_session_succeeds() {
    let (app, _) = setup_test_server(refusing_config().await).await;

    for _ in 0..2 {
        let (status, body) = make_request(&app, "POST", "/api/v1/cast/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["success"], true);
    }
}

#[tokio::test]
async fn test_pause_without_session_conflicts() {
    let (app, _) = setup_test_server(refusing_config().await).await;

    let (status, body) = make_request(&app, "POST", "/api/v1/cast/pause", None).await;

    assert_eq!(status, StatusCode::CONFLICT);
    let body = body.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["errorKind"], "invalid_state");
}

#[tokio::test]
async fn test_start_validates_request() {
    let (app, _) = setup_test_server(refusing_config().await).await;

    let (status, body) = make_request(
        &app,
        "POST",
        "/api/v1/cast/start",
        Some(json!({ "trackId": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.unwrap()["errorKind"], "invalid_input");

    let (status, _) = make_request(
        &app,
        "POST",
        "/api/v1/cast/start",
        Some(json!({ "trackId": "abc", "seekOffsetSecs": -3.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Missing trackId is rejected by the JSON extractor
    let (status, _) = make_request(&app, "POST", "/api/v1/cast/start", Some(json!({}))).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_start_against_unreachable_server() {
    let (app, _) = setup_test_server(refusing_config().await).await;

    let (status, body) = make_request(
        &app,
        "POST",
        "/api/v1/cast/start",
        Some(json!({ "trackId": "abc", "title": "Song" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let body = body.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["errorKind"], "connection_failure");

    let (_, body) = make_request(&app, "GET", "/api/v1/cast/status", None).await;
    let body = body.unwrap();
    assert_eq!(body["active"], true);
    assert_eq!(body["trackId"], "abc");
    assert_eq!(body["title"], "Song");
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_disabled_casting_rejects_start() {
    let mut config = refusing_config().await;
    config.cast.enabled = false;
    let (app, _) = setup_test_server(config).await;

    let (status, body) = make_request(
        &app,
        "POST",
        "/api/v1/cast/start",
        Some(json!({ "trackId": "abc" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.unwrap()["success"], false);

    let (_, body) = make_request(&app, "GET", "/api/v1/cast/status", None).await;
    assert_eq!(body.unwrap()["enabled"], false);
}

#[tokio::test]
async fn test_cache_summary() {
    let (app, engine) = setup_test_server(refusing_config().await).await;
    engine.cache().put("first", vec![0u8; 10]).await;
    engine.cache().put("second", vec![0u8; 20]).await;

    let (status, body) = make_request(&app, "GET", "/api/v1/cache", None).await;

    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["capacity"], 5);
    assert_eq!(body["durable"], false);
    assert_eq!(body["entries"][0]["trackId"], "first");
    assert_eq!(body["entries"][1]["bytes"], 20);
}

#[cfg(unix)]
#[tokio::test]
#[serial_test::serial]
async fn test_cast_lifecycle_over_http() {
    use helpers::{StubServer, StubTools, PCM_BYTES_PER_SEC};
    use std::time::Duration;

    let server = StubServer::start().await;
    let tools = StubTools::new(PCM_BYTES_PER_SEC * 20, 4096);
    let (app, _) = setup_test_server(tools.config(server.port())).await;

    let (status, body) = make_request(
        &app,
        "POST",
        "/api/v1/cast/start",
        Some(json!({ "trackId": "abc" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{:?}", body);

    let (_, body) = make_request(&app, "GET", "/api/v1/cast/status", None).await;
    let body = body.unwrap();
    assert_eq!(body["status"], "streaming");
    assert!(body["connectionId"].is_u64());

    let (status, _) = make_request(&app, "POST", "/api/v1/cast/pause", None).await;
    assert_eq!(status, StatusCode::OK);

    // Resume without a body restarts at the last offset
    let (status, _) = make_request(&app, "POST", "/api/v1/cast/resume", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = make_request(
        &app,
        "POST",
        "/api/v1/cast/seek",
        Some(json!({ "seekOffsetSecs": 12.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(tools.decoder_calls().last().unwrap().contains("-ss 12.500"));
    server.wait_connections(3, Duration::from_secs(5)).await;

    let (status, _) = make_request(&app, "POST", "/api/v1/cast/stop", None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = make_request(&app, "GET", "/api/v1/cast/status", None).await;
    assert_eq!(body.unwrap()["active"], false);
}
