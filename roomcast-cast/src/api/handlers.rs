//! HTTP request handlers
//!
//! Control operations always answer with a `CastResult` body; the HTTP status
//! reflects the error kind when the operation failed.

use crate::api::server::AppContext;
use crate::cast::{CacheSummary, CastResult, StatusReport};
use axum::{extract::State, http::StatusCode, Json};
use roomcast_common::time::secs_f64_to_duration;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

/// Build identification captured by build.rs
#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub version: String,
    pub git_hash: String,
    pub build_timestamp: String,
    pub build_profile: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    track_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    seek_offset_secs: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    #[serde(default)]
    seek_offset_secs: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekRequest {
    seek_offset_secs: f64,
}

type CastResponse = (StatusCode, Json<CastResult>);

fn respond(result: CastResult) -> CastResponse {
    let status = match result.error_kind {
        None => StatusCode::OK,
        Some("invalid_state") => StatusCode::CONFLICT,
        Some("connection_failure") => StatusCode::BAD_GATEWAY,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(result))
}

fn bad_request(message: &str) -> CastResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(CastResult {
            success: false,
            message: message.to_string(),
            error: Some(message.to_string()),
            error_kind: Some("invalid_input"),
        }),
    )
}

/// Parse an optional offset; negative or non-finite values are rejected
fn parse_offset(secs: Option<f64>) -> Result<Option<Duration>, CastResponse> {
    match secs {
        None => Ok(None),
        Some(s) if s.is_finite() && s >= 0.0 => Ok(Some(secs_f64_to_duration(s))),
        Some(_) => Err(bad_request("seekOffsetSecs must be a non-negative number")),
    }
}

// ============================================================================
// Service Endpoints
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "roomcast-cast".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /build_info
pub async fn get_build_info() -> Json<BuildInfo> {
    Json(BuildInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}

// ============================================================================
// Cast Control Endpoints
// ============================================================================

/// POST /api/v1/cast/start
pub async fn start_cast(
    State(ctx): State<AppContext>,
    Json(req): Json<StartRequest>,
) -> CastResponse {
    let track_id = req.track_id.trim();
    if track_id.is_empty() {
        return bad_request("trackId must not be empty");
    }
    let seek = match parse_offset(req.seek_offset_secs) {
        Ok(seek) => seek.unwrap_or(Duration::ZERO),
        Err(response) => return response,
    };

    info!("Start requested for {} at {:?}", track_id, seek);
    let result = ctx.engine.start(track_id, req.title, seek).await;
    if !result.success {
        warn!("Start of {} failed: {}", track_id, result.message);
    }
    respond(result)
}

/// POST /api/v1/cast/pause
pub async fn pause_cast(State(ctx): State<AppContext>) -> CastResponse {
    respond(ctx.engine.pause().await)
}

/// POST /api/v1/cast/resume
///
/// The body is optional; without an offset playback resumes where the last
/// launch started.
pub async fn resume_cast(
    State(ctx): State<AppContext>,
    req: Option<Json<ResumeRequest>>,
) -> CastResponse {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let seek = match parse_offset(req.seek_offset_secs) {
        Ok(seek) => seek,
        Err(response) => return response,
    };
    respond(ctx.engine.resume(seek).await)
}

/// POST /api/v1/cast/seek
pub async fn seek_cast(
    State(ctx): State<AppContext>,
    Json(req): Json<SeekRequest>,
) -> CastResponse {
    let seek = match parse_offset(Some(req.seek_offset_secs)) {
        Ok(seek) => seek.unwrap_or(Duration::ZERO),
        Err(response) => return response,
    };
    respond(ctx.engine.seek(seek).await)
}

/// POST /api/v1/cast/stop
pub async fn stop_cast(State(ctx): State<AppContext>) -> CastResponse {
    respond(ctx.engine.stop().await)
}

/// GET /api/v1/cast/status
pub async fn get_cast_status(State(ctx): State<AppContext>) -> Json<StatusReport> {
    Json(ctx.engine.status().await)
}

/// GET /api/v1/cache
pub async fn get_cache_summary(State(ctx): State<AppContext>) -> Json<CacheSummary> {
    Json(ctx.engine.cache().summary())
}
