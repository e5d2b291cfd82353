//! HTTP server setup and routing
//!
//! Sets up the axum server with cast control endpoints and SSE.

use crate::cast::CastEngine;
use crate::error::{Error, Result};
use crate::state::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub state: Arc<SharedState>,
    pub engine: Arc<CastEngine>,
}

/// Build the router: `/health` and `/build_info` at the root, control under `/api/v1`
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        .route("/build_info", get(super::handlers::get_build_info))
        .nest(
            "/api/v1",
            Router::new()
                // Cast control
                .route("/cast/start", post(super::handlers::start_cast))
                .route("/cast/pause", post(super::handlers::pause_cast))
                .route("/cast/resume", post(super::handlers::resume_cast))
                .route("/cast/seek", post(super::handlers::seek_cast))
                .route("/cast/stop", post(super::handlers::stop_cast))
                .route("/cast/status", get(super::handlers::get_cast_status))
                // Cache inspection
                .route("/cache", get(super::handlers::get_cache_summary))
                // SSE event stream
                .route("/events", get(super::sse::event_stream)),
        )
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Enable CORS for local access
        .layer(CorsLayer::permissive())
}

/// Serve the API on `port` until `shutdown` resolves
pub async fn run<F>(port: u16, ctx: AppContext, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}
