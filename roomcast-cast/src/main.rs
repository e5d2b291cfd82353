//! roomcast casting service (roomcast-cast) - Main entry point
//!
//! Streams tracks to a multi-room audio server as paced raw PCM and exposes
//! an HTTP control surface with SSE status events.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use roomcast_cast::api::{self, AppContext};
use roomcast_cast::cast::CastEngine;
use roomcast_cast::config::Config;
use roomcast_cast::SharedState;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for roomcast-cast
#[derive(Parser, Debug)]
#[command(name = "roomcast-cast")]
#[command(about = "Multi-room audio casting service")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "ROOMCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "ROOMCAST_PORT")]
    port: Option<u16>,

    /// Multi-room server host (overrides config file)
    #[arg(long, env = "ROOMCAST_SINK_HOST")]
    sink_host: Option<String>,

    /// Multi-room server PCM port (overrides config file)
    #[arg(long, env = "ROOMCAST_SINK_PORT")]
    sink_port: Option<u16>,

    /// Durable cache database path (overrides config file)
    #[arg(long, env = "ROOMCAST_CACHE_DB")]
    cache_db: Option<PathBuf>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.sink_host {
            config.sink.host = host;
        }
        if let Some(port) = self.sink_port {
            config.sink.port = port;
        }
        if let Some(path) = self.cache_db {
            config.cache.db_path = Some(path);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast_cast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting roomcast-cast v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    // ROOMCAST_CONFIG is already folded into args.config by clap
    let mut config: Config = roomcast_common::config::load_or_default(args.config.as_deref(), "ROOMCAST_CONFIG")
        .context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!("Sink: {}", config.sink_addr());
    info!(
        "Decoder: {}, acquisition: {}",
        config.decoder.program, config.acquisition.program
    );
    if !config.cast.enabled {
        warn!("Casting is disabled; control requests will be rejected");
    }

    let state = Arc::new(SharedState::new());
    let engine = Arc::new(
        CastEngine::from_config(&config, Arc::clone(&state))
            .await
            .context("Failed to initialize casting engine")?,
    );
    info!("Casting engine initialized");

    let ctx = AppContext {
        state,
        engine: Arc::clone(&engine),
    };

    api::server::run(config.server.port, ctx, shutdown_signal())
        .await
        .context("Server error")?;

    // Release the sink and child processes before exiting
    let result = engine.stop().await;
    info!("{}", result.message);

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
