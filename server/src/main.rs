//! Planet Sentinel Server
//!
//! HTTP API for change detection on before/after raster pairs. The model is
//! loaded once at startup and shared read-only by every request.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::state::{AppState, ServerConfig};

/// Planet Sentinel change-detection server
#[derive(Parser, Debug)]
#[command(name = "planet-sentinel-server")]
#[command(version)]
#[command(about = "HTTP API server for satellite change detection")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Checkpoint sidecar to serve
    #[arg(long, env = "SENTINEL_CHECKPOINT", default_value = "checkpoints/best.json")]
    checkpoint: PathBuf,

    /// Pipeline configuration file (JSON)
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for full-resolution change maps
    #[arg(long, env = "SENTINEL_OUTPUT_DIR", default_value = "output/maps")]
    output_dir: PathBuf,

    /// Maximum upload size in megabytes
    #[arg(long, default_value = "512")]
    max_upload_mb: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let config = ServerConfig {
        checkpoint: cli.checkpoint,
        pipeline_config: cli.config,
        output_dir: cli.output_dir,
    };

    info!("Planet Sentinel Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Checkpoint: {:?}", config.checkpoint);
    info!("  Config:     {:?}", config.pipeline_config);
    info!("  Output dir: {:?}", config.output_dir);
    info!("  Backend:    {}", planet_sentinel::backend::backend_name());

    let state = Arc::new(AppState::load(config)?);
    if !state.model_loaded() {
        tracing::warn!("Serving without a model; prediction requests will return 503");
    }

    let app = routes::router(state, cli.max_upload_mb * 1024 * 1024);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
