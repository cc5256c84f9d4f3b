//! Leaf Disease Inference Server
//!
//! HTTP API serving predictions from a trained leaf disease model, with
//! Prometheus metrics.

mod error;
mod metrics;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use leaf_disease::backend::backend_name;
use leaf_disease::utils::logging::{init_logging, LogConfig, LogLevel};
use tracing::info;

use crate::metrics::ServiceMetrics;
use crate::state::{AppState, ServerConfig};

/// Leaf Disease Inference Server
#[derive(Parser, Debug)]
#[command(name = "leaf-disease-server")]
#[command(version)]
#[command(about = "HTTP API serving leaf disease predictions")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8000", env = "LEAF_PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "LEAF_HOST")]
    host: String,

    /// Saved model (stem, .mpk or .json)
    #[arg(long, default_value = "models/cnn_model", env = "LEAF_MODEL_PATH")]
    model_path: PathBuf,

    /// Comma-separated class names overriding the ones stored with the model
    #[arg(long, value_delimiter = ',', env = "LEAF_CLASS_NAMES")]
    classes: Option<Vec<String>>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LEAF_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: LogLevel::parse(&cli.log_level),
        ..LogConfig::production()
    };
    let _ = init_logging(&log_config);

    let config = ServerConfig {
        model_path: cli.model_path,
        class_names: cli.classes,
    };

    info!("Leaf Disease Server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Backend:    {}", backend_name());
    info!("  Model path: {:?}", config.model_path);

    let metrics = ServiceMetrics::new()?;

    // Loading decodes the whole weight file
    let state = tokio::task::spawn_blocking(move || AppState::load(&config, metrics)).await?;
    let app = routes::router(Arc::new(state));

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
