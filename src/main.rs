//! nihao: a minimal HTTP/HTTPS API server.
//!
//! This is the application entry point. It loads configuration, initializes
//! tracing, starts the API server, waits for SIGINT/SIGTERM and shuts the
//! server down within the configured deadline.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use nihao::config::{AppConfig, DEFAULT_LOG_FILTER};
use nihao::http::{wait_for_shutdown_signal, Server};
use nihao::logging;
use nihao::routes::create_router;
use nihao::state::AppState;

/// nihao: a tiny JSON API server
#[derive(Parser, Debug)]
#[command(name = "nihao", version, about)]
struct Args {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level filter (e.g., "nihao=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    /// Listen port, overrides http.port
    #[arg(short, long)]
    port: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match AppConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Unable to load configuration from {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => AppConfig::default(),
    };

    if let Some(port) = args.port {
        config.http.port = port;
    }

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    if let Err(e) = logging::init(&log_filter, &config.logging.format) {
        eprintln!("Unable to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let port = config.http.port.clone();
    let shutdown_timeout = config.http.shutdown_timeout();
    let app = create_router(AppState::new(config.clone()));
    let mut server = Server::new(config.http, app);

    tracing::info!(%port, "Starting the API server");
    if let Err(e) = server.start().await {
        tracing::error!(%port, error = %e, "Unable to start the API server");
        return ExitCode::FAILURE;
    }
    tracing::info!(%port, "Successfully started the API server");

    match wait_for_shutdown_signal().await {
        Ok(signal) => tracing::info!(%signal, "Shutdown request received"),
        Err(e) => tracing::error!(error = %e, "Unable to listen for shutdown signals"),
    }

    tracing::info!("Shutting down the API server...");
    match server.shutdown(shutdown_timeout).await {
        Ok(()) => tracing::info!("Successfully shut down the API server"),
        Err(e) => tracing::error!(error = %e, "Failed to shut down the API server"),
    }

    ExitCode::SUCCESS
}
