use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

use flowlens::config;
use flowlens::error::Result;
use flowlens::state::AppState;
use flowlens::web;

#[derive(Parser, Debug)]
#[command(name = "flowlens")]
#[command(about = "A transparent HTTP capture proxy for LLM traffic", long_about = None)]
struct Args {
    /// Path to configuration file (TOML/JSON/YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("flowlens={log_level}").parse().unwrap()),
        )
        .init();

    let config = match args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match config::load_from_path(&path).await {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration from {}: {}", path.display(), e);
                    return Err(e);
                }
            }
        }
        None => match config::load_from_env_or_file().await {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                return Err(e);
            }
        },
    };

    info!(
        "Starting FlowLens: forwarding to {} with a {}-record window",
        config.proxy.upstream, config.capture.capacity
    );

    let (state, _shutdown_rx) = AppState::new(config);

    let server_state = state.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = web::start_server(server_state).await {
            error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;
    info!("Shutting down");
    state.shutdown();

    if tokio::time::timeout(std::time::Duration::from_secs(5), server)
        .await
        .is_err()
    {
        error!("Server did not stop within 5s, exiting anyway");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
