//! patchwork binary entry point.
//!
//! Usage:
//! ```bash
//! patchwork start --config patchwork.toml
//! patchwork start --bind 127.0.0.1:8080
//! patchwork --help
//! ```
//!
//! Logging is controlled by `RUST_LOG`, or `LOG_LEVEL` when `RUST_LOG` is
//! unset. `LOG_SOURCE=true` adds file and line to every event.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use patchwork_relay::cleanup::spawn_cleanup_task;
use patchwork_relay::config::Config;
use patchwork_relay::http::{build_router, health};
use patchwork_relay::server::Relay;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Signature-gated HTTP rendezvous relay.
#[derive(Parser, Debug)]
#[command(name = "patchwork")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the relay server
    Start {
        /// Path to the TOML configuration file
        #[arg(long, short, env = "PATCHWORK_CONFIG", default_value = "patchwork.toml")]
        config: PathBuf,

        /// Listen address, overriding `server.bind_address`
        #[arg(long, env = "PATCHWORK_BIND")]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Start { config, bind } => start(config, bind).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_new(level.to_ascii_lowercase()).unwrap_or_else(|_| EnvFilter::new("info"))
    });
    let with_source = std::env::var("LOG_SOURCE")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(with_source)
        .with_line_number(with_source)
        .init();
}

async fn start(config_path: PathBuf, bind: Option<String>) -> Result<()> {
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(bind) = bind {
        config.server.bind_address = bind;
    }

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {:?}", config.server.bind_address))?;

    let cleanup_config = config.cleanup.clone();
    let relay = Arc::new(Relay::with_github(config).context("Failed to build provider client")?);
    health::init_start_time();

    let cleanup = spawn_cleanup_task(relay.clone(), cleanup_config);
    let app = build_router(relay.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("patchwork v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);

    let shutdown_relay = relay.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        // Release long-polls so the server can drain.
        shutdown_relay.shutdown();
    })
    .await
    .context("Server error")?;

    cleanup.abort();
    tracing::info!("patchwork stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
