//! DuraKV server entry point.
//!
//! Loads the YAML configuration, opens the storage service (snapshot load +
//! WAL replay), starts the TCP manager, and runs until SIGINT or SIGTERM.

use anyhow::Context;
use durakv::config::Config;
use durakv::server::TcpManager;
use durakv::storage::StorageService;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

/// Default configuration path, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "config/default.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    let level = config.logger.tracing_level()?;
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    info!(version = durakv::VERSION, config = %config_path, "starting durakv");

    let storage = Arc::new(
        StorageService::open(&config.snapshot, &config.wal)
            .await
            .context("opening storage service")?,
    );

    let manager = TcpManager::new(storage, &config.redis);
    let listener = manager
        .bind()
        .await
        .with_context(|| format!("binding {}", config.bind_address()))?;

    tokio::select! {
        _ = manager.run(listener) => {}
        _ = shutdown_signal() => {
            info!("shutdown signal received, stopping server");
        }
    }

    manager.stop();
    info!("server shutdown complete");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
