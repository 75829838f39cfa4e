//! Shipyard Worker
//!
//! A build worker that connects to the coordinator over the framed channel,
//! announces its platform and runs the targets dispatched to it.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Session: Handshake, heartbeats and reconnects to the coordinator
//! - Executor: Serial build queue reporting completion packets
//! - Offload: Optional HTTP server accepting remote build requests

mod builder;
mod config;
mod executor;
mod offload;
mod packer;
mod session;
mod workspace;

use anyhow::{Context, Result};
use shipyard_client::OffloadClient;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::builder::{BuildHost, CommandBuildHost};
use crate::config::Config;
use crate::executor::BuildExecutor;
use crate::offload::{HttpReporter, OffloadState};
use crate::session::Session;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shipyard_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Shipyard Worker");

    let config = load_config()?;
    info!(
        "Loaded configuration: worker_id={}, platform={}, coordinator={}",
        config.worker_id, config.platform, config.coordinator_addr
    );

    let host: Arc<dyn BuildHost> = Arc::new(CommandBuildHost::new(config.build_command.clone()));
    let executor = Arc::new(BuildExecutor::new(host.clone(), config.workspace_root.clone()));

    let shutdown = CancellationToken::new();

    if let Some(addr) = config.offload_bind_addr.clone() {
        let reporter = Arc::new(HttpReporter::new(
            OffloadClient::new(CALLBACK_TIMEOUT).context("Failed to build callback client")?,
        ));
        let state = OffloadState::new(host, reporter, config.workspaces());
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind offload server to {}", addr))?;
        info!("Offload server listening on {}", addr);

        let token = shutdown.clone();
        tokio::spawn(async move {
            let app = offload::create_router(state);
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                error!("Offload server error: {}", e);
            }
        });
    }

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let session = Session::new(config, executor);
    if let Err(e) = session.run(shutdown).await {
        error!("Session error: {}", e);
        return Err(e);
    }

    info!("Worker stopped");
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
