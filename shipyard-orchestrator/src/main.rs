use anyhow::{Context, Result};
use shipyard_core::channel::{Packet, names};
use shipyard_orchestrator::config::Config;
use shipyard_orchestrator::pipeline::Orchestrator;
use shipyard_orchestrator::project::ProjectCatalog;
use shipyard_orchestrator::{api, assemble};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shipyard_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Shipyard coordinator...");

    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;

    let catalog = ProjectCatalog::load(&config.projects_path)?;
    tracing::info!(
        "Loaded {} project(s) from {}",
        catalog.projects().len(),
        config.projects_path.display()
    );

    let coordinator = assemble(&config, catalog)?;
    let orchestrator = coordinator.orchestrator.clone();

    // Worker channel
    let channel_listener = tokio::net::TcpListener::bind(&config.channel_addr)
        .await
        .with_context(|| format!("Failed to bind channel listener to {}", config.channel_addr))?;
    let channel_shutdown = CancellationToken::new();
    let channel_task = tokio::spawn(
        coordinator
            .listener
            .serve(channel_listener, channel_shutdown.clone()),
    );

    // HTTP API
    let app = api::create_router(orchestrator.clone());
    let http_listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener to {}", config.http_addr))?;
    tracing::info!("Listening on {}", config.http_addr);

    axum::serve(http_listener, app)
        .with_graceful_shutdown(shutdown_signal(
            orchestrator,
            config.shutdown_grace,
            channel_shutdown,
        ))
        .await
        .context("HTTP server failed")?;

    let _ = channel_task.await;
    tracing::info!("Coordinator stopped");
    Ok(())
}

/// Resolves once in-flight pipelines are drained after Ctrl-C.
///
/// The HTTP API keeps serving during the drain so offload callbacks and
/// status queries still work.
async fn shutdown_signal(
    orchestrator: Arc<Orchestrator>,
    grace: Duration,
    channel_shutdown: CancellationToken,
) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        // Without a signal source the server runs until killed
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown requested, draining pipelines (grace {:?})", grace);
    orchestrator.drain(grace).await;

    let notified = orchestrator
        .registry()
        .broadcast(Packet::text(names::CONTROL, "shutdown"))
        .await;
    tracing::info!("Notified {} worker(s) of shutdown", notified);
    channel_shutdown.cancel();
}
