//! Shipyard coordinator
//!
//! Accepts build workers over the Framed Channel, runs project pipelines
//! (version bump, build dispatch, deploy fan-out, notification, tagging) and
//! serves the HTTP API used by the CLI and by offload servers.

pub mod api;
pub mod broker;
pub mod config;
pub mod deploy;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod notify;
pub mod pipeline;
pub mod project;
pub mod registry;
pub mod workspace;

use anyhow::{Context, Result};
use shipyard_client::OffloadClient;
use std::sync::Arc;
use std::time::Duration;

use crate::broker::RemoteBroker;
use crate::config::Config;
use crate::deploy::{CommandDeployer, FanOut};
use crate::dispatch::BuildDispatcher;
use crate::listener::ChannelListener;
use crate::notify::{HttpHookSender, Notifier};
use crate::pipeline::{Components, Orchestrator};
use crate::project::ProjectCatalog;
use crate::registry::WorkerRegistry;
use crate::workspace::GitWorkspaceFactory;

const HOOK_TIMEOUT: Duration = Duration::from_secs(15);

/// The wired coordinator: pipeline engine plus the worker-facing listener
pub struct Coordinator {
    pub orchestrator: Arc<Orchestrator>,
    pub listener: ChannelListener,
}

/// Wire every component from configuration and a loaded project catalog
pub fn assemble(config: &Config, catalog: ProjectCatalog) -> Result<Coordinator> {
    let registry = Arc::new(WorkerRegistry::new());
    let dispatcher = Arc::new(BuildDispatcher::new(registry.clone()));

    let offload_client =
        OffloadClient::new(config.submit_timeout).context("Failed to create offload client")?;
    let broker = Arc::new(RemoteBroker::new(
        offload_client,
        config.offload_url.clone(),
        config.callback_url(),
        config.artifact_dir.clone(),
    ));

    let hooks = HttpHookSender::new(HOOK_TIMEOUT).context("Failed to create hook client")?;

    let orchestrator = Arc::new(Orchestrator::new(Components {
        catalog: Arc::new(catalog),
        registry: registry.clone(),
        dispatcher: dispatcher.clone(),
        broker,
        workspaces: Arc::new(GitWorkspaceFactory),
        fan_out: FanOut::new(Arc::new(CommandDeployer::new())),
        notifier: Notifier::new(Arc::new(hooks)),
        build_timeout: config.build_timeout,
        history_limit: config.history_limit,
    }));

    let listener = ChannelListener::new(
        registry,
        dispatcher,
        config.auth_token.clone(),
        config.handshake_timeout,
    );

    Ok(Coordinator {
        orchestrator,
        listener,
    })
}
