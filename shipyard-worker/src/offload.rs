//! Offload build server
//!
//! Remote side of the broker protocol. `POST /build` answers right away with
//! the requested build id (or a fresh one); the build runs in a detached task
//! inside the named workspace, and its outcome, success or failure, is
//! delivered only through the [`BuildReporter`] to the request's
//! `sendBackUrl`.

use async_trait::async_trait;
use axum::{Json, Router, extract::State, routing::post};
use shipyard_client::OffloadClient;
use shipyard_core::dto::remote::{RemoteBuildAccepted, RemoteBuildCallback, RemoteBuildRequest};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::builder::{BuildHost, BuildJob};
use crate::packer;
use crate::workspace::WorkspaceMap;

/// Delivers the result of a detached build
#[async_trait]
pub trait BuildReporter: Send + Sync {
    async fn report(&self, url: &str, callback: RemoteBuildCallback);
}

/// Posts callbacks over HTTP; delivery failures are only logged
pub struct HttpReporter {
    client: OffloadClient,
}

impl HttpReporter {
    pub fn new(client: OffloadClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BuildReporter for HttpReporter {
    async fn report(&self, url: &str, callback: RemoteBuildCallback) {
        let build_id = callback.build_id.clone();
        if let Err(e) = self.client.send_callback(url, &callback).await {
            error!("Could not deliver result of build {} to {}: {}", build_id, url, e);
        }
    }
}

#[derive(Clone)]
pub struct OffloadState {
    host: Arc<dyn BuildHost>,
    reporter: Arc<dyn BuildReporter>,
    workspaces: WorkspaceMap,
}

impl OffloadState {
    pub fn new(
        host: Arc<dyn BuildHost>,
        reporter: Arc<dyn BuildReporter>,
        workspaces: WorkspaceMap,
    ) -> Self {
        Self {
            host,
            reporter,
            workspaces,
        }
    }
}

pub fn create_router(state: OffloadState) -> Router {
    Router::new()
        .route("/build", post(submit_build))
        .with_state(state)
}

/// POST /build
async fn submit_build(
    State(state): State<OffloadState>,
    Json(req): Json<RemoteBuildRequest>,
) -> Json<RemoteBuildAccepted> {
    // The id names the output directory, so only plain ids are honoured
    let build_id = req
        .build_id
        .clone()
        .filter(|id| {
            !id.is_empty()
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(
        "Accepted remote build {} for {} ({})",
        build_id, req.workspace_name, req.config.name
    );

    tokio::spawn(run_detached(state, build_id.clone(), req));
    Json(RemoteBuildAccepted { build_id })
}

async fn run_detached(state: OffloadState, build_id: String, req: RemoteBuildRequest) {
    let callback = match build(&state, &build_id, &req).await {
        Ok(encoded) => {
            info!("Remote build {} finished", build_id);
            RemoteBuildCallback::artifact(&build_id, encoded)
        }
        Err(message) => {
            error!("Remote build {} failed: {}", build_id, message);
            RemoteBuildCallback::failed(&build_id, message)
        }
    };

    state.reporter.report(&req.send_back_url, callback).await;
}

/// Build in the requested workspace and return the encoded output
async fn build(state: &OffloadState, build_id: &str, req: &RemoteBuildRequest) -> Result<String, String> {
    let workspace = state
        .workspaces
        .resolve(&req.workspace_name)
        .map_err(|e| e.to_string())?;

    let job = BuildJob {
        target: req.config.name.clone(),
        git_url: String::new(),
        branch: String::new(),
        version: req.config.version.clone(),
        output_dir: state.workspaces.root().join("offload").join(build_id),
        workspace: Some(workspace),
        settings: req.config.settings.clone(),
    };

    state.host.build(&job).await.map_err(|e| e.to_string())?;
    packer::encode_directory(&job.output_dir)
        .await
        .map_err(|e| format!("packaging failed: {:#}", e))
}
