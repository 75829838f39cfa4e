//! Dispatched build execution
//!
//! Dispatch packets are queued and run one target at a time, in the order
//! received. Each target reports `Building` first, then `Complete` or
//! `Error`, echoing the dispatch's project id.

use shipyard_core::channel::{Connection, names};
use shipyard_core::dto::build::{CompletionPacket, DispatchPacket};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::builder::{BuildHost, BuildJob};

pub struct BuildExecutor {
    host: Arc<dyn BuildHost>,
    workspace_root: PathBuf,
}

impl BuildExecutor {
    pub fn new(host: Arc<dyn BuildHost>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            host,
            workspace_root: workspace_root.into(),
        }
    }

    /// Run queued dispatches for one coordinator connection until the queue
    /// closes
    pub fn run_queue(
        self: Arc<Self>,
        mut queue: mpsc::UnboundedReceiver<DispatchPacket>,
        connection: Connection,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(dispatch) = queue.recv().await {
                self.run_dispatch(dispatch, &connection).await;
            }
        })
    }

    /// Build every target of one dispatch, reporting as it goes
    pub async fn run_dispatch(&self, dispatch: DispatchPacket, connection: &Connection) {
        info!(
            "Received dispatch for project {}: {}",
            dispatch.project_id,
            dispatch.targets.join(", ")
        );

        for target in &dispatch.targets {
            report(connection, &CompletionPacket::building(dispatch.project_id, target)).await;

            let job = BuildJob {
                target: target.clone(),
                git_url: dispatch.git_url.clone(),
                branch: dispatch.branch.clone(),
                version: dispatch.version.clone(),
                output_dir: self.output_dir(dispatch.project_id, target),
                workspace: None,
                settings: serde_json::Value::Null,
            };

            let started = Instant::now();
            let result = self.host.build(&job).await;
            let elapsed = started.elapsed().as_millis() as i64;

            let completion = match result {
                Ok(()) => {
                    info!("Built {} in {} ms", target, elapsed);
                    CompletionPacket::complete(
                        dispatch.project_id,
                        target,
                        elapsed,
                        job.output_dir.display().to_string(),
                    )
                }
                Err(e) => {
                    error!("Build of {} failed: {}", target, e);
                    CompletionPacket::error(dispatch.project_id, target, elapsed, e.to_string())
                }
            };
            report(connection, &completion).await;
        }
    }

    fn output_dir(&self, project_id: Uuid, target: &str) -> PathBuf {
        self.workspace_root
            .join(project_id.to_string())
            .join(target)
    }
}

async fn report(connection: &Connection, completion: &CompletionPacket) {
    if let Err(e) = connection.send_json(names::BUILD_RUNNER, completion).await {
        warn!(
            "Could not report {:?} for {}: {}",
            completion.status, completion.target_name, e
        );
    }
}
