//! Remote Build Broker
//!
//! Offloaded targets are posted to an HTTP offload server, which answers
//! immediately with a build id and later calls back with the artifact or an
//! error. Callbacks are correlated purely by build id.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use shipyard_client::OffloadClient;
use shipyard_core::dto::remote::{RemoteBuildCallback, RemoteBuildRequest, TargetConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::BuildTracker;
use crate::error::{OrchestrationError, Result};

struct PendingBuild {
    pipeline_id: Uuid,
    target: String,
    tracker: Arc<BuildTracker>,
}

pub struct RemoteBroker {
    client: OffloadClient,
    offload_url: Option<String>,
    callback_url: String,
    artifact_dir: PathBuf,
    pending: Mutex<HashMap<String, PendingBuild>>,
}

impl RemoteBroker {
    pub fn new(
        client: OffloadClient,
        offload_url: Option<String>,
        callback_url: impl Into<String>,
        artifact_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            offload_url,
            callback_url: callback_url.into(),
            artifact_dir: artifact_dir.into(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Post one build request tagged with `build_id`.
    ///
    /// Does not wait for the build; an unreachable or refusing server fails
    /// immediately with `DispatchFailed`. Returns the id the server will
    /// call back with, normally `build_id` itself.
    pub async fn submit(&self, config: TargetConfig, workspace_name: &str, build_id: &str) -> Result<String> {
        let url = self.offload_url.as_deref().ok_or_else(|| {
            OrchestrationError::DispatchFailed("no offload server configured".to_string())
        })?;

        let request = RemoteBuildRequest {
            build_id: Some(build_id.to_string()),
            workspace_name: workspace_name.to_string(),
            send_back_url: self.callback_url.clone(),
            config,
        };

        let accepted = self
            .client
            .submit_build(url, &request)
            .await
            .map_err(|e| OrchestrationError::DispatchFailed(format!("offload submit to {}: {}", url, e)))?;

        Ok(accepted.build_id)
    }

    /// Submit every config and register each build for callback routing.
    ///
    /// Each build is registered under a fresh id before its request goes
    /// out, so a callback that beats the submit response still matches. The
    /// pending table is only locked around inserts and removals.
    pub async fn offload(
        &self,
        workspace_name: &str,
        configs: Vec<TargetConfig>,
        tracker: Arc<BuildTracker>,
    ) -> Result<Vec<String>> {
        let mut build_ids = Vec::with_capacity(configs.len());

        for config in configs {
            let target = config.name.clone();
            let build_id = Uuid::new_v4().to_string();

            tracker.assign(&target, &build_id);
            self.pending.lock().await.insert(
                build_id.clone(),
                PendingBuild {
                    pipeline_id: tracker.pipeline_id(),
                    target: target.clone(),
                    tracker: tracker.clone(),
                },
            );

            let issued = match self.submit(config, workspace_name, &build_id).await {
                Ok(issued) => issued,
                Err(e) => {
                    self.pending.lock().await.remove(&build_id);
                    return Err(e);
                }
            };

            // A server that ignores the requested id calls back with its own
            if issued != build_id {
                warn!(
                    "Offload server renamed build {} to {}; callbacks must use the new id",
                    build_id, issued
                );
                let mut pending = self.pending.lock().await;
                if let Some(build) = pending.remove(&build_id) {
                    pending.insert(issued.clone(), build);
                }
                tracker.assign(&target, &issued);
            }

            info!("Offloaded {} as remote build {}", target, issued);
            build_ids.push(issued);
        }

        Ok(build_ids)
    }

    /// Resolve a callback against its waiting pipeline.
    ///
    /// Returns false when no pending build matches the id.
    pub async fn on_callback(&self, callback: RemoteBuildCallback) -> bool {
        let Some(build) = self.pending.lock().await.remove(&callback.build_id) else {
            warn!("Dropping callback for unknown build {}", callback.build_id);
            return false;
        };

        let build_id = callback.build_id.clone();
        match callback.into_result() {
            Ok(encoded) => match self.store_artifact(&build, &encoded).await {
                Ok(path) => {
                    info!("Remote build {} ({}) delivered {}", build_id, build.target, path.display());
                    build.tracker.complete(&build.target, 0, path.display().to_string());
                }
                Err(e) => {
                    warn!("Could not store artifact for build {}: {}", build_id, e);
                    build.tracker.fail(&build.target, e);
                }
            },
            Err(error) => {
                warn!("Remote build {} ({}) failed: {}", build_id, build.target, error);
                build.tracker.fail(&build.target, error);
            }
        }
        true
    }

    /// Drop every pending build of a finished pipeline
    pub async fn forget(&self, pipeline_id: Uuid) {
        self.pending
            .lock()
            .await
            .retain(|_, build| build.pipeline_id != pipeline_id);
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn store_artifact(&self, build: &PendingBuild, encoded: &str) -> std::result::Result<PathBuf, String> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| format!("invalid base64 artifact: {}", e))?;

        let dir = self.artifact_dir.join(build.pipeline_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| format!("create {}: {}", dir.display(), e))?;

        let path = dir.join(artifact_file_name(&build.target));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| format!("write {}: {}", path.display(), e))?;
        Ok(path)
    }
}

fn artifact_file_name(target: &str) -> String {
    let safe: String = target
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    Path::new(&safe).with_extension("zip").display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use shipyard_core::domain::build::BuildStatus;
    use shipyard_core::domain::worker::Platform;
    use shipyard_core::dto::remote::RemoteBuildAccepted;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn config(name: &str) -> TargetConfig {
        TargetConfig {
            name: name.to_string(),
            platform: Platform::Linux,
            version: Some("1.0.0".into()),
            settings: serde_json::Value::Null,
        }
    }

    fn client() -> OffloadClient {
        OffloadClient::new(Duration::from_secs(5)).unwrap()
    }

    /// Minimal offload server that accepts everything after `delay`.
    ///
    /// Echoes the requested build id, or issues sequential ids of its own
    /// when `own_ids` is set.
    async fn spawn_offload_server(delay: Duration, own_ids: bool) -> String {
        let counter = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/build",
            post(move |Json(req): Json<RemoteBuildRequest>| {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    let build_id = match req.build_id {
                        Some(id) if !own_ids => id,
                        _ => format!("build-{}", n),
                    };
                    Json(RemoteBuildAccepted { build_id })
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/build", addr)
    }

    #[tokio::test]
    async fn test_unreachable_offload_fails_fast() {
        // Nothing listens on port 1
        let broker = RemoteBroker::new(
            client(),
            Some("http://127.0.0.1:1/build".into()),
            "http://localhost:8080/api/remote-builds/callback",
            "artifacts",
        );

        let started = Instant::now();
        let err = broker.submit(config("LinuxBuild"), "game", "b-1").await.unwrap_err();
        assert!(matches!(err, OrchestrationError::DispatchFailed(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(broker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_offload_url_is_dispatch_failure() {
        let broker = RemoteBroker::new(client(), None, "http://cb", "artifacts");
        let err = broker.submit(config("LinuxBuild"), "game", "b-1").await.unwrap_err();
        assert!(matches!(err, OrchestrationError::DispatchFailed(_)));
    }

    #[tokio::test]
    async fn test_callback_completes_target_with_stored_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let url = spawn_offload_server(Duration::ZERO, false).await;
        let broker = RemoteBroker::new(client(), Some(url), "http://cb", dir.path());

        let tracker = Arc::new(BuildTracker::new(Uuid::new_v4(), &["LinuxBuild".to_string()]));
        let ids = broker
            .offload("game", vec![config("LinuxBuild")], tracker.clone())
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(tracker.snapshot()[0].assigned_to.as_deref(), Some(ids[0].as_str()));

        let payload = STANDARD.encode(b"PK-artifact");
        assert!(broker.on_callback(RemoteBuildCallback::artifact(&ids[0], payload)).await);

        let task = &tracker.snapshot()[0];
        assert_eq!(task.status, BuildStatus::Complete);
        let stored = std::fs::read(task.output_location.as_ref().unwrap()).unwrap();
        assert_eq!(stored, b"PK-artifact");

        // Second delivery of the same id is unmatched
        assert!(!broker.on_callback(RemoteBuildCallback::failed(&ids[0], "late")).await);
    }

    #[tokio::test]
    async fn test_error_callback_fails_only_that_target() {
        let dir = tempfile::tempdir().unwrap();
        let url = spawn_offload_server(Duration::ZERO, false).await;
        let broker = RemoteBroker::new(client(), Some(url), "http://cb", dir.path());

        let targets = vec!["LinuxBuild".to_string(), "LinuxServer".to_string()];
        let tracker = Arc::new(BuildTracker::new(Uuid::new_v4(), &targets));
        let ids = broker
            .offload(
                "game",
                vec![config("LinuxBuild"), config("LinuxServer")],
                tracker.clone(),
            )
            .await
            .unwrap();

        broker
            .on_callback(RemoteBuildCallback::failed(&ids[1], "export failed"))
            .await;

        let tasks = tracker.snapshot();
        assert_eq!(tasks[0].status, BuildStatus::Queued);
        assert_eq!(tasks[1].status, BuildStatus::Error);
        assert_eq!(tasks[1].error_message.as_deref(), Some("export failed"));
    }

    #[tokio::test]
    async fn test_server_issued_ids_are_routed() {
        let dir = tempfile::tempdir().unwrap();
        let url = spawn_offload_server(Duration::ZERO, true).await;
        let broker = RemoteBroker::new(client(), Some(url), "http://cb", dir.path());

        let tracker = Arc::new(BuildTracker::new(Uuid::new_v4(), &["LinuxBuild".to_string()]));
        let ids = broker
            .offload("game", vec![config("LinuxBuild")], tracker.clone())
            .await
            .unwrap();
        assert_eq!(ids, vec!["build-0".to_string()]);
        assert_eq!(tracker.snapshot()[0].assigned_to.as_deref(), Some("build-0"));
        assert_eq!(broker.pending_count().await, 1);

        assert!(broker.on_callback(RemoteBuildCallback::failed("build-0", "no disk")).await);
        assert_eq!(tracker.snapshot()[0].status, BuildStatus::Error);
    }

    #[tokio::test]
    async fn test_slow_submit_does_not_block_other_callbacks() {
        let dir = tempfile::tempdir().unwrap();
        let url = spawn_offload_server(Duration::from_secs(2), false).await;
        let broker = Arc::new(RemoteBroker::new(client(), Some(url), "http://cb", dir.path()));

        let tracker = Arc::new(BuildTracker::new(Uuid::new_v4(), &["LinuxBuild".to_string()]));
        let submitting = {
            let broker = broker.clone();
            let tracker = tracker.clone();
            tokio::spawn(async move {
                broker
                    .offload("game", vec![config("LinuxBuild")], tracker)
                    .await
            })
        };

        // The build is registered before its request is answered
        let mut build_id = None;
        for _ in 0..100 {
            build_id = tracker.snapshot()[0].assigned_to.clone();
            if build_id.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let build_id = build_id.unwrap();

        let started = Instant::now();
        assert!(!broker.on_callback(RemoteBuildCallback::failed("other-pipeline", "x")).await);
        assert!(started.elapsed() < Duration::from_secs(1));

        // A callback racing ahead of the submit response still matches
        let payload = STANDARD.encode(b"PK-early");
        assert!(broker.on_callback(RemoteBuildCallback::artifact(&build_id, payload)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(tracker.snapshot()[0].status, BuildStatus::Complete);

        let ids = submitting.await.unwrap().unwrap();
        assert_eq!(ids, vec![build_id]);
    }

    #[tokio::test]
    async fn test_unknown_build_id_is_dropped() {
        let broker = RemoteBroker::new(client(), None, "http://cb", "artifacts");
        assert!(!broker.on_callback(RemoteBuildCallback::failed("nope", "x")).await);
    }

    #[tokio::test]
    async fn test_forget_removes_pipeline_builds() {
        let dir = tempfile::tempdir().unwrap();
        let url = spawn_offload_server(Duration::ZERO, false).await;
        let broker = RemoteBroker::new(client(), Some(url), "http://cb", dir.path());

        let tracker = Arc::new(BuildTracker::new(Uuid::new_v4(), &["LinuxBuild".to_string()]));
        broker
            .offload("game", vec![config("LinuxBuild")], tracker.clone())
            .await
            .unwrap();
        assert_eq!(broker.pending_count().await, 1);

        broker.forget(tracker.pipeline_id()).await;
        assert_eq!(broker.pending_count().await, 0);
    }

    #[test]
    fn test_artifact_file_name_is_sanitised() {
        assert_eq!(artifact_file_name("Linux Build/x64"), "Linux_Build_x64.zip");
    }
}
