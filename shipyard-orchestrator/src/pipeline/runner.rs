//! Pipeline stage sequencing
//!
//! `Created → VersionBump → Building → Deploying → Notifying → Tagging → Done`.
//! Any error moves the pipeline to `Failed` (or `Cancelled` on shutdown) and
//! the outcome still goes through Notification, naming the stage it stopped
//! in. A failed build never reaches Deploying or Tagging.

use shipyard_core::domain::build::{BuildStatus, BuildTask};
use shipyard_core::domain::pipeline::{Pipeline, PipelineFailure, PipelineStage};
use shipyard_core::dto::pipeline::{PipelineStarted, StartPipeline};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::RemoteBroker;
use crate::deploy::{Artifact, DeployContext, FanOut};
use crate::dispatch::{BuildDispatcher, BuildTracker, DispatchRequest};
use crate::error::{OrchestrationError, Result};
use crate::notify::{Notifier, PipelineReport};
use crate::pipeline::active::ActivePipelines;
use crate::project::{Project, ProjectCatalog, TargetSpec};
use crate::registry::WorkerRegistry;
use crate::workspace::{SourceControl, WorkspaceFactory};

/// Collaborators the orchestrator is wired with
pub struct Components {
    pub catalog: Arc<ProjectCatalog>,
    pub registry: Arc<WorkerRegistry>,
    pub dispatcher: Arc<BuildDispatcher>,
    pub broker: Arc<RemoteBroker>,
    pub workspaces: Arc<dyn WorkspaceFactory>,
    pub fan_out: FanOut,
    pub notifier: Notifier,
    pub build_timeout: Duration,
    pub history_limit: usize,
}

pub struct Orchestrator {
    catalog: Arc<ProjectCatalog>,
    registry: Arc<WorkerRegistry>,
    dispatcher: Arc<BuildDispatcher>,
    broker: Arc<RemoteBroker>,
    workspaces: Arc<dyn WorkspaceFactory>,
    fan_out: FanOut,
    notifier: Notifier,
    active: ActivePipelines,
    build_timeout: Duration,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(components: Components) -> Self {
        Self {
            catalog: components.catalog,
            registry: components.registry,
            dispatcher: components.dispatcher,
            broker: components.broker,
            workspaces: components.workspaces,
            fan_out: components.fan_out,
            notifier: components.notifier,
            active: ActivePipelines::new(components.history_limit),
            build_timeout: components.build_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn catalog(&self) -> &ProjectCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<BuildDispatcher> {
        &self.dispatcher
    }

    pub fn broker(&self) -> &Arc<RemoteBroker> {
        &self.broker
    }

    pub fn pipelines(&self) -> &ActivePipelines {
        &self.active
    }

    /// Whether the project currently has a non-terminal pipeline
    pub fn is_active(&self, project_id: uuid::Uuid) -> bool {
        self.active.is_active(project_id)
    }

    /// Start a pipeline in the background
    pub fn start(self: &Arc<Self>, req: StartPipeline) -> Result<PipelineStarted> {
        self.launch(req).map(|(started, _)| started)
    }

    /// Start a pipeline; the handle resolves to its final state
    pub fn launch(self: &Arc<Self>, req: StartPipeline) -> Result<(PipelineStarted, JoinHandle<Pipeline>)> {
        let project = self.catalog.resolve(&req)?.clone();
        let targets = project.resolve_targets(req.targets.as_deref())?;
        let pipeline = Pipeline::new(
            project.id,
            project.name.clone(),
            targets.iter().map(|t| t.name.clone()).collect(),
        );

        self.active.try_claim(&pipeline)?;
        info!(
            "Pipeline {} started for {} ({})",
            pipeline.id,
            project.name,
            pipeline.targets.join(", ")
        );

        let started = PipelineStarted {
            pipeline_id: pipeline.id,
            project_id: project.id,
        };
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(project, targets, pipeline).await });
        Ok((started, handle))
    }

    async fn run(&self, project: Project, targets: Vec<TargetSpec>, mut pipeline: Pipeline) -> Pipeline {
        let cancel = self.shutdown.child_token();
        let scm = self.workspaces.open(&project);

        let result = self
            .execute(&project, &targets, &mut pipeline, scm.as_ref(), &cancel)
            .await;

        match result {
            Ok(()) => info!("Pipeline {} done", pipeline.id),
            Err(OrchestrationError::Cancelled) => {
                warn!("Pipeline {} cancelled during {}", pipeline.id, pipeline.stage);
                if let Err(e) = pipeline.advance(PipelineStage::Cancelled) {
                    error!("Pipeline {}: {}", pipeline.id, e);
                }
                self.report(&project, &mut pipeline).await;
            }
            Err(e) => {
                error!("Pipeline {} failed during {}: {}", pipeline.id, pipeline.stage, e);
                pipeline.failure = Some(PipelineFailure {
                    stage: pipeline.stage,
                    reason: e.to_string(),
                });
                if let Err(e) = pipeline.advance(PipelineStage::Failed) {
                    error!("Pipeline {}: {}", pipeline.id, e);
                }
                self.report(&project, &mut pipeline).await;
            }
        }

        self.active.finish(pipeline.clone());
        pipeline
    }

    async fn execute(
        &self,
        project: &Project,
        targets: &[TargetSpec],
        pipeline: &mut Pipeline,
        scm: &dyn SourceControl,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.transition(pipeline, PipelineStage::VersionBump, cancel)?;
        let prebuild = Instant::now();
        pipeline.changelog = scm.changelog().await?;
        let version = scm.bump_version().await?;
        pipeline.version = Some(version.clone());
        pipeline.timings.prebuild_ms = elapsed_ms(prebuild);

        self.transition(pipeline, PipelineStage::Building, cancel)?;
        let build = Instant::now();
        let outcome = self.build(project, targets, pipeline, cancel).await;
        pipeline.timings.build_ms = elapsed_ms(build);
        let tasks = outcome?;

        self.transition(pipeline, PipelineStage::Deploying, cancel)?;
        let deploy = Instant::now();
        let ctx = Arc::new(DeployContext {
            pipeline_id: pipeline.id,
            project_name: project.name.clone(),
            version: version.clone(),
            changelog: pipeline.changelog.clone(),
            artifacts: artifacts(&tasks),
        });
        pipeline.deploys = self.fan_out.run(&project.deploy, ctx, cancel).await;
        pipeline.timings.deploy_ms = elapsed_ms(deploy);

        self.transition(pipeline, PipelineStage::Notifying, cancel)?;
        self.report(project, pipeline).await;

        self.transition(pipeline, PipelineStage::Tagging, cancel)?;
        pipeline.tag = Some(scm.tag(&version).await?);

        self.transition(pipeline, PipelineStage::Done, cancel)?;
        Ok(())
    }

    /// Stage boundary: refuse to enter a new stage once cancelled
    fn transition(
        &self,
        pipeline: &mut Pipeline,
        next: PipelineStage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }
        pipeline.advance(next)?;
        info!("Pipeline {} -> {}", pipeline.id, next);
        self.active.publish(pipeline);
        Ok(())
    }

    /// Dispatch local targets, offload remote ones, and wait for all of them
    async fn build(
        &self,
        project: &Project,
        targets: &[TargetSpec],
        pipeline: &mut Pipeline,
        cancel: &CancellationToken,
    ) -> Result<Vec<BuildTask>> {
        let tracker = Arc::new(BuildTracker::new(pipeline.id, &pipeline.targets));
        let outcome = self.dispatch_and_wait(project, targets, pipeline, &tracker, cancel).await;

        pipeline.tasks = tracker.snapshot();
        self.broker.forget(pipeline.id).await;
        self.active.publish(pipeline);
        outcome
    }

    async fn dispatch_and_wait(
        &self,
        project: &Project,
        targets: &[TargetSpec],
        pipeline: &Pipeline,
        tracker: &Arc<BuildTracker>,
        cancel: &CancellationToken,
    ) -> Result<Vec<BuildTask>> {
        let (remote, local): (Vec<&TargetSpec>, Vec<&TargetSpec>) =
            targets.iter().partition(|t| t.offload);

        // Held until the wait is over; dropping it stops completion routing
        let _route = if local.is_empty() {
            None
        } else {
            let request = DispatchRequest {
                project_id: project.id,
                git_url: project.git_url.clone(),
                branch: project.branch.clone(),
                version: pipeline.version.clone(),
                targets: local.iter().map(|t| (t.name.clone(), t.platform)).collect(),
            };
            Some(self.dispatcher.dispatch(&request, tracker.clone()).await?)
        };

        if !remote.is_empty() {
            let configs = remote
                .iter()
                .map(|t| t.to_target_config(pipeline.version.as_deref()))
                .collect();
            self.broker.offload(&project.name, configs, tracker.clone()).await?;
        }

        tracker.wait(self.build_timeout, cancel).await
    }

    /// Post the pipeline outcome to the project's hooks
    async fn report(&self, project: &Project, pipeline: &mut Pipeline) {
        let hooks = Instant::now();
        let report = PipelineReport::from_pipeline(pipeline);
        let delivered = self.notifier.notify(&project.hooks, &report).await;
        pipeline.timings.hooks_ms = elapsed_ms(hooks);
        if delivered < project.hooks.len() {
            warn!(
                "Pipeline {}: {} of {} hook(s) delivered",
                pipeline.id,
                delivered,
                project.hooks.len()
            );
        }
        self.active.publish(pipeline);
    }

    /// Refuse new pipelines; running ones continue
    pub fn begin_shutdown(&self) {
        info!("Refusing new pipelines");
        self.active.stop_accepting();
    }

    /// Let running pipelines finish within `grace`, then cancel the rest and
    /// wait for them to reach a stage boundary.
    pub async fn drain(&self, grace: Duration) {
        self.begin_shutdown();
        if self.active.wait_idle(grace).await {
            return;
        }

        warn!(
            "{} pipeline(s) still running after {:?}; cancelling",
            self.active.live_count(),
            grace
        );
        self.shutdown.cancel();
        if !self.active.wait_idle(Duration::from_secs(30)).await {
            error!("Pipelines did not stop after cancellation");
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn artifacts(tasks: &[BuildTask]) -> Vec<Artifact> {
    tasks
        .iter()
        .filter(|t| t.status == BuildStatus::Complete)
        .filter_map(|t| {
            t.output_location.as_ref().map(|location| Artifact {
                target: t.target.clone(),
                location: location.clone(),
            })
        })
        .collect()
}
