//! Deployment Fan-out
//!
//! Runs a project's deploy targets one after another, in declaration order,
//! against the artifacts of one successful build. A failing or panicking
//! step is recorded against its own target and the next step still runs.

pub mod command;

use async_trait::async_trait;
use shipyard_core::domain::deploy::{DeployOutcome, DeployRecord, DeployTarget};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub use command::CommandDeployer;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("no artifact for build target '{0}'")]
    MissingArtifact(String),

    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {code}: {stderr}")]
    Command {
        command: String,
        code: String,
        stderr: String,
    },

    #[error("{0}")]
    Failed(String),
}

/// One built target's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub target: String,
    pub location: String,
}

/// Everything a deploy step may publish or mention
#[derive(Debug, Clone)]
pub struct DeployContext {
    pub pipeline_id: Uuid,
    pub project_name: String,
    pub version: String,
    pub changelog: Vec<String>,
    pub artifacts: Vec<Artifact>,
}

impl DeployContext {
    /// Artifacts a deploy target publishes: the one it names, or all
    pub fn artifacts_for(&self, target: &DeployTarget) -> Result<Vec<&Artifact>, DeployError> {
        match &target.artifact_from {
            Some(source) => self
                .artifacts
                .iter()
                .find(|a| &a.target == source)
                .map(|a| vec![a])
                .ok_or_else(|| DeployError::MissingArtifact(source.clone())),
            None => Ok(self.artifacts.iter().collect()),
        }
    }
}

/// A publishing backend
#[async_trait]
pub trait DeployStep: Send + Sync {
    async fn deploy(&self, target: &DeployTarget, ctx: &DeployContext) -> Result<(), DeployError>;
}

#[derive(Clone)]
pub struct FanOut {
    backend: Arc<dyn DeployStep>,
}

impl FanOut {
    pub fn new(backend: Arc<dyn DeployStep>) -> Self {
        Self { backend }
    }

    /// Run every target and return one record per configured target.
    ///
    /// Disabled targets are recorded as `Skipped` without running. Once
    /// `cancel` fires, the step in flight and all later steps are recorded
    /// as failures.
    pub async fn run(
        &self,
        targets: &[DeployTarget],
        ctx: Arc<DeployContext>,
        cancel: &CancellationToken,
    ) -> Vec<DeployRecord> {
        let mut records = Vec::with_capacity(targets.len());

        for target in targets {
            let started = Instant::now();

            let outcome = if !target.enabled {
                info!("Deploy {} skipped (disabled)", target.name);
                DeployOutcome::Skipped
            } else if cancel.is_cancelled() {
                DeployOutcome::Failure("cancelled".to_string())
            } else {
                self.run_step(target, ctx.clone(), cancel).await
            };

            records.push(DeployRecord {
                target: target.name.clone(),
                kind: target.kind,
                outcome,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        records
    }

    async fn run_step(
        &self,
        target: &DeployTarget,
        ctx: Arc<DeployContext>,
        cancel: &CancellationToken,
    ) -> DeployOutcome {
        info!("Deploying {} ({})", target.name, target.kind);

        let backend = self.backend.clone();
        let step_target = target.clone();
        // A separate task so a panicking backend only takes down its own step
        let mut handle =
            tokio::spawn(async move { backend.deploy(&step_target, &ctx).await });

        let joined = tokio::select! {
            joined = &mut handle => joined,
            _ = cancel.cancelled() => {
                handle.abort();
                return DeployOutcome::Failure("cancelled".to_string());
            }
        };

        match joined {
            Ok(Ok(())) => {
                info!("Deploy {} succeeded", target.name);
                DeployOutcome::Success
            }
            Ok(Err(e)) => {
                warn!("Deploy {} failed: {}", target.name, e);
                DeployOutcome::Failure(e.to_string())
            }
            Err(e) if e.is_panic() => {
                error!("Deploy {} panicked", target.name);
                DeployOutcome::Failure("deploy step panicked".to_string())
            }
            Err(e) => DeployOutcome::Failure(e.to_string()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shipyard_core::domain::deploy::DeployKind;
    use std::sync::Mutex;

    /// Records the order steps ran in; names starting with "fail" error and
    /// names starting with "panic" panic
    #[derive(Default)]
    pub(crate) struct ScriptedDeployer {
        pub ran: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeployStep for ScriptedDeployer {
        async fn deploy(&self, target: &DeployTarget, _ctx: &DeployContext) -> Result<(), DeployError> {
            self.ran.lock().unwrap().push(target.name.clone());
            if target.name.starts_with("fail") {
                return Err(DeployError::Failed("upload rejected".into()));
            }
            if target.name.starts_with("panic") {
                panic!("backend bug");
            }
            Ok(())
        }
    }

    pub(crate) fn deploy_target(name: &str, kind: DeployKind) -> DeployTarget {
        DeployTarget {
            name: name.to_string(),
            kind,
            enabled: true,
            command: "true".to_string(),
            args: Vec::new(),
            artifact_from: None,
        }
    }

    pub(crate) fn context() -> Arc<DeployContext> {
        Arc::new(DeployContext {
            pipeline_id: Uuid::new_v4(),
            project_name: "game".into(),
            version: "1.0.1".into(),
            changelog: vec!["Fix crash".into()],
            artifacts: vec![
                Artifact {
                    target: "WindowsBuild".into(),
                    location: "/out/win".into(),
                },
                Artifact {
                    target: "LinuxBuild".into(),
                    location: "/out/linux".into(),
                },
            ],
        })
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_steps() {
        let backend = Arc::new(ScriptedDeployer::default());
        let fan_out = FanOut::new(backend.clone());
        let targets = vec![
            deploy_target("steam", DeployKind::Store),
            deploy_target("fail-cdn", DeployKind::Bucket),
            deploy_target("itch", DeployKind::Hosting),
        ];

        let records = fan_out
            .run(&targets, context(), &CancellationToken::new())
            .await;

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].outcome, DeployOutcome::Success);
        assert!(records[1].outcome.is_failure());
        assert_eq!(records[2].outcome, DeployOutcome::Success);
        assert_eq!(*backend.ran.lock().unwrap(), vec!["steam", "fail-cdn", "itch"]);
    }

    #[tokio::test]
    async fn test_panicking_step_is_isolated() {
        let backend = Arc::new(ScriptedDeployer::default());
        let fan_out = FanOut::new(backend.clone());
        let targets = vec![
            deploy_target("panic-store", DeployKind::Store),
            deploy_target("cdn", DeployKind::Bucket),
        ];

        let records = fan_out
            .run(&targets, context(), &CancellationToken::new())
            .await;

        assert_eq!(
            records[0].outcome,
            DeployOutcome::Failure("deploy step panicked".into())
        );
        assert_eq!(records[1].outcome, DeployOutcome::Success);
    }

    #[tokio::test]
    async fn test_disabled_targets_are_skipped() {
        let backend = Arc::new(ScriptedDeployer::default());
        let fan_out = FanOut::new(backend.clone());
        let mut disabled = deploy_target("console", DeployKind::Store);
        disabled.enabled = false;
        let targets = vec![disabled, deploy_target("cdn", DeployKind::Bucket)];

        let records = fan_out
            .run(&targets, context(), &CancellationToken::new())
            .await;

        assert_eq!(records[0].outcome, DeployOutcome::Skipped);
        assert_eq!(records[1].outcome, DeployOutcome::Success);
        assert_eq!(*backend.ran.lock().unwrap(), vec!["cdn"]);
    }

    #[tokio::test]
    async fn test_cancelled_fan_out_runs_nothing() {
        let backend = Arc::new(ScriptedDeployer::default());
        let fan_out = FanOut::new(backend.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let records = fan_out
            .run(&[deploy_target("cdn", DeployKind::Bucket)], context(), &cancel)
            .await;
        assert!(records[0].outcome.is_failure());
        assert!(backend.ran.lock().unwrap().is_empty());
    }

    #[test]
    fn test_artifacts_for_named_source() {
        let ctx = context();
        let mut target = deploy_target("cdn", DeployKind::Bucket);
        assert_eq!(ctx.artifacts_for(&target).unwrap().len(), 2);

        target.artifact_from = Some("LinuxBuild".into());
        assert_eq!(ctx.artifacts_for(&target).unwrap()[0].location, "/out/linux");

        target.artifact_from = Some("iOSBuild".into());
        assert!(matches!(
            ctx.artifacts_for(&target),
            Err(DeployError::MissingArtifact(_))
        ));
    }
}
