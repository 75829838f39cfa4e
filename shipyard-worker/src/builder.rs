//! Build host invocation
//!
//! The actual compile/export step belongs to an external build host. The
//! worker only launches it with the target's parameters in the environment
//! and interprets its exit code.

use async_trait::async_trait;
use shipyard_core::domain::exit::ExitStatus;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// One target to build
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub target: String,
    pub git_url: String,
    pub branch: String,
    pub version: Option<String>,
    pub output_dir: PathBuf,
    /// Checkout to build in (offloaded builds only)
    pub workspace: Option<PathBuf>,
    /// Opaque build-host settings (offloaded builds only)
    pub settings: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to start build host '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build host reported failure (exit {0})")]
    Failed(i32),

    #[error("build cancelled")]
    Cancelled,

    #[error("build host exited abnormally ({0})")]
    Unknown(String),

    #[error("build output: {0}")]
    Output(#[from] std::io::Error),
}

#[async_trait]
pub trait BuildHost: Send + Sync {
    async fn build(&self, job: &BuildJob) -> Result<(), BuildError>;
}

/// Runs a configured command once per target
pub struct CommandBuildHost {
    command: Vec<String>,
}

impl CommandBuildHost {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl BuildHost for CommandBuildHost {
    async fn build(&self, job: &BuildJob) -> Result<(), BuildError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(BuildError::Unknown("no build command configured".to_string()));
        };

        tokio::fs::create_dir_all(&job.output_dir).await?;
        info!("Building {} into {}", job.target, job.output_dir.display());

        let mut command = Command::new(program);
        if let Some(workspace) = &job.workspace {
            command
                .current_dir(workspace)
                .env("SHIPYARD_WORKSPACE", workspace);
        }

        // Aborting the build task must not leave the build host running
        let status = command
            .args(args)
            .env("SHIPYARD_TARGET", &job.target)
            .env("SHIPYARD_GIT_URL", &job.git_url)
            .env("SHIPYARD_BRANCH", &job.branch)
            .env("SHIPYARD_VERSION", job.version.as_deref().unwrap_or(""))
            .env("SHIPYARD_OUTPUT_DIR", &job.output_dir)
            .env("SHIPYARD_SETTINGS", job.settings.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| BuildError::Spawn {
                program: program.clone(),
                source,
            })?;

        debug!("Build host for {} exited with {:?}", job.target, status.code());
        match ExitStatus::from_code(status.code()) {
            ExitStatus::Success => Ok(()),
            ExitStatus::Failure => Err(BuildError::Failed(ExitStatus::Failure.code())),
            ExitStatus::Cancelled => Err(BuildError::Cancelled),
            ExitStatus::Unknown => Err(BuildError::Unknown(
                status
                    .code()
                    .map(|c| format!("exit {}", c))
                    .unwrap_or_else(|| "terminated by signal".to_string()),
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Writes a marker file; targets whose name starts with "Broken" fail
    #[derive(Default)]
    pub(crate) struct FakeHost {
        pub built: Mutex<Vec<String>>,
        pub workspaces: Mutex<Vec<Option<PathBuf>>>,
    }

    #[async_trait]
    impl BuildHost for FakeHost {
        async fn build(&self, job: &BuildJob) -> Result<(), BuildError> {
            self.built.lock().unwrap().push(job.target.clone());
            self.workspaces.lock().unwrap().push(job.workspace.clone());
            if job.target.starts_with("Broken") {
                return Err(BuildError::Failed(101));
            }
            tokio::fs::create_dir_all(&job.output_dir).await?;
            tokio::fs::write(job.output_dir.join("game.bin"), job.target.as_bytes()).await?;
            Ok(())
        }
    }

    pub(crate) fn job(target: &str, output_dir: PathBuf) -> BuildJob {
        BuildJob {
            target: target.to_string(),
            git_url: "git@example.com:game.git".into(),
            branch: "main".into(),
            version: Some("1.0.1".into()),
            output_dir,
            workspace: None,
            settings: serde_json::Value::Null,
        }
    }

    #[cfg(unix)]
    async fn run_sh(script: &str) -> Result<(), BuildError> {
        let dir = tempfile::tempdir().unwrap();
        let host = CommandBuildHost::new(vec!["sh".into(), "-c".into(), script.into()]);
        host.build(&job("LinuxBuild", dir.path().join("out"))).await
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_codes_follow_contract() {
        assert!(run_sh("exit 0").await.is_ok());
        assert!(matches!(run_sh("exit 101").await, Err(BuildError::Failed(101))));
        assert!(matches!(run_sh("exit 102").await, Err(BuildError::Cancelled)));
        assert!(matches!(run_sh("exit 7").await, Err(BuildError::Unknown(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_job_parameters_are_in_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let host = CommandBuildHost::new(vec![
            "sh".into(),
            "-c".into(),
            r#"echo "$SHIPYARD_TARGET $SHIPYARD_VERSION" > "$SHIPYARD_OUTPUT_DIR/params""#.into(),
        ]);

        host.build(&job("LinuxBuild", out.clone())).await.unwrap();
        let params = std::fs::read_to_string(out.join("params")).unwrap();
        assert_eq!(params.trim(), "LinuxBuild 1.0.1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_workspace_is_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = dir.path().join("game");
        std::fs::create_dir(&checkout).unwrap();
        let out = dir.path().join("out");

        let host = CommandBuildHost::new(vec![
            "sh".into(),
            "-c".into(),
            r#"test "$(pwd -P)" = "$(cd "$SHIPYARD_WORKSPACE" && pwd -P)" && touch "$SHIPYARD_OUTPUT_DIR/ok""#.into(),
        ]);
        let mut job = job("LinuxBuild", out.clone());
        job.workspace = Some(checkout);

        host.build(&job).await.unwrap();
        assert!(out.join("ok").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_build_kills_host_process() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let marker = out.join("finished");
        let host = CommandBuildHost::new(vec![
            "sh".into(),
            "-c".into(),
            r#"sleep 1; touch "$SHIPYARD_OUTPUT_DIR/finished""#.into(),
        ]);

        let job = job("LinuxBuild", out.clone());
        let _ = tokio::time::timeout(Duration::from_millis(200), host.build(&job)).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let host = CommandBuildHost::new(vec!["shipyard-no-such-build-host".into()]);
        assert!(matches!(
            host.build(&job("LinuxBuild", dir.path().join("out"))).await,
            Err(BuildError::Spawn { .. })
        ));
    }
}
