//! External uploader backend
//!
//! Runs the target's `command` with its `args`, substituting:
//! - `{version}`: the pipeline's version
//! - `{project}`: the project name
//! - `{changelog}`: changelog lines joined by newlines
//! - `{artifact}`: an argument that is exactly `{artifact}` expands to one
//!   argument per artifact; inside a longer argument it is the first one

use async_trait::async_trait;
use shipyard_core::domain::deploy::DeployTarget;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::deploy::{DeployContext, DeployError, DeployStep};

#[derive(Debug, Default, Clone, Copy)]
pub struct CommandDeployer;

impl CommandDeployer {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn expand_args(target: &DeployTarget, ctx: &DeployContext) -> Result<Vec<String>, DeployError> {
    let artifacts: Vec<&str> = ctx
        .artifacts_for(target)?
        .into_iter()
        .map(|a| a.location.as_str())
        .collect();
    let changelog = ctx.changelog.join("\n");

    let mut expanded = Vec::with_capacity(target.args.len());
    for arg in &target.args {
        if arg == "{artifact}" {
            expanded.extend(artifacts.iter().map(|a| a.to_string()));
            continue;
        }
        expanded.push(
            arg.replace("{version}", &ctx.version)
                .replace("{project}", &ctx.project_name)
                .replace("{changelog}", &changelog)
                .replace("{artifact}", artifacts.first().copied().unwrap_or_default()),
        );
    }
    Ok(expanded)
}

#[async_trait]
impl DeployStep for CommandDeployer {
    async fn deploy(&self, target: &DeployTarget, ctx: &DeployContext) -> Result<(), DeployError> {
        let args = expand_args(target, ctx)?;
        debug!("Running {} {:?}", target.command, args);

        let output = Command::new(&target.command)
            .args(&args)
            .env("SHIPYARD_VERSION", &ctx.version)
            .env("SHIPYARD_PROJECT", &ctx.project_name)
            .stdin(Stdio::null())
            // A cancelled deploy step must not leave the uploader running
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DeployError::Spawn {
                command: target.command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DeployError::Command {
                command: target.command.clone(),
                code: output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
