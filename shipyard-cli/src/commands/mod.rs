//! Commands module
//!
//! Defines all CLI commands and their handlers. Every handler reports the
//! exit status the process should end with.

mod build;
mod pipeline;
mod project;
mod worker;

pub use pipeline::PipelineCommands;
pub use project::ProjectCommands;
pub use worker::WorkerCommands;

use anyhow::Result;
use clap::Subcommand;
use shipyard_core::domain::exit::ExitStatus;
use std::time::Duration;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start a build pipeline for a project
    Build {
        /// Project name or ID
        project: String,

        /// Restrict the build to these targets (repeatable)
        #[arg(short, long)]
        target: Vec<String>,

        /// Wait for the pipeline to finish and exit with its status
        #[arg(short, long)]
        wait: bool,

        /// Poll interval in seconds while waiting
        #[arg(long, default_value = "2", value_parser = parse_seconds)]
        interval: Duration,
    },
    /// Pipeline inspection
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Project status
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Worker management
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
}

fn parse_seconds(s: &str) -> Result<Duration> {
    let secs: u64 = s.parse()?;
    if secs == 0 {
        anyhow::bail!("interval must be at least one second");
    }
    Ok(Duration::from_secs(secs))
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<ExitStatus> {
    match command {
        Commands::Build {
            project,
            target,
            wait,
            interval,
        } => build::handle_build(config, &project, target, wait, interval).await,
        Commands::Pipeline { command } => {
            pipeline::handle_pipeline_command(command, config).await?;
            Ok(ExitStatus::Success)
        }
        Commands::Project { command } => {
            project::handle_project_command(command, config).await?;
            Ok(ExitStatus::Success)
        }
        Commands::Worker { command } => {
            worker::handle_worker_command(command, config).await?;
            Ok(ExitStatus::Success)
        }
    }
}
