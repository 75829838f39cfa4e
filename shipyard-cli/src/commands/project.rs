//! Project command handlers

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use shipyard_client::CoordinatorClient;
use uuid::Uuid;

use crate::config::Config;

/// Project subcommands
#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Show whether a project has a pipeline running
    Active {
        /// Project ID
        id: String,
    },
}

pub async fn handle_project_command(command: ProjectCommands, config: &Config) -> Result<()> {
    let client = CoordinatorClient::new(&config.orchestrator_url);

    match command {
        ProjectCommands::Active { id } => {
            let project_id =
                Uuid::parse_str(&id).with_context(|| format!("Invalid project ID '{}'", id))?;
            let activity = client.project_activity(project_id).await?;

            match activity.pipeline_id {
                Some(pipeline_id) if activity.active => println!(
                    "{} pipeline {}",
                    "Building:".yellow().bold(),
                    pipeline_id.to_string().cyan()
                ),
                _ => println!("{}", "Idle".green()),
            }
            Ok(())
        }
    }
}
