//! Build command
//!
//! Starts a pipeline and optionally follows it to completion.

use anyhow::{Context, Result};
use colored::*;
use shipyard_client::CoordinatorClient;
use shipyard_core::domain::exit::ExitStatus;
use shipyard_core::domain::pipeline::PipelineStage;
use shipyard_core::dto::pipeline::StartPipeline;
use std::time::Duration;
use uuid::Uuid;

use super::pipeline::print_pipeline_details;
use crate::config::Config;
use crate::types::ProjectRef;

pub async fn handle_build(
    config: &Config,
    project: &str,
    targets: Vec<String>,
    wait: bool,
    interval: Duration,
) -> Result<ExitStatus> {
    let client = CoordinatorClient::new(&config.orchestrator_url);

    let req = start_request(ProjectRef::parse(project), targets);
    let started = match client.start_pipeline(&req).await {
        Ok(started) => started,
        Err(e) if e.is_conflict() => {
            anyhow::bail!("Project '{}' already has a pipeline running", project)
        }
        Err(e) if e.is_not_found() => anyhow::bail!("Unknown project '{}'", project),
        Err(e) => return Err(e).context("Failed to start pipeline"),
    };

    println!("{}", "✓ Pipeline started".green().bold());
    println!("  Pipeline ID: {}", started.pipeline_id.to_string().cyan());
    println!("  Project ID:  {}", started.project_id.to_string().dimmed());

    if !wait {
        return Ok(ExitStatus::Success);
    }

    Ok(follow(&client, started.pipeline_id, interval).await)
}

fn start_request(project: ProjectRef, targets: Vec<String>) -> StartPipeline {
    let targets = if targets.is_empty() { None } else { Some(targets) };
    match project {
        ProjectRef::Id(id) => StartPipeline {
            project_id: Some(id),
            project_name: None,
            targets,
        },
        ProjectRef::Name(name) => StartPipeline {
            project_id: None,
            project_name: Some(name),
            targets,
        },
    }
}

/// Poll until the pipeline reaches a terminal stage.
///
/// Losing track of the pipeline yields `Unknown` rather than an error so the
/// caller still exits with a contract code.
async fn follow(client: &CoordinatorClient, pipeline_id: Uuid, interval: Duration) -> ExitStatus {
    let mut last_stage: Option<PipelineStage> = None;

    loop {
        let pipeline = match client.get_pipeline(pipeline_id).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                eprintln!("{} lost track of pipeline: {}", "error:".red().bold(), e);
                return ExitStatus::Unknown;
            }
        };

        if last_stage != Some(pipeline.stage) {
            println!("  {} {}", "▸".cyan(), pipeline.stage.to_string().bold());
            last_stage = Some(pipeline.stage);
        }

        if pipeline.stage.is_terminal() {
            println!();
            print_pipeline_details(&pipeline);
            return pipeline.exit_status();
        }

        tokio::time::sleep(interval).await;
    }
}
