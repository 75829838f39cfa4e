//! Pipeline command handlers
//!
//! Listing and inspecting pipelines.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use shipyard_client::CoordinatorClient;
use shipyard_core::domain::build::{BuildStatus, BuildTask};
use shipyard_core::domain::deploy::{DeployOutcome, DeployRecord};
use shipyard_core::domain::pipeline::{Pipeline, PipelineStage};

use crate::config::Config;
use crate::id_resolver::resolve_pipeline_id;
use crate::types::IdOrPrefix;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// List live pipelines
    List,
    /// Get pipeline details
    Get {
        /// Pipeline ID, or unambiguous prefix of a live pipeline
        id: String,
    },
}

pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = CoordinatorClient::new(&config.orchestrator_url);

    match command {
        PipelineCommands::List => list_pipelines(&client).await,
        PipelineCommands::Get { id } => get_pipeline(&client, &id).await,
    }
}

async fn list_pipelines(client: &CoordinatorClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines running.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} running pipeline(s):", pipelines.len()).bold()
        );
        println!();
        for pipeline in pipelines {
            print_pipeline_summary(&pipeline);
        }
    }

    Ok(())
}

async fn get_pipeline(client: &CoordinatorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, &IdOrPrefix::parse(id)).await?;
    let pipeline = client.get_pipeline(uuid).await?;

    print_pipeline_details(&pipeline);

    Ok(())
}

fn print_pipeline_summary(pipeline: &Pipeline) {
    println!("  {} {}", "▸".cyan(), pipeline.project_name.bold());
    println!("    ID:      {}", pipeline.id.to_string().dimmed());
    println!("    Stage:   {}", colorize_stage(pipeline.stage));
    println!("    Targets: {}", pipeline.targets.join(", ").dimmed());
    println!(
        "    Started: {}",
        pipeline
            .started_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

pub fn print_pipeline_details(pipeline: &Pipeline) {
    println!("{}", "Pipeline Details:".bold());
    println!("  ID:       {}", pipeline.id.to_string().cyan());
    println!("  Project:  {}", pipeline.project_name.bold());
    println!("  Stage:    {}", colorize_stage(pipeline.stage));
    if let Some(version) = &pipeline.version {
        println!("  Version:  {}", version);
    }
    if let Some(tag) = &pipeline.tag {
        println!("  Tag:      {}", tag);
    }
    println!(
        "  Started:  {}",
        pipeline.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(finished) = pipeline.finished_at {
        println!("  Finished: {}", finished.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(failure) = &pipeline.failure {
        println!(
            "  Failure:  {} {}",
            format!("[{}]", failure.stage).red(),
            failure.reason.red()
        );
    }

    if !pipeline.changelog.is_empty() {
        println!("\n{}", "Changelog:".bold());
        for line in &pipeline.changelog {
            println!("  - {}", line);
        }
    }

    if !pipeline.tasks.is_empty() {
        println!("\n{}", "Builds:".bold());
        for task in &pipeline.tasks {
            print_task(task);
        }
    }

    if !pipeline.deploys.is_empty() {
        println!("\n{}", "Deploys:".bold());
        for record in &pipeline.deploys {
            print_deploy(record);
        }
    }

    let t = &pipeline.timings;
    println!("\n{}", "Timings:".bold());
    println!(
        "  prebuild {} ms, build {} ms, deploy {} ms, hooks {} ms",
        t.prebuild_ms, t.build_ms, t.deploy_ms, t.hooks_ms
    );
}

fn print_task(task: &BuildTask) {
    let status = format!("{:?}", task.status);
    let status = match task.status {
        BuildStatus::Complete => status.green(),
        BuildStatus::Error => status.red(),
        BuildStatus::Building => status.yellow(),
        BuildStatus::Queued => status.dimmed(),
    };
    let worker = task.assigned_to.as_deref().unwrap_or("-");
    print!("  {:<20} {:<10} {}", task.target, status, worker.dimmed());
    if let Some(ms) = task.build_time_ms {
        print!(" ({} ms)", ms);
    }
    println!();
    if let Some(error) = &task.error_message {
        println!("    {}", error.red());
    }
}

fn print_deploy(record: &DeployRecord) {
    let outcome = match &record.outcome {
        DeployOutcome::Success => "success".green(),
        DeployOutcome::Failure(reason) => format!("failed: {}", reason).red(),
        DeployOutcome::Skipped => "skipped".dimmed(),
    };
    println!(
        "  {:<20} {:<8} {} ({} ms)",
        record.target,
        record.kind.to_string(),
        outcome,
        record.duration_ms
    );
}

fn colorize_stage(stage: PipelineStage) -> ColoredString {
    let text = stage.to_string();
    match stage {
        PipelineStage::Done => text.green(),
        PipelineStage::Failed => text.red(),
        PipelineStage::Cancelled => text.yellow(),
        _ => text.cyan(),
    }
}
