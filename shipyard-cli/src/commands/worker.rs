//! Worker command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use shipyard_client::CoordinatorClient;
use shipyard_core::domain::worker::{Worker, WorkerStatus};

use crate::config::Config;

/// Worker subcommands
#[derive(Subcommand)]
pub enum WorkerCommands {
    /// List connected workers
    List,
}

pub async fn handle_worker_command(command: WorkerCommands, config: &Config) -> Result<()> {
    let client = CoordinatorClient::new(&config.orchestrator_url);

    match command {
        WorkerCommands::List => list_workers(&client).await,
    }
}

async fn list_workers(client: &CoordinatorClient) -> Result<()> {
    let workers = client.list_workers().await?;

    if workers.is_empty() {
        println!("{}", "No workers connected.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} worker(s):", workers.len()).bold()
        );
        println!();
        for worker in workers {
            print_worker_summary(&worker);
        }
    }

    Ok(())
}

fn print_worker_summary(worker: &Worker) {
    println!("  {} Worker {}", "▸".cyan(), worker.id.bold());
    println!("    Platform:   {}", worker.platform);
    println!("    Status:     {}", colorize_status(worker.status));
    println!("    Address:    {}", worker.address.dimmed());
    println!(
        "    Connected:  {}",
        worker
            .connected_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!(
        "    Last Seen:  {}",
        worker
            .last_seen_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn colorize_status(status: WorkerStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        WorkerStatus::Online => text.green(),
        WorkerStatus::Offline => text.red(),
    }
}
