//! Shipyard CLI
//!
//! Command-line interface for the Shipyard coordinator.
//!
//! The process exit code follows the build exit-code contract: 0 success,
//! 101 failure, 102 cancelled, 103 unknown.

mod commands;
mod config;
mod id_resolver;
mod types;

use clap::Parser;
use colored::*;
use commands::{Commands, handle_command};
use config::Config;
use shipyard_core::domain::exit::ExitStatus;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Shipyard build orchestration CLI", long_about = None)]
struct Cli {
    /// Coordinator URL
    #[arg(
        long,
        env = "SHIPYARD_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    orchestrator_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = Config {
        orchestrator_url: cli.orchestrator_url,
    };

    let status = match handle_command(cli.command, &config).await {
        Ok(status) => status,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitStatus::Failure
        }
    };

    std::process::exit(status.code());
}
