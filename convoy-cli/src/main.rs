//! Convoy CLI
//!
//! Command-line interface for the Convoy runner, plus offline helpers that
//! compute image tags and render build specifications.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(about = "Convoy build and deploy pipeline CLI", long_about = None)]
struct Cli {
    /// Runner URL
    #[arg(long, env = "CONVOY_RUNNER_URL", default_value = "http://localhost:8090")]
    runner_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        runner_url: cli.runner_url,
    };

    handle_command(cli.command, &config).await
}
