//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod buildspec;
mod run;
mod tag;

pub use buildspec::BuildSpecArgs;
pub use run::RunCommands;
pub use tag::TagArgs;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline run management
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Compute the image tag a run would push (offline)
    Tag(TagArgs),
    /// Render the build specification for a source kind (offline)
    Buildspec(BuildSpecArgs),
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run { command } => run::handle_run_command(command, config).await,
        Commands::Tag(args) => tag::handle_tag_command(args),
        Commands::Buildspec(args) => buildspec::handle_buildspec_command(args),
    }
}
