//! Run command handlers
//!
//! Handles triggering, listing, inspecting and cancelling pipeline runs.

use anyhow::{Result, bail};
use clap::Subcommand;
use colored::*;
use convoy_client::RunnerClient;
use convoy_core::domain::log::{LogEntry, LogLevel};
use convoy_core::domain::run::{PipelineRun, RunStatus};
use convoy_core::dto::run::{RunSummary, TriggerRun};
use convoy_core::ErrorKind;
use std::time::Duration;

use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::types::IdOrPrefix;

/// Longest pause between retries
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Trigger a new run
    Trigger {
        /// Build this source version instead of the current head
        #[arg(long)]
        source_version: Option<String>,

        /// Wait for the run to finish
        #[arg(short, long)]
        wait: bool,

        /// Re-trigger up to this many times on retryable failures (implies --wait)
        #[arg(long, default_value_t = 0)]
        retries: u32,

        /// Seconds between status polls while waiting
        #[arg(long, default_value_t = 2)]
        poll_secs: u64,
    },
    /// List runs
    List,
    /// Get run details
    Get {
        /// Run ID or unambiguous prefix
        id: String,

        /// Print the run's log entries
        #[arg(short, long)]
        logs: bool,
    },
    /// Cancel an unfinished run
    Cancel {
        /// Run ID or unambiguous prefix
        id: String,
    },
}

/// Handle run commands
pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = RunnerClient::new(&config.runner_url);

    match command {
        RunCommands::Trigger {
            source_version,
            wait,
            retries,
            poll_secs,
        } => {
            let poll = Duration::from_secs(poll_secs.max(1));
            trigger_run(&client, source_version, wait || retries > 0, retries, poll).await
        }
        RunCommands::List => list_runs(&client).await,
        RunCommands::Get { id, logs } => get_run(&client, &id, logs).await,
        RunCommands::Cancel { id } => cancel_run(&client, &id).await,
    }
}

/// Trigger a run, optionally waiting for it and retrying retryable failures
async fn trigger_run(
    client: &RunnerClient,
    source_version: Option<String>,
    wait: bool,
    retries: u32,
    poll: Duration,
) -> Result<()> {
    let mut attempt = 0;
    let mut delay = Duration::from_secs(2);

    loop {
        let run = client
            .trigger_run(TriggerRun {
                source_version: source_version.clone(),
            })
            .await?;

        println!(
            "{} Triggered run #{} {}",
            "✓".green(),
            run.build_number,
            run.id.to_string().dimmed()
        );

        if !wait {
            return Ok(());
        }

        let run = wait_for_run(client, &run, poll).await?;
        print_run_details(&run);

        let kind = match (run.status, run.error_kind()) {
            (RunStatus::Succeeded, _) => return Ok(()),
            (_, Some(kind)) => kind,
            (_, None) => bail!("run {} failed without a recorded error", run.id),
        };

        if !should_retry(kind, attempt, retries) {
            bail!("run {} failed: {}", run.id, kind);
        }

        attempt += 1;
        println!(
            "{}",
            format!(
                "⚠ {} is retryable, retrying in {}s ({}/{})",
                kind,
                delay.as_secs(),
                attempt,
                retries
            )
            .yellow()
        );
        tokio::time::sleep(delay).await;
        delay = next_delay(delay);
    }
}

/// Poll a run until it reaches a terminal status
async fn wait_for_run(client: &RunnerClient, run: &PipelineRun, poll: Duration) -> Result<PipelineRun> {
    let mut last_stage = None;

    loop {
        let current = client.get_run(run.id).await?;

        if current.stage != last_stage {
            if let Some(stage) = current.stage {
                println!("  {} {}", "▸".cyan(), stage);
            }
            last_stage = current.stage;
        }

        if current.is_terminal() {
            return Ok(current);
        }

        tokio::time::sleep(poll).await;
    }
}

/// Whether a failed attempt should be re-triggered
fn should_retry(kind: ErrorKind, attempt: u32, max_retries: u32) -> bool {
    kind.is_retryable() && attempt < max_retries
}

/// Exponential backoff, capped
fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(MAX_RETRY_DELAY)
}

/// List all runs
async fn list_runs(client: &RunnerClient) -> Result<()> {
    let runs = client.list_runs().await?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in runs {
            print_run_summary(&run);
        }
    }

    Ok(())
}

/// Get and display a single run
async fn get_run(client: &RunnerClient, id: &str, logs: bool) -> Result<()> {
    let id_or_prefix = IdOrPrefix::parse(id);
    let uuid = resolve_run_id(client, &id_or_prefix).await?;

    let run = client.get_run(uuid).await?;

    print_run_details(&run);

    if logs {
        println!();
        if run.logs.is_empty() {
            println!("{}", "No logs found for this run.".yellow());
        } else {
            println!("{}", format!("Logs for run {}:", uuid).bold());
            println!("{}", "─".repeat(80).dimmed());
            for log in &run.logs {
                print_log_entry(log);
            }
            println!("{}", "─".repeat(80).dimmed());
        }
    }

    Ok(())
}

/// Cancel a run
async fn cancel_run(client: &RunnerClient, id: &str) -> Result<()> {
    let id_or_prefix = IdOrPrefix::parse(id);
    let uuid = resolve_run_id(client, &id_or_prefix).await?;

    match client.cancel_run(uuid).await {
        Ok(_) => {
            println!("{} Cancellation requested for run {}", "✓".green(), uuid);
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            println!("{}", format!("Run {} has already finished.", uuid).yellow());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Print a run summary
fn print_run_summary(run: &RunSummary) {
    println!(
        "  {} #{} {}",
        "▸".cyan(),
        run.build_number,
        run.id.to_string().dimmed()
    );
    println!("    Pipeline: {}", run.pipeline);
    println!("    Status:   {}", colorize_status(&run.status));
    if let Some(stage) = run.stage {
        println!("    Stage:    {}", stage);
    }
    if let Some(kind) = run.error_kind {
        println!("    Error:    {}", kind.to_string().red());
    }
    if let Some(image) = &run.image_uri {
        println!("    Image:    {}", image.dimmed());
    }
    println!(
        "    Created:  {}",
        run.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

/// Print detailed run information
fn print_run_details(run: &PipelineRun) {
    println!("{}", "Run Details:".bold());
    println!("  ID:        {}", run.id.to_string().cyan());
    println!("  Pipeline:  {}", run.pipeline);
    println!("  Build:     #{}", run.build_number);
    println!("  Status:    {}", colorize_status(&run.status));
    if let Some(stage) = run.stage {
        println!("  Stage:     {}", stage);
    }
    println!("  Created:   {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(duration) = run.duration() {
        println!("  Duration:  {}s", duration.num_seconds());
    }

    if let Some(source) = &run.source {
        println!("\n{}", "Source:".bold());
        println!("  {}", source);
    }

    if let Some(image) = &run.image {
        println!("\n{}", "Image:".bold());
        println!("  {} {}", image.name.cyan(), image.image_uri);
    }

    if let Some(deploy) = &run.deploy {
        println!("\n{}", "Deploy:".bold());
        println!("  Service:   {}", deploy.service);
        println!("  Replicas:  {}", deploy.replicas);
        if let Some(previous) = &deploy.previous_image {
            println!("  Replaced:  {}", previous.dimmed());
        }
    }

    if let Some(error) = &run.error {
        println!("\n{}", "Error:".bold());
        println!("  Kind:      {}", error.kind.to_string().red());
        println!("  {}", error.message.red());
    }
}

/// Print a log entry
fn print_log_entry(log: &LogEntry) {
    let level_str = format!("{:?}", log.level).to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}

/// Colorize run status for display
fn colorize_status(status: &RunStatus) -> colored::ColoredString {
    let status_str = status.to_string();
    match status {
        RunStatus::Pending => status_str.yellow(),
        RunStatus::Running => status_str.cyan(),
        RunStatus::Succeeded => status_str.green(),
        RunStatus::Failed => status_str.red(),
    }
}
