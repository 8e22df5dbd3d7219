//! ID resolver module
//!
//! Resolves run ID prefixes to full UUIDs by querying the runner, so users
//! can type short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use convoy_client::RunnerClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a run ID or prefix to a full UUID
///
/// # Errors
/// Returns an error if no run or more than one run matches the prefix, or
/// if the runner cannot be reached.
pub async fn resolve_run_id(client: &RunnerClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    if let IdOrPrefix::Full(uuid) = id_or_prefix {
        return Ok(*uuid);
    }

    let runs = client
        .list_runs()
        .await
        .context("Failed to fetch runs for ID resolution")?;

    let ids: Vec<Uuid> = runs.iter().map(|r| r.id).collect();
    pick_unique(&ids, id_or_prefix)
}

fn pick_unique(ids: &[Uuid], id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids
        .iter()
        .copied()
        .filter(|id| id_or_prefix.matches(*id))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No run found with ID starting with '{}'", id_or_prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple runs: {}",
                id_or_prefix,
                ids.join(", ")
            ))
        }
    }
}
