//! Source watcher
//!
//! Polls the source head on an interval. The first observation only sets the
//! baseline; every later change of revision launches a run. VCS runs are
//! pinned to the observed commit; registry runs always promote `latest`.

use convoy_core::domain::source::{SourceReference, Trigger};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::PipelineController;

/// Launches runs when the source changes
pub struct SourceWatcher {
    controller: Arc<PipelineController>,
    interval: Duration,
}

impl SourceWatcher {
    pub fn new(controller: Arc<PipelineController>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
        }
    }

    /// Starts the polling loop; returns once `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Starting source watcher for {} (interval: {:?})",
            self.controller.name(),
            self.interval
        );

        let mut ticker = time::interval(self.interval);
        let mut last_seen: Option<String> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Source watcher shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once(&mut last_seen).await;
                }
            }
        }
    }

    /// Performs a single poll
    ///
    /// Returns true when a run was launched.
    pub async fn poll_once(&self, last_seen: &mut Option<String>) -> bool {
        let head = match self.controller.source().head().await {
            Ok(head) => head,
            Err(e) => {
                warn!("Source poll failed: {}", e);
                return false;
            }
        };

        let revision = head.revision().to_string();
        if last_seen.as_deref() == Some(revision.as_str()) {
            debug!("Source unchanged at {}", revision);
            return false;
        }

        let Some(previous) = last_seen.replace(revision.clone()) else {
            info!("Watching source from {}", head);
            return false;
        };

        info!("Source changed: {} -> {}", previous, revision);
        let trigger = match head {
            SourceReference::Vcs { .. } => Trigger::pinned(revision),
            SourceReference::Registry { .. } => Trigger::default(),
        };
        match self.controller.launch(trigger).await {
            Ok(run) => {
                info!("Launched run {} (build {})", run.id, run.build_number);
                true
            }
            Err(e) => {
                warn!("Failed to launch run: {}", e);
                false
            }
        }
    }
}
