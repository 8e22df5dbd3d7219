//! Deploy stage
//!
//! Rolls a service onto the image named by a build's descriptor artifact,
//! waits for every replica to report healthy and restores the previous image
//! when that does not happen inside the deployment window. At most one
//! rollout per service is in flight.

use anyhow::Result;
use async_trait::async_trait;
use convoy_core::PipelineError;
use convoy_core::domain::deploy::{DeployResult, ReplicaHealth, RollbackOutcome};
use convoy_core::domain::image::ImageDescriptor;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::RunContext;

/// A deployable service
#[async_trait]
pub trait ServiceTarget: Send + Sync {
    /// Identity used to serialize rollouts
    fn id(&self) -> &str;

    /// Container name the descriptor must match
    fn container_name(&self) -> &str;

    /// Image the service currently runs; `None` before the first deploy
    async fn current_image(&self) -> Result<Option<String>>;

    /// Replaces the running image
    async fn update_image(&self, image_uri: &str) -> Result<()>;

    /// Current replica health
    async fn replica_health(&self) -> Result<ReplicaHealth>;
}

/// Tracks targets (services, image repositories) with a mutation in flight
#[derive(Clone, Default)]
pub struct DeployGate {
    active: Arc<Mutex<HashSet<String>>>,
}

impl DeployGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the target, or rejects when another build or rollout holds it
    pub fn try_acquire(&self, service: &str) -> Result<DeployPermit, PipelineError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(service.to_string()) {
            return Err(PipelineError::ConcurrentDeployRejected(service.to_string()));
        }
        Ok(DeployPermit {
            gate: self.clone(),
            service: service.to_string(),
        })
    }
}

/// Claim on a target; released on drop
pub struct DeployPermit {
    gate: DeployGate,
    service: String,
}

impl Drop for DeployPermit {
    fn drop(&mut self) {
        let mut active = self.gate.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.service);
    }
}

/// Rollout timing
#[derive(Debug, Clone, Copy)]
pub struct DeploySettings {
    /// Deployment window for replicas to become healthy
    pub timeout: Duration,
    pub poll_interval: Duration,
}

/// Deploy stage of a pipeline
pub struct DeployStage {
    gate: DeployGate,
    settings: DeploySettings,
}

impl DeployStage {
    pub fn new(gate: DeployGate, settings: DeploySettings) -> Self {
        Self { gate, settings }
    }

    /// Deploys the image named by a descriptor artifact
    ///
    /// The artifact file is the only input consumed from the build stage.
    pub async fn deploy_artifact(
        &self,
        artifact: &Path,
        target: &dyn ServiceTarget,
        ctx: &RunContext,
    ) -> Result<DeployResult, PipelineError> {
        let json = tokio::fs::read_to_string(artifact).await.map_err(|e| {
            PipelineError::DeployFailed {
                reason: format!("cannot read {}: {}", artifact.display(), e),
                rollback: RollbackOutcome::NotNeeded,
            }
        })?;

        let descriptor =
            ImageDescriptor::from_definitions_json(&json).map_err(|e| PipelineError::DeployFailed {
                reason: format!("invalid descriptor {}: {}", artifact.display(), e),
                rollback: RollbackOutcome::NotNeeded,
            })?;

        self.deploy(&descriptor, target, ctx).await
    }

    /// Rolls `target` onto the descriptor's image
    pub async fn deploy(
        &self,
        descriptor: &ImageDescriptor,
        target: &dyn ServiceTarget,
        ctx: &RunContext,
    ) -> Result<DeployResult, PipelineError> {
        let _permit = self.gate.try_acquire(target.id())?;

        if descriptor.name != target.container_name() {
            return Err(PipelineError::DeployFailed {
                reason: format!(
                    "descriptor names container '{}' but service runs '{}'",
                    descriptor.name,
                    target.container_name()
                ),
                rollback: RollbackOutcome::NotNeeded,
            });
        }

        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled(
                "cancelled before rollout started".to_string(),
            ));
        }

        let previous = target
            .current_image()
            .await
            .map_err(|e| PipelineError::DeployFailed {
                reason: format!("cannot read current image: {:#}", e),
                rollback: RollbackOutcome::NotNeeded,
            })?;

        info!(
            "Deploying {} to {} (previous: {})",
            descriptor.image_uri,
            target.id(),
            previous.as_deref().unwrap_or("none")
        );
        ctx.log_info(format!("Deploying {} to {}", descriptor.image_uri, target.id()));

        let outcome = match target.update_image(&descriptor.image_uri).await {
            Ok(()) => self.await_healthy(target, ctx.cancel_token()).await,
            Err(e) => Err(format!("update failed: {:#}", e)),
        };

        match outcome {
            Ok(replicas) => {
                ctx.log_info(format!("{} is {}", target.id(), replicas));
                Ok(DeployResult {
                    service: target.id().to_string(),
                    image_uri: descriptor.image_uri.clone(),
                    previous_image: previous,
                    replicas,
                })
            }
            Err(reason) => {
                warn!("Rollout of {} failed: {}", descriptor.image_uri, reason);
                ctx.log_error(format!("Rollout failed: {}", reason));

                let rollback = self.rollback(target, previous, ctx).await;
                Err(PipelineError::DeployFailed { reason, rollback })
            }
        }
    }

    /// Polls replica health until all replicas are healthy or the window ends
    async fn await_healthy(
        &self,
        target: &dyn ServiceTarget,
        cancel: &CancellationToken,
    ) -> Result<ReplicaHealth, String> {
        let deadline = Instant::now() + self.settings.timeout;
        let mut last = ReplicaHealth::default();

        loop {
            match target.replica_health().await {
                Ok(health) if health.is_fully_healthy() => return Ok(health),
                Ok(health) => last = health,
                Err(e) => warn!("Health probe of {} failed: {:#}", target.id(), e),
            }

            if Instant::now() >= deadline {
                return Err(format!(
                    "replicas not healthy within {:?} ({})",
                    self.settings.timeout, last
                ));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err("cancelled during rollout".to_string());
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }

    async fn rollback(
        &self,
        target: &dyn ServiceTarget,
        previous: Option<String>,
        ctx: &RunContext,
    ) -> RollbackOutcome {
        let Some(previous) = previous else {
            error!("No prior revision of {} to restore", target.id());
            ctx.log_error("No prior revision to restore");
            return RollbackOutcome::Failed {
                restored_image: None,
                reason: "no prior revision".to_string(),
            };
        };

        info!("Rolling {} back to {}", target.id(), previous);
        ctx.log_warning(format!("Rolling back to {}", previous));

        if let Err(e) = target.update_image(&previous).await {
            return RollbackOutcome::Failed {
                restored_image: Some(previous),
                reason: format!("restore failed: {:#}", e),
            };
        }

        // A cancel that aborted the rollout must not also abort the restore
        match self.await_healthy(target, &CancellationToken::new()).await {
            Ok(_) => {
                ctx.log_info(format!("Restored {}", previous));
                RollbackOutcome::RolledBack {
                    restored_image: previous,
                }
            }
            Err(reason) => {
                error!("Rollback of {} failed: {}", target.id(), reason);
                RollbackOutcome::Failed {
                    restored_image: Some(previous),
                    reason,
                }
            }
        }
    }
}
