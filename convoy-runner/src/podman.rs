//! Container engine commands
//!
//! Thin wrapper over the engine CLI (podman by default) used by the source
//! adapter and the replica target:
//! - Checking engine availability
//! - Pulling images and reading their digests
//! - Starting, inspecting and removing service containers

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::shell::{CommandOutput, CommandRunner, CommandSpec};

/// Container engine CLI
#[derive(Clone)]
pub struct ContainerCli {
    engine: String,
    runner: Arc<dyn CommandRunner>,
}

impl ContainerCli {
    pub fn new(engine: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            engine: engine.into(),
            runner,
        }
    }

    /// Checks that the engine is installed and answering
    pub async fn check_available(&self) -> Result<()> {
        let output = self
            .exec(&format!("{} --version", self.engine))
            .await
            .with_context(|| format!("Failed to execute '{} --version'", self.engine))?;

        if !output.success() {
            anyhow::bail!("{} is not working correctly", self.engine);
        }

        info!("{} is available: {}", self.engine, output.stdout.trim());
        Ok(())
    }

    /// Pulls an image reference
    pub async fn pull(&self, image: &str) -> Result<()> {
        let output = self.exec(&format!("{} pull {}", self.engine, image)).await?;
        if !output.success() {
            anyhow::bail!("pull of {} failed: {}", image, output.stderr.trim());
        }
        Ok(())
    }

    /// Content digest of a local image
    pub async fn image_digest(&self, image: &str) -> Result<String> {
        let output = self
            .exec(&format!(
                "{} image inspect --format '{{{{.Id}}}}' {}",
                self.engine, image
            ))
            .await?;

        let digest = output.stdout.trim();
        if !output.success() || digest.is_empty() {
            anyhow::bail!("cannot inspect image {}: {}", image, output.stderr.trim());
        }
        Ok(digest.to_string())
    }

    /// Image a container was started from; `None` when the container does not exist
    pub async fn container_image(&self, name: &str) -> Result<Option<String>> {
        let output = self
            .exec(&format!(
                "{} container inspect --format '{{{{.Config.Image}}}}' {}",
                self.engine, name
            ))
            .await?;

        let image = output.stdout.trim();
        if !output.success() || image.is_empty() {
            return Ok(None);
        }
        Ok(Some(image.to_string()))
    }

    /// Starts a detached container publishing `host_port` to `container_port`
    pub async fn run_detached(
        &self,
        name: &str,
        image: &str,
        host_port: u16,
        container_port: u16,
    ) -> Result<()> {
        info!("Starting container {} from {}", name, image);

        let output = self
            .exec(&format!(
                "{} run -d --name {} -p {}:{} {}",
                self.engine, name, host_port, container_port, image
            ))
            .await?;

        if !output.success() {
            anyhow::bail!(
                "failed to start container {}: {}",
                name,
                output.stderr.trim()
            );
        }
        Ok(())
    }

    /// Force-removes a container; a missing container is not an error
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.exec(&format!("{} rm -f {}", self.engine, name))
            .await?;
        Ok(())
    }

    async fn exec(&self, line: &str) -> Result<CommandOutput> {
        let output = self.runner.run(&CommandSpec::new(line)).await?;

        // Always log stdout/stderr as debug
        if !output.stdout.trim().is_empty() {
            debug!("{} stdout: {}", self.engine, output.stdout.trim());
        }
        if !output.stderr.trim().is_empty() {
            debug!("{} stderr: {}", self.engine, output.stderr.trim());
        }

        Ok(output)
    }
}
