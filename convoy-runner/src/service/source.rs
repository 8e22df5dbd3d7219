//! Artifact source adapter
//!
//! Resolves a trigger into the exact change a run builds from:
//! - VCS: head commit of the configured branch (`git ls-remote`)
//! - Registry: digest of the image currently tagged `latest`
//!
//! A resolution failure stops the run before any build step executes.

use convoy_core::PipelineError;
use convoy_core::domain::image::{LATEST_TAG, RepositoryUri};
use convoy_core::domain::source::{SourceReference, Trigger, is_commit_hash};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::podman::ContainerCli;
use crate::shell::{CommandRunner, CommandSpec};

/// Git repository and branch a VCS pipeline follows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsSource {
    pub repository: String,
    pub branch: String,
}

/// Image repository a registry pipeline promotes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySource {
    pub repository: RepositoryUri,
}

/// The configured source variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceAdapter {
    Vcs(VcsSource),
    Registry(RegistrySource),
}

/// Source stage of a pipeline
pub struct SourceStage {
    adapter: SourceAdapter,
    runner: Arc<dyn CommandRunner>,
    cli: ContainerCli,
}

impl SourceStage {
    pub fn new(adapter: SourceAdapter, runner: Arc<dyn CommandRunner>, cli: ContainerCli) -> Self {
        Self {
            adapter,
            runner,
            cli,
        }
    }

    /// Resolves the change a run will build
    ///
    /// A VCS trigger carrying a source version is pinned to it without
    /// contacting the repository; the version must be a commit hash.
    /// Registry triggers always resolve the current `latest` image.
    pub async fn resolve(
        &self,
        trigger: &Trigger,
        ctx: &RunContext,
    ) -> Result<SourceReference, PipelineError> {
        let reference = match &self.adapter {
            SourceAdapter::Vcs(vcs) => match &trigger.source_version {
                Some(version) if !is_commit_hash(version) => {
                    return Err(PipelineError::SourceUnavailable(format!(
                        "'{}' is not a commit hash",
                        version
                    )));
                }
                Some(version) => SourceReference::Vcs {
                    branch: vcs.branch.clone(),
                    commit_hash: version.clone(),
                },
                None => self.resolve_vcs(vcs).await?,
            },
            SourceAdapter::Registry(registry) => {
                if let Some(version) = &trigger.source_version {
                    warn!(
                        "Ignoring pinned version {} for registry source {}",
                        version, registry.repository
                    );
                    ctx.log_warning(format!(
                        "Registry sources always promote {}; ignoring requested version {}",
                        LATEST_TAG, version
                    ));
                }
                self.resolve_registry(registry).await?
            }
        };

        info!("Resolved source {}", reference);
        ctx.log_info(format!("Resolved source {}", reference));
        Ok(reference)
    }

    /// Reads the current revision without going through a run
    ///
    /// Used by the watcher to detect changes.
    pub async fn head(&self) -> Result<SourceReference, PipelineError> {
        match &self.adapter {
            SourceAdapter::Vcs(vcs) => self.resolve_vcs(vcs).await,
            SourceAdapter::Registry(registry) => self.resolve_registry(registry).await,
        }
    }

    async fn resolve_vcs(&self, vcs: &VcsSource) -> Result<SourceReference, PipelineError> {
        let command = CommandSpec::exec(
            "git",
            [
                "ls-remote".to_string(),
                vcs.repository.clone(),
                format!("refs/heads/{}", vcs.branch),
            ],
        );
        debug!("Resolving head of {}", vcs.branch);

        let output = self
            .runner
            .run(&command)
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("{:#}", e)))?;

        if !output.success() {
            return Err(PipelineError::SourceUnavailable(format!(
                "git ls-remote {} exited with {}: {}",
                vcs.repository,
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let commit_hash = output
            .stdout
            .lines()
            .find_map(|line| line.split_whitespace().next())
            .filter(|hash| is_commit_hash(hash))
            .map(str::to_string)
            .ok_or_else(|| {
                PipelineError::SourceUnavailable(format!(
                    "branch '{}' not found in {}",
                    vcs.branch, vcs.repository
                ))
            })?;

        Ok(SourceReference::Vcs {
            branch: vcs.branch.clone(),
            commit_hash,
        })
    }

    async fn resolve_registry(
        &self,
        registry: &RegistrySource,
    ) -> Result<SourceReference, PipelineError> {
        let image = registry.repository.image(LATEST_TAG);

        self.cli
            .pull(&image)
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("{:#}", e)))?;

        let digest = self
            .cli
            .image_digest(&image)
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("{:#}", e)))?;

        Ok(SourceReference::Registry {
            image_tag: LATEST_TAG.to_string(),
            digest: Some(digest),
        })
    }
}
