//! Build stage
//!
//! Turns a resolved source reference into a pushed, tagged image and the
//! deployment descriptor naming it. Steps of the rendered build
//! specification run in order through the [`CommandRunner`]; the first
//! failing step fails the stage. At most one build per image repository is
//! in flight, so pushes of `latest` never interleave.

use convoy_core::PipelineError;
use convoy_core::domain::build_spec::{BuildParameters, BuildSpecification, Step};
use convoy_core::domain::image::{IMAGE_DEFINITIONS_FILE, ImageDescriptor, ImageTag};
use convoy_core::domain::source::SourceReference;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::service::deploy::DeployGate;
use crate::shell::{CommandRunner, CommandSpec};

/// Result of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub tag: ImageTag,
    pub descriptor: ImageDescriptor,
    /// Descriptor artifact handed to the deploy stage
    pub artifact_path: PathBuf,
}

/// Build stage of a pipeline
pub struct BuildStage {
    runner: Arc<dyn CommandRunner>,
    params: BuildParameters,
    code_repository: Option<String>,
    context_dir: String,
    workspace: PathBuf,
    artifacts_dir: PathBuf,
    gate: DeployGate,
}

impl BuildStage {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        params: BuildParameters,
        code_repository: Option<String>,
        context_dir: String,
        workspace: PathBuf,
        artifacts_dir: PathBuf,
    ) -> Self {
        Self {
            runner,
            params,
            code_repository,
            context_dir,
            workspace,
            artifacts_dir,
            gate: DeployGate::new(),
        }
    }

    /// Builds, tags and pushes the image for `source`
    ///
    /// Writes the descriptor to `<artifacts>/<run id>/imagedefinitions.json`
    /// once every step has succeeded. Nothing is written on failure. A tag
    /// that cannot be derived fails the stage before any step runs; a build
    /// already in flight for the same repository rejects this one.
    pub async fn build(
        &self,
        source: &SourceReference,
        build_number: u64,
        ctx: &RunContext,
    ) -> Result<BuildOutput, PipelineError> {
        let tag = ImageTag::for_source(source, build_number)
            .map_err(|e| PipelineError::BuildFailed(format!("cannot tag {}: {}", source, e)))?;
        let _permit = self.gate.try_acquire(&self.params.repository.to_string())?;
        let spec = BuildSpecification::for_source(source.kind(), &self.params);

        info!("Building {} as {}", source, tag);
        ctx.log_info(format!("Building {} with image tag {}", source, tag));

        let mut env = spec.env().clone();
        env.insert("IMAGE_TAG".to_string(), tag.to_string());

        let run_dir = self.workspace.join(ctx.run_id().to_string());
        tokio::fs::create_dir_all(&run_dir).await.map_err(|e| {
            PipelineError::BuildFailed(format!(
                "cannot create workspace {}: {}",
                run_dir.display(),
                e
            ))
        })?;

        let result = self.build_in(source, &spec, &env, &run_dir, ctx).await;

        if let Err(e) = tokio::fs::remove_dir_all(&run_dir).await {
            warn!("Failed to clean workspace {}: {}", run_dir.display(), e);
        }
        result?;

        let descriptor =
            ImageDescriptor::new(&self.params.service_name, &self.params.repository, &tag);
        let artifact_path = self.write_descriptor(&descriptor, ctx).await?;

        ctx.log_info(format!(
            "Wrote {} for {}",
            artifact_path.display(),
            descriptor.image_uri
        ));

        Ok(BuildOutput {
            tag,
            descriptor,
            artifact_path,
        })
    }

    async fn build_in(
        &self,
        source: &SourceReference,
        spec: &BuildSpecification,
        env: &BTreeMap<String, String>,
        run_dir: &Path,
        ctx: &RunContext,
    ) -> Result<(), PipelineError> {
        let cwd = match source {
            SourceReference::Vcs {
                branch,
                commit_hash,
            } => {
                self.checkout(branch, commit_hash, run_dir, ctx).await?;
                run_dir.join("src").join(&self.context_dir)
            }
            SourceReference::Registry { .. } => run_dir.to_path_buf(),
        };

        for (phase, step) in spec.steps() {
            if ctx.should_abort() {
                return Err(PipelineError::Cancelled(format!(
                    "cancelled during {} phase",
                    phase
                )));
            }

            let command = step.command();
            ctx.log_info(format!("[{}] {}", phase, command));

            let invocation = CommandSpec::new(command).cwd(&cwd).envs(env);
            let output = self.runner.run(&invocation).await.map_err(|e| {
                PipelineError::BuildFailed(format!("{}: `{}` failed to start: {:#}", phase, command, e))
            })?;

            for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
                ctx.log_debug(line.to_string());
            }

            if !output.success() {
                ctx.log_error(format!(
                    "[{}] exited with {}: {}",
                    phase,
                    output.exit_code,
                    output.stderr.trim()
                ));
                let message = format!("{}: `{}` exited with {}", phase, command, output.exit_code);
                return Err(match step {
                    Step::Auth(_) => PipelineError::AuthFailed(message),
                    Step::Run(_) | Step::Push(_) => PipelineError::BuildFailed(message),
                });
            }

            if matches!(step, Step::Push(_)) {
                ctx.mark_irreversible();
            }
        }

        Ok(())
    }

    /// Clones the branch and checks out the exact commit being built
    async fn checkout(
        &self,
        branch: &str,
        commit_hash: &str,
        run_dir: &Path,
        ctx: &RunContext,
    ) -> Result<(), PipelineError> {
        let repository = self.code_repository.as_deref().ok_or_else(|| {
            PipelineError::BuildFailed("no code repository configured".to_string())
        })?;

        let mut commands = vec![
            CommandSpec::exec(
                "git",
                ["clone", "--quiet", "--branch", branch, repository, "src"],
            )
            .cwd(run_dir),
        ];

        if !commit_hash.is_empty() {
            commands.push(
                CommandSpec::exec("git", ["checkout", "--quiet", commit_hash])
                    .cwd(run_dir.join("src")),
            );
        }

        for spec in commands {
            debug!("Checkout: {}", spec.line);
            ctx.log_info(format!("[checkout] {}", spec.line));

            let output = self.runner.run(&spec).await.map_err(|e| {
                PipelineError::BuildFailed(format!("checkout failed to start: {:#}", e))
            })?;

            if !output.success() {
                return Err(PipelineError::BuildFailed(format!(
                    "checkout: `{}` exited with {}: {}",
                    spec.line,
                    output.exit_code,
                    output.stderr.trim()
                )));
            }
        }

        Ok(())
    }

    async fn write_descriptor(
        &self,
        descriptor: &ImageDescriptor,
        ctx: &RunContext,
    ) -> Result<PathBuf, PipelineError> {
        let dir = self.artifacts_dir.join(ctx.run_id().to_string());
        let path = dir.join(IMAGE_DEFINITIONS_FILE);

        let json = descriptor
            .to_definitions_json()
            .map_err(|e| PipelineError::BuildFailed(e.to_string()))?;

        let write_failed =
            |e: std::io::Error| PipelineError::BuildFailed(format!("cannot write {}: {}", path.display(), e));

        tokio::fs::create_dir_all(&dir).await.map_err(write_failed)?;
        tokio::fs::write(&path, json).await.map_err(write_failed)?;

        Ok(path)
    }
}
