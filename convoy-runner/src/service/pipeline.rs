//! Pipeline controller
//!
//! Owns the run state machine. Drives Source -> Build -> Deploy in order,
//! hands each stage only the previous stage's output, records every
//! transition in the run repository and publishes lifecycle events:
//! one `Started` when a run begins, one `Succeeded` or `Failed` when it ends.

use convoy_core::PipelineError;
use convoy_core::domain::event::{EventType, NotificationEvent};
use convoy_core::domain::run::{PipelineRun, RunError, Stage};
use convoy_core::domain::source::Trigger;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::RunContext;
use crate::repository::RunRepository;
use crate::service::build::BuildStage;
use crate::service::deploy::{DeployStage, ServiceTarget};
use crate::service::events::EventBus;
use crate::service::source::SourceStage;

/// Controller error type
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("run {0} not found")]
    NotFound(Uuid),

    #[error("run storage failed: {0:#}")]
    Repository(#[from] anyhow::Error),
}

/// The stages a controller drives
pub struct Stages {
    pub source: SourceStage,
    pub build: BuildStage,
    pub deploy: DeployStage,
}

/// Drives runs of one pipeline
pub struct PipelineController {
    name: String,
    stages: Stages,
    target: Arc<dyn ServiceTarget>,
    events: EventBus,
    runs: Arc<dyn RunRepository>,
    build_counter: AtomicU64,

    /// Cancellation handles of runs that have not finished
    active: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl PipelineController {
    pub fn new(
        name: String,
        stages: Stages,
        target: Arc<dyn ServiceTarget>,
        events: EventBus,
        runs: Arc<dyn RunRepository>,
    ) -> Self {
        Self {
            name,
            stages,
            target,
            events,
            runs,
            build_counter: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SourceStage {
        &self.stages.source
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Creates a pending run with the next build number
    pub async fn create_run(&self, trigger: Trigger) -> Result<PipelineRun, ControllerError> {
        let build_number = self.build_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let run = PipelineRun::new(self.name.clone(), build_number, trigger);

        self.runs.save(&run).await?;
        self.active_runs().insert(run.id, CancellationToken::new());

        info!(
            "Run created: {} (build {}) for pipeline {}",
            run.id, build_number, self.name
        );
        Ok(run)
    }

    /// Creates a run and executes it to completion
    pub async fn run(&self, trigger: Trigger) -> Result<PipelineRun, ControllerError> {
        let run = self.create_run(trigger).await?;
        Ok(self.execute(run).await)
    }

    /// Creates a run and executes it in the background
    ///
    /// Returns the pending run immediately.
    pub async fn launch(self: &Arc<Self>, trigger: Trigger) -> Result<PipelineRun, ControllerError> {
        let run = self.create_run(trigger).await?;

        let controller = Arc::clone(self);
        let pending = run.clone();
        tokio::spawn(async move {
            controller.execute(pending).await;
        });

        Ok(run)
    }

    /// Executes a pending run until it is terminal
    pub async fn execute(&self, mut run: PipelineRun) -> PipelineRun {
        let token = self
            .active_runs()
            .entry(run.id)
            .or_default()
            .clone();
        let ctx = RunContext::new(run.id, token);

        match self.drive(&mut run, &ctx).await {
            Ok(()) => {
                if let Err(e) = run.succeed() {
                    error!("Run {} cannot complete: {}", run.id, e);
                }
                info!("Run {} succeeded", run.id);
                ctx.log_info("Run succeeded");
                self.checkpoint(&mut run, &ctx).await;
                self.publish(&run, EventType::Succeeded);
            }
            Err(err) => {
                let stage = run.stage;
                warn!("Run {} failed in {:?}: {}", run.id, stage, err);
                ctx.log_error(err.to_string());

                match run.fail(RunError::from_pipeline_error(&err, stage)) {
                    Ok(()) => {
                        self.checkpoint(&mut run, &ctx).await;
                        self.publish(&run, EventType::Failed);
                    }
                    Err(e) => warn!("Run {} already finished: {}", run.id, e),
                }
            }
        }

        self.active_runs().remove(&run.id);
        run
    }

    async fn drive(&self, run: &mut PipelineRun, ctx: &RunContext) -> Result<(), PipelineError> {
        self.advance(run, Stage::Source, ctx).await?;
        self.publish(run, EventType::Started);

        let source = self.stages.source.resolve(&run.trigger, ctx).await?;
        run.source = Some(source.clone());

        self.advance(run, Stage::Build, ctx).await?;
        let output = self
            .stages
            .build
            .build(&source, run.build_number, ctx)
            .await?;
        info!("Run {} pushed image tag {}", run.id, output.tag);
        run.image = Some(output.descriptor);

        self.advance(run, Stage::Deploy, ctx).await?;
        let result = self
            .stages
            .deploy
            .deploy_artifact(&output.artifact_path, self.target.as_ref(), ctx)
            .await?;
        run.deploy = Some(result);

        Ok(())
    }

    /// Enters `stage` unless the run was cancelled while it may still abort
    async fn advance(
        &self,
        run: &mut PipelineRun,
        stage: Stage,
        ctx: &RunContext,
    ) -> Result<(), PipelineError> {
        if ctx.should_abort() {
            return Err(PipelineError::Cancelled(format!("cancelled before {}", stage)));
        }

        run.enter(stage)
            .map_err(|e| PipelineError::Cancelled(format!("run is no longer active: {}", e)))?;

        info!("Run {} entered {}", run.id, stage);
        ctx.log_info(format!("Entering {} stage", stage));
        self.checkpoint(run, ctx).await;
        Ok(())
    }

    /// Persists the run with the logs gathered so far
    async fn checkpoint(&self, run: &mut PipelineRun, ctx: &RunContext) {
        run.logs.extend(ctx.drain_logs());
        if let Err(e) = self.runs.save(run).await {
            error!("Failed to persist run {}: {:#}", run.id, e);
        }
    }

    fn publish(&self, run: &PipelineRun, event_type: EventType) {
        self.events.publish(NotificationEvent::for_run(run, event_type));
    }

    /// Requests cancellation of a run
    ///
    /// Returns false when the run already finished.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, ControllerError> {
        let token = self.active_runs().get(&id).cloned();
        if let Some(token) = token {
            info!("Cancelling run {}", id);
            token.cancel();
            return Ok(true);
        }

        self.get(id).await?;
        Ok(false)
    }

    pub async fn get(&self, id: Uuid) -> Result<PipelineRun, ControllerError> {
        self.runs
            .find(id)
            .await?
            .ok_or(ControllerError::NotFound(id))
    }

    /// All runs, newest first
    pub async fn list(&self) -> Result<Vec<PipelineRun>, ControllerError> {
        Ok(self.runs.list().await?)
    }

    fn active_runs(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRunner, FakeTarget, controller};
    use convoy_core::ErrorKind;
    use convoy_core::domain::run::RunStatus;
    use std::time::Duration;

    const OLD: &str = "registry.local/echo:0000000";

    fn ls_remote(runner: &FakeRunner) {
        runner.respond("git ls-remote", 0, "a1b2c3d4e5f6\trefs/heads/main\n", "");
    }

    #[tokio::test]
    async fn test_successful_run_emits_started_and_succeeded() {
        let runner = Arc::new(FakeRunner::new());
        ls_remote(&runner);
        let target = Arc::new(FakeTarget::new("echo", Some(OLD), 1));
        let controller = controller(runner, target.clone());
        let mut events = controller.events().subscribe();

        let run = controller.run(Trigger::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.build_number, 1);
        assert_eq!(run.source.as_ref().unwrap().revision(), "a1b2c3d4e5f6");
        assert_eq!(
            run.deploy.as_ref().unwrap().image_uri,
            "registry.local/echo:a1b2c3d"
        );
        assert_eq!(target.image().as_deref(), Some("registry.local/echo:a1b2c3d"));
        assert!(!run.logs.is_empty());

        assert_eq!(events.recv().await.unwrap().event_type, EventType::Started);
        assert_eq!(events.recv().await.unwrap().event_type, EventType::Succeeded);
        assert!(events.try_recv().is_err());

        let stored = controller.get(run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_unreachable_source_fails_without_building() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("git ls-remote", 128, "", "could not resolve host");
        let target = Arc::new(FakeTarget::new("echo", Some(OLD), 1));
        let controller = controller(runner.clone(), target.clone());

        let run = controller.run(Trigger::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_kind(), Some(ErrorKind::SourceUnavailable));
        assert_eq!(run.error.as_ref().unwrap().stage, Some(Stage::Source));
        assert_eq!(runner.commands().len(), 1);
        assert!(target.updates().is_empty());
    }

    #[tokio::test]
    async fn test_pinned_version_must_be_a_commit_hash() {
        let runner = Arc::new(FakeRunner::new());
        let target = Arc::new(FakeTarget::new("echo", Some(OLD), 1));
        let controller = controller(runner.clone(), target.clone());

        let run = controller
            .run(Trigger::pinned("HEAD; touch /tmp/pwned"))
            .await
            .unwrap();

        assert_eq!(run.error_kind(), Some(ErrorKind::SourceUnavailable));
        assert!(runner.commands().is_empty());
        assert!(target.updates().is_empty());
    }

    #[tokio::test]
    async fn test_unhealthy_deploy_rolls_back_and_fails_once() {
        let runner = Arc::new(FakeRunner::new());
        ls_remote(&runner);
        let target = Arc::new(FakeTarget::new("echo", Some(OLD), 2));
        target.mark_unhealthy("registry.local/echo:a1b2c3d");
        let controller = controller(runner, target.clone());
        let mut events = controller.events().subscribe();

        let run = controller.run(Trigger::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_kind(), Some(ErrorKind::DeployFailed));
        assert_eq!(run.error.as_ref().unwrap().stage, Some(Stage::Deploy));
        assert_eq!(target.image().as_deref(), Some(OLD));

        let mut failed = 0;
        while let Ok(event) = events.try_recv() {
            if event.event_type == EventType::Failed {
                failed += 1;
            }
        }
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_concurrent_deploys_to_one_target() {
        let runner = Arc::new(FakeRunner::new());
        ls_remote(&runner);
        let target = Arc::new(
            FakeTarget::new("echo", Some(OLD), 1).with_update_delay(Duration::from_millis(100)),
        );
        let controller = Arc::new(controller(runner, target.clone()));

        let (first, second) = tokio::join!(
            controller.run(Trigger::default()),
            controller.run(Trigger::default())
        );
        let mut kinds = vec![first.unwrap().error_kind(), second.unwrap().error_kind()];
        kinds.sort_by_key(|k| k.is_some());

        assert_eq!(kinds, vec![None, Some(ErrorKind::ConcurrentDeployRejected)]);
        assert_eq!(target.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_pending_run_never_starts() {
        let runner = Arc::new(FakeRunner::new());
        let target = Arc::new(FakeTarget::new("echo", Some(OLD), 1));
        let controller = controller(runner.clone(), target);

        let run = controller.create_run(Trigger::default()).await.unwrap();
        assert!(controller.cancel(run.id).await.unwrap());

        let run = controller.execute(run).await;
        assert_eq!(run.error_kind(), Some(ErrorKind::Cancelled));
        assert!(runner.commands().is_empty());

        assert!(!controller.cancel(run.id).await.unwrap());
        assert!(matches!(
            controller.cancel(Uuid::new_v4()).await,
            Err(ControllerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_launch_runs_in_background() {
        let runner = Arc::new(FakeRunner::new());
        ls_remote(&runner);
        let target = Arc::new(FakeTarget::new("echo", None, 1));
        let controller = Arc::new(controller(runner, target));
        let mut events = controller.events().subscribe();

        let pending = controller.launch(Trigger::pinned("ffffffffff")).await.unwrap();
        assert_eq!(pending.status, RunStatus::Pending);

        loop {
            let event = events.recv().await.unwrap();
            if event.event_type != EventType::Started {
                assert_eq!(event.event_type, EventType::Succeeded);
                break;
            }
        }

        let run = controller.get(pending.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.image.unwrap().image_uri, "registry.local/echo:fffffff");
        assert_eq!(controller.list().await.unwrap().len(), 1);
        assert!(run.deploy.unwrap().previous_image.is_none());
    }
}
