//! Pipeline run domain types
//!
//! A run moves `Pending -> Running(Source) -> Running(Build) -> Running(Deploy)
//! -> Succeeded`, or to `Failed` from any non-terminal state. The transition
//! methods refuse anything else and leave the record untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::deploy::DeployResult;
use crate::domain::image::ImageDescriptor;
use crate::domain::log::LogEntry;
use crate::domain::source::{SourceReference, Trigger};
use crate::error::{ErrorKind, PipelineError, TransitionError};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Source,
    Build,
    Deploy,
}

impl Stage {
    /// Stage a run must be in before entering this one
    fn predecessor(self) -> Option<Stage> {
        match self {
            Stage::Source => None,
            Stage::Build => Some(Stage::Source),
            Stage::Deploy => Some(Stage::Build),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Run execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Last error recorded on a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    /// Stage that was running when the error occurred
    pub stage: Option<Stage>,
}

impl RunError {
    pub fn from_pipeline_error(error: &PipelineError, stage: Option<Stage>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            stage,
        }
    }
}

/// One execution of a pipeline
///
/// Owned and mutated by the controller that created it; everyone else gets
/// clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline: String,
    pub build_number: u64,
    pub trigger: Trigger,
    pub status: RunStatus,
    pub stage: Option<Stage>,
    pub source: Option<SourceReference>,
    pub image: Option<ImageDescriptor>,
    pub deploy: Option<DeployResult>,
    pub error: Option<RunError>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl PipelineRun {
    /// Creates a pending run
    pub fn new(pipeline: impl Into<String>, build_number: u64, trigger: Trigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            build_number,
            trigger,
            status: RunStatus::Pending,
            stage: None,
            source: None,
            image: None,
            deploy: None,
            error: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            ended_at: None,
            logs: Vec::new(),
        }
    }

    /// Moves the run into `stage`
    ///
    /// Only the next stage in order may be entered; entering `Source` starts
    /// the run.
    pub fn enter(&mut self, stage: Stage) -> Result<(), TransitionError> {
        let allowed = match (self.status, stage.predecessor()) {
            (RunStatus::Pending, None) => true,
            (RunStatus::Running, Some(previous)) => self.stage == Some(previous),
            _ => false,
        };

        if !allowed {
            return Err(self.transition_error(format!("Running({})", stage)));
        }

        if self.status == RunStatus::Pending {
            self.started_at = Some(chrono::Utc::now());
        }
        self.status = RunStatus::Running;
        self.stage = Some(stage);
        Ok(())
    }

    /// Completes the run; only valid once the deploy stage is running
    pub fn succeed(&mut self) -> Result<(), TransitionError> {
        if self.status != RunStatus::Running || self.stage != Some(Stage::Deploy) {
            return Err(self.transition_error("Succeeded".to_string()));
        }

        self.status = RunStatus::Succeeded;
        self.ended_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Fails the run, recording the error
    pub fn fail(&mut self, error: RunError) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.transition_error("Failed".to_string()));
        }

        self.status = RunStatus::Failed;
        self.error = Some(error);
        self.ended_at = Some(chrono::Utc::now());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Kind of the last error, if the run failed
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Wall-clock duration of a finished run
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }

    fn transition_error(&self, to: String) -> TransitionError {
        let from = match self.stage {
            Some(stage) if self.status == RunStatus::Running => format!("Running({})", stage),
            _ => self.status.to_string(),
        };
        TransitionError { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> PipelineRun {
        PipelineRun::new("DevEcho", 1, Trigger::default())
    }

    fn error() -> RunError {
        RunError {
            kind: ErrorKind::BuildFailed,
            message: "boom".to_string(),
            stage: Some(Stage::Build),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = run();
        assert_eq!(run.status, RunStatus::Pending);

        run.enter(Stage::Source).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());

        run.enter(Stage::Build).unwrap();
        run.enter(Stage::Deploy).unwrap();
        run.succeed().unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.is_terminal());
        assert!(run.duration().is_some());
    }

    #[test]
    fn test_stages_cannot_be_skipped() {
        let mut run = run();
        let err = run.enter(Stage::Build).unwrap_err();
        assert_eq!(err.from, "Pending");

        run.enter(Stage::Source).unwrap();
        assert!(run.enter(Stage::Deploy).is_err());
        assert!(run.enter(Stage::Source).is_err());
        assert_eq!(run.stage, Some(Stage::Source));
    }

    #[test]
    fn test_cannot_succeed_before_deploy() {
        let mut run = run();
        run.enter(Stage::Source).unwrap();
        run.enter(Stage::Build).unwrap();
        assert!(run.succeed().is_err());
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut run = run();
        run.enter(Stage::Source).unwrap();
        run.enter(Stage::Build).unwrap();
        run.fail(error()).unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_kind(), Some(ErrorKind::BuildFailed));
        assert!(run.enter(Stage::Deploy).is_err());
        assert!(run.fail(error()).is_err());
        assert!(run.succeed().is_err());
    }

    #[test]
    fn test_pending_run_can_fail() {
        let mut run = run();
        run.fail(error()).unwrap();
        assert!(run.is_terminal());
        assert!(run.duration().is_none());
    }
}
