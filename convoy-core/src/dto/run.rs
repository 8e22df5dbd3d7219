//! Run DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunStatus, Stage};
use crate::domain::source::Trigger;
use crate::error::ErrorKind;

/// Request to trigger a new run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerRun {
    /// Pin the run to this source version instead of resolving the head
    #[serde(default)]
    pub source_version: Option<String>,
}

impl From<TriggerRun> for Trigger {
    fn from(req: TriggerRun) -> Self {
        Trigger {
            source_version: req.source_version,
        }
    }
}

/// Run summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub pipeline: String,
    pub build_number: u64,
    pub status: RunStatus,
    pub stage: Option<Stage>,
    pub error_kind: Option<ErrorKind>,
    pub image_uri: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            id: run.id,
            pipeline: run.pipeline.clone(),
            build_number: run.build_number,
            status: run.status,
            stage: run.stage,
            error_kind: run.error_kind(),
            image_uri: run.image.as_ref().map(|i| i.image_uri.clone()),
            created_at: run.created_at,
            ended_at: run.ended_at,
        }
    }
}

/// Accepted cancellation request
///
/// The run stops at its next cancellation point; poll it for the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRun {
    pub id: Uuid,
    pub requested_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_summary_conversion() {
        let run = PipelineRun::new("DevEcho", 7, Trigger::pinned("abc"));
        let summary = RunSummary::from(&run);

        assert_eq!(summary.id, run.id);
        assert_eq!(summary.build_number, 7);
        assert_eq!(summary.status, RunStatus::Pending);
        assert!(summary.error_kind.is_none());
    }

    #[test]
    fn test_trigger_request_defaults() {
        let req: TriggerRun = serde_json::from_str("{}").unwrap();
        let trigger: Trigger = req.into();
        assert_eq!(trigger, Trigger::default());
    }
}
