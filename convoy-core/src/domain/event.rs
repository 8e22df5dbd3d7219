//! Pipeline lifecycle events

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::fmt;
use uuid::Uuid;

use crate::domain::run::PipelineRun;

/// Lifecycle point an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Started,
    Succeeded,
    Failed,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Event published by the controller for subscribers such as the webhook dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub pipeline_run_id: Uuid,
    pub pipeline: String,
    pub event_type: EventType,
    pub payload: JsonValue,
    pub emitted_at: chrono::DateTime<chrono::Utc>,
}

impl NotificationEvent {
    /// Snapshots a run into an event
    pub fn for_run(run: &PipelineRun, event_type: EventType) -> Self {
        let payload = json!({
            "runId": run.id,
            "pipeline": run.pipeline,
            "buildNumber": run.build_number,
            "status": run.status,
            "stage": run.stage,
            "source": run.source,
            "imageUri": run.image.as_ref().map(|i| i.image_uri.as_str()),
            "error": run.error.as_ref().map(|e| json!({
                "kind": e.kind,
                "message": e.message,
            })),
        });

        Self {
            pipeline_run_id: run.id,
            pipeline: run.pipeline.clone(),
            event_type,
            payload,
            emitted_at: chrono::Utc::now(),
        }
    }
}
