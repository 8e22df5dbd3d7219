//! Run API Handlers
//!
//! HTTP endpoints for triggering, inspecting and cancelling runs.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use convoy_core::domain::run::PipelineRun;
use convoy_core::domain::source::is_commit_hash;
use convoy_core::dto::run::{CancelRun, RunSummary, TriggerRun};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::service::PipelineController;

/// POST /runs
/// Trigger a new run; it executes in the background
pub async fn trigger_run(
    State(controller): State<Arc<PipelineController>>,
    Json(req): Json<TriggerRun>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    if req.source_version.as_deref().is_some_and(|v| !is_commit_hash(v)) {
        return Err(ApiError::BadRequest(
            "source_version must be a commit hash of 7 to 40 hex digits".to_string(),
        ));
    }

    tracing::info!("Triggering run of {}", controller.name());

    let run = controller.launch(req.into()).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// GET /runs
/// List runs, newest first
pub async fn list_runs(
    State(controller): State<Arc<PipelineController>>,
) -> ApiResult<Json<Vec<RunSummary>>> {
    tracing::debug!("Listing runs");

    let runs = controller.list().await?;
    Ok(Json(runs.iter().map(RunSummary::from).collect()))
}

/// GET /runs/{id}
/// Get run details, logs included
pub async fn get_run(
    State(controller): State<Arc<PipelineController>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run: {}", id);

    Ok(Json(controller.get(id).await?))
}

/// POST /runs/{id}/cancel
/// Request cancellation of an unfinished run
pub async fn cancel_run(
    State(controller): State<Arc<PipelineController>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelRun>> {
    if !controller.cancel(id).await? {
        return Err(ApiError::Conflict(format!("Run {} already finished", id)));
    }

    Ok(Json(CancelRun {
        id,
        requested_at: chrono::Utc::now(),
    }))
}
