//! Run-related API endpoints

use crate::RunnerClient;
use crate::error::Result;
use convoy_core::domain::run::PipelineRun;
use convoy_core::dto::run::{CancelRun, RunSummary, TriggerRun};
use uuid::Uuid;

impl RunnerClient {
    /// Check that the runner is up
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// Trigger a new run
    ///
    /// The runner answers immediately with the pending run; poll
    /// [`get_run`](Self::get_run) for its progress.
    pub async fn trigger_run(&self, req: TriggerRun) -> Result<PipelineRun> {
        let url = format!("{}/runs", self.base_url);
        tracing::debug!("Triggering run via {}", url);
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Get a run by ID, logs included
    pub async fn get_run(&self, id: Uuid) -> Result<PipelineRun> {
        let url = format!("{}/runs/{}", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List runs, newest first
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let url = format!("{}/runs", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Request cancellation of an unfinished run
    ///
    /// Fails with status 409 when the run already finished.
    pub async fn cancel_run(&self, id: Uuid) -> Result<CancelRun> {
        let url = format!("{}/runs/{}/cancel", self.base_url, id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }
}
