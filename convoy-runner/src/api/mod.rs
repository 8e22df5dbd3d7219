//! API Module
//!
//! HTTP API of the runner: trigger, inspect and cancel runs.

pub mod error;
pub mod health;
pub mod runs;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::PipelineController;

/// Create the API router with all endpoints
pub fn create_router(controller: Arc<PipelineController>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/runs", get(runs::list_runs))
        .route("/runs", post(runs::trigger_run))
        .route("/runs/{id}", get(runs::get_run))
        .route("/runs/{id}/cancel", post(runs::cancel_run))
        .with_state(controller)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRunner, FakeTarget, controller};
    use convoy_core::domain::run::{PipelineRun, RunStatus};
    use convoy_core::dto::run::RunSummary;
    use convoy_core::domain::source::Trigger;
    use reqwest::StatusCode;

    async fn serve(controller: Arc<PipelineController>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(controller)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn pipeline() -> Arc<PipelineController> {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("git ls-remote", 0, "a1b2c3d4e5f6\trefs/heads/main\n", "");
        Arc::new(controller(runner, Arc::new(FakeTarget::new("echo", None, 1))))
    }

    #[tokio::test]
    async fn test_health() {
        let base = serve(pipeline()).await;
        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_trigger_and_fetch_run() {
        let controller = pipeline();
        let base = serve(controller.clone()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/runs", base))
            .json(&serde_json::json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let run: PipelineRun = response.json().await.unwrap();
        assert_eq!(run.build_number, 1);

        let fetched: PipelineRun = client
            .get(format!("{}/runs/{}", base, run.id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(fetched.id, run.id);

        let runs: Vec<RunSummary> = client
            .get(format!("{}/runs", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let controller = pipeline();
        let base = serve(controller.clone()).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{}/runs/{}", base, uuid::Uuid::new_v4()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let response = client
            .post(format!("{}/runs", base))
            .json(&serde_json::json!({ "source_version": " " }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = client
            .post(format!("{}/runs", base))
            .json(&serde_json::json!({ "source_version": "HEAD; touch /tmp/pwned" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(controller.list().await.unwrap().is_empty());

        let finished = controller.run(Trigger::default()).await.unwrap();
        assert_eq!(finished.status, RunStatus::Succeeded);
        let response = client
            .post(format!("{}/runs/{}/cancel", base, finished.id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
