//! Notification dispatcher
//!
//! Subscribes to the event bus and forwards each lifecycle event to a
//! webhook as `{"text": ...}` with the payload quoted in a code block.
//! Delivery failures are logged and dropped; they never reach the run.

use convoy_core::ErrorKind;
use convoy_core::domain::event::NotificationEvent;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Webhook delivery failure
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook answered with status {0}")]
    Status(reqwest::StatusCode),
}

/// Forwards lifecycle events to a webhook
pub struct NotificationDispatcher {
    hook_url: Option<String>,
    namespace: String,
    client: Client,
}

impl NotificationDispatcher {
    pub fn new(hook_url: Option<String>, namespace: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            hook_url,
            namespace,
            client,
        }
    }

    /// Human-readable webhook body for an event
    pub fn format_message(&self, event: &NotificationEvent) -> serde_json::Value {
        let payload = serde_json::to_string_pretty(&event.payload)
            .unwrap_or_else(|_| event.payload.to_string());

        json!({
            "text": format!(
                "[{}] {} run {} {}\n```\n{}\n```",
                self.namespace, event.pipeline, event.pipeline_run_id, event.event_type, payload
            )
        })
    }

    /// Logs the event and posts it to the webhook, if one is configured
    ///
    /// Never fails: delivery errors are logged as `NotificationDeliveryFailed`.
    pub async fn notify(&self, event: &NotificationEvent) {
        info!(
            run_id = %event.pipeline_run_id,
            event = %event.event_type,
            "Pipeline {} run {} {}",
            event.pipeline,
            event.pipeline_run_id,
            event.event_type
        );

        let Some(url) = &self.hook_url else {
            debug!("No webhook configured; skipping delivery");
            return;
        };

        if let Err(e) = self.deliver(url, event).await {
            warn!(
                kind = %ErrorKind::NotificationDeliveryFailed,
                run_id = %event.pipeline_run_id,
                "Failed to deliver notification: {}",
                e
            );
        }
    }

    async fn deliver(&self, url: &str, event: &NotificationEvent) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .json(&self.format_message(event))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status()));
        }

        debug!("Delivered {} event of run {}", event.event_type, event.pipeline_run_id);
        Ok(())
    }

    /// Delivers events from `events` until cancelled or the bus closes
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<NotificationEvent>,
        cancel: CancellationToken,
    ) {
        info!("Starting notification dispatcher");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Notification dispatcher shutdown requested");
                    break;
                }
                received = events.recv() => {
                    match received {
                        Ok(event) => self.notify(&event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Notification dispatcher lagged, {} event(s) dropped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }

        info!("Notification dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::events::EventBus;
    use axum::Json;
    use axum::extract::State;
    use axum::routing::post;
    use convoy_core::domain::event::EventType;
    use convoy_core::domain::run::PipelineRun;
    use convoy_core::domain::source::Trigger;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn event(event_type: EventType) -> NotificationEvent {
        let run = PipelineRun::new("DevEcho", 3, Trigger::default());
        NotificationEvent::for_run(&run, event_type)
    }

    async fn hook() -> (String, mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = axum::Router::new()
            .route(
                "/hook",
                post(
                    |State(tx): State<Arc<mpsc::UnboundedSender<serde_json::Value>>>,
                     Json(body): Json<serde_json::Value>| async move {
                        let _ = tx.send(body);
                        "ok"
                    },
                ),
            )
            .with_state(Arc::new(tx));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/hook", addr), rx)
    }

    #[test]
    fn test_message_quotes_payload() {
        let dispatcher = NotificationDispatcher::new(None, "Dev".to_string());
        let event = event(EventType::Started);

        let message = dispatcher.format_message(&event);
        let text = message["text"].as_str().unwrap();

        assert!(text.starts_with(&format!("[Dev] DevEcho run {} Started", event.pipeline_run_id)));
        assert!(text.contains("```\n{"));
        assert!(text.contains("\"buildNumber\": 3"));
        assert!(text.ends_with("}\n```"));
    }

    #[tokio::test]
    async fn test_notify_posts_to_webhook() {
        let (url, mut received) = hook().await;
        let dispatcher = NotificationDispatcher::new(Some(url), "Dev".to_string());

        dispatcher.notify(&event(EventType::Succeeded)).await;

        let body = received.recv().await.unwrap();
        assert!(body["text"].as_str().unwrap().contains("Succeeded"));
    }

    #[tokio::test]
    async fn test_notify_swallows_unreachable_webhook() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dispatcher =
            NotificationDispatcher::new(Some(format!("http://{}/hook", addr)), "Dev".to_string());
        dispatcher.notify(&event(EventType::Failed)).await;

        let dispatcher = NotificationDispatcher::new(None, "Dev".to_string());
        dispatcher.notify(&event(EventType::Failed)).await;
    }

    #[tokio::test]
    async fn test_run_forwards_bus_events_until_cancelled() {
        let (url, mut received) = hook().await;
        let dispatcher = Arc::new(NotificationDispatcher::new(Some(url), "Dev".to_string()));
        let bus = EventBus::new();
        let cancel = CancellationToken::new();

        let task = {
            let dispatcher = dispatcher.clone();
            let rx = bus.subscribe();
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatcher.run(rx, cancel).await })
        };

        bus.publish(event(EventType::Started));
        let body = received.recv().await.unwrap();
        assert!(body["text"].as_str().unwrap().contains("Started"));

        cancel.cancel();
        task.await.unwrap();
    }
}
