//! Run event bus
//!
//! Pipeline lifecycle events fan out over a broadcast channel. Publishing
//! never waits for subscribers, so a slow or absent notifier cannot hold a
//! run back.

use convoy_core::domain::event::NotificationEvent;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast channel carrying [`NotificationEvent`]s
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<NotificationEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to every current subscriber
    pub fn publish(&self, event: NotificationEvent) {
        let event_type = event.event_type;
        let run_id = event.pipeline_run_id;
        if self.sender.send(event).is_err() {
            debug!("No subscribers for {} event of run {}", event_type, run_id);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
