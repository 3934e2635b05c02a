//! Completion notifications for remotely triggered captures.
//!
//! The messaging bridge (MQTT in the device build) subscribes to a
//! [`BroadcastNotifier`] and forwards each [`Notification`] to its broker.

use std::path::Path;

use tokio::sync::broadcast;
use tracing::debug;

/// Topic that receives "viewing" completion messages.
pub const VIEWING_TOPIC: &str = "dawn";

/// Trait for the outbound messaging channel.
pub trait Notifier: Send + Sync {
    fn notify(&self, topic: &str, payload: &str);
}

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub topic: String,
    pub payload: String,
}

/// Notifier that fans messages out over a broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to outbound messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(16)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, topic: &str, payload: &str) {
        let message = Notification {
            topic: topic.to_string(),
            payload: payload.to_string(),
        };
        // Ignore send errors (no subscribers)
        if self.tx.send(message).is_err() {
            debug!("No subscribers for notification on {}", topic);
        }
    }
}

/// Payload reporting that a "viewing" capture finished and where it was saved.
pub fn viewing_completed_payload(path: &Path) -> String {
    serde_json::json!({
        "device": "viewing",
        "action": "completed",
        "value": path.to_string_lossy(),
    })
    .to_string()
}
