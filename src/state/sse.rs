use tokio::sync::broadcast;
use tracing::warn;

use crate::dto::sse::{ChangeEvent, ServerEvent};

/// Broadcast hub behind the relay's `/sse/changes` stream.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }

    /// Encode and broadcast a record change under its topic's event name.
    pub fn publish_change(&self, change: &ChangeEvent) {
        match change.to_server_event() {
            Ok(event) => self.broadcast(event),
            Err(err) => warn!(error = %err, "failed to encode change event"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
