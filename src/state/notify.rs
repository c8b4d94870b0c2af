use tokio::sync::broadcast;

/// Part of the lobby view that may need re-rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyChange {
    Presence,
    Readiness,
    Round,
}

/// Local fan-out of [`LobbyChange`] notifications to UI subscribers.
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<LobbyChange>,
}

impl Notifier {
    /// Construct a notifier backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LobbyChange> {
        self.sender.subscribe()
    }

    /// Notify current subscribers, ignoring the absence of any.
    pub fn notify(&self, change: LobbyChange) {
        let _ = self.sender.send(change);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(32)
    }
}
