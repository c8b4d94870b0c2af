use tracing::debug;

use crate::{
    dao::models::Table,
    dto::sse::{ChangeEvent, ChangeKind, ServerEvent, SystemStatus},
    state::SharedState,
};

/// Tell push subscribers that rows of `table` changed.
pub fn publish(state: &SharedState, table: Table, kind: ChangeKind, session_id: Option<&str>) {
    let change = ChangeEvent {
        topic: table.into(),
        kind,
        session_id: session_id.map(str::to_owned),
    };
    debug!(topic = ?change.topic, kind = ?change.kind, session_id = ?change.session_id, "publishing change");
    state.changes().publish_change(&change);
}

/// Broadcast the relay's degraded flag on the change stream as a `status` event.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    if let Ok(event) = ServerEvent::json(Some("status".to_string()), &SystemStatus { degraded }) {
        state.changes().broadcast(event);
    }
}

/// Forward degraded-mode transitions to push subscribers until the relay shuts down.
pub async fn forward_degraded_changes(state: SharedState) {
    let mut watcher = state.degraded_watcher();
    while watcher.changed().await.is_ok() {
        let degraded = *watcher.borrow_and_update();
        broadcast_system_status(&state, degraded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dto::sse::Topic,
        state::{AppState, PublicEndpoints},
    };

    #[tokio::test]
    async fn changes_are_encoded_under_their_topic() {
        let state = AppState::new(AppConfig::default(), PublicEndpoints::default());
        let mut receiver = state.changes().subscribe();

        publish(&state, Table::Readiness, ChangeKind::Delete, Some("alice"));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some("readiness"));
        let decoded: ChangeEvent = serde_json::from_str(&event.data).unwrap();
        assert_eq!(decoded.topic, Topic::Readiness);
        assert_eq!(decoded.session_id.as_deref(), Some("alice"));
    }
}
