use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::dao::models::Table;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

/// Event sent to a change subscriber that fell behind; clients resync every topic.
pub const LAGGED_EVENT: &str = "lagged";

/// Change topic a push subscriber listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Presence records changed.
    Presence,
    /// Readiness records changed.
    Readiness,
}

impl Topic {
    /// SSE event name used for this topic.
    pub fn event_name(self) -> &'static str {
        match self {
            Topic::Presence => "presence",
            Topic::Readiness => "readiness",
        }
    }

    /// Resolve a topic from its SSE event name.
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "presence" => Some(Topic::Presence),
            "readiness" => Some(Topic::Readiness),
            _ => None,
        }
    }
}

impl From<Table> for Topic {
    fn from(value: Table) -> Self {
        match value {
            Table::Presence => Topic::Presence,
            Table::Readiness => Topic::Readiness,
        }
    }
}

/// Kind of write that produced a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A row was inserted.
    Insert,
    /// Rows were patched.
    Update,
    /// Rows were deleted.
    Delete,
}

/// Broadcast whenever a presence or readiness row may have changed.
///
/// Consumers never apply the payload; they re-pull authoritative state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChangeEvent {
    /// Record kind that changed.
    pub topic: Topic,
    /// Type of write.
    pub kind: ChangeKind,
    /// Key of the affected session, when the write targeted a single key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ChangeEvent {
    /// Encode the event for the SSE wire, naming it after its topic.
    pub fn to_server_event(&self) -> serde_json::Result<ServerEvent> {
        ServerEvent::json(Some(self.topic.event_name().to_string()), self)
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the relay enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}
