//! Request and response bodies of the relay's `/api` lobby endpoints.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use validator::Validate;

use crate::dao::models::{PresenceRecord, ReadinessRecord, ReadinessRole};
use crate::dto::validation::validate_session_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OnlineAction {
    /// Upsert the caller's presence heartbeat.
    Save,
    /// Remove the caller's presence record.
    Remove,
}

/// Presence write issued by a browser session.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct OnlineActionRequest {
    pub action: OnlineAction,
    #[validate(custom(function = "validate_session_id"))]
    pub session_id: String,
    #[serde(default)]
    pub is_guest: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReadyAction {
    Add,
    Remove,
    /// Empty the readiness set.
    Clear,
}

/// Session declaring or retracting readiness.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ReadyPlayerInput {
    #[validate(custom(function = "validate_session_id"))]
    pub session_id: String,
    #[serde(default)]
    pub role: ReadinessRole,
    /// Required when `role` is `host`.
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub role_mode: Option<String>,
}

/// Readiness write issued by a browser session.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ReadyActionRequest {
    pub action: ReadyAction,
    /// Required for `add` and `remove`.
    #[serde(default)]
    #[validate(nested)]
    pub player: Option<ReadyPlayerInput>,
}

/// Generic acknowledgement of a write.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl ActionResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }
}

/// Sessions seen within the presence TTL, one entry per session.
#[derive(Debug, Serialize, ToSchema)]
pub struct OnlineUsersResponse {
    pub users: Vec<PresenceRecord>,
    /// Entries that are not guests.
    pub authorized_count: usize,
}

/// Current readiness set with the start bounds.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyPlayersResponse {
    pub players: Vec<ReadinessRecord>,
    pub count: usize,
    pub startable: bool,
    pub min: usize,
    pub max: usize,
}

/// Endpoints a browser client needs to reach the record store and the push stream.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
pub struct PublicConfigResponse {
    pub store_url: String,
    pub anon_key: Option<String>,
    pub push_path: String,
}
