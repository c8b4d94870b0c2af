//! Presence and readiness endpoints for browser clients that do not talk to the store directly.

use tracing::info;

use crate::{
    dao::models::{ReadinessRole, Table},
    dto::{
        lobby::{
            ActionResponse, OnlineAction, OnlineActionRequest, OnlineUsersResponse,
            PublicConfigResponse, ReadyAction, ReadyActionRequest, ReadyPlayersResponse,
        },
        sse::ChangeKind,
    },
    error::ServiceError,
    services::change_events,
    state::{SharedState, presence::count_authorized, reconcile::reconcile},
};

/// Path of the push stream relative to the relay's base URL.
pub const PUSH_PATH: &str = "/sse/changes";

/// Sessions seen within the presence TTL, deduplicated.
pub async fn online_users(state: &SharedState) -> Result<OnlineUsersResponse, ServiceError> {
    let now = state.clock().now();
    let cutoff = now - state.config().lobby.presence_ttl;
    let client = state.client().await?;

    let users: Vec<_> = reconcile(client.read_presence(cutoff).await?)
        .into_iter()
        .filter(|record| record.last_seen_at > cutoff)
        .collect();
    Ok(OnlineUsersResponse {
        authorized_count: count_authorized(&users),
        users,
    })
}

pub async fn apply_online_action(
    state: &SharedState,
    request: OnlineActionRequest,
) -> Result<ActionResponse, ServiceError> {
    let client = state.client().await?;
    match request.action {
        OnlineAction::Save => {
            client
                .upsert_presence(&request.session_id, request.is_guest, state.clock().now())
                .await?;
            change_events::publish(state, Table::Presence, ChangeKind::Update, Some(&request.session_id));
        }
        OnlineAction::Remove => {
            client.delete_presence(&request.session_id).await?;
            change_events::publish(state, Table::Presence, ChangeKind::Delete, Some(&request.session_id));
        }
    }
    Ok(ActionResponse::ok())
}

/// Current readiness set, deduplicated, with the start bounds.
pub async fn ready_players(state: &SharedState) -> Result<ReadyPlayersResponse, ServiceError> {
    let client = state.client().await?;
    let players = reconcile(client.read_readiness().await?);
    let bounds = state.config().lobby.bounds;
    Ok(ReadyPlayersResponse {
        count: players.len(),
        startable: bounds.contains(players.len()),
        min: bounds.min,
        max: bounds.max,
        players,
    })
}

pub async fn apply_ready_action(
    state: &SharedState,
    request: ReadyActionRequest,
) -> Result<ActionResponse, ServiceError> {
    let client = state.client().await?;
    match request.action {
        ReadyAction::Add => {
            let player = request
                .player
                .ok_or_else(|| ServiceError::InvalidInput("player is required for add".into()))?;
            let role_mode = match player.role {
                ReadinessRole::Host => Some(player.role_mode.as_deref().ok_or_else(|| {
                    ServiceError::InvalidInput("role_mode is required for host".into())
                })?),
                ReadinessRole::Participant => None,
            };
            client
                .upsert_readiness(&player.session_id, player.role, role_mode, state.clock().now())
                .await?;
            change_events::publish(state, Table::Readiness, ChangeKind::Update, Some(&player.session_id));
            Ok(ActionResponse::ok())
        }
        ReadyAction::Remove => {
            let player = request
                .player
                .ok_or_else(|| ServiceError::InvalidInput("player is required for remove".into()))?;
            client.delete_readiness(&player.session_id).await?;
            change_events::publish(state, Table::Readiness, ChangeKind::Delete, Some(&player.session_id));
            Ok(ActionResponse::ok())
        }
        ReadyAction::Clear => {
            client.clear_readiness().await?;
            change_events::publish(state, Table::Readiness, ChangeKind::Delete, None);
            info!("readiness cleared through the relay");
            Ok(ActionResponse::with_message("readiness cleared"))
        }
    }
}

/// Endpoints advertised to clients. Fails when no store URL was configured.
pub fn public_config(state: &SharedState) -> Result<PublicConfigResponse, ServiceError> {
    let endpoints = state.endpoints();
    let store_url = endpoints
        .store_url
        .clone()
        .ok_or_else(|| ServiceError::NotConfigured("PUBLIC_STORE_URL is not set".into()))?;
    Ok(PublicConfigResponse {
        store_url,
        anon_key: endpoints.anon_key.clone(),
        push_path: PUSH_PATH.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use time::macros::datetime;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::record_store::memory::MemoryRecordStore,
        dto::lobby::ReadyPlayerInput,
        state::{AppState, PublicEndpoints, clock::ManualClock},
    };

    async fn relay() -> (MemoryRecordStore, ManualClock, SharedState) {
        let store = MemoryRecordStore::new();
        let clock = ManualClock::new(datetime!(2025-03-01 12:00:00 UTC));
        let state = AppState::with_clock(
            AppConfig::default(),
            PublicEndpoints {
                store_url: Some("https://store.example".into()),
                anon_key: None,
            },
            Arc::new(clock.clone()),
        );
        state.install_record_store(Arc::new(store.clone())).await;
        (store, clock, state)
    }

    fn save(session_id: &str, is_guest: bool) -> OnlineActionRequest {
        OnlineActionRequest {
            action: OnlineAction::Save,
            session_id: session_id.into(),
            is_guest,
        }
    }

    fn ready(action: ReadyAction, session_id: &str) -> ReadyActionRequest {
        ReadyActionRequest {
            action,
            player: Some(ReadyPlayerInput {
                session_id: session_id.into(),
                role: ReadinessRole::Participant,
                role_mode: None,
            }),
        }
    }

    #[tokio::test]
    async fn online_users_are_ttl_filtered() {
        let (_, clock, state) = relay().await;
        apply_online_action(&state, save("alice", false)).await.unwrap();
        clock.advance(Duration::from_secs(20));
        apply_online_action(&state, save("visitor_1_abcdefghi", true)).await.unwrap();
        clock.advance(Duration::from_secs(15));

        let online = online_users(&state).await.unwrap();
        assert_eq!(online.users.len(), 1);
        assert_eq!(online.authorized_count, 0);
    }

    #[tokio::test]
    async fn ready_actions_round_trip() {
        let (store, _, state) = relay().await;
        apply_ready_action(&state, ready(ReadyAction::Add, "alice")).await.unwrap();
        apply_ready_action(&state, ready(ReadyAction::Add, "alice")).await.unwrap();
        assert_eq!(ready_players(&state).await.unwrap().count, 1);

        apply_ready_action(&state, ready(ReadyAction::Remove, "alice")).await.unwrap();
        assert!(store.rows(Table::Readiness).is_empty());
    }

    #[tokio::test]
    async fn clear_empties_the_set() {
        let (_, _, state) = relay().await;
        for name in ["a", "b", "c"] {
            apply_ready_action(&state, ready(ReadyAction::Add, name)).await.unwrap();
        }
        let cleared = apply_ready_action(
            &state,
            ReadyActionRequest {
                action: ReadyAction::Clear,
                player: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(cleared.message.as_deref(), Some("readiness cleared"));
        assert_eq!(ready_players(&state).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn host_add_requires_a_mode() {
        let (_, _, state) = relay().await;
        let mut request = ready(ReadyAction::Add, "root");
        if let Some(player) = request.player.as_mut() {
            player.role = ReadinessRole::Host;
        }
        let err = apply_ready_action(&state, request).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn config_requires_a_store_url() {
        let (_, _, state) = relay().await;
        assert_eq!(public_config(&state).unwrap().push_path, PUSH_PATH);

        let bare = AppState::new(AppConfig::default(), PublicEndpoints::default());
        assert!(matches!(public_config(&bare), Err(ServiceError::NotConfigured(_))));
    }
}
