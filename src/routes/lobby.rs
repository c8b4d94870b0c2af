use axum::{
    Json, Router,
    extract::State,
    routing::get,
};
use axum_valid::Valid;

use crate::{
    dto::lobby::{
        ActionResponse, OnlineActionRequest, OnlineUsersResponse, PublicConfigResponse,
        ReadyActionRequest, ReadyPlayersResponse,
    },
    error::AppError,
    services::lobby_service,
    state::SharedState,
};

/// Presence, readiness and client configuration endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/online", get(list_online).post(online_action))
        .route("/api/ready", get(list_ready).post(ready_action))
        .route("/api/config", get(public_config))
}

#[utoipa::path(
    get,
    path = "/api/online",
    tag = "lobby",
    responses(
        (status = 200, description = "Sessions seen within the presence TTL", body = OnlineUsersResponse),
        (status = 503, description = "Record store unavailable")
    )
)]
/// List the sessions currently present in the lobby.
pub async fn list_online(
    State(state): State<SharedState>,
) -> Result<Json<OnlineUsersResponse>, AppError> {
    Ok(Json(lobby_service::online_users(&state).await?))
}

#[utoipa::path(
    post,
    path = "/api/online",
    tag = "lobby",
    request_body = OnlineActionRequest,
    responses(
        (status = 200, description = "Presence updated", body = ActionResponse),
        (status = 400, description = "Invalid request"),
        (status = 503, description = "Record store unavailable")
    )
)]
/// Renew or remove a session's presence heartbeat.
pub async fn online_action(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<OnlineActionRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(lobby_service::apply_online_action(&state, payload).await?))
}

#[utoipa::path(
    get,
    path = "/api/ready",
    tag = "lobby",
    responses(
        (status = 200, description = "Current readiness set", body = ReadyPlayersResponse),
        (status = 503, description = "Record store unavailable")
    )
)]
pub async fn list_ready(
    State(state): State<SharedState>,
) -> Result<Json<ReadyPlayersResponse>, AppError> {
    Ok(Json(lobby_service::ready_players(&state).await?))
}

#[utoipa::path(
    post,
    path = "/api/ready",
    tag = "lobby",
    request_body = ReadyActionRequest,
    responses(
        (status = 200, description = "Readiness updated", body = ActionResponse),
        (status = 400, description = "Invalid request"),
        (status = 503, description = "Record store unavailable")
    )
)]
/// Declare, retract or clear readiness.
pub async fn ready_action(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ReadyActionRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(lobby_service::apply_ready_action(&state, payload).await?))
}

#[utoipa::path(
    get,
    path = "/api/config",
    tag = "lobby",
    responses(
        (status = 200, description = "Public store endpoints", body = PublicConfigResponse),
        (status = 500, description = "Store URL not configured")
    )
)]
/// Return the endpoints a browser client needs to reach the store and the change stream.
pub async fn public_config(
    State(state): State<SharedState>,
) -> Result<Json<PublicConfigResponse>, AppError> {
    Ok(Json(lobby_service::public_config(&state)?))
}
