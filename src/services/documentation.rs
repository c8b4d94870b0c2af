use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the lobby relay.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::change_stream,
        crate::routes::lobby::list_online,
        crate::routes::lobby::online_action,
        crate::routes::lobby::list_ready,
        crate::routes::lobby::ready_action,
        crate::routes::lobby::public_config,
        crate::routes::rest::select_rows,
        crate::routes::rest::insert_rows,
        crate::routes::rest::patch_rows,
        crate::routes::rest::delete_rows,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::lobby::OnlineAction,
            crate::dto::lobby::OnlineActionRequest,
            crate::dto::lobby::ReadyAction,
            crate::dto::lobby::ReadyPlayerInput,
            crate::dto::lobby::ReadyActionRequest,
            crate::dto::lobby::ActionResponse,
            crate::dto::lobby::OnlineUsersResponse,
            crate::dto::lobby::ReadyPlayersResponse,
            crate::dto::lobby::PublicConfigResponse,
            crate::dto::sse::ChangeEvent,
            crate::dto::sse::SystemStatus,
            crate::dao::models::PresenceRecord,
            crate::dao::models::ReadinessRecord,
            crate::dao::models::ReadinessRole,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "lobby", description = "Presence and readiness operations"),
        (name = "records", description = "PostgREST-compatible table access"),
    )
)]
pub struct ApiDoc;
