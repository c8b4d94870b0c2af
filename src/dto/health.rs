use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Number of clients currently listening on `/sse/changes`.
    pub push_subscribers: usize,
}

impl HealthResponse {
    pub fn ok(push_subscribers: usize) -> Self {
        Self {
            status: "ok".to_string(),
            push_subscribers,
        }
    }

    /// The record store is missing or failing its health checks.
    pub fn degraded(push_subscribers: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            push_subscribers,
        }
    }
}
