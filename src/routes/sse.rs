use std::convert::Infallible;

use axum::{
    Router,
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/changes",
    tag = "sse",
    responses((status = 200, description = "Record change stream", content_type = "text/event-stream", body = String))
)]
/// Stream presence and readiness change notifications, plus relay `status` events.
pub async fn change_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = sse_service::subscribe_changes(&state);
    info!(
        subscribers = state.changes().subscriber_count(),
        "new change stream connection"
    );
    sse_service::to_sse_stream(receiver)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/changes", get(change_stream))
}
