//! PostgREST-shaped table access so lobby clients can use the relay as their record store.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde_json::Value;

use crate::{
    dao::models::Filter,
    error::{AppError, ServiceError},
    services::record_service,
    state::SharedState,
};

type FilterQuery = Query<Vec<(String, String)>>;

pub fn router() -> Router<SharedState> {
    Router::new().route(
        "/rest/v1/{table}",
        get(select_rows)
            .post(insert_rows)
            .patch(patch_rows)
            .delete(delete_rows),
    )
}

fn parse_filter(pairs: &[(String, String)]) -> Result<Filter, AppError> {
    Filter::from_query(pairs.iter().map(|(column, value)| (column.as_str(), value.as_str())))
        .map_err(ServiceError::from)
        .map_err(AppError::from)
}

#[utoipa::path(
    get,
    path = "/rest/v1/{table}",
    tag = "records",
    params(("table" = String, Path, description = "`online_users` or `ready_players`")),
    responses(
        (status = 200, description = "Matching rows", body = Vec<Object>),
        (status = 404, description = "Unknown table"),
        (status = 503, description = "Record store unavailable")
    )
)]
/// Read the rows of `table` matching the query filter.
pub async fn select_rows(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    Query(pairs): FilterQuery,
) -> Result<Json<Vec<Value>>, AppError> {
    let table = record_service::resolve_table(&table)?;
    let filter = parse_filter(&pairs)?;
    Ok(Json(record_service::select(&state, table, filter).await?))
}

#[utoipa::path(
    post,
    path = "/rest/v1/{table}",
    tag = "records",
    params(("table" = String, Path, description = "`online_users` or `ready_players`")),
    request_body = Object,
    responses(
        (status = 201, description = "Rows inserted", body = Vec<Object>),
        (status = 400, description = "Body is not an object or array of objects"),
        (status = 404, description = "Unknown table")
    )
)]
pub async fn insert_rows(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Vec<Value>>), AppError> {
    let table = record_service::resolve_table(&table)?;
    let rows = record_service::insert(&state, table, body).await?;
    Ok((StatusCode::CREATED, Json(rows)))
}

#[utoipa::path(
    patch,
    path = "/rest/v1/{table}",
    tag = "records",
    params(("table" = String, Path, description = "`online_users` or `ready_players`")),
    request_body = Object,
    responses(
        (status = 200, description = "Patched rows", body = Vec<Object>),
        (status = 400, description = "Missing or invalid filter, or bad body"),
        (status = 404, description = "Unknown table")
    )
)]
/// Merge the body into every row matching the query filter.
pub async fn patch_rows(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    Query(pairs): FilterQuery,
    Json(body): Json<Value>,
) -> Result<Json<Vec<Value>>, AppError> {
    let table = record_service::resolve_table(&table)?;
    let filter = parse_filter(&pairs)?;
    Ok(Json(record_service::patch(&state, table, filter, body).await?))
}

#[utoipa::path(
    delete,
    path = "/rest/v1/{table}",
    tag = "records",
    params(("table" = String, Path, description = "`online_users` or `ready_players`")),
    responses(
        (status = 200, description = "Deleted rows", body = Vec<Object>),
        (status = 400, description = "Missing or invalid filter"),
        (status = 404, description = "Unknown table")
    )
)]
/// Delete the rows matching the query filter; a filter is required.
pub async fn delete_rows(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    Query(pairs): FilterQuery,
) -> Result<Json<Vec<Value>>, AppError> {
    let table = record_service::resolve_table(&table)?;
    let filter = parse_filter(&pairs)?;
    Ok(Json(record_service::delete(&state, table, filter).await?))
}
