//! PostgREST-compatible table access backing `/rest/v1/{table}`.
//!
//! Every successful write is published on the change stream.

use serde_json::{Map, Value};

use crate::{
    dao::models::{Filter, KEY_COLUMN, Table},
    dto::sse::ChangeKind,
    error::ServiceError,
    services::change_events,
    state::SharedState,
};

/// Resolve a table name from the URL, answering 404 for unknown relations.
pub fn resolve_table(name: &str) -> Result<Table, ServiceError> {
    Table::from_name(name)
        .ok_or_else(|| ServiceError::NotFound(format!("relation \"{name}\" does not exist")))
}

pub async fn select(state: &SharedState, table: Table, filter: Filter) -> Result<Vec<Value>, ServiceError> {
    let store = state.require_record_store().await?;
    Ok(store.select(table, filter).await?)
}

/// Insert one object or an array of objects, returning the inserted rows.
pub async fn insert(state: &SharedState, table: Table, body: Value) -> Result<Vec<Value>, ServiceError> {
    let rows = match body {
        Value::Array(rows) => rows,
        row @ Value::Object(_) => vec![row],
        _ => {
            return Err(ServiceError::InvalidInput(
                "expected a JSON object or an array of objects".into(),
            ));
        }
    };
    if let Some(bad) = rows.iter().position(|row| !row.is_object()) {
        return Err(ServiceError::InvalidInput(format!("row {bad} is not an object")));
    }

    let store = state.require_record_store().await?;
    for row in &rows {
        store.insert(table, row.clone()).await?;
        change_events::publish(state, table, ChangeKind::Insert, session_key(row));
    }
    Ok(rows)
}

/// Patch the rows matching `filter`, returning them with the patch applied.
pub async fn patch(
    state: &SharedState,
    table: Table,
    filter: Filter,
    body: Value,
) -> Result<Vec<Value>, ServiceError> {
    let Value::Object(fields) = body else {
        return Err(ServiceError::InvalidInput("patch body must be a JSON object".into()));
    };
    require_filter(&filter, "update")?;

    let store = state.require_record_store().await?;
    let matched = store.select(table, filter.clone()).await?;
    let affected = store.patch(table, filter.clone(), Value::Object(fields.clone())).await?;
    if affected > 0 {
        change_events::publish(state, table, ChangeKind::Update, filter_key(&filter));
    }

    Ok(matched
        .into_iter()
        .take(affected as usize)
        .map(|row| merge(row, &fields))
        .collect())
}

/// Delete the rows matching `filter`, returning them.
pub async fn delete(state: &SharedState, table: Table, filter: Filter) -> Result<Vec<Value>, ServiceError> {
    require_filter(&filter, "delete")?;
    let store = state.require_record_store().await?;
    let matched = store.select(table, filter.clone()).await?;
    let affected = store.delete(table, filter.clone()).await?;
    if affected > 0 {
        change_events::publish(state, table, ChangeKind::Delete, filter_key(&filter));
    }
    Ok(matched.into_iter().take(affected as usize).collect())
}

/// Table-wide writes must say so with an explicit filter such as `session_id=not.is.null`.
fn require_filter(filter: &Filter, verb: &str) -> Result<(), ServiceError> {
    if matches!(filter, Filter::All) {
        return Err(ServiceError::InvalidInput(format!("{verb} requires a filter")));
    }
    Ok(())
}

fn session_key(row: &Value) -> Option<&str> {
    row.get(KEY_COLUMN).and_then(Value::as_str)
}

fn filter_key(filter: &Filter) -> Option<&str> {
    match filter {
        Filter::Eq { column, value } if column == KEY_COLUMN => Some(value),
        _ => None,
    }
}

fn merge(row: Value, fields: &Map<String, Value>) -> Value {
    match row {
        Value::Object(mut existing) => {
            for (key, value) in fields {
                existing.insert(key.clone(), value.clone());
            }
            Value::Object(existing)
        }
        other => other,
    }
}
