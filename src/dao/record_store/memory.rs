//! In-process record store used by the relay when no remote store is configured and by tests.
//!
//! Rows are plain JSON values with no uniqueness constraint, and every call yields once
//! before touching the tables so concurrent check-then-write sequences interleave exactly
//! like they do against a remote store.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{
    dao::{
        models::{Filter, KEY_COLUMN, Table},
        record_store::RecordStore,
        storage::{StorageError, StorageResult},
    },
    dto::sse::{ChangeEvent, ChangeKind},
};

#[derive(Default)]
struct Tables {
    rows: DashMap<Table, Vec<Value>>,
    missing: DashSet<Table>,
    offline: AtomicBool,
    failures: AtomicU32,
    observer: Option<broadcast::Sender<ChangeEvent>>,
}

/// Shared handle to an in-memory store; clones see the same tables.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Tables>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that publishes a [`ChangeEvent`] after every successful write.
    pub fn with_observer(observer: broadcast::Sender<ChangeEvent>) -> Self {
        Self {
            inner: Arc::new(Tables {
                observer: Some(observer),
                ..Tables::default()
            }),
        }
    }

    /// Make every subsequent call fail with a transport error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `count` calls with a transport error.
    pub fn fail_next(&self, count: u32) {
        self.inner.failures.store(count, Ordering::SeqCst);
    }

    /// Drop a table so that calls report [`StorageError::MissingTable`].
    pub fn drop_table(&self, table: Table) {
        self.inner.rows.remove(&table);
        self.inner.missing.insert(table);
    }

    /// Raw rows of a table, duplicates included.
    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.inner
            .rows
            .get(&table)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    fn check(&self, table: Table) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(transport_error("store offline"));
        }
        let injected = self
            .inner
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if injected.is_ok() {
            return Err(transport_error("injected failure"));
        }
        if self.inner.missing.contains(&table) {
            return Err(StorageError::MissingTable {
                table: table.name().into(),
            });
        }
        Ok(())
    }

    fn publish(&self, table: Table, kind: ChangeKind, session_id: Option<String>) {
        if let Some(observer) = &self.inner.observer {
            let _ = observer.send(ChangeEvent {
                topic: table.into(),
                kind,
                session_id,
            });
        }
    }
}

fn transport_error(message: &str) -> StorageError {
    StorageError::unavailable(
        message.to_string(),
        io::Error::new(io::ErrorKind::ConnectionRefused, message.to_string()),
    )
}

fn single_key(filter: &Filter) -> Option<String> {
    match filter {
        Filter::Eq { column, value } if column == KEY_COLUMN => Some(value.clone()),
        _ => None,
    }
}

impl RecordStore for MemoryRecordStore {
    fn select(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let store = self.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            store.check(table)?;
            Ok(store
                .inner
                .rows
                .get(&table)
                .map(|rows| rows.iter().filter(|row| filter.matches(row)).cloned().collect())
                .unwrap_or_default())
        })
    }

    fn insert(&self, table: Table, row: Value) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            store.check(table)?;
            let session_id = row.get(KEY_COLUMN).and_then(Value::as_str).map(str::to_owned);
            store.inner.rows.entry(table).or_default().push(row);
            store.publish(table, ChangeKind::Insert, session_id);
            Ok(())
        })
    }

    fn patch(&self, table: Table, filter: Filter, patch: Value) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            store.check(table)?;
            let mut updated = 0;
            if let (Some(mut rows), Value::Object(fields)) = (store.inner.rows.get_mut(&table), &patch) {
                for row in rows.iter_mut().filter(|row| filter.matches(row)) {
                    if let Value::Object(target) = row {
                        for (key, value) in fields {
                            target.insert(key.clone(), value.clone());
                        }
                        updated += 1;
                    }
                }
            }
            if updated > 0 {
                store.publish(table, ChangeKind::Update, single_key(&filter));
            }
            Ok(updated)
        })
    }

    fn delete(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            store.check(table)?;
            let removed = match store.inner.rows.get_mut(&table) {
                Some(mut rows) => {
                    let before = rows.len();
                    rows.retain(|row| !filter.matches(row));
                    (before - rows.len()) as u64
                }
                None => 0,
            };
            if removed > 0 {
                store.publish(table, ChangeKind::Delete, single_key(&filter));
            }
            Ok(removed)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            if store.inner.offline.load(Ordering::SeqCst) {
                return Err(transport_error("store offline"));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn rows_are_not_unique() {
        let store = MemoryRecordStore::new();
        let row = json!({"session_id": "alice", "is_guest": false});
        store.insert(Table::Presence, row.clone()).await.unwrap();
        store.insert(Table::Presence, row).await.unwrap();

        let rows = store.select(Table::Presence, Filter::key("alice")).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn patch_and_delete_report_affected_rows() {
        let store = MemoryRecordStore::new();
        store
            .insert(Table::Readiness, json!({"session_id": "alice", "role": "participant"}))
            .await
            .unwrap();
        store
            .insert(Table::Readiness, json!({"session_id": "bob", "role": "participant"}))
            .await
            .unwrap();

        let patched = store
            .patch(Table::Readiness, Filter::key("bob"), json!({"role": "host"}))
            .await
            .unwrap();
        assert_eq!(patched, 1);
        assert_eq!(store.rows(Table::Readiness)[1]["role"], "host");

        let removed = store.delete(Table::Readiness, Filter::every_key()).await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.rows(Table::Readiness).is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryRecordStore::new();
        store.fail_next(1);
        assert!(store.select(Table::Presence, Filter::All).await.is_err());
        assert!(store.select(Table::Presence, Filter::All).await.is_ok());
    }

    #[tokio::test]
    async fn dropped_table_reports_missing() {
        let store = MemoryRecordStore::new();
        store.drop_table(Table::Readiness);
        let err = store.select(Table::Readiness, Filter::All).await.unwrap_err();
        assert!(err.is_missing_table());
    }

    #[tokio::test]
    async fn writes_are_published_to_the_observer() {
        let (tx, mut rx) = broadcast::channel(8);
        let store = MemoryRecordStore::with_observer(tx);
        store
            .insert(Table::Presence, json!({"session_id": "alice"}))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.session_id.as_deref(), Some("alice"));
    }
}
