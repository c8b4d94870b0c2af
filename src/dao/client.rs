//! Typed request wrapper over a [`RecordStore`] for the two lobby record kinds.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::dao::{
    models::{Filter, LAST_SEEN_COLUMN, PresenceRecord, ReadinessRecord, ReadinessRole, Table},
    record_store::RecordStore,
    storage::{StorageError, StorageResult},
};

/// Issues typed reads and writes for presence and readiness records.
///
/// Upserts are check-then-write sequences and are not atomic: two callers racing on a
/// fresh key may both insert. Readers are expected to reconcile duplicates.
#[derive(Clone)]
pub struct RecordStoreClient {
    store: Arc<dyn RecordStore>,
}

impl RecordStoreClient {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Presence records refreshed strictly after `active_since`.
    pub async fn read_presence(&self, active_since: OffsetDateTime) -> StorageResult<Vec<PresenceRecord>> {
        let filter = Filter::After {
            column: LAST_SEEN_COLUMN.into(),
            since: active_since,
        };
        self.read(Table::Presence, filter).await
    }

    pub async fn upsert_presence(
        &self,
        session_id: &str,
        is_guest: bool,
        now: OffsetDateTime,
    ) -> StorageResult<()> {
        let record = PresenceRecord {
            session_id: session_id.to_string(),
            is_guest,
            last_seen_at: now,
        };
        let row = to_row(Table::Presence, &record)?;
        self.upsert(Table::Presence, session_id, row).await
    }

    pub async fn delete_presence(&self, session_id: &str) -> StorageResult<()> {
        self.delete(Table::Presence, Filter::key(session_id)).await
    }

    pub async fn read_readiness(&self) -> StorageResult<Vec<ReadinessRecord>> {
        self.read(Table::Readiness, Filter::All).await
    }

    pub async fn upsert_readiness(
        &self,
        session_id: &str,
        role: ReadinessRole,
        role_mode: Option<&str>,
        now: OffsetDateTime,
    ) -> StorageResult<()> {
        let record = ReadinessRecord {
            session_id: session_id.to_string(),
            role,
            role_mode: role_mode.map(str::to_owned),
            declared_at: now,
        };
        let mut row = to_row(Table::Readiness, &record)?;
        if let Value::Object(fields) = &mut row {
            // Patching must overwrite a mode left by an earlier host declaration.
            fields.entry("role_mode").or_insert(Value::Null);
        }
        self.upsert(Table::Readiness, session_id, row).await
    }

    pub async fn delete_readiness(&self, session_id: &str) -> StorageResult<()> {
        self.delete(Table::Readiness, Filter::key(session_id)).await
    }

    /// Bulk-delete every readiness record.
    pub async fn clear_readiness(&self) -> StorageResult<()> {
        self.delete(Table::Readiness, Filter::every_key()).await
    }

    /// Probe the underlying store.
    pub async fn health_check(&self) -> StorageResult<()> {
        self.store.health_check().await
    }

    async fn read<T>(&self, table: Table, filter: Filter) -> StorageResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let rows = match self.store.select(table, filter).await {
            Ok(rows) => rows,
            Err(StorageError::MissingTable { table }) => {
                debug!(%table, "table missing; treating as empty");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        Ok(rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<T>(row) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(table = table.name(), error = %err, "skipping malformed record");
                    None
                }
            })
            .collect())
    }

    async fn upsert(&self, table: Table, session_id: &str, row: Value) -> StorageResult<()> {
        let existing = self.store.select(table, Filter::key(session_id)).await?;
        if existing.is_empty() {
            self.store.insert(table, row).await
        } else {
            self.store
                .patch(table, Filter::key(session_id), row)
                .await
                .map(|_| ())
        }
    }

    async fn delete(&self, table: Table, filter: Filter) -> StorageResult<()> {
        match self.store.delete(table, filter).await {
            Ok(_) | Err(StorageError::MissingTable { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn to_row<T: serde::Serialize>(table: Table, record: &T) -> StorageResult<Value> {
    serde_json::to_value(record).map_err(|source| StorageError::Encode {
        table: table.name().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::dao::record_store::memory::MemoryRecordStore;

    fn client() -> (MemoryRecordStore, RecordStoreClient) {
        let store = MemoryRecordStore::new();
        (store.clone(), RecordStoreClient::new(Arc::new(store)))
    }

    #[tokio::test]
    async fn sequential_upserts_update_in_place() {
        let (store, client) = client();
        let t0 = datetime!(2025-03-01 12:00:00 UTC);
        client.upsert_presence("alice", false, t0).await.unwrap();
        client
            .upsert_presence("alice", false, t0 + time::Duration::seconds(10))
            .await
            .unwrap();

        assert_eq!(store.rows(Table::Presence).len(), 1);
        let records = client.read_presence(t0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].last_seen_at, t0 + time::Duration::seconds(10));
    }

    #[tokio::test]
    async fn read_presence_excludes_rows_at_or_before_cutoff() {
        let (_, client) = client();
        let t0 = datetime!(2025-03-01 12:00:00 UTC);
        client.upsert_presence("alice", false, t0).await.unwrap();
        client
            .upsert_presence("bob", true, t0 + time::Duration::seconds(5))
            .await
            .unwrap();

        let records = client.read_presence(t0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session_id, "bob");
    }

    #[tokio::test]
    async fn participant_upsert_clears_a_previous_host_mode() {
        let (_, client) = client();
        let t0 = datetime!(2025-03-01 12:00:00 UTC);
        client
            .upsert_readiness("alice", ReadinessRole::Host, Some("classic"), t0)
            .await
            .unwrap();
        client
            .upsert_readiness("alice", ReadinessRole::Participant, None, t0)
            .await
            .unwrap();

        let records = client.read_readiness().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].role, ReadinessRole::Participant);
        assert_eq!(records[0].role_mode, None);
    }

    #[tokio::test]
    async fn missing_table_reads_as_empty_and_deletes_succeed() {
        let (store, client) = client();
        store.drop_table(Table::Readiness);

        assert!(client.read_readiness().await.unwrap().is_empty());
        assert!(client.delete_readiness("alice").await.is_ok());
        assert!(client.clear_readiness().await.is_ok());
    }

    #[tokio::test]
    async fn deleting_an_absent_key_is_not_an_error() {
        let (_, client) = client();
        assert!(client.delete_presence("ghost").await.is_ok());
    }

    #[test]
    fn unencodable_records_are_errors_not_empty_rows() {
        let mut record = std::collections::HashMap::new();
        record.insert((1u8, 2u8), 3u8);
        let err = to_row(Table::Presence, &record).unwrap_err();
        assert!(matches!(err, StorageError::Encode { ref table, .. } if table == "online_users"));
    }

    #[tokio::test]
    async fn transport_failures_propagate() {
        let (store, client) = client();
        store.set_offline(true);
        assert!(client.read_readiness().await.is_err());
        assert!(
            client
                .upsert_presence("alice", false, datetime!(2025-03-01 12:00:00 UTC))
                .await
                .is_err()
        );
    }
}
