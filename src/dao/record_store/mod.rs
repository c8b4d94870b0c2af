pub mod memory;
#[cfg(feature = "rest-store")]
pub mod postgrest;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::dao::{
    models::{Filter, Table},
    storage::StorageResult,
};

/// Generic keyed-record store: filtered read, insert, patch-by-filter and delete-by-filter.
///
/// No operation is transactional and nothing enforces key uniqueness; callers reconcile
/// duplicates on read.
pub trait RecordStore: Send + Sync {
    fn select(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<Vec<Value>>>;
    fn insert(&self, table: Table, row: Value) -> BoxFuture<'static, StorageResult<()>>;
    fn patch(&self, table: Table, filter: Filter, patch: Value) -> BoxFuture<'static, StorageResult<u64>>;
    fn delete(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<u64>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
