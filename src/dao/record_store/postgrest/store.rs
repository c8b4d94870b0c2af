use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::dao::{
    models::{Filter, Table},
    record_store::RecordStore,
    storage::StorageResult,
};

use super::{
    config::PostgrestConfig,
    error::{PostgrestError, PostgrestResult},
};

/// PostgREST error code for `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Clone)]
pub struct PostgrestRecordStore {
    client: Client,
    base_url: Arc<str>,
    api_key: Option<Arc<str>>,
}

impl PostgrestRecordStore {
    /// Build a store client. No request is issued until the first operation.
    pub fn connect(config: PostgrestConfig) -> PostgrestResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| PostgrestError::ClientBuilder { source })?;

        Ok(Self {
            client,
            base_url: Arc::<str>::from(config.base_url.trim_end_matches('/')),
            api_key: config.api_key.map(Arc::<str>::from),
        })
    }

    fn request(&self, method: Method, table: Table, filter: &Filter) -> reqwest::RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, table.name());
        let builder = self.client.request(method, url).query(&filter.to_query());
        if let Some(ref key) = self.api_key {
            builder
                .header("apikey", key.as_ref())
                .bearer_auth(key.as_ref())
        } else {
            builder
        }
    }

    async fn send(&self, table: Table, builder: reqwest::RequestBuilder) -> PostgrestResult<Response> {
        let path = table.name().to_string();
        let response = builder
            .send()
            .await
            .map_err(|source| PostgrestError::RequestSend {
                path: path.clone(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let code = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|parsed| parsed.code);
        if status == StatusCode::NOT_FOUND || code.as_deref() == Some(UNDEFINED_TABLE) {
            return Err(PostgrestError::MissingTable { table: path });
        }

        Err(PostgrestError::RequestStatus { path, status, body })
    }

    async fn rows(&self, table: Table, response: Response) -> PostgrestResult<Vec<Value>> {
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|source| PostgrestError::DecodeResponse {
                path: table.name().to_string(),
                source,
            })
    }
}

impl RecordStore for PostgrestRecordStore {
    fn select(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let store = self.clone();
        Box::pin(async move {
            let builder = store
                .request(Method::GET, table, &filter)
                .query(&[("select", "*")]);
            let response = store.send(table, builder).await?;
            Ok(store.rows(table, response).await?)
        })
    }

    fn insert(&self, table: Table, row: Value) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let builder = store
                .request(Method::POST, table, &Filter::All)
                .header("Prefer", "return=representation")
                .json(&row);
            store.send(table, builder).await?;
            Ok(())
        })
    }

    fn patch(&self, table: Table, filter: Filter, patch: Value) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            let builder = store
                .request(Method::PATCH, table, &filter)
                .header("Prefer", "return=representation")
                .json(&patch);
            let response = store.send(table, builder).await?;
            Ok(store.rows(table, response).await?.len() as u64)
        })
    }

    fn delete(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            let builder = store
                .request(Method::DELETE, table, &filter)
                .header("Prefer", "return=representation");
            let response = store.send(table, builder).await?;
            Ok(store.rows(table, response).await?.len() as u64)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let builder = store
                .request(Method::GET, Table::Presence, &Filter::All)
                .query(&[("select", "session_id"), ("limit", "1")]);
            match store.send(Table::Presence, builder).await {
                Ok(_) | Err(PostgrestError::MissingTable { .. }) => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }
}
