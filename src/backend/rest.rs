//! PostgREST client.
//!
//! Talks to the hosted backend's REST endpoint (`/rest/v1`). Only storage and
//! RPC are covered; the realtime transport is not implemented here.
//!
//! Errors follow the same contract as the in-memory store: a missing row is
//! `NotFound` for reads, updates and deletes, a missing function is
//! `UnknownRpc`, and an RPC that returns no row is `NotFound`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

use super::{Query, RecordStore, Row};
use crate::config::SplitfairConfig;
use crate::errors::BackendError;

pub struct RestStore {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl RestStore {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Request {
                endpoint: base_url.to_string(),
                source: e.into(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: None,
        })
    }

    /// Build from resolved configuration. Both the URL and the anon key must
    /// be set.
    pub fn from_config(config: &SplitfairConfig) -> Result<Self, BackendError> {
        let url = config.backend_url().ok_or_else(|| {
            BackendError::Other(anyhow::anyhow!(
                "No backend URL configured; set [backend] url or SPLITFAIR_BACKEND_URL"
            ))
        })?;
        let key = config.anon_key().ok_or_else(|| {
            BackendError::Other(anyhow::anyhow!(
                "No anon key configured; set [backend] anon_key or SPLITFAIR_ANON_KEY"
            ))
        })?;
        Self::new(
            &url,
            &key,
            Duration::from_secs(config.toml.backend.request_timeout_secs),
        )
    }

    /// Send requests as a signed-in user instead of anonymously.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    pub fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    /// PostgREST query string for a select.
    pub fn query_params(query: &Query) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), query.columns.clone())];
        for filter in &query.filters {
            params.push((filter.column.clone(), format!("eq.{}", filter.value)));
        }
        if let Some(order) = &query.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| BackendError::Request {
                endpoint: endpoint.to_string(),
                source: e.into(),
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(endpoint, status = status.as_u16(), "backend request rejected");
            return Err(BackendError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn rows(&self, endpoint: &str, response: Response) -> Result<Vec<Row>, BackendError> {
        response
            .json::<Vec<Row>>()
            .await
            .map_err(|e| BackendError::Request {
                endpoint: endpoint.to_string(),
                source: anyhow::Error::new(e).context("Failed to parse response body"),
            })
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn select(&self, query: Query) -> Result<Vec<Row>, BackendError> {
        let url = self.table_url(&query.table);
        let request = self.client.get(&url).query(&Self::query_params(&query));
        let response = self.send(&query.table, request).await?;
        self.rows(&query.table, response).await
    }

    async fn select_one(&self, query: Query, id: &str) -> Result<Row, BackendError> {
        let table = query.table.clone();
        let mut params = Self::query_params(&query.limit(1));
        params.push(("id".to_string(), format!("eq.{}", id)));
        let request = self.client.get(self.table_url(&table)).query(&params);
        let response = self.send(&table, request).await?;
        self.rows(&table, response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound {
                table,
                id: id.to_string(),
            })
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.send(table, request).await?;
        self.rows(table, response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Status {
                endpoint: table.to_string(),
                status: 200,
                body: "insert returned no rows".to_string(),
            })
    }

    async fn update(&self, table: &str, id: &str, patch: Row) -> Result<Row, BackendError> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = self.send(table, request).await?;
        self.rows(table, response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), BackendError> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation");
        let response = self.send(table, request).await?;
        // PostgREST answers a delete that matched nothing with success and
        // an empty representation.
        if self.rows(table, response).await?.is_empty() {
            return Err(BackendError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn rpc(&self, function: &str, args: Row) -> Result<Row, BackendError> {
        let endpoint = format!("rpc/{}", function);
        let request = self.client.post(self.rpc_url(function)).json(&args);
        let response = match self.send(&endpoint, request).await {
            Err(BackendError::Status { status: 404, .. }) => {
                return Err(BackendError::UnknownRpc(function.to_string()));
            }
            other => other?,
        };
        let body = response.json::<Row>().await.map_err(|e| BackendError::Request {
            endpoint: endpoint.clone(),
            source: anyhow::Error::new(e).context("Failed to parse RPC response"),
        })?;
        // Set-returning functions answer with an array.
        let row = match body {
            Value::Array(rows) => rows.into_iter().next(),
            Value::Null => None,
            row => Some(row),
        };
        row.ok_or_else(|| BackendError::NotFound {
            table: endpoint,
            id: "result".to_string(),
        })
    }
}
