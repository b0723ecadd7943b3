//! REST implementation of [`RemoteStore`].
//!
//! Collections map to URL paths under a base URL:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | select    | `GET    {base}/{collection}` |
//! | insert    | `POST   {base}/{collection}` |
//! | update    | `PATCH  {base}/{collection}/{id}` |
//! | delete    | `DELETE {base}/{collection}/{id}` |
//! | health    | `GET    {base}/health` |
//!
//! Collection names and record ids are percent-encoded as single path
//! segments.

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use async_trait::async_trait;
use mooring_types::{Record, RecordId};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Connection settings for [`HttpRemoteStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRemoteConfig {
    /// Base URL, without a trailing slash (e.g. `https://api.example.com/v1`).
    pub base_url: String,
    /// Bearer token sent with every request.
    pub api_key: Option<String>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            timeout_ms: 30_000,
        }
    }
}

/// A remote store reached over HTTP with JSON bodies.
pub struct HttpRemoteStore {
    config: HttpRemoteConfig,
    client: Client,
}

impl HttpRemoteStore {
    /// Creates a store with its own HTTP client.
    pub fn new(config: HttpRemoteConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &HttpRemoteConfig {
        &self.config
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.config.base_url.trim_end_matches('/').to_string();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> SyncResult<Response> {
        let response = self.authorize(request).send().await?;
        Ok(response)
    }
}

/// Maps a non-success response onto the error taxonomy.
async fn error_for(response: Response, collection: &str, id: Option<&RecordId>) -> SyncError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => SyncError::Validation(message),
        StatusCode::UNAUTHORIZED => SyncError::Auth(message),
        StatusCode::FORBIDDEN => SyncError::Forbidden(message),
        StatusCode::NOT_FOUND => match id {
            Some(id) => SyncError::not_found(collection, id),
            None => SyncError::Api {
                status: status.as_u16(),
                message,
            },
        },
        _ => SyncError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

async fn parse_body<T: serde::de::DeserializeOwned>(response: Response) -> SyncResult<T> {
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn parse_record(response: Response) -> SyncResult<Record> {
    let value: serde_json::Value = parse_body(response).await?;
    Ok(Record::from_value(value)?)
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn select(&self, collection: &str) -> SyncResult<Vec<Record>> {
        let response = self.send(self.client.get(self.url(&[collection]))).await?;
        if !response.status().is_success() {
            return Err(error_for(response, collection, None).await);
        }
        let records: Vec<Record> = parse_body(response).await?;
        debug!("Fetched {} records from {}", records.len(), collection);
        Ok(records)
    }

    async fn insert(&self, collection: &str, record: &Record) -> SyncResult<Record> {
        let response = self
            .send(self.client.post(self.url(&[collection])).json(record))
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response, collection, None).await);
        }
        parse_record(response).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &RecordId,
        partial: &Record,
    ) -> SyncResult<Record> {
        let response = self
            .send(
                self.client
                    .patch(self.url(&[collection, id.as_str()]))
                    .json(&partial.without_id()),
            )
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response, collection, Some(id)).await);
        }
        parse_record(response).await
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> SyncResult<()> {
        let response = self
            .send(self.client.delete(self.url(&[collection, id.as_str()])))
            .await?;
        // Already gone is as good as deleted.
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(error_for(response, collection, Some(id)).await);
        }
        Ok(())
    }

    async fn health(&self) -> SyncResult<()> {
        let response = self.send(self.client.get(self.url(&["health"]))).await?;
        if !response.status().is_success() {
            return Err(SyncError::Api {
                status: response.status().as_u16(),
                message: "health check failed".into(),
            });
        }
        Ok(())
    }
}
