//! Snapshot sources for the polling coordinator.
//!
//! [`SnapshotFetcher`] is the seam to the transport layer; the coordinator
//! only ever sees `Result<ExecutionSnapshot, FetchError>`.
//! [`HttpSnapshotFetcher`] reads snapshots from the API's
//! `GET /executions/{id}` endpoint, which wraps its payload in the standard
//! `{ "data": ... }` envelope.

use std::time::Duration;

use async_trait::async_trait;
use fanout_core::types::DbId;
use fanout_core::ExecutionSnapshot;
use serde::Deserialize;

use crate::error::{FetchError, MonitorError};

/// Source of execution snapshots.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch the current snapshot of `execution_id`.
    async fn fetch(&self, execution_id: DbId) -> Result<ExecutionSnapshot, FetchError>;
}

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

/// Fetches snapshots over HTTP.
pub struct HttpSnapshotFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotFetcher {
    /// Build a fetcher for `base_url` (e.g. `http://localhost:3000/api/v1`).
    ///
    /// `timeout` bounds each request at the HTTP layer as well; the
    /// coordinator applies its own fetch timeout on top.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// URL of one execution's snapshot.
    pub fn execution_url(&self, execution_id: DbId) -> String {
        format!("{}/executions/{execution_id}", self.base_url)
    }
}

#[async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
    async fn fetch(&self, execution_id: DbId) -> Result<ExecutionSnapshot, FetchError> {
        let url = self.execution_url(execution_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        decode_snapshot(&body)
    }
}

/// Decode an enveloped snapshot body.
pub fn decode_snapshot(body: &[u8]) -> Result<ExecutionSnapshot, FetchError> {
    serde_json::from_slice::<DataResponse<ExecutionSnapshot>>(body)
        .map(|envelope| envelope.data)
        .map_err(|e| FetchError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
