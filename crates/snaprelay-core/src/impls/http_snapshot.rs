//! HttpSnapshotService - データベースの管理エンドポイント経由でスナップショットを作る

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use super::endpoint::{self, EndpointError};
use crate::domain::{SnapshotError, SnapshotId};
use crate::ports::SnapshotService;

pub const DEFAULT_SNAPSHOT_ENDPOINT: &str = "http://localhost:8080";
pub const DEFAULT_NETWORK: &str = "local";

#[derive(Serialize)]
struct CreateSnapshotRequest<'a> {
    #[serde(rename = "db/id")]
    db_id: &'a str,
}

/// `POST {endpoint}/fdb/{network}/{database}/snapshot`
#[derive(Debug, Clone)]
pub struct HttpSnapshotService {
    base_url: Url,
    network: String,
    http: Client,
}

impl HttpSnapshotService {
    pub fn new(
        endpoint: &str,
        network: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EndpointError> {
        Self::with_http_client(endpoint, network, endpoint::http_client(timeout)?)
    }

    pub fn with_http_client(
        endpoint: &str,
        network: impl Into<String>,
        http: Client,
    ) -> Result<Self, EndpointError> {
        Ok(Self {
            base_url: endpoint::parse_base_url(endpoint)?,
            network: network.into(),
            http,
        })
    }

    fn snapshot_url(&self, database: &str) -> Url {
        endpoint::join_segments(
            &self.base_url,
            &["fdb", &self.network, database, "snapshot"],
        )
    }
}

#[async_trait]
impl SnapshotService for HttpSnapshotService {
    async fn create_snapshot(&self, database: &str) -> Result<SnapshotId, SnapshotError> {
        let url = self.snapshot_url(database);
        debug!(url = %url, database, "requesting snapshot");

        let response = self
            .http
            .post(url)
            .json(&CreateSnapshotRequest { db_id: database })
            .send()
            .await
            .map_err(|e| SnapshotError::RemoteUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::SERVICE_UNAVAILABLE {
            let reason = if body.trim().is_empty() {
                status.to_string()
            } else {
                body
            };
            return Err(SnapshotError::RemoteUnavailable(reason));
        }
        if !status.is_success() {
            return Err(SnapshotError::RemoteError {
                database: database.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let id = SnapshotId::from_response_body(&body).ok_or_else(|| {
            SnapshotError::RemoteError {
                database: database.to_string(),
                status: status.as_u16(),
                body: "empty snapshot id".to_string(),
            }
        })?;
        info!(database, snapshot_id = %id, "snapshot created");
        Ok(id)
    }
}
