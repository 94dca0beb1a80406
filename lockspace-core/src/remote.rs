//! HTTP client for the lockspace CRUD service.
//!
//! The service exposes a fixed set of resources (passwords, otp_entries,
//! spaces, bills) behind `/api/v1/{resource}` and authenticates with a
//! short-lived bearer token issued by the external identity provider. The
//! token is consumed as-is: never encrypted, never cached.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors from the remote service
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Transient transport or server failure; safe to retry later.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// Non-transient server rejection (e.g. validation failure) or a
    /// malformed response body.
    #[error("Invalid server response: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Transient failures trigger rollback + offline enqueue; everything
    /// else propagates, since replaying the same request cannot succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

/// Result type for remote operations
pub type Result<T> = std::result::Result<T, RemoteError>;

/// One remote CRUD collection. The coordinator and the offline queue work
/// against this seam; tests substitute an in-memory mock.
#[async_trait]
pub trait RemoteCollection: Send + Sync {
    /// Create an entity; returns the canonical server entity.
    async fn create(&self, payload: &Value) -> Result<Value>;

    /// Update an entity by id; returns the canonical server entity.
    async fn update(&self, id: &str, payload: &Value) -> Result<Value>;

    /// Delete an entity by id.
    async fn delete(&self, id: &str) -> Result<()>;

    /// List entities matching the given filter parameters.
    async fn list(&self, filter: &[(String, String)]) -> Result<Vec<Value>>;
}

/// Authenticated HTTP client for the lockspace service.
pub struct RemoteClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl RemoteClient {
    /// Create a new client for the given service URL and bearer credential.
    pub fn new(base_url: &str, bearer_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.to_string(),
        })
    }

    /// Handle for one resource collection.
    pub fn collection(self: &Arc<Self>, resource: &str) -> ResourceHandle {
        ResourceHandle {
            client: Arc::clone(self),
            resource: resource.to_string(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.bearer_token))
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_else(|_| "unknown".to_string());
        debug!(%status, "remote request failed");
        Err(match status.as_u16() {
            404 => RemoteError::NotFound(body),
            409 => RemoteError::Conflict(body),
            401 | 403 => RemoteError::Unauthorized,
            408 | 429 => RemoteError::Network(format!("{}: {}", status, body)),
            s if s >= 500 => RemoteError::Network(format!("{}: {}", status, body)),
            _ => RemoteError::Protocol(format!("{}: {}", status, body)),
        })
    }

    fn url(&self, resource: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/api/v1/{}/{}", self.base_url, resource, id),
            None => format!("{}/api/v1/{}", self.base_url, resource),
        }
    }
}

/// A [`RemoteCollection`] backed by one resource of a [`RemoteClient`].
pub struct ResourceHandle {
    client: Arc<RemoteClient>,
    resource: String,
}

#[async_trait]
impl RemoteCollection for ResourceHandle {
    async fn create(&self, payload: &Value) -> Result<Value> {
        let url = self.client.url(&self.resource, None);
        let response = self
            .client
            .send(self.client.client.post(&url).json(payload))
            .await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Protocol(e.to_string()))
    }

    async fn update(&self, id: &str, payload: &Value) -> Result<Value> {
        let url = self.client.url(&self.resource, Some(id));
        let response = self
            .client
            .send(self.client.client.put(&url).json(payload))
            .await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Protocol(e.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = self.client.url(&self.resource, Some(id));
        self.client.send(self.client.client.delete(&url)).await?;
        Ok(())
    }

    async fn list(&self, filter: &[(String, String)]) -> Result<Vec<Value>> {
        let url = self.client.url(&self.resource, None);
        let response = self
            .client
            .send(self.client.client.get(&url).query(filter))
            .await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Protocol(e.to_string()))
    }
}
