//! Provisioning pool API client.

use async_trait::async_trait;
use relmatrix_core::{MatrixError, MatrixResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Request for one host from a named pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolRequest {
    pub pool: String,
    /// Pool-side retry budget, independent of the orchestrator's own policy.
    pub retry_count: u32,
    pub retry_interval_secs: u64,
}

/// Allocation handed out by the pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolAllocation {
    pub session_id: String,
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl PoolAllocation {
    /// First usable host, if the pool returned any.
    pub fn host(&self) -> Option<&str> {
        self.hosts
            .iter()
            .map(|h| h.trim())
            .find(|h| !h.is_empty())
    }
}

/// The external pool API.
#[async_trait]
pub trait PoolApi: Send + Sync {
    async fn acquire(&self, request: &PoolRequest) -> MatrixResult<PoolAllocation>;
    async fn release(&self, session_id: &str) -> MatrixResult<()>;
}

/// Configuration of the HTTP pool client.
#[derive(Debug, Clone)]
pub struct HttpPoolConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

/// JSON-over-HTTP pool client.
///
/// `POST {base}/sessions` allocates, `DELETE {base}/sessions/{id}` releases.
pub struct HttpPoolClient {
    config: HttpPoolConfig,
    http_client: reqwest::Client,
}

impl HttpPoolClient {
    pub fn new(config: HttpPoolConfig) -> MatrixResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("relmatrix/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MatrixError::Http(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("X-Api-Key", key),
            None => request,
        }
    }
}

#[async_trait]
impl PoolApi for HttpPoolClient {
    async fn acquire(&self, request: &PoolRequest) -> MatrixResult<PoolAllocation> {
        debug!(pool = %request.pool, "requesting node from pool");

        let response = self
            .authorize(self.http_client.post(self.url("sessions")))
            .json(request)
            .send()
            .await
            .map_err(|e| MatrixError::Pool(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MatrixError::Pool(format!("allocation returned {status}: {body}")));
        }

        response
            .json::<PoolAllocation>()
            .await
            .map_err(|e| MatrixError::Pool(format!("malformed allocation: {e}")))
    }

    async fn release(&self, session_id: &str) -> MatrixResult<()> {
        let response = self
            .authorize(
                self.http_client
                    .delete(self.url(&format!("sessions/{session_id}"))),
            )
            .send()
            .await
            .map_err(|e| MatrixError::Pool(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MatrixError::Pool(format!(
                "release of session {session_id} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_host_skips_blank_entries() {
        let alloc = PoolAllocation {
            session_id: "s1".to_string(),
            hosts: vec!["  ".to_string(), "n3.pool".to_string()],
        };
        assert_eq!(alloc.host(), Some("n3.pool"));
    }

    #[test]
    fn test_allocation_without_hosts_is_partial() {
        let alloc: PoolAllocation = serde_json::from_str(r#"{"session_id":"s9"}"#).unwrap();
        assert_eq!(alloc.host(), None);
        assert_eq!(alloc.session_id, "s9");
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = HttpPoolClient::new(HttpPoolConfig {
            base_url: "https://pool.example/api/".to_string(),
            api_key: None,
        })
        .unwrap();
        assert_eq!(client.url("sessions"), "https://pool.example/api/sessions");
    }
}
