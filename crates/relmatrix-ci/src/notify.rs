//! Status notification sink.
//!
//! Notifications are a best-effort side channel: callers log failures and
//! never let them change a stage's result.

use async_trait::async_trait;
use relmatrix_core::{MatrixError, MatrixResult};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status posted for a `<release>-<stage>` context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifyStatus {
    Pending,
    Success,
    Failure,
}

impl NotifyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyStatus::Pending => "pending",
            NotifyStatus::Success => "success",
            NotifyStatus::Failure => "failure",
        }
    }
}

#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, context: &str, status: NotifyStatus) -> MatrixResult<()>;
}

/// Notifier that only writes a log line.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl StatusNotifier for LogNotifier {
    async fn notify(&self, context: &str, status: NotifyStatus) -> MatrixResult<()> {
        info!(event = "status", context = %context, status = status.as_str());
        Ok(())
    }
}

/// Settings for posting commit statuses over HTTP.
#[derive(Debug, Clone)]
pub struct HttpStatusConfig {
    /// API root, e.g. `https://api.github.com`.
    pub api_url: String,
    /// `owner/name` of the repository under test.
    pub repository: String,
    /// Commit the statuses are attached to.
    pub commit_sha: String,
    pub token: Option<String>,
    /// Link shown next to each status.
    pub target_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusPayload<'a> {
    state: &'a str,
    context: &'a str,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_url: Option<&'a str>,
}

/// Posts `POST {api}/repos/{repo}/statuses/{sha}`.
pub struct HttpStatusNotifier {
    config: HttpStatusConfig,
    http_client: reqwest::Client,
}

impl HttpStatusNotifier {
    pub fn new(config: HttpStatusConfig) -> MatrixResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("relmatrix/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MatrixError::Http(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn statuses_url(&self) -> String {
        format!(
            "{}/repos/{}/statuses/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.repository,
            self.config.commit_sha
        )
    }
}

#[async_trait]
impl StatusNotifier for HttpStatusNotifier {
    async fn notify(&self, context: &str, status: NotifyStatus) -> MatrixResult<()> {
        let payload = StatusPayload {
            state: status.as_str(),
            context,
            description: format!("{context} {}", status.as_str()),
            target_url: self.config.target_url.as_deref(),
        };

        let mut request = self.http_client.post(self.statuses_url()).json(&payload);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MatrixError::Notification(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MatrixError::Notification(format!(
                "status post for {context} returned {}",
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
    fn test_status_strings() {
        assert_eq!(NotifyStatus::Pending.as_str(), "pending");
        assert_eq!(
            serde_json::to_string(&NotifyStatus::Failure).unwrap(),
            "\"failure\""
        );
    }

    #[test]
    fn test_statuses_url() {
        let notifier = HttpStatusNotifier::new(HttpStatusConfig {
            api_url: "https://api.github.com/".to_string(),
            repository: "org/project".to_string(),
            commit_sha: "abc123".to_string(),
            token: None,
            target_url: None,
        })
        .unwrap();
        assert_eq!(
            notifier.statuses_url(),
            "https://api.github.com/repos/org/project/statuses/abc123"
        );
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier
            .notify("f32-build", NotifyStatus::Pending)
            .await
            .is_ok());
    }
}
