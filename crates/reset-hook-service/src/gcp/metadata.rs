//! Metadata server client: project discovery and service account tokens.

use super::{join_url, AccessToken, AccessTokenProvider, MetadataError};
use async_trait::async_trait;
use reset_hook_core::Timestamp;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

#[cfg(test)]
#[path = "metadata_tests.rs"]
mod tests;

const PROJECT_ID_PATH: &str = "computeMetadata/v1/project/project-id";
const TOKEN_PATH: &str = "computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Client for the runtime's metadata server.
///
/// Access tokens are cached until shortly before they expire.
pub struct MetadataClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<AccessToken>>,
}

impl MetadataClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token: RwLock::new(None),
        }
    }

    /// Project the process is running in.
    #[instrument(skip(self))]
    pub async fn project_id(&self) -> Result<String, MetadataError> {
        let project_id = self.get(PROJECT_ID_PATH).await?.text().await.map_err(|e| {
            MetadataError::InvalidResponse {
                message: format!("Failed to read project ID: {}", e),
            }
        })?;

        let project_id = project_id.trim().to_string();
        if project_id.is_empty() {
            return Err(MetadataError::InvalidResponse {
                message: "Project ID is empty".to_string(),
            });
        }
        Ok(project_id)
    }

    async fn fetch_token(&self) -> Result<AccessToken, MetadataError> {
        let response: TokenResponse = self
            .get(TOKEN_PATH)
            .await?
            .json()
            .await
            .map_err(|e| MetadataError::InvalidResponse {
                message: format!("Failed to parse token response: {}", e),
            })?;

        debug!(expires_in = response.expires_in, "Fetched service account token");
        Ok(AccessToken::new(
            response.access_token,
            Timestamp::now().add_duration(Duration::from_secs(response.expires_in)),
        ))
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, MetadataError> {
        let response = self
            .http
            .get(join_url(&self.base_url, path))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| MetadataError::Request {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            return Err(MetadataError::Status { status, message });
        }

        Ok(response)
    }
}

#[async_trait]
impl AccessTokenProvider for MetadataClient {
    async fn access_token(&self) -> Result<AccessToken, MetadataError> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref().filter(|t| !t.is_expired()) {
                return Ok(token.clone());
            }
        }

        let mut cached = self.token.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(token) = cached.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.clone());
        }

        let token = self.fetch_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

impl std::fmt::Debug for MetadataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
