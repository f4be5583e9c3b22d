//! Compute Engine implementation of [`ComputeClient`].

use super::{google_error_message, join_url, AccessTokenProvider};
use async_trait::async_trait;
use reset_hook_core::{ActionError, ComputeClient, ResetAcceptance, TargetResource};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

#[cfg(test)]
#[path = "compute_tests.rs"]
mod tests;

/// Subset of the Compute Engine `Operation` resource.
#[derive(Deserialize)]
struct Operation {
    name: String,
    status: Option<String>,
}

/// Calls `instances.reset` through the Compute Engine REST API.
pub struct ComputeEngineClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl ComputeEngineClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            tokens,
        }
    }

    fn reset_url(&self, target: &TargetResource) -> String {
        join_url(
            &self.base_url,
            &format!(
                "compute/v1/projects/{}/zones/{}/instances/{}/reset",
                target.project_id(),
                target.zone(),
                target.instance_name()
            ),
        )
    }
}

#[async_trait]
impl ComputeClient for ComputeEngineClient {
    #[instrument(skip(self), fields(target = %target))]
    async fn reset_instance(
        &self,
        target: &TargetResource,
    ) -> Result<ResetAcceptance, ActionError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| ActionError::Credentials {
                message: e.to_string(),
            })?;

        let response = self
            .http
            .post(self.reset_url(target))
            .bearer_auth(token.secret())
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await
            .map_err(|e| ActionError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ActionError::Rejected {
                target: target.to_string(),
                status: status.as_u16(),
                message: google_error_message(&body),
            });
        }

        let operation: Operation =
            response.json().await.map_err(|e| ActionError::InvalidResponse {
                message: format!("Failed to parse operation: {}", e),
            })?;

        Ok(ResetAcceptance {
            operation: operation.name,
            status: operation.status,
        })
    }
}

impl std::fmt::Debug for ComputeEngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeEngineClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
