//! Secret Manager implementation of [`SecretStore`].

use super::{google_error_message, join_url, AccessTokenProvider};
use async_trait::async_trait;
use base64::Engine;
use reset_hook_core::{SecretName, SecretStore, SecretStoreError, SigningSecret};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

#[cfg(test)]
#[path = "secret_manager_tests.rs"]
mod tests;

#[derive(Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    /// Base64 encoded secret bytes
    data: String,
}

/// Reads the latest version of a secret through the Secret Manager REST API.
pub struct SecretManagerStore {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl SecretManagerStore {
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
}

#[async_trait]
impl SecretStore for SecretManagerStore {
    #[instrument(skip(self), fields(secret = %name))]
    async fn fetch(&self, name: &SecretName) -> Result<SigningSecret, SecretStoreError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| SecretStoreError::Unavailable {
                message: format!("Failed to obtain access token: {}", e),
            })?;

        let url = join_url(
            &self.base_url,
            &format!("v1/{}:access", name.latest_version_path()),
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| SecretStoreError::Unavailable {
                message: format!("Secret Manager request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = google_error_message(&body);
            return Err(match status.as_u16() {
                404 => SecretStoreError::NotFound {
                    name: name.to_string(),
                },
                401 | 403 => SecretStoreError::AccessDenied {
                    name: name.to_string(),
                    reason: message,
                },
                code => SecretStoreError::Unavailable {
                    message: format!("Secret Manager returned {}: {}", code, message),
                },
            });
        }

        let parsed: AccessSecretVersionResponse =
            response.json().await.map_err(|e| SecretStoreError::InvalidPayload {
                message: format!("Failed to parse access response: {}", e),
            })?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(parsed.payload.data.as_bytes())
            .map_err(|e| SecretStoreError::InvalidPayload {
                message: format!("Payload is not valid base64: {}", e),
            })?;

        debug!(length = bytes.len(), "Fetched signing secret");
        Ok(SigningSecret::from_bytes(bytes))
    }
}

impl std::fmt::Debug for SecretManagerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretManagerStore")
            .field("base_url", &self.base_url)
            .finish()
    }
}
