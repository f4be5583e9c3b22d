//! Google Cloud adapters
//!
//! REST implementations of the core's capability traits:
//!
//! - [`SecretManagerStore`] implements [`reset_hook_core::SecretStore`]
//! - [`ComputeEngineClient`] implements [`reset_hook_core::ComputeClient`]
//!
//! Both authenticate with a bearer token from an [`AccessTokenProvider`],
//! normally the [`MetadataClient`] of the instance or serverless runtime.

pub mod compute;
pub mod metadata;
pub mod secret_manager;

pub use compute::ComputeEngineClient;
pub use metadata::MetadataClient;
pub use secret_manager::SecretManagerStore;

use async_trait::async_trait;
use reset_hook_core::Timestamp;
use serde::Deserialize;
use std::{fmt, time::Duration};

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

const USER_AGENT: &str = concat!("reset-hook/", env!("CARGO_PKG_VERSION"));

/// Tokens this close to expiry are treated as expired.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

// ============================================================================
// Access tokens
// ============================================================================

/// OAuth2 access token for the Google APIs.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_at: Timestamp,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: Timestamp) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// Token value for the `Authorization` header
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// Check whether the token expires within the refresh margin
    pub fn is_expired(&self) -> bool {
        Timestamp::now().add_duration(TOKEN_EXPIRY_MARGIN) >= self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<REDACTED>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of access tokens for outbound Google API calls.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<AccessToken, MetadataError>;
}

/// Provider returning a fixed token; for emulators and tests.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(secret, Timestamp::now().add_duration(Duration::MAX)),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<AccessToken, MetadataError> {
        Ok(self.token.clone())
    }
}

/// Errors talking to the metadata server
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Metadata request failed: {message}")]
    Request { message: String },

    #[error("Metadata server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Metadata server returned an invalid response: {message}")]
    InvalidResponse { message: String },
}

// ============================================================================
// Shared HTTP helpers
// ============================================================================

/// Build the HTTP client shared by the Google and Slack adapters.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleErrorDetail,
}

#[derive(Deserialize)]
struct GoogleErrorDetail {
    message: String,
}

/// Extract the human readable message from a Google API error body.
///
/// Falls back to the raw body when it is not the standard error envelope.
pub(crate) fn google_error_message(body: &str) -> String {
    match serde_json::from_str::<GoogleErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Join a configured base URL and an API path without doubling slashes.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
