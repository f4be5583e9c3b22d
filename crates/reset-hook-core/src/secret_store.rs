//! # Secret Store Module
//!
//! Retrieval of the chat platform's signing secret from a versioned secret
//! store. The store always resolves the latest version so that rotating the
//! secret in the backend takes effect on the next request.
//!
//! Secret values are held in [`SigningSecret`], which is zeroized on drop and
//! never rendered by `Debug`.

use crate::Timestamp;
use async_trait::async_trait;
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(test)]
#[path = "secret_store_tests.rs"]
mod tests;

// ============================================================================
// Core Types
// ============================================================================

/// Logical identifier of a secret: `projects/{project}/secrets/{secret_id}`.
///
/// The version segment is not part of the name; stores always resolve
/// `latest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretName {
    project: String,
    secret_id: String,
}

impl SecretName {
    /// Compose a secret name from its project scope and configured identifier.
    ///
    /// # Validation Rules
    /// - Project must be non-empty and must not contain `/`
    /// - Secret ID must be 1-255 characters of `[A-Za-z0-9_-]` (Secret Manager limit)
    pub fn new(
        project: impl Into<String>,
        secret_id: impl Into<String>,
    ) -> Result<Self, SecretStoreError> {
        let project = project.into();
        let secret_id = secret_id.into();

        if project.is_empty() || project.contains('/') {
            return Err(SecretStoreError::InvalidSecretName {
                name: format!("projects/{}/secrets/{}", project, secret_id),
                reason: "Project scope must be a non-empty path segment".to_string(),
            });
        }

        if secret_id.is_empty() || secret_id.len() > 255 {
            return Err(SecretStoreError::InvalidSecretName {
                name: format!("projects/{}/secrets/{}", project, secret_id),
                reason: "Secret ID must be 1-255 characters".to_string(),
            });
        }

        if !secret_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SecretStoreError::InvalidSecretName {
                name: format!("projects/{}/secrets/{}", project, secret_id),
                reason: "Secret ID contains invalid characters".to_string(),
            });
        }

        Ok(Self { project, secret_id })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn secret_id(&self) -> &str {
        &self.secret_id
    }

    /// Resource path of the most recent version.
    pub fn latest_version_path(&self) -> String {
        format!("{}/versions/latest", self)
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/secrets/{}", self.project, self.secret_id)
    }
}

/// Signing secret bytes.
///
/// The buffer is wiped when the value is dropped. Only
/// [`SigningSecret::expose_bytes`] gives access to the content.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningSecret {
    bytes: Vec<u8>,
}

impl SigningSecret {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Get secret as bytes (only for immediate use)
    pub fn expose_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Get secret length without exposing content
    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

impl From<&str> for SigningSecret {
    fn from(value: &str) -> Self {
        Self::from_bytes(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSecret")
            .field("length", &self.len())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Interface Traits
// ============================================================================

/// Read access to a versioned secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the latest version of `name`.
    ///
    /// # Errors
    /// - `SecretStoreError::NotFound` - Secret or version does not exist
    /// - `SecretStoreError::AccessDenied` - Insufficient permissions
    /// - `SecretStoreError::Unavailable` - Backend unreachable or failing
    /// - `SecretStoreError::InvalidPayload` - Payload could not be decoded
    async fn fetch(&self, name: &SecretName) -> Result<SigningSecret, SecretStoreError>;
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while fetching a secret
#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("Secret not found: {name}")]
    NotFound { name: String },

    #[error("Access denied to secret: {name} - {reason}")]
    AccessDenied { name: String, reason: String },

    #[error("Secret store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Secret payload could not be decoded: {message}")]
    InvalidPayload { message: String },

    #[error("Invalid secret name: {name} - {reason}")]
    InvalidSecretName { name: String, reason: String },
}

impl SecretStoreError {
    /// Check if error is transient and a later request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SecretStoreError::Unavailable { .. })
    }

    /// Check if error indicates permission problems
    pub fn is_permission_error(&self) -> bool {
        matches!(self, SecretStoreError::AccessDenied { .. })
    }
}

// ============================================================================
// TTL Cache
// ============================================================================

struct CachedSecret {
    value: SigningSecret,
    expires_at: Timestamp,
}

impl CachedSecret {
    fn is_expired(&self) -> bool {
        Timestamp::now() >= self.expires_at
    }
}

/// Secret store wrapper that keeps fetched secrets for a bounded time.
///
/// A TTL of zero disables caching entirely and every call reaches the inner
/// store. Readers share the lock; only a refresh takes the write lock.
pub struct CachingSecretStore {
    inner: Arc<dyn SecretStore>,
    ttl: Duration,
    entries: RwLock<HashMap<SecretName, CachedSecret>>,
}

impl CachingSecretStore {
    pub fn new(inner: Arc<dyn SecretStore>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Forget every cached secret.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl SecretStore for CachingSecretStore {
    #[instrument(skip(self), fields(secret = %name))]
    async fn fetch(&self, name: &SecretName) -> Result<SigningSecret, SecretStoreError> {
        if self.ttl.is_zero() {
            return self.inner.fetch(name).await;
        }

        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(name) {
                if !cached.is_expired() {
                    debug!("Serving signing secret from cache");
                    return Ok(cached.value.clone());
                }
            }
        }

        let mut entries = self.entries.write().await;

        // Another request may have refreshed the entry while we waited for the lock.
        if let Some(cached) = entries.get(name) {
            if !cached.is_expired() {
                return Ok(cached.value.clone());
            }
        }

        let value = self.inner.fetch(name).await?;
        entries.insert(
            name.clone(),
            CachedSecret {
                value: value.clone(),
                expires_at: Timestamp::now().add_duration(self.ttl),
            },
        );
        debug!(ttl_seconds = self.ttl.as_secs(), "Cached signing secret");

        Ok(value)
    }
}
