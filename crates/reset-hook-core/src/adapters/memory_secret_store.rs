//! # In-Memory Secret Store
//!
//! Thread-safe in-memory [`SecretStore`] for testing and development.
//! Counts fetches so tests can assert how often the backend was reached.

use crate::secret_store::{SecretName, SecretStore, SecretStoreError, SigningSecret};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::sync::RwLock;

#[cfg(test)]
#[path = "memory_secret_store_tests.rs"]
mod tests;

/// In-memory secret store keyed by [`SecretName`].
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<SecretName, Vec<u8>>>,
    fetch_count: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemorySecretStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding a single secret
    pub fn with_secret(name: SecretName, value: impl Into<Vec<u8>>) -> Self {
        let mut secrets = HashMap::new();
        secrets.insert(name, value.into());
        Self {
            secrets: RwLock::new(secrets),
            ..Self::default()
        }
    }

    /// Store a new latest version of `name`
    pub async fn put(&self, name: SecretName, value: impl Into<Vec<u8>>) {
        self.secrets.write().await.insert(name, value.into());
    }

    /// Simulate a backend outage; fetches fail with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of fetch calls received, including failed ones
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn fetch(&self, name: &SecretName) -> Result<SigningSecret, SecretStoreError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SecretStoreError::Unavailable {
                message: "in-memory store marked unavailable".to_string(),
            });
        }

        self.secrets
            .read()
            .await
            .get(name)
            .map(|bytes| SigningSecret::from_bytes(bytes.clone()))
            .ok_or_else(|| SecretStoreError::NotFound {
                name: name.to_string(),
            })
    }
}
