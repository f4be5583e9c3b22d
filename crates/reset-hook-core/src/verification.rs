//! Request signature verification.
//!
//! Implements the Slack request signing protocol:
//!
//! 1. Read the `v0=<hex>` signature and the Unix timestamp from the headers
//! 2. Reject timestamps further than the freshness window from now
//! 3. Fetch the latest signing secret
//! 4. Compute HMAC-SHA256 over `v0:{timestamp}:{raw body}` and compare it
//!    with the provided digest in constant time
//!
//! Verification mutates nothing. The only external call is the secret fetch,
//! and the secret is dropped before [`RequestVerifier::verify`] returns.

use crate::secret_store::{SecretName, SecretStore, SecretStoreError};
use crate::Timestamp;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::{collections::HashMap, sync::Arc, time::Duration};
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

#[cfg(test)]
#[path = "verification_tests.rs"]
mod tests;

type HmacSha256 = Hmac<Sha256>;

/// Version prefix of the signing protocol, used in the base string and the signature.
pub const SIGNATURE_VERSION: &str = "v0";

/// Default header carrying the `v0=<hex>` signature.
pub const DEFAULT_SIGNATURE_HEADER: &str = "x-slack-signature";

/// Default header carrying the request timestamp in Unix seconds.
pub const DEFAULT_TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Maximum distance between the request timestamp and the local clock.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Settings
// ============================================================================

/// Header names and replay window used by [`RequestVerifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierSettings {
    pub signature_header: String,
    pub timestamp_header: String,
    pub freshness_window: Duration,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            timestamp_header: DEFAULT_TIMESTAMP_HEADER.to_string(),
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
        }
    }
}

// ============================================================================
// Inbound Request
// ============================================================================

/// Raw header set and unparsed body of an inbound command request.
///
/// Header names are stored lower-cased so lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    headers: HashMap<String, String>,
    body: Bytes,
}

impl SignedRequest {
    pub fn new(headers: HashMap<String, String>, body: impl Into<Bytes>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// Get the raw payload bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

// ============================================================================
// Verifier
// ============================================================================

/// Authenticates inbound requests against the platform's signing secret.
pub struct RequestVerifier {
    secrets: Arc<dyn SecretStore>,
    secret_name: SecretName,
    settings: VerifierSettings,
}

impl RequestVerifier {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        secret_name: SecretName,
        settings: VerifierSettings,
    ) -> Self {
        Self {
            secrets,
            secret_name,
            settings,
        }
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    /// Verify the signature and freshness of `request`.
    ///
    /// # Errors
    ///
    /// - [`VerificationError::MissingHeaders`] when either header is absent or malformed
    /// - [`VerificationError::StaleTimestamp`] when the timestamp is outside the window
    /// - [`VerificationError::SecretUnavailable`] when the secret cannot be fetched
    /// - [`VerificationError::SignatureMismatch`] when the digest does not match
    #[instrument(skip(self, request), fields(body_len = request.body().len()))]
    pub async fn verify(&self, request: &SignedRequest) -> Result<(), VerificationError> {
        let signature = self.parse_signature(request)?;
        let (raw_timestamp, timestamp) = self.parse_timestamp(request)?;

        let skew = Timestamp::now().abs_diff(&timestamp);
        if skew > self.settings.freshness_window {
            warn!(
                timestamp = timestamp.unix_seconds(),
                skew_seconds = skew.as_secs(),
                "Rejecting request outside the freshness window"
            );
            return Err(VerificationError::StaleTimestamp {
                timestamp: timestamp.unix_seconds(),
                window_seconds: self.settings.freshness_window.as_secs(),
            });
        }

        let secret = self.secrets.fetch(&self.secret_name).await?;

        let expected = compute_digest(secret.expose_bytes(), raw_timestamp, request.body())?;

        // Length check is not secret-dependent; content comparison is constant time.
        let matches = expected.len() == signature.len()
            && bool::from(expected.as_slice().ct_eq(signature.as_slice()));
        if !matches {
            warn!("Request signature does not match computed digest");
            return Err(VerificationError::SignatureMismatch);
        }

        debug!("Request signature verified");
        Ok(())
    }

    fn parse_signature(&self, request: &SignedRequest) -> Result<Vec<u8>, VerificationError> {
        let header = &self.settings.signature_header;
        let value = request
            .header(header)
            .ok_or_else(|| VerificationError::missing(header, "header is absent"))?;

        let hex_part = value
            .strip_prefix(SIGNATURE_VERSION)
            .and_then(|rest| rest.strip_prefix('='))
            .ok_or_else(|| {
                VerificationError::missing(
                    header,
                    format!("signature must start with '{}='", SIGNATURE_VERSION),
                )
            })?;

        hex::decode(hex_part)
            .map_err(|e| VerificationError::missing(header, format!("invalid hex digest: {}", e)))
    }

    fn parse_timestamp<'a>(
        &self,
        request: &'a SignedRequest,
    ) -> Result<(&'a str, Timestamp), VerificationError> {
        let header = &self.settings.timestamp_header;
        let value = request
            .header(header)
            .ok_or_else(|| VerificationError::missing(header, "header is absent"))?;

        let seconds: i64 = value.trim().parse().map_err(|_| {
            VerificationError::missing(header, "timestamp is not an integer number of seconds")
        })?;

        let timestamp = Timestamp::from_unix_seconds(seconds)
            .ok_or_else(|| VerificationError::missing(header, "timestamp is out of range"))?;

        Ok((value, timestamp))
    }
}

impl std::fmt::Debug for RequestVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestVerifier")
            .field("secret_name", &self.secret_name.to_string())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Compute the `v0=<hex>` signature a platform would send for `body`.
///
/// Exposed so callers and tests can sign requests with a known secret.
pub fn compute_signature(
    secret: &[u8],
    timestamp: &str,
    body: &[u8],
) -> Result<String, VerificationError> {
    let digest = compute_digest(secret, timestamp, body)?;
    Ok(format!("{}={}", SIGNATURE_VERSION, hex::encode(digest)))
}

fn compute_digest(
    secret: &[u8],
    timestamp: &str,
    body: &[u8],
) -> Result<Vec<u8>, VerificationError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| VerificationError::HmacError {
        message: format!("Failed to create HMAC instance: {}", e),
    })?;

    mac.update(SIGNATURE_VERSION.as_bytes());
    mac.update(b":");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);

    Ok(mac.finalize().into_bytes().to_vec())
}

// ============================================================================
// Error Types
// ============================================================================

/// Reasons a request fails authentication
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Missing or malformed header {header}: {reason}")]
    MissingHeaders { header: String, reason: String },

    #[error("Request timestamp {timestamp} is outside the {window_seconds}s freshness window")]
    StaleTimestamp { timestamp: i64, window_seconds: u64 },

    #[error("Signing secret unavailable: {0}")]
    SecretUnavailable(#[from] SecretStoreError),

    #[error("Request signature does not match")]
    SignatureMismatch,

    #[error("HMAC computation failed: {message}")]
    HmacError { message: String },
}

impl VerificationError {
    fn missing(header: &str, reason: impl Into<String>) -> Self {
        Self::MissingHeaders {
            header: header.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the failure is on our side rather than the caller's.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            VerificationError::SecretUnavailable(_) | VerificationError::HmacError { .. }
        )
    }
}
