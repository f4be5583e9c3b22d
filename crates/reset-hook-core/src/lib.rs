//! # Reset Hook Core
//!
//! Domain logic for the signed chat-command handler that resets a single
//! compute instance.
//!
//! One invocation runs four ordered stages:
//!
//! 1. [`verification::RequestVerifier`] authenticates the request signature
//! 2. [`action::ActionExecutor`] issues the reset against the fixed target
//! 3. [`pipeline::ResponseWriter`] acknowledges the caller with `OK`
//! 4. [`notification::NotificationDispatcher`] announces the reset to the audit webhook
//!
//! ## Architecture
//!
//! The core follows the same layering as the rest of the workspace:
//! - Business logic depends only on trait abstractions
//! - Infrastructure implementations (Secret Manager, Compute Engine, Slack)
//!   are injected at runtime by the service crate
//! - In-memory adapters live in [`adapters`] for tests and local runs
//!
//! ## Usage
//!
//! ```rust
//! use reset_hook_core::TargetResource;
//!
//! let target = TargetResource::new("my-project", "us-central1-a", "build-box").unwrap();
//! assert_eq!(target.to_string(), "my-project/us-central1-a/build-box");
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod action;
pub mod adapters;
pub mod notification;
pub mod pipeline;
pub mod secret_store;
pub mod verification;

pub use action::{ActionError, ActionExecutor, ComputeClient, ResetAcceptance};
pub use notification::{
    NotificationDispatcher, NotificationPayload, NotificationTemplate, NotifyError, NotifyOutcome,
    PostError, WebhookMessage, WebhookPoster,
};
pub use pipeline::{
    BodyReadError, InvocationOutcome, PipelineError, ResetPipeline, ResponseWriter, WriteError,
    ACKNOWLEDGEMENT,
};
pub use secret_store::{SecretName, SecretStore, SecretStoreError, SigningSecret};
pub use verification::{RequestVerifier, SignedRequest, VerificationError, VerifierSettings};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// Target Resource
// ============================================================================

/// The compute instance this process is allowed to reset.
///
/// Resolved once at startup and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResource {
    project_id: String,
    zone: String,
    instance_name: String,
}

impl TargetResource {
    /// Create a target from its three identifiers.
    ///
    /// # Errors
    /// Returns [`InvalidTargetError`] when any identifier is empty or contains
    /// a `/`, which would corrupt the resource path sent to the compute API.
    pub fn new(
        project_id: impl Into<String>,
        zone: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Result<Self, InvalidTargetError> {
        let target = Self {
            project_id: project_id.into(),
            zone: zone.into(),
            instance_name: instance_name.into(),
        };

        for (field, value) in [
            ("project_id", &target.project_id),
            ("zone", &target.zone),
            ("instance_name", &target.instance_name),
        ] {
            if value.trim().is_empty() {
                return Err(InvalidTargetError {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
            if value.contains('/') {
                return Err(InvalidTargetError {
                    field,
                    reason: format!("'{}' must not contain '/'", value),
                });
            }
        }

        Ok(target)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }
}

impl fmt::Display for TargetResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project_id, self.zone, self.instance_name)
    }
}

/// A target identifier failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid target {field}: {reason}")]
pub struct InvalidTargetError {
    pub field: &'static str,
    pub reason: String,
}

// ============================================================================
// Timestamp
// ============================================================================

/// UTC timestamp wrapper used for request freshness and cache expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Build a timestamp from whole seconds since the Unix epoch.
    ///
    /// Returns `None` when the value is outside chrono's representable range.
    pub fn from_unix_seconds(seconds: i64) -> Option<Self> {
        Utc.timestamp_opt(seconds, 0).single().map(Self)
    }

    /// Whole seconds since the Unix epoch
    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Add a duration to the timestamp, saturating at the maximum instant.
    pub fn add_duration(&self, duration: Duration) -> Self {
        Self(
            chrono::Duration::from_std(duration)
                .ok()
                .and_then(|d| self.0.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// Absolute distance between two timestamps.
    pub fn abs_diff(&self, other: &Timestamp) -> Duration {
        (self.0 - other.0)
            .abs()
            .to_std()
            .unwrap_or(Duration::MAX)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
