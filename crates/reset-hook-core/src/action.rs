//! The administrative action: resetting the configured compute instance.
//!
//! Each inbound request produces at most one reset call. Success means the
//! compute API accepted the request and returned an operation handle; the
//! reset itself completes asynchronously on the remote side and cannot be
//! cancelled from here.

use crate::TargetResource;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, instrument};

#[cfg(test)]
#[path = "action_tests.rs"]
mod tests;

/// Handle returned by the compute API once a reset has been accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetAcceptance {
    /// Remote operation identifier
    pub operation: String,

    /// Operation status at acceptance time (e.g. `PENDING`, `RUNNING`)
    pub status: Option<String>,
}

/// Interface to the compute API's instance reset operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Request a reset of `target`, returning once the request is accepted.
    async fn reset_instance(&self, target: &TargetResource)
        -> Result<ResetAcceptance, ActionError>;
}

/// Errors from the reset call
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Compute API rejected reset of {target}: {status} - {message}")]
    Rejected {
        target: String,
        status: u16,
        message: String,
    },

    #[error("Compute API request failed: {message}")]
    Transport { message: String },

    #[error("Compute API returned an unexpected response: {message}")]
    InvalidResponse { message: String },

    #[error("Could not obtain credentials for the compute API: {message}")]
    Credentials { message: String },
}

impl ActionError {
    /// Check if the caller may succeed by re-issuing the command
    pub fn is_transient(&self) -> bool {
        match self {
            ActionError::Rejected { status, .. } => *status >= 500 || *status == 429,
            ActionError::Transport { .. } | ActionError::Credentials { .. } => true,
            ActionError::InvalidResponse { .. } => false,
        }
    }
}

/// Issues the reset against the fixed target.
#[derive(Clone)]
pub struct ActionExecutor {
    compute: Arc<dyn ComputeClient>,
    target: TargetResource,
}

impl ActionExecutor {
    pub fn new(compute: Arc<dyn ComputeClient>, target: TargetResource) -> Self {
        Self { compute, target }
    }

    pub fn target(&self) -> &TargetResource {
        &self.target
    }

    /// Issue exactly one reset call. No retries.
    #[instrument(skip(self), fields(target = %self.target))]
    pub async fn reset(&self) -> Result<ResetAcceptance, ActionError> {
        match self.compute.reset_instance(&self.target).await {
            Ok(acceptance) => {
                info!(
                    operation = %acceptance.operation,
                    status = acceptance.status.as_deref().unwrap_or("unknown"),
                    "Instance reset accepted"
                );
                Ok(acceptance)
            }
            Err(e) => {
                error!(error = %e, transient = e.is_transient(), "Instance reset failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("target", &self.target)
            .finish()
    }
}
