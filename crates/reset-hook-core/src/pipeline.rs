//! The ordered request pipeline: verify, reset, acknowledge, notify.
//!
//! Stage ordering is strict and short-circuiting:
//!
//! - nothing runs after a failed body read or verification, so the reset is
//!   never issued for an unauthenticated request
//! - an error before the acknowledgment is written to the caller as the
//!   response body
//! - once the reset has been accepted it is final; a failed acknowledgment
//!   write is logged and nothing else happens
//! - notification starts only after the acknowledgment write has completed
//!   and its failures are logged, never shown to the caller
//!
//! The pipeline holds no mutable state; one instance serves all requests.

use crate::action::{ActionError, ActionExecutor, ResetAcceptance};
use crate::notification::{NotificationDispatcher, NotifyError, NotifyOutcome};
use crate::verification::{RequestVerifier, SignedRequest, VerificationError};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, info, instrument, warn};

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;

/// Body written to the caller once the reset has been accepted.
pub const ACKNOWLEDGEMENT: &str = "OK";

// ============================================================================
// Response writer
// ============================================================================

/// One-shot sink for the caller's response body.
///
/// `write` consumes the writer so a response can only be written once.
#[async_trait]
pub trait ResponseWriter: Send + Sync + Sized {
    /// Write the complete response body and close the response.
    async fn write(self, body: Bytes) -> Result<(), WriteError>;

    /// Resolves when the caller has gone away.
    ///
    /// Writers that cannot observe disconnects never resolve.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }
}

/// Failure writing the response body
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("Client disconnected before the response was written")]
    ClientDisconnected,

    #[error("Failed to write response: {message}")]
    Io { message: String },
}

/// Failure reading the inbound request body
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to read request body: {message}")]
pub struct BodyReadError {
    pub message: String,
}

// ============================================================================
// Outcome
// ============================================================================

/// Errors that end an invocation before the acknowledgment.
///
/// The display text is what the caller receives as the response body.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    BodyRead(#[from] BodyReadError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("Request cancelled by the caller")]
    Cancelled,
}

impl PipelineError {
    /// Stage name used in logs
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::BodyRead(_) => "read_body",
            PipelineError::Verification(_) => "verify",
            PipelineError::Action(_) => "reset",
            PipelineError::Cancelled => "cancelled",
        }
    }

    fn is_caller_error(&self) -> bool {
        match self {
            PipelineError::BodyRead(_) | PipelineError::Cancelled => true,
            PipelineError::Verification(e) => !e.is_server_error(),
            PipelineError::Action(_) => false,
        }
    }
}

/// Result of one invocation, as seen by the server.
#[derive(Debug)]
pub enum InvocationOutcome {
    /// The request ended before the reset; the error text was sent to the caller.
    Rejected(PipelineError),

    /// The reset was accepted but the acknowledgment could not be written.
    AcknowledgementFailed {
        acceptance: ResetAcceptance,
        error: WriteError,
    },

    /// Reset accepted, caller acknowledged, notification sent or skipped.
    Completed {
        acceptance: ResetAcceptance,
        notification: NotifyOutcome,
    },

    /// Reset accepted and caller acknowledged; the audit notification failed.
    NotificationFailed {
        acceptance: ResetAcceptance,
        error: NotifyError,
    },
}

impl InvocationOutcome {
    /// Whether the compute API accepted a reset for this request
    pub fn reset_accepted(&self) -> bool {
        !matches!(self, InvocationOutcome::Rejected(_))
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Bundle of the stage components, built once at startup.
#[derive(Debug)]
pub struct ResetPipeline {
    verifier: RequestVerifier,
    executor: ActionExecutor,
    dispatcher: NotificationDispatcher,
}

impl ResetPipeline {
    pub fn new(
        verifier: RequestVerifier,
        executor: ActionExecutor,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            verifier,
            executor,
            dispatcher,
        }
    }

    pub fn verifier(&self) -> &RequestVerifier {
        &self.verifier
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Run every stage for one request.
    ///
    /// `request` is the result of reading the inbound body; a read failure is
    /// reported to the caller like any other pre-acknowledgment error.
    #[instrument(skip_all, fields(target = %self.executor.target()))]
    pub async fn run<W: ResponseWriter>(
        &self,
        request: Result<SignedRequest, BodyReadError>,
        writer: W,
    ) -> InvocationOutcome {
        let request = match request {
            Ok(request) => request,
            Err(e) => return self.reject(writer, e.into()).await,
        };

        // Outbound calls before the acknowledgment stop when the caller disconnects.
        let accepted = tokio::select! {
            biased;
            result = self.verify_and_reset(&request) => result,
            _ = writer.closed() => Err(PipelineError::Cancelled),
        };

        let acceptance = match accepted {
            Ok(acceptance) => acceptance,
            Err(e) => return self.reject(writer, e).await,
        };

        if let Err(error) = writer.write(Bytes::from_static(ACKNOWLEDGEMENT.as_bytes())).await {
            error!(
                error = %error,
                operation = %acceptance.operation,
                "Reset accepted but acknowledgment could not be written"
            );
            return InvocationOutcome::AcknowledgementFailed { acceptance, error };
        }

        match self.dispatcher.notify(request.body()).await {
            Ok(notification) => {
                info!(?notification, "Reset request completed");
                InvocationOutcome::Completed {
                    acceptance,
                    notification,
                }
            }
            Err(error) => {
                error!(error = %error, "Reset notification failed");
                InvocationOutcome::NotificationFailed { acceptance, error }
            }
        }
    }

    async fn verify_and_reset(
        &self,
        request: &SignedRequest,
    ) -> Result<ResetAcceptance, PipelineError> {
        self.verifier.verify(request).await?;
        Ok(self.executor.reset().await?)
    }

    async fn reject<W: ResponseWriter>(&self, writer: W, error: PipelineError) -> InvocationOutcome {
        if error.is_caller_error() {
            warn!(stage = error.stage(), error = %error, "Request rejected");
        } else {
            error!(stage = error.stage(), error = %error, "Request failed");
        }

        if !matches!(error, PipelineError::Cancelled) {
            if let Err(write_error) = writer.write(Bytes::from(error.to_string())).await {
                warn!(error = %write_error, "Could not write error response");
            }
        }

        InvocationOutcome::Rejected(error)
    }
}
