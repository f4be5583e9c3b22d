//! # Reset Hook Service
//!
//! HTTP front end for the reset pipeline.
//!
//! This crate provides:
//! - The signed command endpoint and a liveness endpoint
//! - Configuration from files and the deployment environment
//! - Google Cloud (Secret Manager, Compute Engine, metadata) and Slack adapters
//! - Server startup with graceful shutdown
//!
//! The command endpoint always answers `200`: the response body is streamed
//! and its content (`OK` or the error text) is only known once the pipeline
//! has run.

pub mod config;
pub mod gcp;
pub mod handler_settings;
pub mod slack;
pub mod telemetry;

pub use config::{
    ConfigError, GcpConfig, LoggingConfig, ServerConfig, ServiceConfig, VerificationConfig,
    HEALTH_PATH,
};
pub use handler_settings::HandlerSettings;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use reset_hook_core::{
    secret_store::CachingSecretStore, ActionExecutor, BodyReadError, ComputeClient,
    NotificationDispatcher, RequestVerifier, ResetPipeline, ResponseWriter, SecretStore,
    SignedRequest, WebhookPoster, WriteError,
};
use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, Notify};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn, Instrument, Span};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: ServiceConfig,

    /// Stage components shared by every request
    pub pipeline: Arc<ResetPipeline>,

    in_flight: InFlightInvocations,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ServiceConfig, pipeline: Arc<ResetPipeline>) -> Self {
        Self {
            config,
            pipeline,
            in_flight: InFlightInvocations::default(),
        }
    }

    /// Pipeline tasks that have not yet finished
    pub fn in_flight(&self) -> &InFlightInvocations {
        &self.in_flight
    }
}

/// Wire the pipeline from configuration and the capability implementations.
///
/// The secret store is wrapped in a TTL cache when
/// `verification.secret_cache_ttl_seconds` is non-zero.
pub fn build_pipeline(
    config: &ServiceConfig,
    settings: &HandlerSettings,
    project_id: &str,
    secrets: Arc<dyn SecretStore>,
    compute: Arc<dyn ComputeClient>,
    poster: Arc<dyn WebhookPoster>,
) -> Result<ResetPipeline, ConfigError> {
    let target = settings.target(project_id)?;
    let secret_name = settings.secret_name(project_id)?;

    let cache_ttl = config.verification.secret_cache_ttl();
    let secrets: Arc<dyn SecretStore> = if cache_ttl.is_zero() {
        secrets
    } else {
        info!(ttl_seconds = cache_ttl.as_secs(), "Signing secret cache enabled");
        Arc::new(CachingSecretStore::new(secrets, cache_ttl))
    };

    let verifier = RequestVerifier::new(
        secrets,
        secret_name,
        config.verification.verifier_settings(),
    );
    let executor = ActionExecutor::new(compute, target.clone());
    let dispatcher = NotificationDispatcher::new(
        poster,
        target,
        settings.notification_template()?,
        settings.notify_webhook_url.clone(),
    );

    Ok(ResetPipeline::new(verifier, executor, dispatcher))
}

// ============================================================================
// In-flight tracking
// ============================================================================

/// Counts spawned pipeline tasks so shutdown can wait for notifications.
#[derive(Clone, Default)]
pub struct InFlightInvocations {
    inner: Arc<InFlightInner>,
}

#[derive(Default)]
struct InFlightInner {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlightInvocations {
    fn enter(&self) -> InFlightGuard {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Resolves once no pipeline task is running.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.count() == 0 {
                return;
            }
            idle.await;
        }
    }
}

struct InFlightGuard {
    inner: Arc<InFlightInner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

// ============================================================================
// Response writer
// ============================================================================

/// [`ResponseWriter`] feeding a streamed HTTP response body.
///
/// The body stays open until the writer has written or been dropped. When
/// the client goes away the body is dropped, which closes the channel.
#[derive(Debug)]
pub struct ChannelResponseWriter {
    sender: mpsc::Sender<Bytes>,
}

impl ChannelResponseWriter {
    /// Create a writer and the response body it feeds.
    pub fn channel() -> (Self, Body) {
        let (sender, receiver) = mpsc::channel(1);
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver
                .recv()
                .await
                .map(|chunk| (Ok::<_, Infallible>(chunk), receiver))
        });
        (Self { sender }, Body::from_stream(stream))
    }
}

#[async_trait]
impl ResponseWriter for ChannelResponseWriter {
    async fn write(self, body: Bytes) -> Result<(), WriteError> {
        self.sender
            .send(body)
            .await
            .map_err(|_| WriteError::ClientDisconnected)
    }

    async fn closed(&self) {
        self.sender.closed().await
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(&state.config.server.endpoint_path, post(handle_reset))
        .route(HEALTH_PATH, get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start HTTP server
pub async fn start_server(config: ServiceConfig, pipeline: ResetPipeline) -> Result<(), ServiceError> {
    let state = AppState::new(config.clone(), Arc::new(pipeline));
    let in_flight = state.in_flight().clone();
    let app = create_router(state);

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

    info!(
        address = %address,
        endpoint = %config.server.endpoint_path,
        "Starting HTTP server"
    );

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);

    // Stops accepting connections on the signal, then waits for open
    // responses; notifications still running afterwards are awaited below.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    if tokio::time::timeout(shutdown_timeout, in_flight.wait_idle())
        .await
        .is_err()
    {
        warn!(
            remaining = in_flight.count(),
            "Shutdown timeout elapsed with invocations still running"
        );
    }

    info!("HTTP server shutdown complete");
    Ok(())
}

async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown with {}s timeout", timeout.as_secs());
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown with {}s timeout", timeout.as_secs());
        },
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Handle a signed reset command.
///
/// Reads the body, then hands the request and a streaming response writer to
/// a spawned pipeline task and returns the (still open) response at once.
#[instrument(skip_all)]
pub async fn handle_reset(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Response {
    let request = axum::body::to_bytes(body, state.config.server.max_body_size)
        .await
        .map(|bytes| SignedRequest::new(header_map(&headers), bytes))
        .map_err(|e| BodyReadError {
            message: e.to_string(),
        });

    let (writer, response_body) = ChannelResponseWriter::channel();
    let pipeline = state.pipeline.clone();
    let guard = state.in_flight.enter();

    tokio::spawn(
        async move {
            let _guard = guard;
            let outcome = pipeline.run(request, writer).await;
            debug!(
                reset_accepted = outcome.reset_accepted(),
                "Invocation finished"
            );
        }
        .instrument(Span::current()),
    );

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        response_body,
    )
        .into_response()
}

/// Liveness probe
pub async fn handle_health() -> &'static str {
    "OK"
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_lowercase(),
                v.to_str().unwrap_or("").to_string(),
            )
        })
        .collect()
}

// ============================================================================
// Errors
// ============================================================================

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },
}
