//! # Reset Hook
//!
//! Binary entry point for the reset hook service.
//!
//! This executable:
//! - Loads service configuration and the handler's environment settings
//! - Initializes logging
//! - Resolves the target project (explicit or from the metadata server)
//! - Wires the Google Cloud and Slack adapters into the pipeline
//! - Starts the HTTP server
//!
//! Exit codes: 1 bind failure, 2 server failure, 3 configuration error,
//! 4 project discovery failure.

use reset_hook_service::{
    build_pipeline,
    gcp::{self, AccessTokenProvider, ComputeEngineClient, MetadataClient, SecretManagerStore},
    slack::SlackWebhookPoster,
    start_server, telemetry, HandlerSettings, LoggingConfig, ServiceConfig, ServiceError,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let service_config = ServiceConfig::load();

    let logging = service_config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_else(|_| LoggingConfig::default());
    telemetry::init_logging(&logging)?;

    info!("Starting reset hook service");

    let service_config = match service_config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load service configuration; aborting");
            std::process::exit(3);
        }
    };

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    let settings = match HandlerSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Handler settings are invalid; aborting");
            std::process::exit(3);
        }
    };

    if !settings.notifications_configured()
        && (settings.notify_text_template.is_some() || settings.notify_webhook_url.is_some())
    {
        warn!("Only one of NOTIFY_TEXT_TEMPLATE and NOTIFY_CHANNEL_WEBHOOK_URL is set; notifications are disabled");
    }

    // -------------------------------------------------------------------------
    // Outbound clients
    // -------------------------------------------------------------------------
    let http = match gcp::build_http_client(service_config.gcp.request_timeout()) {
        Ok(http) => http,
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client; aborting");
            std::process::exit(3);
        }
    };

    let metadata = Arc::new(MetadataClient::new(
        http.clone(),
        service_config.gcp.metadata_url.clone(),
    ));

    let project_id = match &settings.target_project_id {
        Some(project_id) => project_id.clone(),
        None => match metadata.project_id().await {
            Ok(project_id) => {
                info!(project_id = %project_id, "Discovered project from metadata server");
                project_id
            }
            Err(e) => {
                error!(error = %e, "Could not determine the target project; aborting");
                std::process::exit(4);
            }
        },
    };

    let tokens: Arc<dyn AccessTokenProvider> = metadata;
    let secrets = Arc::new(SecretManagerStore::new(
        http.clone(),
        service_config.gcp.secret_manager_url.clone(),
        tokens.clone(),
    ));
    let compute = Arc::new(ComputeEngineClient::new(
        http.clone(),
        service_config.gcp.compute_url.clone(),
        tokens,
    ));
    let poster = Arc::new(SlackWebhookPoster::new(http));

    let pipeline = match build_pipeline(
        &service_config,
        &settings,
        &project_id,
        secrets,
        compute,
        poster,
    ) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "Failed to build the request pipeline; aborting");
            std::process::exit(3);
        }
    };

    info!(
        target_instance = %pipeline.executor().target(),
        notifications = pipeline.dispatcher().is_enabled(),
        "Reset pipeline ready"
    );

    if let Err(e) = start_server(service_config, pipeline).await {
        error!("Failed to start server: {}", e);

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
        };

        std::process::exit(exit_code);
    }

    Ok(())
}
