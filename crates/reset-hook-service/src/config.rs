//! Service configuration
//!
//! Settings that shape the HTTP service itself rather than the handler's
//! target. Loaded with the `config` crate from, in order of precedence:
//!
//! 1. `/etc/reset-hook/service.yaml`
//! 2. `./config/service.yaml`
//! 3. the file named by `RESET_HOOK_CONFIG_FILE`
//! 4. `RESET_HOOK__*` environment variables (`RESET_HOOK__SERVER__PORT=9090`)
//! 5. `PORT`, the serverless platform's listen port
//!
//! Every field carries a serde default, so an empty environment yields a
//! usable configuration.

use reset_hook_core::verification::{DEFAULT_SIGNATURE_HEADER, DEFAULT_TIMESTAMP_HEADER};
use reset_hook_core::VerifierSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_FILE_ENV: &str = "RESET_HOOK_CONFIG_FILE";

/// Prefix for environment overrides of [`ServiceConfig`] fields.
pub const ENV_PREFIX: &str = "RESET_HOOK";

/// Listen port injected by the serverless platform.
pub const PLATFORM_PORT_ENV: &str = "PORT";

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Request signature verification
    pub verification: VerificationConfig,

    /// Google Cloud API endpoints
    pub gcp: GcpConfig,
}

impl ServiceConfig {
    /// Load configuration from the standard file locations and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_FILE_ENV)
            .ok()
            .filter(|path| !path.is_empty());
        Self::load_from(explicit.as_deref().map(Path::new))
    }

    /// Load configuration with `explicit_file` as the operator-supplied file.
    ///
    /// The explicit file must exist; the standard locations are optional.
    pub fn load_from(explicit_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/reset-hook/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name("config/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Some(path) = explicit_file {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let mut service_config: ServiceConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Ok(port) = std::env::var(PLATFORM_PORT_ENV) {
            service_config.server.port =
                port.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
                    variable: PLATFORM_PORT_ENV.to_string(),
                    message: format!("'{}' is not a valid port number", port),
                })?;
        }

        Ok(service_config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.endpoint_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                message: format!(
                    "server.endpoint_path '{}' must start with '/'",
                    self.server.endpoint_path
                ),
            });
        }

        if self.server.endpoint_path == HEALTH_PATH {
            return Err(ConfigError::Invalid {
                message: format!("server.endpoint_path must not be '{}'", HEALTH_PATH),
            });
        }

        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be greater than zero".to_string(),
            });
        }

        if self.verification.freshness_window_seconds == 0 {
            return Err(ConfigError::Invalid {
                message: "verification.freshness_window_seconds must be greater than zero"
                    .to_string(),
            });
        }

        for (key, value) in [
            (
                "verification.signature_header",
                &self.verification.signature_header,
            ),
            (
                "verification.timestamp_header",
                &self.verification.timestamp_header,
            ),
        ] {
            if axum::http::HeaderName::from_bytes(value.as_bytes()).is_err() {
                return Err(ConfigError::Invalid {
                    message: format!("{} '{}' is not a valid header name", key, value),
                });
            }
        }

        for (key, value) in [
            ("gcp.metadata_url", &self.gcp.metadata_url),
            ("gcp.secret_manager_url", &self.gcp.secret_manager_url),
            ("gcp.compute_url", &self.gcp.compute_url),
        ] {
            let parsed = url::Url::parse(value).map_err(|e| ConfigError::Invalid {
                message: format!("{} '{}' is not a valid URL: {}", key, value, e),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid {
                    message: format!("{} '{}' must use http or https", key, value),
                });
            }
        }

        if self.gcp.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                message: "gcp.request_timeout_seconds must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Path of the liveness endpoint; reserved.
pub const HEALTH_PATH: &str = "/health";

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Path receiving the signed command
    pub endpoint_path: String,

    /// Maximum request size in bytes
    pub max_body_size: usize,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            endpoint_path: "/".to_string(),
            max_body_size: 1024 * 1024, // 1MB
            shutdown_timeout_seconds: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "reset_hook_service=info,reset_hook_core=info,tower_http=info".to_string(),
            json_format: false,
        }
    }
}

/// Signature verification configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerificationConfig {
    pub signature_header: String,

    pub timestamp_header: String,

    /// Maximum allowed clock distance of the request timestamp
    pub freshness_window_seconds: u64,

    /// How long a fetched signing secret may be reused (0 = fetch every request)
    pub secret_cache_ttl_seconds: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            timestamp_header: DEFAULT_TIMESTAMP_HEADER.to_string(),
            freshness_window_seconds: 300,
            secret_cache_ttl_seconds: 0,
        }
    }
}

impl VerificationConfig {
    pub fn verifier_settings(&self) -> VerifierSettings {
        VerifierSettings {
            signature_header: self.signature_header.to_ascii_lowercase(),
            timestamp_header: self.timestamp_header.to_ascii_lowercase(),
            freshness_window: Duration::from_secs(self.freshness_window_seconds),
        }
    }

    pub fn secret_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.secret_cache_ttl_seconds)
    }
}

/// Google Cloud endpoint configuration
///
/// The defaults are the production endpoints; tests and emulators point them
/// elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GcpConfig {
    pub metadata_url: String,

    pub secret_manager_url: String,

    pub compute_url: String,

    /// Timeout for each outbound request in seconds
    pub request_timeout_seconds: u64,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            metadata_url: "http://metadata.google.internal".to_string(),
            secret_manager_url: "https://secretmanager.googleapis.com".to_string(),
            compute_url: "https://compute.googleapis.com".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl GcpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable missing
    #[error("Missing required environment variable: {variable}")]
    MissingEnvVar { variable: String },

    /// Environment variable has invalid value
    #[error("Invalid value for environment variable {variable}: {message}")]
    InvalidEnvVar { variable: String, message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}
