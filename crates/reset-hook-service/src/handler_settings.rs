//! Handler settings from the deployment environment
//!
//! The handler reads a fixed set of environment variables once at startup:
//!
//! | Variable | Required | Meaning |
//! |----------|----------|---------|
//! | `TARGET_PROJECT_ID` | no | Project of the target instance and the signing secret; discovered from the metadata server when unset |
//! | `TARGET_ZONE` | yes | Zone of the target instance |
//! | `TARGET_INSTANCE_NAME` | yes | Name of the target instance |
//! | `SLACK_SIGNING_SECRET_SECRET_ID` | yes | Secret Manager ID holding the signing secret |
//! | `NOTIFY_TEXT_TEMPLATE` | no | Audit message template |
//! | `NOTIFY_CHANNEL_WEBHOOK_URL` | no | Audit incoming webhook URL |
//!
//! Empty values count as unset.

use crate::config::ConfigError;
use reset_hook_core::{NotificationTemplate, SecretName, TargetResource};
use std::fmt;

#[cfg(test)]
#[path = "handler_settings_tests.rs"]
mod tests;

pub const TARGET_PROJECT_ID_ENV: &str = "TARGET_PROJECT_ID";
pub const TARGET_ZONE_ENV: &str = "TARGET_ZONE";
pub const TARGET_INSTANCE_NAME_ENV: &str = "TARGET_INSTANCE_NAME";
pub const SIGNING_SECRET_ID_ENV: &str = "SLACK_SIGNING_SECRET_SECRET_ID";
pub const NOTIFY_TEXT_TEMPLATE_ENV: &str = "NOTIFY_TEXT_TEMPLATE";
pub const NOTIFY_WEBHOOK_URL_ENV: &str = "NOTIFY_CHANNEL_WEBHOOK_URL";

/// Target, secret and notification settings for the handler.
#[derive(Clone, PartialEq, Eq)]
pub struct HandlerSettings {
    /// Explicit project; `None` means discover from the metadata server
    pub target_project_id: Option<String>,

    pub target_zone: String,

    pub target_instance_name: String,

    /// Secret Manager secret ID of the signing secret
    pub signing_secret_id: String,

    pub notify_text_template: Option<String>,

    pub notify_webhook_url: Option<String>,
}

impl HandlerSettings {
    /// Load settings from environment variables
    ///
    /// # Errors
    /// Returns error if a required variable is missing or a value is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Self {
            target_project_id: optional_var(TARGET_PROJECT_ID_ENV).map(|v| v.trim().to_string()),
            target_zone: required_var(TARGET_ZONE_ENV)?,
            target_instance_name: required_var(TARGET_INSTANCE_NAME_ENV)?,
            signing_secret_id: required_var(SIGNING_SECRET_ID_ENV)?,
            notify_text_template: optional_var(NOTIFY_TEXT_TEMPLATE_ENV),
            notify_webhook_url: optional_var(NOTIFY_WEBHOOK_URL_ENV),
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings that do not depend on the resolved project.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (variable, value) in [
            (TARGET_ZONE_ENV, &self.target_zone),
            (TARGET_INSTANCE_NAME_ENV, &self.target_instance_name),
        ] {
            if value.contains('/') {
                return Err(ConfigError::InvalidEnvVar {
                    variable: variable.to_string(),
                    message: format!("'{}' must not contain '/'", value),
                });
            }
        }

        if let Some(project) = &self.target_project_id {
            if project.contains('/') {
                return Err(ConfigError::InvalidEnvVar {
                    variable: TARGET_PROJECT_ID_ENV.to_string(),
                    message: format!("'{}' must not contain '/'", project),
                });
            }
        }

        // Project scope is irrelevant to the secret ID rules
        SecretName::new("validation", &self.signing_secret_id).map_err(|e| {
            ConfigError::InvalidEnvVar {
                variable: SIGNING_SECRET_ID_ENV.to_string(),
                message: e.to_string(),
            }
        })?;

        self.notification_template()?;

        if let Some(webhook_url) = &self.notify_webhook_url {
            let parsed = url::Url::parse(webhook_url).map_err(|e| ConfigError::InvalidEnvVar {
                variable: NOTIFY_WEBHOOK_URL_ENV.to_string(),
                message: format!("not a valid URL: {}", e),
            })?;
            if parsed.scheme() != "https" && parsed.scheme() != "http" {
                return Err(ConfigError::InvalidEnvVar {
                    variable: NOTIFY_WEBHOOK_URL_ENV.to_string(),
                    message: "webhook URL must use http or https".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Whether both halves of the audit notification are configured
    pub fn notifications_configured(&self) -> bool {
        self.notify_text_template.is_some() && self.notify_webhook_url.is_some()
    }

    /// Parse the notification template, rejecting unknown fields up front.
    pub fn notification_template(&self) -> Result<Option<NotificationTemplate>, ConfigError> {
        let Some(source) = &self.notify_text_template else {
            return Ok(None);
        };

        let template = NotificationTemplate::parse(source.as_str()).map_err(|e| {
            ConfigError::InvalidEnvVar {
                variable: NOTIFY_TEXT_TEMPLATE_ENV.to_string(),
                message: e.to_string(),
            }
        })?;
        template
            .check_fields()
            .map_err(|e| ConfigError::InvalidEnvVar {
                variable: NOTIFY_TEXT_TEMPLATE_ENV.to_string(),
                message: e.to_string(),
            })?;

        Ok(Some(template))
    }

    /// Build the target once the project is known.
    pub fn target(&self, project_id: &str) -> Result<TargetResource, ConfigError> {
        TargetResource::new(
            project_id,
            self.target_zone.as_str(),
            self.target_instance_name.as_str(),
        )
        .map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })
    }

    /// Name of the signing secret, scoped to the target's project.
    pub fn secret_name(&self, project_id: &str) -> Result<SecretName, ConfigError> {
        SecretName::new(project_id, self.signing_secret_id.as_str()).map_err(|e| {
            ConfigError::Invalid {
                message: e.to_string(),
            }
        })
    }
}

impl fmt::Debug for HandlerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSettings")
            .field("target_project_id", &self.target_project_id)
            .field("target_zone", &self.target_zone)
            .field("target_instance_name", &self.target_instance_name)
            .field("signing_secret_id", &self.signing_secret_id)
            .field("notify_text_template", &self.notify_text_template)
            .field(
                "notify_webhook_url",
                if self.notify_webhook_url.is_some() {
                    &"<REDACTED>"
                } else {
                    &"None"
                },
            )
            .finish()
    }
}

fn required_var(variable: &str) -> Result<String, ConfigError> {
    optional_var(variable)
        .map(|value| value.trim().to_string())
        .ok_or_else(|| ConfigError::MissingEnvVar {
            variable: variable.to_string(),
        })
}

fn optional_var(variable: &str) -> Option<String> {
    std::env::var(variable)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
