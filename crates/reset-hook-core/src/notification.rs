//! Audit notification of a completed reset request.
//!
//! After the caller has been acknowledged, a text message is rendered from a
//! configured template and posted to an incoming webhook. The feature is
//! optional: with either the template or the webhook URL missing, the
//! dispatcher does nothing.
//!
//! # Template syntax
//!
//! Placeholders are written `{{ .Field }}` or `{{ field }}`:
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `ChannelName` / `channel_name` | channel the command was issued in |
//! | `UserName` / `user_name` | user who issued the command |
//! | `ProjectID` / `project_id` | target project |
//! | `Zone` / `zone` | target zone |
//! | `InstanceName` / `instance_name` | target instance |
//!
//! ```rust
//! use reset_hook_core::{NotificationPayload, NotificationTemplate};
//!
//! let template = NotificationTemplate::parse("{{ .UserName }} reset {{ .InstanceName }}").unwrap();
//! let payload = NotificationPayload {
//!     channel_name: "ops".to_string(),
//!     user_name: "alice".to_string(),
//!     project_id: "proj".to_string(),
//!     zone: "zone-a".to_string(),
//!     instance_name: "runner".to_string(),
//! };
//! assert_eq!(template.render(&payload).unwrap(), "alice reset runner");
//! ```

use crate::TargetResource;
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::{fmt, sync::Arc};
use tracing::{debug, info, instrument};

#[cfg(test)]
#[path = "notification_tests.rs"]
mod tests;

const PLACEHOLDER_PATTERN: &str = r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_]*)\s*\}\}";

// ============================================================================
// Payload
// ============================================================================

/// Values available to the notification template.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationPayload {
    pub channel_name: String,
    pub user_name: String,
    pub project_id: String,
    pub zone: String,
    pub instance_name: String,
}

impl NotificationPayload {
    /// Build the payload from the raw form-encoded command body.
    ///
    /// Absent fields render as empty strings. When a field is repeated the
    /// first value wins.
    ///
    /// # Errors
    /// Returns [`NotifyError::InvalidBody`] when the body is not UTF-8.
    pub fn from_form_body(body: &[u8], target: &TargetResource) -> Result<Self, NotifyError> {
        if std::str::from_utf8(body).is_err() {
            return Err(NotifyError::InvalidBody {
                message: "command body is not valid UTF-8".to_string(),
            });
        }

        let mut channel_name = None;
        let mut user_name = None;
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "channel_name" if channel_name.is_none() => channel_name = Some(value.into_owned()),
                "user_name" if user_name.is_none() => user_name = Some(value.into_owned()),
                _ => {}
            }
        }

        Ok(Self {
            channel_name: channel_name.unwrap_or_default(),
            user_name: user_name.unwrap_or_default(),
            project_id: target.project_id().to_string(),
            zone: target.zone().to_string(),
            instance_name: target.instance_name().to_string(),
        })
    }
}

// ============================================================================
// Template
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateField {
    ChannelName,
    UserName,
    ProjectId,
    Zone,
    InstanceName,
}

impl TemplateField {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "ChannelName" | "channel_name" => Some(Self::ChannelName),
            "UserName" | "user_name" => Some(Self::UserName),
            "ProjectID" | "ProjectId" | "project_id" => Some(Self::ProjectId),
            "Zone" | "zone" => Some(Self::Zone),
            "InstanceName" | "instance_name" => Some(Self::InstanceName),
            _ => None,
        }
    }

    fn value<'a>(&self, payload: &'a NotificationPayload) -> &'a str {
        match self {
            Self::ChannelName => &payload.channel_name,
            Self::UserName => &payload.user_name,
            Self::ProjectId => &payload.project_id,
            Self::Zone => &payload.zone,
            Self::InstanceName => &payload.instance_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(TemplateField),
    Unknown(String),
}

/// Parsed notification text template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl NotificationTemplate {
    /// Parse template text.
    ///
    /// Unknown field names are accepted here and reported by
    /// [`NotificationTemplate::render`] or [`NotificationTemplate::check_fields`].
    ///
    /// # Errors
    /// Returns [`NotifyError::Template`] when a `{{` is not closed by a
    /// well-formed placeholder.
    pub fn parse(source: impl Into<String>) -> Result<Self, NotifyError> {
        let source = source.into();
        let placeholder = Regex::new(PLACEHOLDER_PATTERN).map_err(|e| NotifyError::Template {
            message: format!("placeholder pattern failed to compile: {}", e),
        })?;

        let mut segments = Vec::new();
        let mut last = 0;
        for captures in placeholder.captures_iter(&source) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &source[last..whole.start()])?;
            segments.push(match TemplateField::from_name(name.as_str()) {
                Some(field) => Segment::Field(field),
                None => Segment::Unknown(name.as_str().to_string()),
            });
            last = whole.end();
        }
        push_literal(&mut segments, &source[last..])?;

        Ok(Self { source, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Fail if the template references a field the payload does not carry.
    pub fn check_fields(&self) -> Result<(), NotifyError> {
        match self.segments.iter().find_map(|s| match s {
            Segment::Unknown(name) => Some(name),
            _ => None,
        }) {
            Some(name) => Err(NotifyError::unknown_field(name)),
            None => Ok(()),
        }
    }

    /// Substitute every placeholder with the payload value.
    pub fn render(&self, payload: &NotificationPayload) -> Result<String, NotifyError> {
        let mut rendered = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Field(field) => rendered.push_str(field.value(payload)),
                Segment::Unknown(name) => return Err(NotifyError::unknown_field(name)),
            }
        }
        Ok(rendered)
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<(), NotifyError> {
    if text.contains("{{") {
        return Err(NotifyError::Template {
            message: format!("malformed or unterminated placeholder near '{}'", text.trim()),
        });
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

// ============================================================================
// Webhook poster
// ============================================================================

/// Message body posted to the audit webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookMessage {
    pub text: String,
}

/// Interface for posting a message to an incoming webhook URL.
#[async_trait]
pub trait WebhookPoster: Send + Sync {
    async fn post(&self, url: &str, message: &WebhookMessage) -> Result<(), PostError>;
}

/// Failure delivering the webhook message
#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("webhook returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("webhook request failed: {message}")]
    Transport { message: String },
}

// ============================================================================
// Dispatcher
// ============================================================================

/// What [`NotificationDispatcher::notify`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Notifications are not configured
    Skipped,
    /// The rendered message was accepted by the webhook
    Delivered,
}

/// Errors from the notification stage
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification template error: {message}")]
    Template { message: String },

    #[error("Notification post failed: {0}")]
    Post(#[from] PostError),

    #[error("Command body could not be parsed: {message}")]
    InvalidBody { message: String },
}

impl NotifyError {
    fn unknown_field(name: &str) -> Self {
        Self::Template {
            message: format!("template references unknown field '{}'", name),
        }
    }
}

struct NotificationTarget {
    template: NotificationTemplate,
    webhook_url: String,
}

/// Renders and posts the audit message.
pub struct NotificationDispatcher {
    poster: Arc<dyn WebhookPoster>,
    target: TargetResource,
    destination: Option<NotificationTarget>,
}

impl NotificationDispatcher {
    /// Create a dispatcher; notifications are enabled only when both the
    /// template and the webhook URL are present.
    pub fn new(
        poster: Arc<dyn WebhookPoster>,
        target: TargetResource,
        template: Option<NotificationTemplate>,
        webhook_url: Option<String>,
    ) -> Self {
        let destination = match (template, webhook_url) {
            (Some(template), Some(webhook_url)) if !webhook_url.is_empty() => {
                Some(NotificationTarget {
                    template,
                    webhook_url,
                })
            }
            _ => None,
        };

        Self {
            poster,
            target,
            destination,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.destination.is_some()
    }

    /// Announce the reset triggered by the command in `raw_body`.
    #[instrument(skip(self, raw_body), fields(enabled = self.is_enabled()))]
    pub async fn notify(&self, raw_body: &[u8]) -> Result<NotifyOutcome, NotifyError> {
        let Some(destination) = &self.destination else {
            debug!("Notification not configured; skipping");
            return Ok(NotifyOutcome::Skipped);
        };

        let payload = NotificationPayload::from_form_body(raw_body, &self.target)?;
        let text = destination.template.render(&payload)?;

        self.poster
            .post(&destination.webhook_url, &WebhookMessage { text })
            .await?;

        info!(
            channel = %payload.channel_name,
            user = %payload.user_name,
            "Reset notification delivered"
        );
        Ok(NotifyOutcome::Delivered)
    }
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("target", &self.target)
            .field("enabled", &self.is_enabled())
            .field("webhook_url", &"<REDACTED>")
            .finish()
    }
}
