//! Slack incoming webhook implementation of [`WebhookPoster`].

use async_trait::async_trait;
use reset_hook_core::{PostError, WebhookMessage, WebhookPoster};
use tracing::instrument;

#[cfg(test)]
#[path = "slack_tests.rs"]
mod tests;

/// Posts `{"text": ...}` messages to Slack incoming webhooks.
#[derive(Debug, Clone)]
pub struct SlackWebhookPoster {
    http: reqwest::Client,
}

impl SlackWebhookPoster {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl WebhookPoster for SlackWebhookPoster {
    // The webhook URL embeds a credential and is never recorded.
    #[instrument(skip_all)]
    async fn post(&self, url: &str, message: &WebhookMessage) -> Result<(), PostError> {
        let response = self
            .http
            .post(url)
            .json(message)
            .send()
            .await
            .map_err(|e| PostError::Transport {
                message: e.without_url().to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            return Err(PostError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}
