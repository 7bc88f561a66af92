//! Telegram Bot API notifier.
//!
//! Posts plain-text messages through `sendMessage`. Any transport error or
//! non-success status is logged and swallowed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error};

use super::Notifier;
use crate::config::TelegramConfig;
use crate::error::{BiwatchError, Result};

/// Request body for `sendMessage`.
#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Telegram notifier bound to one bot and one chat.
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Creates a notifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BiwatchError::MissingCredentials`] if the bot token or chat
    /// id is empty, or an HTTP error if the client cannot be built.
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        if config.bot_token.is_empty() || config.chat_id.is_empty() {
            return Err(BiwatchError::MissingCredentials(
                "telegram.bot_token and telegram.chat_id are required".to_string(),
            )
            .into());
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(BiwatchError::Http)?;

        let endpoint = format!(
            "{}/bot{}/sendMessage",
            config.api_base.trim_end_matches('/'),
            config.bot_token
        );

        Ok(Self {
            client,
            endpoint,
            chat_id: config.chat_id.clone(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
        };

        let response = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                // reqwest errors embed the URL, which carries the bot token.
                error!(error = %e.without_url(), "Failed to send Telegram message");
                return;
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(chars = text.chars().count(), "Telegram message delivered");
        } else {
            let body = response.text().await.unwrap_or_default();
            error!(
                status = status.as_u16(),
                body = %body,
                "Telegram rejected message"
            );
        }
    }
}
