use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{NotificationSender, SenderError};
use crate::config::TelegramConfig;

/// Pushes notifications through the Telegram Bot API.
pub struct TelegramSender {
    client: Client,
    config: TelegramConfig,
}

impl TelegramSender {
    pub fn new(client: Client, config: TelegramConfig) -> Self {
        Self { client, config }
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(&self, message: &str) -> Result<(), SenderError> {
        if self.config.bot_token.is_empty() || self.config.chat_id.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "telegram needs bot_token and chat_id".to_string(),
            ));
        }

        let api_url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.bot_token
        );
        let payload = TelegramMessage {
            chat_id: &self.config.chat_id,
            text: message,
        };

        let response = self.client.post(&api_url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "telegram API returned {status}: {error_body}"
            )));
        }
        Ok(())
    }
}
