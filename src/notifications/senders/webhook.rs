use async_trait::async_trait;
use reqwest::{Client, Method};

use super::{NotificationSender, SenderError};
use crate::config::WebhookConfig;

/// Pushes notifications to a custom webhook endpoint.
pub struct WebhookSender {
    client: Client,
    config: WebhookConfig,
}

impl WebhookSender {
    pub fn new(client: Client, config: WebhookConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, message: &str) -> Result<(), SenderError> {
        if self.config.url.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "webhook needs a url".to_string(),
            ));
        }

        let method = match self.config.method.to_uppercase().as_str() {
            "POST" | "" => Method::POST,
            "GET" => Method::GET,
            other => {
                return Err(SenderError::InvalidConfiguration(format!(
                    "unsupported HTTP method: {other}"
                )));
            }
        };

        let mut request = self.client.request(method.clone(), &self.config.url);
        if method == Method::POST {
            request = request.json(&serde_json::json!({ "message": message }));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "webhook returned {status}: {error_body}"
            )));
        }
        Ok(())
    }
}
