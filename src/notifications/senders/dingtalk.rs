use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;

use super::{NotificationSender, SenderError};
use crate::config::DingTalkConfig;

/// Pushes notifications to a DingTalk group robot. When a signing secret
/// is configured the request carries the HMAC-SHA256 signature DingTalk
/// requires for secured robots.
pub struct DingTalkSender {
    client: Client,
    config: DingTalkConfig,
}

impl DingTalkSender {
    pub fn new(client: Client, config: DingTalkConfig) -> Self {
        Self { client, config }
    }

    fn signed_url(&self, timestamp_ms: i64) -> Result<String, SenderError> {
        let mut url = format!(
            "https://oapi.dingtalk.com/robot/send?access_token={}",
            self.config.access_token
        );
        if !self.config.secret.is_empty() {
            let string_to_sign = format!("{timestamp_ms}\n{}", self.config.secret);
            let mut mac = Hmac::<Sha256>::new_from_slice(self.config.secret.as_bytes())
                .map_err(|e| SenderError::InvalidConfiguration(format!("bad secret: {e}")))?;
            mac.update(string_to_sign.as_bytes());
            let signature = STANDARD.encode(mac.finalize().into_bytes());
            url.push_str(&format!(
                "&timestamp={timestamp_ms}&sign={}",
                urlencoding::encode(&signature)
            ));
        }
        Ok(url)
    }
}

#[async_trait]
impl NotificationSender for DingTalkSender {
    async fn send(&self, message: &str) -> Result<(), SenderError> {
        if self.config.access_token.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "dingtalk needs an access_token".to_string(),
            ));
        }

        let url = self.signed_url(Utc::now().timestamp_millis())?;
        let payload = serde_json::json!({
            "msgtype": "text",
            "text": { "content": format!("dnsguard: {message}") },
        });

        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "dingtalk API returned {status}: {error_body}"
            )));
        }
        Ok(())
    }
}
