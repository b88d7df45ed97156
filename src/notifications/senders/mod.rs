use async_trait::async_trait;
use thiserror::Error;

pub mod dingtalk;
pub mod email;
pub mod telegram;
pub mod webhook;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), SenderError>;
}
