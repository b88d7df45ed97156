//! Fire-and-forget notification fan-out. Delivery runs in detached tasks;
//! failures are logged and never reach the caller.

use std::time::Duration;

use reqwest::Client;
use tracing::warn;

use super::senders::{
    dingtalk::DingTalkSender, email::EmailSender, telegram::TelegramSender,
    webhook::WebhookSender, NotificationSender,
};
use crate::config::NotificationsConfig;

pub struct Notifier {
    config: NotificationsConfig,
    client: Client,
}

impl Notifier {
    pub fn new(config: NotificationsConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap(); // default TLS settings, cannot fail
        Self { config, client }
    }

    /// Dispatches `message` to every enabled channel without waiting for
    /// delivery.
    pub fn dispatch(&self, message: &str) {
        if self.config.dingtalk.enabled {
            spawn_send(
                DingTalkSender::new(self.client.clone(), self.config.dingtalk.clone()),
                message,
                "dingtalk",
            );
        }
        if self.config.telegram.enabled {
            spawn_send(
                TelegramSender::new(self.client.clone(), self.config.telegram.clone()),
                message,
                "telegram",
            );
        }
        if self.config.email.enabled {
            spawn_send(EmailSender::new(self.config.email.clone()), message, "email");
        }
        if self.config.webhook.enabled {
            spawn_send(
                WebhookSender::new(self.client.clone(), self.config.webhook.clone()),
                message,
                "webhook",
            );
        }
    }
}

fn spawn_send<S: NotificationSender + 'static>(sender: S, message: &str, channel: &'static str) {
    let message = message.to_string();
    tokio::spawn(async move {
        if let Err(e) = sender.send(&message).await {
            warn!(channel, error = %e, "notification delivery failed");
        }
    });
}
