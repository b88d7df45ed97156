use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{NotificationSender, SenderError};
use crate::config::EmailConfig;

/// Delivers notifications over SMTP. Port 465 speaks implicit TLS;
/// any other port starts in the clear and upgrades with STARTTLS.
pub struct EmailSender {
    config: EmailConfig,
}

impl EmailSender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn mailer(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, SenderError> {
        let builder = if self.config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
        }
        .map_err(|e| SenderError::InvalidConfiguration(format!("bad smtp host: {e}")))?;

        let mut builder = builder.port(self.config.port);
        if !self.config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(&self, message: &str) -> Result<(), SenderError> {
        if self.config.host.is_empty() || self.config.port == 0 || self.config.to.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "email needs host, port and to".to_string(),
            ));
        }

        let from: Mailbox = self.config.username.parse().map_err(|e| {
            SenderError::InvalidConfiguration(format!(
                "bad sender address '{}': {e}",
                self.config.username
            ))
        })?;
        let to: Mailbox = self.config.to.parse().map_err(|e| {
            SenderError::InvalidConfiguration(format!(
                "bad recipient address '{}': {e}",
                self.config.to
            ))
        })?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject("dnsguard notification")
            .body(message.to_string())
            .map_err(|e| SenderError::SendFailed(format!("failed to build email: {e}")))?;

        self.mailer()?
            .send(email)
            .await
            .map_err(|e| SenderError::SendFailed(format!("smtp delivery failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmailConfig {
        EmailConfig {
            enabled: true,
            host: "smtp.example.com".to_string(),
            port: 465,
            username: "robot@example.com".to_string(),
            password: "pw".to_string(),
            to: "ops@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn missing_host_is_rejected() {
        let mut c = config();
        c.host.clear();
        let err = EmailSender::new(c).send("hi").await.unwrap_err();
        assert!(matches!(err, SenderError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn bad_recipient_is_rejected() {
        let mut c = config();
        c.to = "not-an-address".to_string();
        let err = EmailSender::new(c).send("hi").await.unwrap_err();
        assert!(matches!(err, SenderError::InvalidConfiguration(_)));
    }
}
