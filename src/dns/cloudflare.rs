//! Cloudflare v4 DNS-record client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use super::{DnsError, DnsProvider};
use crate::config::AccountConfig;
use crate::db::entities::monitor;

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
const API_TIMEOUT: Duration = Duration::from_secs(15);

pub struct CloudflareDns {
    client: Client,
    accounts: Vec<AccountConfig>,
    api_base: String,
}

/// Response envelope shared by all v4 endpoints; `success` is the ground
/// truth, HTTP status alone is not.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    #[serde(default)]
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RecordStub {
    id: String,
}

impl<T> ApiEnvelope<T> {
    fn first_error(&self) -> String {
        self.errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

impl CloudflareDns {
    pub fn new(accounts: Vec<AccountConfig>) -> Self {
        let client = Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .unwrap(); // default TLS settings, cannot fail
        Self {
            client,
            accounts,
            api_base: API_BASE.to_string(),
        }
    }

    /// Credential lookup by account key, falling back to the first
    /// configured account.
    fn account(&self, key: &str) -> Option<&AccountConfig> {
        self.accounts
            .iter()
            .find(|a| a.name == key)
            .or_else(|| self.accounts.first())
    }

    fn authorize(&self, request: RequestBuilder, account: &AccountConfig) -> RequestBuilder {
        if !account.api_token.is_empty() {
            request.bearer_auth(&account.api_token)
        } else {
            request
                .header("X-Auth-Email", &account.email)
                .header("X-Auth-Key", &account.api_key)
        }
    }

    fn record_type(m: &monitor::Model) -> &str {
        if m.dns_record_type.is_empty() {
            "A"
        } else {
            &m.dns_record_type
        }
    }
}

#[async_trait]
impl DnsProvider for CloudflareDns {
    async fn discover_record(&self, m: &monitor::Model) -> Result<String, DnsError> {
        if m.zone_id.is_empty() || m.hostname.is_empty() {
            return Err(DnsError::MissingField);
        }
        let account = self
            .account(&m.account_key)
            .ok_or_else(|| DnsError::NoAccount(m.account_key.clone()))?;

        let url = format!("{}/zones/{}/dns_records", self.api_base, m.zone_id);
        let response = self
            .authorize(self.client.get(&url), account)
            .query(&[("name", m.hostname.as_str()), ("type", Self::record_type(m))])
            .send()
            .await?;

        let envelope: ApiEnvelope<Vec<RecordStub>> = response.json().await?;
        if !envelope.success {
            return Err(DnsError::Api(envelope.first_error()));
        }
        envelope
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|r| r.id)
            .ok_or(DnsError::RecordNotFound)
    }

    async fn update_record(&self, m: &monitor::Model, ip: &str) -> Result<(), DnsError> {
        if m.zone_id.is_empty() || m.record_handle.is_empty() || ip.is_empty() {
            return Err(DnsError::MissingField);
        }
        let account = self
            .account(&m.account_key)
            .ok_or_else(|| DnsError::NoAccount(m.account_key.clone()))?;

        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.api_base, m.zone_id, m.record_handle
        );
        let body = serde_json::json!({
            "content": ip,
            "name": m.hostname,
            "type": Self::record_type(m),
        });

        let response = self
            .authorize(self.client.patch(&url), account)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(DnsError::Api(format!("status {status}: {detail}")))
        }
    }
}
