//! DNS mutation seam: the engine talks to the provider through
//! [`DnsProvider`] so transitions can be driven without the network.

use async_trait::async_trait;
use thiserror::Error;

use crate::db::entities::monitor;

pub mod cloudflare;

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("no DNS account configured for '{0}'")]
    NoAccount(String),
    #[error("no matching record in zone")]
    RecordNotFound,
    #[error("provider rejected the request: {0}")]
    Api(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("monitor is missing zone, record handle or target ip")]
    MissingField,
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Resolves the provider's record id for the monitor's
    /// zone/hostname/record-type triple.
    async fn discover_record(&self, monitor: &monitor::Model) -> Result<String, DnsError>;

    /// Points the monitor's record (identified by its `record_handle`) at
    /// `ip`. Proxy status and TTL are left untouched.
    async fn update_record(&self, monitor: &monitor::Model, ip: &str) -> Result<(), DnsError>;
}
