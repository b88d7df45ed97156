//! Layered application configuration: TOML file first, environment
//! variables on top for the deployment-sensitive server settings.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "dnsguard.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub accounts: Vec<AccountConfig>,
    pub notifications: NotificationsConfig,
    pub monitors: Vec<MonitorSeed>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub debug: bool,
    pub auth_enabled: bool,
    pub jwt_secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8099".to_string(),
            debug: false,
            auth_enabled: true,
            jwt_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "instance/dnsguard.db".to_string(),
        }
    }
}

/// One DNS-provider credential. A bearer token takes precedence over the
/// legacy email + global-key pair.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AccountConfig {
    pub name: String,
    pub api_token: String,
    pub email: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NotificationsConfig {
    pub dingtalk: DingTalkConfig,
    pub telegram: TelegramConfig,
    pub email: EmailConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DingTalkConfig {
    pub enabled: bool,
    pub access_token: String,
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    pub method: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            method: "POST".to_string(),
        }
    }
}

/// A monitor declared in the config file, merged into the database at
/// startup. Zero numeric fields mean "use the default".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSeed {
    pub name: String,
    pub account_key: String,
    pub zone_id: String,
    pub hostname: String,
    pub dns_record_type: String,
    pub check_kind: String,
    pub check_target: String,
    pub original_ip: String,
    pub backup_ip: String,
    pub record_handle: String,
    pub interval_seconds: i32,
    pub timeout_seconds: i32,
    pub failure_threshold: i32,
    pub recovery_threshold: i32,
    pub schedules: Vec<ScheduleSeed>,
}

impl Default for MonitorSeed {
    fn default() -> Self {
        Self {
            name: String::new(),
            account_key: String::new(),
            zone_id: String::new(),
            hostname: String::new(),
            dns_record_type: String::new(),
            check_kind: String::new(),
            check_target: String::new(),
            original_ip: String::new(),
            backup_ip: String::new(),
            record_handle: String::new(),
            interval_seconds: 0,
            timeout_seconds: 0,
            failure_threshold: 0,
            recovery_threshold: 0,
            schedules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ScheduleSeed {
    pub cron_expression: String,
    pub target_ip: String,
}

impl AppConfig {
    /// Loads configuration from the given file (or `dnsguard.toml` when it
    /// exists), then applies environment overrides. A missing default file
    /// is fine; an unreadable or unparsable file is fatal.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                if Path::new(DEFAULT_CONFIG_PATH).exists() {
                    Self::from_file(DEFAULT_CONFIG_PATH)?
                } else {
                    AppConfig::default()
                }
            }
        };

        if let Ok(val) = env::var("DNSGUARD_LISTEN") {
            config.server.listen = val;
        }
        if let Ok(val) = env::var("DNSGUARD_JWT_SECRET") {
            config.server.jwt_secret = val;
        }
        if let Ok(val) = env::var("DNSGUARD_DATABASE_PATH") {
            config.database.path = val;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&raw, path)
    }

    fn from_toml(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for monitor in &self.monitors {
            if monitor.name.is_empty() {
                return Err(ConfigError::Invalid("monitor without a name".to_string()));
            }
            if monitor.check_target.is_empty() && monitor.original_ip.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "monitor '{}' needs a check_target or original_ip",
                    monitor.name
                )));
            }
            for schedule in &monitor.schedules {
                if schedule.target_ip.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "monitor '{}': schedule without a target_ip",
                        monitor.name
                    )));
                }
                crate::engine::scheduler::parse_cron(&schedule.cron_expression).map_err(|e| {
                    ConfigError::Invalid(format!(
                        "monitor '{}': bad cron expression '{}': {}",
                        monitor.name, schedule.cron_expression, e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[server]
listen = "127.0.0.1:9000"
jwt_secret = "s3cret"

[database]
path = "/tmp/dnsguard-test.db"

[[accounts]]
name = "main"
api_token = "tok"

[notifications.telegram]
enabled = true
bot_token = "bt"
chat_id = "42"

[notifications.email]
enabled = true
host = "smtp.example.com"
port = 465
username = "robot@example.com"
password = "pw"
to = "ops@example.com"

[[monitors]]
name = "web"
zone_id = "z1"
hostname = "www.example.com"
check_kind = "https"
check_target = "https://www.example.com/health"
original_ip = "1.1.1.1"
backup_ip = "2.2.2.2"

[[monitors.schedules]]
cron_expression = "0 3 * * *"
target_ip = "2.2.2.2"
"#;

    #[test]
    fn parses_full_config() {
        let config = AppConfig::from_toml(SAMPLE, "test").unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert!(config.server.auth_enabled);
        assert_eq!(config.accounts.len(), 1);
        assert!(config.notifications.telegram.enabled);
        assert!(!config.notifications.dingtalk.enabled);
        assert!(config.notifications.email.enabled);
        assert_eq!(config.notifications.email.port, 465);

        let monitor = &config.monitors[0];
        assert_eq!(monitor.name, "web");
        assert_eq!(monitor.check_kind, "https");
        assert_eq!(monitor.schedules.len(), 1);
    }

    #[test]
    fn empty_input_yields_defaults() {
        let config = AppConfig::from_toml("", "test").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8099");
        assert_eq!(config.database.path, "instance/dnsguard.db");
        assert!(config.monitors.is_empty());
    }

    #[test]
    fn rejects_bad_cron_expression() {
        let raw = r#"
[[monitors]]
name = "web"
check_target = "1.2.3.4"

[[monitors.schedules]]
cron_expression = "not a cron"
target_ip = "2.2.2.2"
"#;
        let config = AppConfig::from_toml(raw, "test").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_monitor_without_target() {
        let raw = r#"
[[monitors]]
name = "web"
"#;
        let config = AppConfig::from_toml(raw, "test").unwrap();
        assert!(config.validate().is_err());
    }
}
