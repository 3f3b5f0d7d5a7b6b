//! Configuration management

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    #[serde(default)]
    pub tls_cert: String,
    #[serde(default)]
    pub tls_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    /// Log a bearer token for every seeded user at startup
    #[serde(default)]
    pub issue_dev_tokens: bool,
}

fn default_token_ttl_hours() -> i64 {
    24
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Dedup window for repeated vehicle+type alerts
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Detections must score strictly above this to raise an alert
    #[serde(default = "default_weapon_confidence_threshold")]
    pub weapon_confidence_threshold: f64,
    /// Addresses notified for critical and high-priority alerts
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// One day
const MAX_COOLDOWN_SECS: u64 = 86_400;

/// One year
const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365;

fn default_cooldown_secs() -> u64 {
    300
}

fn default_weapon_confidence_threshold() -> f64 {
    0.9
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            weapon_confidence_threshold: default_weapon_confidence_threshold(),
            recipients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_address: String,
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Reply with an `error` frame instead of silently dropping malformed messages
    #[serde(default)]
    pub report_malformed: bool,
    /// Frames queued per client before further frames to it are dropped
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

/// Room for the auth reply and the full post-auth snapshot
pub const MIN_OUTBOX_CAPACITY: usize = 8;

fn default_outbox_capacity() -> usize {
    256
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            report_malformed: false,
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedConfig {
    #[serde(default = "default_true")]
    pub demo: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self { demo: true }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "config.toml";

        let builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("CITGUARD")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("alerts.recipients")
                    .try_parsing(true),
            );

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.http_port == 0 {
            anyhow::bail!("Invalid http_port: 0 is not allowed");
        }
        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }

        // TLS needs both halves or neither
        let has_cert = !self.server.tls_cert.is_empty();
        let has_key = !self.server.tls_key.is_empty();
        if has_cert != has_key {
            anyhow::bail!("TLS configuration incomplete: both tls_cert and tls_key must be set, or neither");
        }

        if self.auth.jwt_secret.is_empty() {
            anyhow::bail!("auth.jwt_secret cannot be empty");
        }
        if self.auth.token_ttl_hours <= 0 || self.auth.token_ttl_hours > MAX_TOKEN_TTL_HOURS {
            anyhow::bail!(
                "auth.token_ttl_hours must be between 1 and {}, got {}",
                MAX_TOKEN_TTL_HOURS,
                self.auth.token_ttl_hours
            );
        }

        if self.alerts.cooldown_secs == 0 || self.alerts.cooldown_secs > MAX_COOLDOWN_SECS {
            anyhow::bail!(
                "alerts.cooldown_secs must be between 1 and {}, got {}",
                MAX_COOLDOWN_SECS,
                self.alerts.cooldown_secs
            );
        }
        if !(0.0..=1.0).contains(&self.alerts.weapon_confidence_threshold) {
            anyhow::bail!(
                "alerts.weapon_confidence_threshold must be within [0, 1], got {}",
                self.alerts.weapon_confidence_threshold
            );
        }
        if let Some(bad) = self.alerts.recipients.iter().find(|r| !r.contains('@')) {
            anyhow::bail!("Invalid alert recipient '{}'", bad);
        }

        if self.email.enabled {
            if self.email.smtp_host.is_empty() {
                anyhow::bail!("email.smtp_host is required when email is enabled");
            }
            if self.email.from_address.is_empty() {
                anyhow::bail!("email.from_address is required when email is enabled");
            }
        }

        if self.realtime.outbox_capacity < MIN_OUTBOX_CAPACITY {
            anyhow::bail!(
                "realtime.outbox_capacity must be at least {}, got {}",
                MIN_OUTBOX_CAPACITY,
                self.realtime.outbox_capacity
            );
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid logging level '{}'. Must be one of: {:?}", self.logging.level, valid_levels);
        }

        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        !self.server.tls_cert.is_empty() && !self.server.tls_key.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            http_port: 8080,
            tls_cert: String::new(),
            tls_key: String::new(),
        },
        auth: AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_ttl_hours: 1,
            issue_dev_tokens: false,
        },
        alerts: AlertsConfig {
            recipients: vec!["ops@example.com".to_string(), "security@example.com".to_string()],
            ..AlertsConfig::default()
        },
        email: EmailConfig::default(),
        realtime: RealtimeConfig::default(),
        logging: LoggingConfig::default(),
        seed: SeedConfig { demo: false },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_alert_defaults() {
        let alerts = AlertsConfig::default();
        assert_eq!(alerts.cooldown_secs, 300);
        assert_eq!(alerts.weapon_confidence_threshold, 0.9);
        assert!(alerts.recipients.is_empty());
    }

    #[test]
    fn test_half_tls_rejected() {
        let mut config = test_config();
        config.server.tls_cert = "cert.pem".to_string();
        assert!(config.validate().is_err());
        config.server.tls_key = "key.pem".to_string();
        assert!(config.validate().is_ok());
        assert!(config.tls_enabled());
    }

    #[test]
    fn test_bad_recipient_rejected() {
        let mut config = test_config();
        config.alerts.recipients.push("not-an-address".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_ttl_is_bounded() {
        let mut config = test_config();
        config.auth.token_ttl_hours = 0;
        assert!(config.validate().is_err());
        config.auth.token_ttl_hours = i64::MAX;
        assert!(config.validate().is_err());
        config.auth.token_ttl_hours = MAX_TOKEN_TTL_HOURS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_outbox_capacity_fits_snapshot() {
        let mut config = test_config();
        assert_eq!(config.realtime.outbox_capacity, 256);
        config.realtime.outbox_capacity = MIN_OUTBOX_CAPACITY - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_email_enabled_requires_host() {
        let mut config = test_config();
        config.email.enabled = true;
        assert!(config.validate().is_err());
        config.email.smtp_host = "smtp.example.com".to_string();
        config.email.from_address = "alerts@example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_range() {
        let mut config = test_config();
        config.alerts.weapon_confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = test_config();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }
}
