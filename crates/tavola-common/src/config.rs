//! Configuration for Tavola
//!
//! Configuration is layered: an optional TOML file, then environment
//! variables prefixed with `TAVOLA__` (for example `TAVOLA__EMAIL__API_KEY`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Operator API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Email provider configuration
    #[serde(default)]
    pub email: EmailConfig,

    /// Retry policy for email delivery
    #[serde(default)]
    pub retry: RetryConfig,

    /// Reconciliation sweep scheduling
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Outbox hand-off configuration
    #[serde(default)]
    pub outbox: OutboxConfig,

    /// Restaurant branding fallbacks
    #[serde(default)]
    pub restaurant: RestaurantConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Pool acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Operator API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the operator API
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,

    /// Bind address
    #[serde(default = "default_api_bind")]
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            bind: default_api_bind(),
        }
    }
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Email provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Transport: "resend", "smtp" or "log"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Transactional email API endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// API credential, used when the settings store has none
    pub api_key: Option<String>,

    /// Sender address, used when the settings store has none
    pub from_email: Option<String>,

    /// Sender display name, used when the settings store has none
    #[serde(default = "default_from_name")]
    pub from_name: String,

    /// Reply-to address, used when the settings store has none
    pub reply_to: Option<String>,

    /// SMTP relay settings (provider = "smtp")
    #[serde(default)]
    pub smtp: SmtpRelayConfig,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_url: default_api_url(),
            api_key: None,
            from_email: None,
            from_name: default_from_name(),
            reply_to: None,
            smtp: SmtpRelayConfig::default(),
        }
    }
}

fn default_provider() -> String {
    "resend".to_string()
}

fn default_api_url() -> String {
    "https://api.resend.com/emails".to_string()
}

fn default_from_name() -> String {
    "Reservations".to_string()
}

/// SMTP relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpRelayConfig {
    /// Relay host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// Relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Username for AUTH
    pub username: Option<String>,

    /// Password for AUTH
    pub password: Option<String>,

    /// Upgrade the connection with STARTTLS
    #[serde(default = "default_starttls")]
    pub starttls: bool,
}

impl Default for SmtpRelayConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
            starttls: default_starttls(),
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

/// Retry policy configuration
///
/// The immediate ceiling and the queue ceiling share one attempt counter:
/// a queued row starts at the number of immediate attempts already spent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts made inside a single send call
    #[serde(default = "default_immediate_attempts")]
    pub immediate_attempts: u32,

    /// Base delay of the exponential backoff in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Hard timeout for one transport call in seconds
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    /// Ceiling for the attempt counter of a queued email
    #[serde(default = "default_queue_max_attempts")]
    pub queue_max_attempts: i32,

    /// Delay before a failed queued email becomes eligible again, in seconds
    #[serde(default = "default_queue_retry_delay")]
    pub queue_retry_delay_secs: u64,

    /// Priority given to emails that fell back to the queue
    #[serde(default = "default_fallback_priority")]
    pub fallback_priority: i32,

    /// Rows pulled per queue sweep
    #[serde(default = "default_queue_batch_size")]
    pub queue_batch_size: i64,

    /// Rows pulled per stuck-pending sweep
    #[serde(default = "default_pending_batch_size")]
    pub pending_batch_size: i64,

    /// Age after which a pending log row counts as stuck, in seconds
    #[serde(default = "default_stuck_after")]
    pub stuck_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            immediate_attempts: default_immediate_attempts(),
            base_delay_ms: default_base_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout(),
            queue_max_attempts: default_queue_max_attempts(),
            queue_retry_delay_secs: default_queue_retry_delay(),
            fallback_priority: default_fallback_priority(),
            queue_batch_size: default_queue_batch_size(),
            pending_batch_size: default_pending_batch_size(),
            stuck_after_secs: default_stuck_after(),
        }
    }
}

fn default_immediate_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_attempt_timeout() -> u64 {
    30
}

fn default_queue_max_attempts() -> i32 {
    5
}

fn default_queue_retry_delay() -> u64 {
    300
}

fn default_fallback_priority() -> i32 {
    5
}

fn default_queue_batch_size() -> i64 {
    20
}

fn default_pending_batch_size() -> i64 {
    10
}

fn default_stuck_after() -> u64 {
    300
}

/// Sweep scheduling configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Interval between sweeps in seconds; 0 disables the built-in ticker
    #[serde(default)]
    pub interval_secs: u64,

    /// Run one sweep right after startup
    #[serde(default)]
    pub run_on_startup: bool,
}

/// Outbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Channel capacity before submissions spill into the retry queue
    #[serde(default = "default_outbox_capacity")]
    pub capacity: usize,

    /// Sends the worker runs at the same time
    #[serde(default = "default_outbox_concurrency")]
    pub concurrency: usize,

    /// How long shutdown waits for in-flight sends, in seconds
    #[serde(default = "default_outbox_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            capacity: default_outbox_capacity(),
            concurrency: default_outbox_concurrency(),
            shutdown_grace_secs: default_outbox_shutdown_grace_secs(),
        }
    }
}

fn default_outbox_concurrency() -> usize {
    8
}

fn default_outbox_shutdown_grace_secs() -> u64 {
    100
}

fn default_outbox_capacity() -> usize {
    256
}

/// Restaurant branding fallbacks, used when the locale store has no value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantConfig {
    #[serde(default = "default_restaurant_name")]
    pub name: String,

    #[serde(default)]
    pub phone: String,

    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub city: String,

    #[serde(default)]
    pub postcode: String,

    #[serde(default = "default_brand_color")]
    pub brand_color: String,

    #[serde(default)]
    pub website_url: String,
}

impl Default for RestaurantConfig {
    fn default() -> Self {
        Self {
            name: default_restaurant_name(),
            phone: String::new(),
            address: String::new(),
            city: String::new(),
            postcode: String::new(),
            brand_color: default_brand_color(),
            website_url: String::new(),
        }
    }
}

fn default_restaurant_name() -> String {
    "Our Restaurant".to_string()
}

fn default_brand_color() -> String {
    "#1f2937".to_string()
}

impl Config {
    /// Load configuration from an optional file plus `TAVOLA__*` environment variables
    pub fn from_sources(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf()).format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TAVOLA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from the first file found in the default locations
    ///
    /// `TAVOLA_CONFIG` overrides the search. With no file at all, the
    /// environment alone is used.
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var("TAVOLA_CONFIG") {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(crate::Error::Config(format!(
                    "Config file {} does not exist",
                    path.display()
                )));
            }
            info!(path = %path.display(), "Loading configuration");
            return Self::from_sources(Some(&path));
        }

        let paths = [
            PathBuf::from("./tavola.toml"),
            PathBuf::from("/etc/tavola/tavola.toml"),
        ];

        for path in paths {
            if path.exists() {
                info!(path = %path.display(), "Loading configuration");
                return Self::from_sources(Some(&path));
            }
        }

        info!("No configuration file found, using environment only");
        Self::from_sources(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let retry = RetryConfig::default();
        assert_eq!(retry.immediate_attempts, 3);
        assert_eq!(retry.base_delay_ms, 1000);
        assert_eq!(retry.attempt_timeout_secs, 30);
        assert_eq!(retry.queue_max_attempts, 5);
        assert_eq!(retry.queue_batch_size, 20);
        assert_eq!(retry.pending_batch_size, 10);

        let email = EmailConfig::default();
        assert_eq!(email.provider, "resend");
        assert_eq!(email.api_url, "https://api.resend.com/emails");

        assert_eq!(SweepConfig::default().interval_secs, 0);
    }

    #[test]
    fn test_parse_config() {
        let toml = r##"
[database]
url = "postgres://localhost/tavola"

[email]
provider = "smtp"
from_email = "bookings@trattoria.test"

[email.smtp]
host = "smtp.trattoria.test"
port = 2525

[retry]
immediate_attempts = 2

[restaurant]
name = "Trattoria Test"
brand_color = "#aa0000"
"##;

        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/tavola"));
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.email.provider, "smtp");
        assert_eq!(config.email.smtp.port, 2525);
        assert!(config.email.smtp.starttls);
        assert_eq!(config.retry.immediate_attempts, 2);
        assert_eq!(config.retry.queue_max_attempts, 5);
        assert_eq!(config.restaurant.name, "Trattoria Test");
        assert_eq!(config.restaurant.brand_color, "#aa0000");
        assert_eq!(config.outbox.capacity, 256);
        assert_eq!(config.outbox.concurrency, 8);
        assert_eq!(config.outbox.shutdown_grace_secs, 100);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert!(config.database.url.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.api.bind, "0.0.0.0:8080");
        assert_eq!(config.restaurant.name, "Our Restaurant");
    }
}
