//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Upper bound for every configured lifetime (signals, one-time codes).
pub const MAX_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration. When absent, delivery signals are kept in memory.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Real-time delivery configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// One-time code configuration.
    #[serde(default)]
    pub otp: OtpConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of this instance.
    pub url: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Notification delivery stream configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Interval between poll ticks of a stream connection, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Lifetime of an unconsumed delivery signal, in seconds.
    #[serde(default = "default_signal_ttl_secs")]
    pub signal_ttl_secs: u64,
    /// Interval between keep-alive comments on the stream, in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl DeliveryConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Signal lifetime as a [`Duration`], between one second and [`MAX_TTL`].
    #[must_use]
    pub fn signal_ttl(&self) -> Duration {
        Duration::from_secs(self.signal_ttl_secs.clamp(1, MAX_TTL.as_secs()))
    }

    /// Keep-alive interval as a [`Duration`], at least one second.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            signal_ttl_secs: default_signal_ttl_secs(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

/// One-time code configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    /// How long an issued code stays valid, in seconds.
    #[serde(default = "default_otp_ttl_secs")]
    pub ttl_secs: u64,
    /// Interval of the background purge of expired codes, in seconds.
    #[serde(default = "default_otp_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Number of digits in a code.
    #[serde(default = "default_otp_code_length")]
    pub code_length: usize,
}

impl OtpConfig {
    /// Code lifetime, between one second and [`MAX_TTL`].
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.clamp(1, MAX_TTL.as_secs()))
    }

    /// Purge interval, at least one second.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_otp_ttl_secs(),
            cleanup_interval_secs: default_otp_cleanup_interval_secs(),
            code_length: default_otp_code_length(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "mediashelf".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    2000
}

const fn default_signal_ttl_secs() -> u64 {
    300
}

const fn default_keep_alive_secs() -> u64 {
    30
}

const fn default_otp_ttl_secs() -> u64 {
    600
}

const fn default_otp_cleanup_interval_secs() -> u64 {
    60
}

const fn default_otp_code_length() -> usize {
    6
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present, into the process environment)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `MEDIASHELF_ENV`)
    /// 4. Environment variables with `MEDIASHELF__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let env = std::env::var("MEDIASHELF_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("MEDIASHELF")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("MEDIASHELF")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
