//! Relay configuration.

use std::time::Duration;

use fxrelay_common::{constants, RelayError, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Plain,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" | "pretty" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            other => Err(RelayError::Configuration(format!(
                "LOG_FORMAT must be 'plain' or 'json', got '{}'",
                other
            ))),
        }
    }
}

/// Heartbeat timing.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between outbound heartbeats.
    pub interval: Duration,
    /// Silence after which the connection is considered stale.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: constants::heartbeat_interval(),
            timeout: constants::heartbeat_timeout(),
        }
    }
}

/// Rate provider settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// FreecurrencyAPI base URL.
    pub base_url: String,
    /// API key sent with every request.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.freecurrencyapi.com/v1".to_string(),
            api_key: String::new(),
            timeout: constants::provider_timeout(),
        }
    }
}

/// Rate cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL. The in-memory store is used when unset.
    pub redis_url: Option<String>,
    /// Lifetime of a cached daily table.
    pub ttl: Duration,
    /// Bound on each Redis connect or command.
    pub timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl: constants::cache_ttl(),
            timeout: constants::cache_timeout(),
        }
    }
}

/// Configuration for the relay process.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// WebSocket endpoint delivering conversion requests.
    pub ws_url: String,
    /// Timeout of a single connection attempt.
    pub connect_timeout: Duration,
    /// Pause between failed connection attempts.
    pub reconnect_delay: Duration,
    /// Maximum age of an undelivered reply before it is dropped.
    pub retry_message_ttl: Duration,
    pub heartbeat: HeartbeatConfig,
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8765".to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: constants::reconnect_delay(),
            retry_message_ttl: constants::retry_message_ttl(),
            heartbeat: HeartbeatConfig::default(),
            provider: ProviderConfig::default(),
            cache: CacheConfig::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::Plain,
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("REQUESTS_WS_URL") {
            config.ws_url = url;
        }

        if let Some(url) = var("FREECURRENCYAPI_URL") {
            config.provider.base_url = url;
        }

        if let Some(key) = var("FREECURRENCYAPI_KEY") {
            config.provider.api_key = key;
        }

        config.cache.redis_url = var("REDIS_URL");

        if let Some(secs) = var("CACHE_TTL_SECONDS") {
            config.cache.ttl = parse_secs("CACHE_TTL_SECONDS", &secs)?;
        }

        if let Some(secs) = var("CACHE_TIMEOUT_SECONDS") {
            config.cache.timeout = parse_secs("CACHE_TIMEOUT_SECONDS", &secs)?;
        }

        if let Some(secs) = var("RETRY_MESSAGE_TTL") {
            config.retry_message_ttl = parse_secs("RETRY_MESSAGE_TTL", &secs)?;
        }

        if let Some(secs) = var("PROVIDER_TIMEOUT_SECONDS") {
            config.provider.timeout = parse_secs("PROVIDER_TIMEOUT_SECONDS", &secs)?;
        }

        if let Some(level) = var("LOG_LEVEL") {
            config.log_level = level.to_ascii_lowercase();
        }

        if let Some(format) = var("LOG_FORMAT") {
            config.log_format = LogFormat::parse(&format)?;
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(RelayError::Configuration(format!(
                "REQUESTS_WS_URL must be a ws:// or wss:// URL, got '{}'",
                self.ws_url
            )));
        }

        if self.provider.base_url.is_empty() {
            return Err(RelayError::Configuration(
                "FREECURRENCYAPI_URL cannot be empty".to_string(),
            ));
        }

        if self.provider.api_key.is_empty() {
            return Err(RelayError::Configuration(
                "FREECURRENCYAPI_KEY must be set".to_string(),
            ));
        }

        if self.provider.timeout.is_zero() {
            return Err(RelayError::Configuration(
                "Provider timeout cannot be zero".to_string(),
            ));
        }

        if self.cache.ttl.is_zero() {
            return Err(RelayError::Configuration(
                "Cache TTL cannot be zero".to_string(),
            ));
        }

        if self.cache.timeout.is_zero() {
            return Err(RelayError::Configuration(
                "Cache timeout cannot be zero".to_string(),
            ));
        }

        if self.heartbeat.interval.is_zero() {
            return Err(RelayError::Configuration(
                "Heartbeat interval cannot be zero".to_string(),
            ));
        }

        if self.heartbeat.timeout <= self.heartbeat.interval {
            return Err(RelayError::Configuration(
                "Heartbeat timeout must exceed the heartbeat interval".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| {
            RelayError::Configuration(format!(
                "{} must be a whole number of seconds, got '{}'",
                name, value
            ))
        })
}
