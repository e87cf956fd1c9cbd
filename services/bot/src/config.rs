//! Configuration for the photo bot service.
//!
//! Values are layered from built-in defaults, optional config files and
//! `BOT__`-prefixed environment variables.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the bot service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Telegram Bot API configuration
    pub telegram: TelegramConfig,
    /// Persistent storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Input limits
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Upload/search session configuration
    #[serde(default)]
    pub sessions: SessionConfig,
    /// Per-user rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Admin API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format: json or pretty
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Grace period for in-flight handlers on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

/// Telegram Bot API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather
    #[serde(default)]
    pub token: String,
    /// Bot API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Long-poll timeout for getUpdates in seconds
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Timeout for outbound API requests in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Which backend to use
    #[serde(default)]
    pub backend: StorageBackend,
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    /// Timeout applied to every storage call in seconds
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Input limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_max_photos_per_session")]
    pub max_photos_per_session: usize,
    /// Maximum description length in characters
    #[serde(default = "default_max_description_len")]
    pub max_description_len: usize,
    /// Maximum tag length in characters
    #[serde(default = "default_max_tag_len")]
    pub max_tag_len: usize,
    #[serde(default = "default_max_tags_per_photo")]
    pub max_tags_per_photo: usize,
    #[serde(default = "default_max_username_len")]
    pub max_username_len: usize,
}

/// Session store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session is discarded
    #[serde(default = "default_session_timeout_secs")]
    pub timeout_secs: u64,
    /// Sweep period
    #[serde(default = "default_session_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Delay used to coalesce photos of one media group into one reply
    #[serde(default = "default_media_group_debounce_ms")]
    pub media_group_debounce_ms: u64,
}

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Admitted requests per window
    #[serde(default = "default_rate_limit_requests")]
    pub requests: u32,
    /// Window length in seconds
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
    /// Sweep period in seconds
    #[serde(default = "default_rate_limit_cleanup_secs")]
    pub cleanup_interval_secs: u64,
}

/// Admin API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Serve the admin API
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default value functions
fn default_service_name() -> String {
    "phototag-bot".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_max_connections() -> u32 {
    25
}

fn default_min_connections() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

fn default_max_lifetime_secs() -> u64 {
    3600
}

fn default_query_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_max_file_size() -> u64 {
    20 * 1024 * 1024 // 20MB
}

fn default_max_photos_per_session() -> usize {
    30
}

fn default_max_description_len() -> usize {
    1000
}

fn default_max_tag_len() -> usize {
    100
}

fn default_max_tags_per_photo() -> usize {
    50
}

fn default_max_username_len() -> usize {
    255
}

fn default_session_timeout_secs() -> u64 {
    30 * 60
}

fn default_session_cleanup_interval_secs() -> u64 {
    10 * 60
}

fn default_media_group_debounce_ms() -> u64 {
    500
}

fn default_rate_limit_requests() -> u32 {
    20
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_rate_limit_cleanup_secs() -> u64 {
    5 * 60
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "phototag-bot")?
            .set_default("service.log_level", "info")?
            // Add config file if present
            .add_source(config::File::with_name("config/bot").required(false))
            .add_source(config::File::with_name("/etc/phototag/bot").required(false))
            // Override with environment variables
            // BOT__TELEGRAM__TOKEN -> telegram.token
            .add_source(
                config::Environment::with_prefix("BOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.token.trim().is_empty() {
            return Err(ConfigError::MissingRequired("telegram.token".to_string()));
        }

        if self.storage.backend == StorageBackend::Postgres
            && self.storage.url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::MissingRequired("storage.url".to_string()));
        }

        let positive = [
            ("limits.max_file_size_bytes", self.limits.max_file_size_bytes),
            ("limits.max_photos_per_session", self.limits.max_photos_per_session as u64),
            ("limits.max_description_len", self.limits.max_description_len as u64),
            ("limits.max_tag_len", self.limits.max_tag_len as u64),
            ("limits.max_tags_per_photo", self.limits.max_tags_per_photo as u64),
            ("limits.max_username_len", self.limits.max_username_len as u64),
            ("sessions.timeout_secs", self.sessions.timeout_secs),
            ("sessions.cleanup_interval_secs", self.sessions.cleanup_interval_secs),
            ("rate_limit.requests", self.rate_limit.requests as u64),
            ("rate_limit.window_secs", self.rate_limit.window_secs),
            ("rate_limit.cleanup_interval_secs", self.rate_limit.cleanup_interval_secs),
            ("storage.query_timeout_secs", self.storage.query_timeout_secs),
        ];

        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        if self.storage.min_connections > self.storage.max_connections {
            return Err(ConfigError::InvalidValue {
                key: "storage.min_connections".to_string(),
                message: "must not exceed storage.max_connections".to_string(),
            });
        }

        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.query_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.sessions.timeout_secs)
    }

    pub fn session_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.cleanup_interval_secs)
    }

    pub fn media_group_debounce(&self) -> Duration {
        Duration::from_millis(self.sessions.media_group_debounce_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }

    pub fn rate_limit_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit.cleanup_interval_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_url: default_api_url(),
            poll_timeout_secs: default_poll_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
            query_timeout_secs: default_query_timeout_secs(),
            run_migrations: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            max_photos_per_session: default_max_photos_per_session(),
            max_description_len: default_max_description_len(),
            max_tag_len: default_max_tag_len(),
            max_tags_per_photo: default_max_tags_per_photo(),
            max_username_len: default_max_username_len(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout_secs(),
            cleanup_interval_secs: default_session_cleanup_interval_secs(),
            media_group_debounce_ms: default_media_group_debounce_ms(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_rate_limit_requests(),
            window_secs: default_rate_limit_window_secs(),
            cleanup_interval_secs: default_rate_limit_cleanup_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl Config {
    /// Configuration with defaults everywhere and the given token, backed by memory storage
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            service: ServiceConfig::default(),
            telegram: TelegramConfig {
                token: token.into(),
                ..Default::default()
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                ..Default::default()
            },
            limits: LimitsConfig::default(),
            sessions: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            api: ApiConfig::default(),
        }
    }
}
