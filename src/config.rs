//! Configuration module for feedhook.

use serde::Deserialize;
use std::path::Path;

use crate::{FeedhookError, Result};

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Whether the HTTP API is served.
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_server_enabled() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Storage backend for the registry and seen-item store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory; everything is lost on restart.
    Memory,
    /// SQLite file via sqlx.
    Sqlite,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Which backend to use.
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Sqlite
}

fn default_db_path() -> String {
    "data/feedhook.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedhook.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Feed fetching configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Allow feeds on loopback/private addresses.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_total_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            total_timeout_secs: default_total_timeout(),
            max_redirects: default_max_redirects(),
            max_feed_size_bytes: default_max_feed_size(),
            allow_private_hosts: false,
        }
    }
}

/// Webhook dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Timeout for a single webhook POST in seconds.
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
    /// User agent sent with webhook requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_notify_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("feedhook/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_notify_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Seen-item deduplication strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeenStrategy {
    /// Exact hash set with per-cycle aging.
    Exact,
    /// Scalable Bloom filter.
    Approximate,
}

/// Seen-item store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SeenConfig {
    /// Deduplication strategy.
    #[serde(default = "default_strategy")]
    pub strategy: SeenStrategy,
    /// Poll cycles an unobserved identity survives (exact strategy).
    #[serde(default = "default_ttl_cycles")]
    pub ttl_cycles: u32,
    /// Capacity of the first filter stage (approximate strategy).
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
    /// Target false-positive rate (approximate strategy).
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,
}

fn default_strategy() -> SeenStrategy {
    SeenStrategy::Exact
}

fn default_ttl_cycles() -> u32 {
    3
}

fn default_initial_capacity() -> usize {
    100
}

fn default_error_rate() -> f64 {
    0.001
}

impl Default for SeenConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            ttl_cycles: default_ttl_cycles(),
            initial_capacity: default_initial_capacity(),
            error_rate: default_error_rate(),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of feeds polled at the same time.
    #[serde(default = "default_max_concurrent_polls")]
    pub max_concurrent_polls: usize,
    /// Run a poll immediately after a feed is registered.
    #[serde(default = "default_run_on_register")]
    pub run_on_register: bool,
}

fn default_max_concurrent_polls() -> usize {
    8
}

fn default_run_on_register() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_polls: default_max_concurrent_polls(),
            run_on_register: default_run_on_register(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP API configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Feed fetching configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Webhook dispatch configuration.
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Seen-item store configuration.
    #[serde(default)]
    pub seen: SeenConfig,
    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(FeedhookError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedhookError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FEEDHOOK_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
        if let Ok(level) = std::env::var("FEEDHOOK_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.seen.ttl_cycles == 0 {
            return Err(FeedhookError::Config(
                "seen.ttl_cycles must be at least 1".to_string(),
            ));
        }
        if !(self.seen.error_rate > 0.0 && self.seen.error_rate < 1.0) {
            return Err(FeedhookError::Config(
                "seen.error_rate must be between 0 and 1 (exclusive)".to_string(),
            ));
        }
        if self.seen.initial_capacity == 0 {
            return Err(FeedhookError::Config(
                "seen.initial_capacity must be at least 1".to_string(),
            ));
        }
        if self.scheduler.max_concurrent_polls == 0 {
            return Err(FeedhookError::Config(
                "scheduler.max_concurrent_polls must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
