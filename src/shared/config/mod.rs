//! Application configuration module
//!
//! Provides the tunables of the sync engine: probe timing, retry bounds,
//! reconciliation policy and rate limits. Values come from the builder or a
//! TOML file where every key is optional.
//!
//! ```toml
//! server_url = "https://sync.example.com"
//! probe_timeout_secs = 3
//! request_timeout_secs = 30
//! max_retries = 3
//!
//! [reconcile]
//! history = "merge"
//!
//! [rate_limit.export]
//! max_attempts = 5
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::shared::model::{Collection, ResolutionStrategy};

/// Default bound on a connectivity probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
/// Default delay between probes while offline or disconnected
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);
/// Default bound on one HTTP request to the remote store
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default polling period of the HTTP backend subscriptions
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default number of attempts for a queued mutation
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default number of history entries fetched per load
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Strategy applied per collection when a subscription echo disagrees with
/// local writes that have not been confirmed yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub denominations: ResolutionStrategy,
    pub preferences: ResolutionStrategy,
    pub history: ResolutionStrategy,
    pub goals: ResolutionStrategy,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            denominations: ResolutionStrategy::FirstWriteWins,
            preferences: ResolutionStrategy::FirstWriteWins,
            history: ResolutionStrategy::Merge,
            goals: ResolutionStrategy::Merge,
        }
    }
}

impl ReconcilePolicy {
    /// Strategy for the entity held in `collection`
    pub fn for_collection(&self, collection: Collection) -> ResolutionStrategy {
        match collection {
            Collection::Profile => self.preferences,
            Collection::Savings => self.denominations,
            Collection::History => self.history,
            Collection::Goals => self.goals,
        }
    }
}

/// Limits for one rate-limited concern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Attempts allowed within `window`
    pub max_attempts: u32,
    /// Sliding window attempts are counted in
    pub window: Duration,
    /// How long the key stays blocked once the limit is hit
    pub block_duration: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(60 * 60),
            block_duration: Duration::from_secs(15 * 60),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Remote document store base URL, in-memory backend when absent
    pub server_url: Option<String>,
    /// Bound on a single connectivity probe
    pub probe_timeout: Duration,
    /// Delay between probes while not online
    pub probe_interval: Duration,
    /// Polling period for HTTP subscriptions
    pub poll_interval: Duration,
    /// Bound on a single HTTP request to the remote store
    pub request_timeout: Duration,
    /// Attempts before a queued mutation is dropped
    pub max_retries: u32,
    /// Maximum history entries fetched on load
    pub history_limit: usize,
    /// Echo reconciliation policy
    pub reconcile: ReconcilePolicy,
    /// Limits for manual sync requests
    pub sync_rate_limit: RateLimitPolicy,
    /// Limits for history exports
    pub export_rate_limit: RateLimitPolicy,
    /// SQLite file for durable local storage
    pub database_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            reconcile: ReconcilePolicy::default(),
            sync_rate_limit: RateLimitPolicy::default(),
            export_rate_limit: RateLimitPolicy::default(),
            database_path: None,
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Parse a TOML document, starting from defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        file.into_builder(Self::builder())?.build()
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.server_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::invalid("probe_timeout", "must be greater than zero"));
        }
        if self.probe_interval.is_zero() {
            return Err(ConfigError::invalid("probe_interval", "must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("poll_interval", "must be greater than zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be greater than zero"));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("max_retries", "must be at least 1"));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::invalid("history_limit", "must be at least 1"));
        }
        for (name, policy) in [("sync_rate_limit", &self.sync_rate_limit), ("export_rate_limit", &self.export_rate_limit)] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::invalid(name, "max_attempts must be at least 1"));
            }
        }
        Ok(())
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Set the server URL
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_url = Some(url.into());
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.config.probe_interval = interval;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.config.history_limit = limit;
        self
    }

    pub fn reconcile(mut self, policy: ReconcilePolicy) -> Self {
        self.config.reconcile = policy;
        self
    }

    pub fn sync_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.config.sync_rate_limit = policy;
        self
    }

    pub fn export_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.config.export_rate_limit = policy;
        self
    }

    /// Set the SQLite file path
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("failed to read config: {0}")]
    Io(String),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    server_url: Option<String>,
    probe_timeout_secs: Option<u64>,
    probe_interval_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    history_limit: Option<usize>,
    database_path: Option<PathBuf>,
    #[serde(default)]
    reconcile: FileReconcile,
    #[serde(default)]
    rate_limit: FileRateLimits,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileReconcile {
    denominations: Option<String>,
    preferences: Option<String>,
    history: Option<String>,
    goals: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRateLimits {
    sync: Option<FileRateLimit>,
    export: Option<FileRateLimit>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRateLimit {
    max_attempts: Option<u32>,
    window_secs: Option<u64>,
    block_secs: Option<u64>,
}

impl FileRateLimit {
    fn apply(self, mut policy: RateLimitPolicy) -> RateLimitPolicy {
        if let Some(max_attempts) = self.max_attempts {
            policy.max_attempts = max_attempts;
        }
        if let Some(secs) = self.window_secs {
            policy.window = Duration::from_secs(secs);
        }
        if let Some(secs) = self.block_secs {
            policy.block_duration = Duration::from_secs(secs);
        }
        policy
    }
}

fn parse_strategy(field: &str, value: Option<String>, fallback: ResolutionStrategy) -> Result<ResolutionStrategy, ConfigError> {
    match value {
        Some(name) => name
            .parse()
            .map_err(|_| ConfigError::invalid(format!("reconcile.{}", field), format!("unknown strategy '{}'", name))),
        None => Ok(fallback),
    }
}

impl FileConfig {
    fn into_builder(self, mut builder: AppConfigBuilder) -> Result<AppConfigBuilder, ConfigError> {
        if let Some(url) = self.server_url {
            builder = builder.server_url(url);
        }
        if let Some(secs) = self.probe_timeout_secs {
            builder = builder.probe_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.probe_interval_secs {
            builder = builder.probe_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = self.poll_interval_secs {
            builder = builder.poll_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = self.request_timeout_secs {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(max_retries) = self.max_retries {
            builder = builder.max_retries(max_retries);
        }
        if let Some(limit) = self.history_limit {
            builder = builder.history_limit(limit);
        }
        if let Some(path) = self.database_path {
            builder = builder.database_path(path);
        }

        let defaults = ReconcilePolicy::default();
        builder = builder.reconcile(ReconcilePolicy {
            denominations: parse_strategy("denominations", self.reconcile.denominations, defaults.denominations)?,
            preferences: parse_strategy("preferences", self.reconcile.preferences, defaults.preferences)?,
            history: parse_strategy("history", self.reconcile.history, defaults.history)?,
            goals: parse_strategy("goals", self.reconcile.goals, defaults.goals)?,
        });

        if let Some(sync) = self.rate_limit.sync {
            builder = builder.sync_rate_limit(sync.apply(RateLimitPolicy::default()));
        }
        if let Some(export) = self.rate_limit.export {
            builder = builder.export_rate_limit(export.apply(RateLimitPolicy::default()));
        }
        Ok(builder)
    }
}
