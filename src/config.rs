//! Watcher Configuration
//!
//! Immutable settings for one run. Every field has an explicit default constant;
//! `WHALE_FEED_*` environment variables override them.

use std::path::PathBuf;
use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::feed::{FeedSettings, DEFAULT_FEED_PATH};
use crate::filter::{DEFAULT_FETCH_CONCURRENCY, DEFAULT_THRESHOLD};
use crate::node::NodeConfig;
use crate::processed::DEFAULT_STATE_PATH;
use crate::scanner::DEFAULT_WINDOW_SIZE;

/// Prefix shared by all environment overrides
pub const ENV_PREFIX: &str = "WHALE_FEED_";

/// Upper bound on in-flight transaction fetches
pub const MAX_FETCH_CONCURRENCY: usize = 64;

/// Errors that can occur while assembling configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Window size must be at least 1 block")]
    ZeroWindow,

    #[error("Request timeout must be at least 1ms")]
    ZeroTimeout,

    #[error("Fetch concurrency must be between 1 and {0}")]
    ConcurrencyOutOfRange(usize),

    #[error("Threshold must not be negative")]
    NegativeThreshold,
}

/// Configuration for one scan run
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Node endpoint and credentials
    pub node: NodeConfig,
    /// Outputs must be strictly greater than this to qualify
    pub threshold: Decimal,
    /// Number of most recent blocks scanned
    pub window_size: u64,
    /// Transaction fetches in flight per block
    pub fetch_concurrency: usize,
    /// Processed-transaction store location
    pub state_path: PathBuf,
    /// Feed output location
    pub feed_path: PathBuf,
    /// Channel metadata and item link settings
    pub feed: FeedSettings,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            threshold: Decimal::from(DEFAULT_THRESHOLD),
            window_size: DEFAULT_WINDOW_SIZE,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            feed_path: PathBuf::from(DEFAULT_FEED_PATH),
            feed: FeedSettings::default(),
        }
    }
}

impl WatcherConfig {
    /// Defaults overridden by `WHALE_FEED_*` process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `WHALE_FEED_*` key
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
        };

        let mut config = Self::default();

        if let Some(url) = get("RPC_URL") {
            config.node.url = url;
        }
        if let Some(user) = get("RPC_USER") {
            config.node.user = user;
        }
        if let Some(password) = get("RPC_PASSWORD") {
            config.node.password = password;
        }
        if let Some(raw) = get("TIMEOUT_MS") {
            config.node.timeout_ms = parse_value("TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = get("THRESHOLD") {
            config.threshold = parse_value("THRESHOLD", &raw)?;
        }
        if let Some(raw) = get("WINDOW") {
            config.window_size = parse_value("WINDOW", &raw)?;
        }
        if let Some(raw) = get("CONCURRENCY") {
            config.fetch_concurrency = parse_value("CONCURRENCY", &raw)?;
        }
        if let Some(path) = get("STATE_PATH") {
            config.state_path = PathBuf::from(expand_path(&path));
        }
        if let Some(path) = get("FEED_PATH") {
            config.feed_path = PathBuf::from(expand_path(&path));
        }
        if let Some(url) = get("EXPLORER_URL") {
            config.feed.explorer_url = url;
        }
        if let Some(unit) = get("UNIT") {
            config.feed.unit = unit;
        }
        if let Some(title) = get("CHANNEL_TITLE") {
            config.feed.channel.title = title;
        }
        if let Some(link) = get("CHANNEL_LINK") {
            config.feed.channel.link = link;
        }
        if let Some(description) = get("CHANNEL_DESCRIPTION") {
            config.feed.channel.description = description;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.node.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.fetch_concurrency == 0 || self.fetch_concurrency > MAX_FETCH_CONCURRENCY {
            return Err(ConfigError::ConcurrencyOutOfRange(MAX_FETCH_CONCURRENCY));
        }
        if self.threshold.is_sign_negative() {
            return Err(ConfigError::NegativeThreshold);
        }
        Ok(())
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: format!("{}{}", ENV_PREFIX, name),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
