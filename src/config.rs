//! Configuration file parser for ~/.config/iblog/config.toml.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`. Unknown keys are accepted by serde and logged as
//! warnings so typos are visible.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level client configuration.
///
/// Every field has a default, so any subset of keys can be specified.
/// `Debug` masks `auth_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the blog API, e.g. `https://blog.example.com/api`.
    pub api_base_url: String,

    /// Articles requested per page.
    pub page_size: usize,

    /// Per-request timeout for remote calls.
    pub request_timeout_secs: u64,

    /// How close (in items) to the end of the list a scroll must get before
    /// the next page is requested.
    pub scroll_prefetch_margin: usize,

    /// Delay before a scheduled comment load starts.
    pub comment_load_delay_ms: u64,

    /// Number of article comment lists kept decoded in memory.
    pub cache_capacity: usize,

    /// Bearer token for comment writes (IBLOG_TOKEN env var wins).
    pub auth_token: Option<String>,

    pub user_id: Option<i64>,

    pub username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            page_size: 10,
            request_timeout_secs: 20,
            scroll_prefetch_margin: 3,
            comment_load_delay_ms: 100,
            cache_capacity: 64,
            auth_token: None,
            user_id: None,
            username: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("page_size", &self.page_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("scroll_prefetch_margin", &self.scroll_prefetch_margin)
            .field("comment_load_delay_ms", &self.comment_load_delay_ms)
            .field("cache_capacity", &self.cache_capacity)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "api_base_url",
        "page_size",
        "request_timeout_secs",
        "scroll_prefetch_margin",
        "comment_load_delay_ms",
        "cache_capacity",
        "auth_token",
        "user_id",
        "username",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Zero page size or timeout → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parse TOML text. Blank input yields the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        tracing::info!(api_base_url = %config.api_base_url, "Loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn comment_load_delay(&self) -> Duration {
        Duration::from_millis(self.comment_load_delay_ms)
    }

    /// Token from `IBLOG_TOKEN`, falling back to the config file. Blank
    /// values count as absent.
    pub fn resolved_token(&self) -> Option<String> {
        std::env::var("IBLOG_TOKEN")
            .ok()
            .or_else(|| self.auth_token.clone())
            .filter(|t| !t.trim().is_empty())
    }
}

// ============================================================================
// Tests
// ============================================================================
