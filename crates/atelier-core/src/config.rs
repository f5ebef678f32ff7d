//! Configuration system for Atelier.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $ATELIER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/atelier/config.toml
//!   3. ~/.config/atelier/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AtelierConfig {
    pub api: ApiConfig,
    pub socket: SocketConfig,
    pub poller: PollerConfig,
    pub tracking: TrackingConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// REST base URL. The push URL is derived from it.
    pub base_url: String,
    /// Auth token. Empty = not signed in; the push channel stays down.
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Connect the push channel on startup.
    pub auto_connect: bool,
    /// Fixed wait between reconnect attempts. No backoff.
    pub reconnect_interval_ms: u64,
    /// Reconnect attempts after an unexpected close before giving up.
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_ms: u64,
    /// Status queries before the poller gives up with a timeout.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// How long to wait on the push channel for a terminal update before
    /// switching to polling. 0 = poll interval × max attempts.
    pub push_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub page_size: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9999".to_string(),
            token: String::new(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            auto_connect: true,
            reconnect_interval_ms: 3_000,
            max_reconnect_attempts: 5,
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            max_attempts: 60,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { push_timeout_ms: 0 }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { page_size: 20 }
    }
}

// ── Typed views ───────────────────────────────────────────────────────────────

impl SocketConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Upper bound on how long polling can take.
    pub fn ceiling(&self) -> Duration {
        self.interval() * self.max_attempts
    }
}

impl AtelierConfig {
    /// Push-path watchdog, resolved against the poller ceiling.
    pub fn push_timeout(&self) -> Duration {
        if self.tracking.push_timeout_ms == 0 {
            self.poller.ceiling()
        } else {
            Duration::from_millis(self.tracking.push_timeout_ms)
        }
    }

    /// The token, if one is configured.
    pub fn token(&self) -> Option<&str> {
        Some(self.api.token.as_str()).filter(|t| !t.trim().is_empty())
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("atelier")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl AtelierConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::file_path())
    }

    /// Load from an explicit file, still applying env overrides.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            AtelierConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ATELIER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&AtelierConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply ATELIER_* overrides. `lookup` is `std::env::var` in production.
    /// Unparseable numbers are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ATELIER_API__BASE_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = lookup("ATELIER_API__TOKEN") {
            self.api.token = v;
        }
        if let Some(v) = lookup("ATELIER_SOCKET__AUTO_CONNECT") {
            self.socket.auto_connect = v == "true" || v == "1";
        }
        if let Some(n) = lookup("ATELIER_SOCKET__RECONNECT_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.socket.reconnect_interval_ms = n;
        }
        if let Some(n) = lookup("ATELIER_SOCKET__MAX_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.socket.max_reconnect_attempts = n;
        }
        if let Some(n) = lookup("ATELIER_SOCKET__HEARTBEAT_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.socket.heartbeat_interval_ms = n;
        }
        if let Some(n) = lookup("ATELIER_POLLER__INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.poller.interval_ms = n;
        }
        if let Some(n) = lookup("ATELIER_POLLER__MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.poller.max_attempts = n;
        }
        if let Some(n) = lookup("ATELIER_HISTORY__PAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.history.page_size = n;
        }
    }
}
