//! Configuration management for the connectd daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/connectd/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionConfig;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("idle_timeout_secs must be greater than 0, got {0}")]
    InvalidIdleTimeout(u64),

    #[error("queue_capacity must be greater than 0, got {0}")]
    InvalidQueueCapacity(usize),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("umask must be an octal number, got {0:?}")]
    InvalidUmask(String),

    #[error("chroot must be an absolute path, got {0}")]
    InvalidChroot(PathBuf),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the connectd daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Session multiplexer configuration.
    pub session: SessionSettings,

    /// Resource limits for governed sub-protocols.
    pub limits: LimitsConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Session multiplexer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    /// Seconds without traffic before a session is considered dead.
    pub idle_timeout_secs: u64,

    /// Capacity of each session's inbound message queue.
    pub queue_capacity: usize,
}

/// Resource limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LimitsConfig {
    /// Master switch. When false every limit check passes.
    pub enabled: bool,

    /// File transfer policy.
    pub file_transfer: FileTransferLimits,
}

/// File transfer policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FileTransferLimits {
    /// Directory all transfers must stay inside. Empty means no restriction.
    pub chroot: String,

    /// Allow paths that traverse symbolic links.
    pub follow_symlinks: bool,

    /// Allow uploads to replace existing files.
    pub allow_overwrite: bool,

    /// User that must own overwritten files; also forced as owner of uploads.
    pub owner_put: String,

    /// Group that must own overwritten files; also forced as group of uploads.
    pub group_put: String,

    /// User that must own downloaded files.
    pub owner_get: String,

    /// Group that must own downloaded files.
    pub group_get: String,

    /// Octal umask applied to uploaded files. Empty keeps the sender's mode.
    pub umask: String,

    /// Maximum file size in bytes (0 = unlimited).
    pub max_file_size: u64,

    /// Throughput caps.
    pub counters: CounterLimits,

    /// Allow uploads carrying the set-uid bit.
    pub allow_suid: bool,

    /// Restrict downloads to regular files.
    pub regular_files_only: bool,

    /// Skip applying the sender's mode to uploaded files.
    pub do_not_preserve_mode: bool,

    /// Skip applying the sender's owner and group to uploaded files.
    pub do_not_preserve_owner: bool,
}

/// Device-wide throughput caps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CounterLimits {
    /// Transmitted bytes cap (0 = unlimited).
    pub max_bytes_tx_per_hour: u64,

    /// Received bytes cap (0 = unlimited).
    pub max_bytes_rx_per_hour: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
            queue_capacity: 64,
        }
    }
}

impl SessionSettings {
    /// Convert to the runtime configuration consumed by sessions.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            queue_capacity: self.queue_capacity,
        }
    }
}

impl FileTransferLimits {
    /// Parse the configured umask, if any.
    pub fn parsed_umask(&self) -> Result<Option<u32>, ConfigError> {
        if self.umask.is_empty() {
            return Ok(None);
        }
        u32::from_str_radix(&self.umask, 8)
            .map(Some)
            .map_err(|_| ConfigError::InvalidUmask(self.umask.clone()))
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("connectd")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - CONNECTD_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - CONNECTD_IDLE_TIMEOUT: Override session idle timeout in seconds
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("CONNECTD_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(timeout) = std::env::var("CONNECTD_IDLE_TIMEOUT") {
            match timeout.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Overriding idle_timeout_secs from environment: {}", secs);
                    self.session.idle_timeout_secs = secs;
                }
                Err(_) if timeout.is_empty() => {}
                Err(e) => {
                    tracing::warn!(
                        value = %timeout,
                        error = %e,
                        "Ignoring invalid CONNECTD_IDLE_TIMEOUT"
                    );
                }
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.idle_timeout_secs == 0 {
            return Err(ConfigError::InvalidIdleTimeout(self.session.idle_timeout_secs));
        }

        if self.session.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity(self.session.queue_capacity));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        let file_transfer = &self.limits.file_transfer;
        file_transfer.parsed_umask()?;

        if !file_transfer.chroot.is_empty() && !Path::new(&file_transfer.chroot).is_absolute() {
            return Err(ConfigError::InvalidChroot(PathBuf::from(
                &file_transfer.chroot,
            )));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
