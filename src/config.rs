//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field is optional; missing values take their defaults.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::channel::protocol::{ChannelId, DEFAULT_MAX_RECORDS, DEFAULT_POLL_INTERVAL_MS};
use crate::error::{Result, SenseBridgeError};
use crate::session::recorder::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL_MS};
use crate::session::types::NewSession;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub recorder: RecorderConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub channels: ChannelsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// Device link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// Advertised name of the simulated board
    #[serde(default = "default_device_name")]
    pub name: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Live display configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

/// Session recorder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RecorderConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_max_pending_readings")]
    pub max_pending_readings: usize,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

/// Storage backend configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Keep sessions in memory instead of calling the backend
    #[serde(default)]
    pub offline: bool,
}

/// Channel selection
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelsConfig {
    #[serde(default = "default_enabled_channels")]
    pub enabled: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

/// Session started by the binary on connect
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_session_name")]
    pub name: String,

    #[serde(default)]
    pub notes: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

// Default value functions
fn default_device_name() -> String { "Nicla Sense ME".to_string() }
fn default_poll_interval_ms() -> u64 { DEFAULT_POLL_INTERVAL_MS }
fn default_read_timeout_ms() -> u64 { 1000 }

fn default_max_records() -> usize { DEFAULT_MAX_RECORDS }

fn default_batch_size() -> usize { DEFAULT_BATCH_SIZE }
fn default_flush_interval_ms() -> u64 { DEFAULT_FLUSH_INTERVAL_MS }
fn default_max_pending_readings() -> usize { 10000 }
fn default_retry_base_ms() -> u64 { 500 }
fn default_retry_max_ms() -> u64 { 30000 }

fn default_base_url() -> String { "http://127.0.0.1:3000".to_string() }
fn default_request_timeout_ms() -> u64 { 5000 }

fn default_enabled_channels() -> Vec<String> {
    ChannelId::ALL.iter().map(|id| id.name().to_string()).collect()
}

fn default_log_level() -> String { "info".to_string() }

fn default_session_name() -> String { "Bench Test".to_string() }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            poll_interval_ms: default_poll_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { max_records: default_max_records() }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            max_pending_readings: default_max_pending_readings(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            offline: false,
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self { enabled: default_enabled_channels() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            notes: None,
            tags: Vec::new(),
        }
    }
}

impl ChannelsConfig {
    /// Parse the enabled channel names
    ///
    /// # Errors
    ///
    /// Returns `UnknownChannel` for a name outside the channel table
    pub fn channel_ids(&self) -> Result<Vec<ChannelId>> {
        self.enabled.iter().map(|name| name.parse()).collect()
    }
}

impl SessionConfig {
    pub fn to_request(&self) -> NewSession {
        let mut request = NewSession::new(self.name.clone()).with_tags(self.tags.iter().cloned());
        if let Some(notes) = &self.notes {
            request = request.with_notes(notes.clone());
        }
        request
    }
}

fn invalid(message: impl std::fmt::Display) -> SenseBridgeError {
    SenseBridgeError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sense_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `Config` error if any value is out of its valid range
    pub fn validate(&self) -> Result<()> {
        if self.device.poll_interval_ms < 50 || self.device.poll_interval_ms > 60000 {
            return Err(invalid("poll_interval_ms must be between 50 and 60000"));
        }

        if self.device.read_timeout_ms == 0 || self.device.read_timeout_ms > 60000 {
            return Err(invalid("read_timeout_ms must be between 1 and 60000"));
        }

        if self.display.max_records == 0 || self.display.max_records > 100000 {
            return Err(invalid("max_records must be between 1 and 100000"));
        }

        if self.recorder.batch_size == 0 || self.recorder.batch_size > 10000 {
            return Err(invalid("batch_size must be between 1 and 10000"));
        }

        if self.recorder.flush_interval_ms < 100 || self.recorder.flush_interval_ms > 3600000 {
            return Err(invalid("flush_interval_ms must be between 100 and 3600000"));
        }

        if self.recorder.max_pending_readings < self.recorder.batch_size {
            return Err(invalid("max_pending_readings must be at least batch_size"));
        }

        if self.recorder.retry_base_ms > self.recorder.retry_max_ms {
            return Err(invalid("retry_base_ms must not exceed retry_max_ms"));
        }

        if !self.transport.offline {
            let url = self.transport.base_url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid("base_url must start with http:// or https://"));
            }
        }

        if self.transport.request_timeout_ms == 0 || self.transport.request_timeout_ms > 120000 {
            return Err(invalid("request_timeout_ms must be between 1 and 120000"));
        }

        if self.channels.enabled.is_empty() {
            return Err(invalid("at least one channel must be enabled"));
        }

        if let Err(e) = self.channels.channel_ids() {
            return Err(invalid(e));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("level must be one of: trace, debug, info, warn, error"));
        }

        if let Some(dir) = &self.logging.log_dir {
            if dir.trim().is_empty() {
                return Err(invalid("log_dir cannot be empty when set"));
            }
        }

        if let Err(e) = self.session.to_request().validated() {
            return Err(invalid(format!("session: {}", e)));
        }

        Ok(())
    }
}
