//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;

use crate::codec::decoder::ShortDatagramPolicy;
use crate::codec::protocol::DATAGRAM_BYTES;
use crate::error::{HeartbeatError, Result};

/// Baud rates accepted for the return link
const SUPPORTED_BAUD_RATES: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub link: LinkConfig,
    pub decoder: DecoderConfig,
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Return link (serial) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_link_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Silence that closes a received burst
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Largest burst handed to the decoder, a whole number of datagrams
    #[serde(default = "default_max_burst_bytes")]
    pub max_burst_bytes: usize,
}

/// Stream decoder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DecoderConfig {
    #[serde(default)]
    pub short_datagram_policy: ShortDatagramPolicy,
}

/// Decoded heartbeat persistence configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Diagnostic log output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Directory for daily-rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            file_prefix: default_file_prefix(),
        }
    }
}

// Default value functions
fn default_link_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 9600 }
fn default_idle_timeout_ms() -> u64 { 500 }
fn default_max_burst_bytes() -> usize { 4080 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./heartbeats".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_file_prefix() -> String { "heartbeat-link.log".to_string() }

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
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
    /// use heartbeat_link::config::Config;
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
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.link.port.is_empty() {
            return Err(invalid("link port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.link.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {}",
                SUPPORTED_BAUD_RATES
                    .iter()
                    .map(|rate| rate.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        if self.link.idle_timeout_ms == 0 || self.link.idle_timeout_ms > 60000 {
            return Err(invalid("idle_timeout_ms must be between 1 and 60000"));
        }

        if self.link.max_burst_bytes == 0 || self.link.max_burst_bytes % DATAGRAM_BYTES != 0 {
            return Err(invalid(format!(
                "max_burst_bytes must be a non-zero multiple of {}",
                DATAGRAM_BYTES
            )));
        }

        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.logging.log_dir.as_deref() == Some("") {
            return Err(invalid("logging log_dir cannot be empty when set"));
        }

        if self.logging.file_prefix.is_empty() {
            return Err(invalid("logging file_prefix cannot be empty"));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> HeartbeatError {
    HeartbeatError::Config(toml::de::Error::custom(msg))
}
