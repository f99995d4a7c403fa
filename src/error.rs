//! # Error Types
//!
//! Custom error types for Heartbeat Link using `thiserror`.

use thiserror::Error;

/// Main error type for Heartbeat Link
#[derive(Debug, Error)]
pub enum HeartbeatError {
    /// Start and end marker counts differ; the whole stream is rejected
    #[error("Malformed stream: {starts} start markers but {ends} end markers")]
    MalformedStream { starts: usize, ends: usize },

    /// Marker-bounded span narrower than a full datagram
    #[error("Short datagram at bit {offset}: {bits} bits available")]
    ShortDatagram { offset: usize, bits: usize },

    /// Datagram does not carry the expected start/end marker bytes
    #[error("Invalid datagram marker at bit {offset}")]
    InvalidMarker { offset: usize },

    /// Logical heartbeat field that cannot be quantized
    #[error("Invalid heartbeat field: {0}")]
    InvalidField(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Heartbeat persistence serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial link errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("Serial port not found (tried: {0})")]
    SerialPortNotFound(String),
}

/// Result type alias for Heartbeat Link
pub type Result<T> = std::result::Result<T, HeartbeatError>;
