//! # Telemetry Module
//!
//! Persists decoded heartbeats to JSONL files with rotation.
//!
//! This module handles:
//! - Stamping each decoded heartbeat with the server-side "reported" time
//! - Formatting as JSONL (JSON Lines), one heartbeat per line
//! - Rotating files after N records
//! - Retaining only the newest M files

pub mod logger;
pub mod types;

pub use logger::JsonlWriter;
pub use types::StoredHeartbeat;
