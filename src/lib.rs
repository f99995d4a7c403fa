//! # Heartbeat Link Library
//!
//! Collect status heartbeats from remote broadcast receivers over
//! bandwidth-starved return links.
//!
//! This library provides the heartbeat telemetry codec (quantization, delta
//! timestamps, marker-framed datagrams) together with the receiver-side glue:
//! a serial burst reader and a JSONL sink for decoded heartbeats.

pub mod config;
pub mod error;
pub mod codec;
pub mod serial;
pub mod telemetry;
