//! # Heartbeat Codec Module
//!
//! Bit-exact telemetry format for receiver heartbeats on narrow return links.
//!
//! This module handles:
//! - Fixed-width MSB-first bit fields with silent truncation
//! - Quantization of measurements into minimal wire widths
//! - Delta-chained timestamps (5-second units, newest anchored at "now")
//! - 272-bit datagrams bracketed by "OHD" / "DHO" markers
//! - Marker scanning to resynchronize inside arbitrary byte streams
//!
//! Every function here is pure: no I/O, no logging, no shared state.

pub mod protocol;
pub mod bits;
pub mod quantize;
pub mod encoder;
pub mod decoder;
