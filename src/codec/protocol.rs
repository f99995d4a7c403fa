//! # Heartbeat Datagram Constants and Types
//!
//! Core wire definitions for the heartbeat telemetry format.
//!
//! Every datagram is exactly 272 bits (34 bytes), MSB-first:
//!
//! ```text
//! 0..24     start marker     0x4F 0x48 0x44 ("OHD")
//! 24..152   client_id        128-bit UUID
//! 152..156  timestamp        4-bit delta, 5 s units
//! 156..172  tuner_vendor     16-bit
//! 172..188  tuner_model      16-bit
//! 188..193  tuner_preset     5-bit
//! 193       signal_lock      1-bit
//! 194       service_lock     1-bit
//! 195..199  signal_strength  4-bit
//! 199..204  snr              5-bit
//! 204..210  bitrate          6-bit, 10 Kbps units
//! 210..212  reserved         always zero
//! 212..217  carousel_count   5-bit
//! 217..248  carousel_status  31-bit slot, low carousel_count bits meaningful
//! 248..272  end marker       0x44 0x48 0x4F ("DHO")
//! ```

use std::ops::Range;

use bitvec::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Datagram start marker ("OHD")
pub const START_MARKER: [u8; MARKER_BYTES] = [0x4F, 0x48, 0x44];

/// Datagram end marker ("DHO")
pub const END_MARKER: [u8; MARKER_BYTES] = [0x44, 0x48, 0x4F];

/// Marker length in bytes (markers are always byte-aligned)
pub const MARKER_BYTES: usize = 3;

/// Marker length in bits
pub const MARKER_BITS: usize = MARKER_BYTES * 8;

/// Datagram size in bytes
pub const DATAGRAM_BYTES: usize = 34;

/// Datagram size in bits
pub const DATAGRAM_BITS: usize = DATAGRAM_BYTES * 8;

/// Fixed-size bit buffer holding one encoded datagram
pub type DatagramBits = BitArray<[u8; DATAGRAM_BYTES], Msb0>;

pub const START_MARKER_FIELD: Range<usize> = 0..24;
pub const CLIENT_ID_FIELD: Range<usize> = 24..152;
pub const TIMESTAMP_FIELD: Range<usize> = 152..156;
pub const TUNER_VENDOR_FIELD: Range<usize> = 156..172;
pub const TUNER_MODEL_FIELD: Range<usize> = 172..188;
pub const TUNER_PRESET_FIELD: Range<usize> = 188..193;
pub const SIGNAL_LOCK_BIT: usize = 193;
pub const SERVICE_LOCK_BIT: usize = 194;
pub const SIGNAL_STRENGTH_FIELD: Range<usize> = 195..199;
pub const SNR_FIELD: Range<usize> = 199..204;
pub const BITRATE_FIELD: Range<usize> = 204..210;
pub const RESERVED_FIELD: Range<usize> = 210..212;
pub const CAROUSEL_COUNT_FIELD: Range<usize> = 212..217;
pub const CAROUSEL_STATUS_FIELD: Range<usize> = 217..248;
pub const END_MARKER_FIELD: Range<usize> = 248..272;

/// Number of carousel slots in the status field
pub const CAROUSEL_SLOTS: usize = 31;

/// Signal strength divisor (raw value / 10)
pub const SIGNAL_STRENGTH_SCALE: f64 = 10.0;

/// Largest quantized signal strength
pub const SIGNAL_STRENGTH_MAX: u32 = 10;

/// SNR multiplier (0.1 dB steps)
pub const SNR_SCALE: f64 = 10.0;

/// Largest quantized SNR
pub const SNR_MAX: u32 = 31;

/// Bitrate quantization step in bits per second (10 Kbps)
pub const BITRATE_UNIT_BPS: u64 = 10_000;

/// Largest quantized bitrate
pub const BITRATE_MAX: u32 = 63;

/// Timestamp delta resolution in seconds
pub const TIMESTAMP_UNIT_SECS: i64 = 5;

/// Largest timestamp delta; the 4-bit wire field is authoritative
pub const TIMESTAMP_DELTA_MAX: u32 = (1 << 4) - 1;

/// Hex digits used when rendering tuner vendor/model ids
pub const TUNER_ID_HEX_DIGITS: usize = 4;

/// Heartbeat as reported by a receiver, before quantization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Device UUID
    pub client_id: Uuid,

    /// When the observation was taken
    pub timestamp: DateTime<Utc>,

    /// Tuner vendor id as hex text (e.g. "0bda")
    pub tuner_vendor: String,

    /// Tuner model id as hex text (e.g. "2838")
    pub tuner_model: String,

    /// Configured preset index (0-31)
    pub tuner_preset: u8,

    /// RF signal acquired
    pub signal_lock: bool,

    /// Service stream acquired
    pub service_lock: bool,

    /// Raw signal strength
    pub signal_strength: f64,

    /// Signal-to-noise ratio
    pub snr: f64,

    /// Service bitrate in bits per second
    pub bitrate: u64,

    /// Number of carousel slots observed (0-31)
    pub carousel_count: u8,

    /// Per-slot health flags; only the first `carousel_count` entries are carried
    pub carousel_status: Vec<bool>,
}

/// Heartbeat reduced to wire-scale integers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedHeartbeat {
    pub client_id: u128,

    /// Age relative to the next newer heartbeat (or "now"), in 5 s units
    pub timestamp_delta: u8,

    pub tuner_vendor: u16,
    pub tuner_model: u16,
    pub tuner_preset: u8,
    pub signal_lock: bool,
    pub service_lock: bool,
    pub signal_strength: u8,
    pub snr: u8,
    pub bitrate: u8,
    pub carousel_count: u8,

    /// Exactly `carousel_count` flags
    pub carousel_status: Vec<bool>,
}
