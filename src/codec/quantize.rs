//! # Field Quantizer
//!
//! Lossy, deterministic mapping between human-scale heartbeat values and the
//! small integers stored on the wire.
//!
//! | field           | wire value                      | ceiling |
//! |-----------------|---------------------------------|---------|
//! | signal_strength | `value / 10`                    | 10      |
//! | snr             | `value * 10`                    | 31      |
//! | bitrate         | `value / 10_000` (10 Kbps)      | 63      |
//! | timestamp       | `(base - timestamp) / 5` (5 s)  | 15      |
//!
//! Fractions are truncated and values outside a field's range saturate at its
//! ceiling (or at zero). Dequantizing inverts the scale factor but cannot
//! recover anything lost to truncation or clamping. That loss is the format's
//! contract and is never reported.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::bits::clamp_max;
use super::protocol::*;
use crate::error::{HeartbeatError, Result};

/// Absorbs binary representation error so dequantized SNR values re-quantize to themselves
const SNR_EPSILON: f64 = 1e-9;

/// Quantize a heartbeat against `base_time`
///
/// `base_time` is the absolute time of the next newer heartbeat in the chain,
/// or "now" for the newest one.
///
/// # Errors
///
/// Returns `InvalidField` if a tuner id is not a hexadecimal string.
pub fn quantize(heartbeat: &Heartbeat, base_time: DateTime<Utc>) -> Result<QuantizedHeartbeat> {
    let slots = usize::from(heartbeat.carousel_count);
    let carousel_status = (0..slots)
        .map(|i| heartbeat.carousel_status.get(i).copied().unwrap_or(false))
        .collect();

    Ok(QuantizedHeartbeat {
        client_id: heartbeat.client_id.as_u128(),
        timestamp_delta: quantize_timestamp(heartbeat.timestamp, base_time),
        tuner_vendor: parse_tuner_id(&heartbeat.tuner_vendor)?,
        tuner_model: parse_tuner_id(&heartbeat.tuner_model)?,
        tuner_preset: heartbeat.tuner_preset,
        signal_lock: heartbeat.signal_lock,
        service_lock: heartbeat.service_lock,
        signal_strength: quantize_signal_strength(heartbeat.signal_strength),
        snr: quantize_snr(heartbeat.snr),
        bitrate: quantize_bitrate(heartbeat.bitrate),
        carousel_count: heartbeat.carousel_count,
        carousel_status,
    })
}

/// Restore a heartbeat from wire-scale values, anchoring its timestamp at `base_time`
pub fn dequantize(quantized: &QuantizedHeartbeat, base_time: DateTime<Utc>) -> Heartbeat {
    Heartbeat {
        client_id: Uuid::from_u128(quantized.client_id),
        timestamp: dequantize_timestamp(quantized.timestamp_delta, base_time),
        tuner_vendor: format_tuner_id(quantized.tuner_vendor),
        tuner_model: format_tuner_id(quantized.tuner_model),
        tuner_preset: quantized.tuner_preset,
        signal_lock: quantized.signal_lock,
        service_lock: quantized.service_lock,
        signal_strength: dequantize_signal_strength(quantized.signal_strength),
        snr: dequantize_snr(quantized.snr),
        bitrate: dequantize_bitrate(quantized.bitrate),
        carousel_count: quantized.carousel_count,
        carousel_status: quantized.carousel_status.clone(),
    }
}

/// Age of `timestamp` relative to `base_time`, in 5-second units
///
/// Heartbeats newer than their base quantize to 0; ages beyond 75 s saturate at 15.
pub fn quantize_timestamp(timestamp: DateTime<Utc>, base_time: DateTime<Utc>) -> u8 {
    let elapsed_ms = (base_time - timestamp).num_milliseconds();
    clamp_max(elapsed_ms / (TIMESTAMP_UNIT_SECS * 1000), TIMESTAMP_DELTA_MAX) as u8
}

pub fn dequantize_timestamp(delta: u8, base_time: DateTime<Utc>) -> DateTime<Utc> {
    base_time - Duration::seconds(i64::from(delta) * TIMESTAMP_UNIT_SECS)
}

pub fn quantize_signal_strength(value: f64) -> u8 {
    clamp_max((value / SIGNAL_STRENGTH_SCALE) as i64, SIGNAL_STRENGTH_MAX) as u8
}

pub fn dequantize_signal_strength(value: u8) -> f64 {
    f64::from(value) * SIGNAL_STRENGTH_SCALE
}

pub fn quantize_snr(value: f64) -> u8 {
    clamp_max((value * SNR_SCALE + SNR_EPSILON) as i64, SNR_MAX) as u8
}

pub fn dequantize_snr(value: u8) -> f64 {
    f64::from(value) / SNR_SCALE
}

/// Bitrate in bps to 10 Kbps units
pub fn quantize_bitrate(bps: u64) -> u8 {
    let units = i64::try_from(bps / BITRATE_UNIT_BPS).unwrap_or(i64::MAX);
    clamp_max(units, BITRATE_MAX) as u8
}

pub fn dequantize_bitrate(value: u8) -> u64 {
    u64::from(value) * BITRATE_UNIT_BPS
}

/// Parse a hexadecimal tuner id, keeping only its low 16 bits
///
/// An optional `0x` prefix is accepted. Ids wider than 16 bits are truncated,
/// not rejected.
///
/// # Errors
///
/// Returns `InvalidField` for empty or non-hexadecimal text.
///
/// # Examples
///
/// ```
/// use heartbeat_link::codec::quantize::parse_tuner_id;
///
/// assert_eq!(parse_tuner_id("0bda").unwrap(), 0x0BDA);
/// assert_eq!(parse_tuner_id("0x2838").unwrap(), 0x2838);
/// assert_eq!(parse_tuner_id("12345").unwrap(), 0x2345);
/// assert!(parse_tuner_id("xyz").is_err());
/// ```
pub fn parse_tuner_id(text: &str) -> Result<u16> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() {
        return Err(HeartbeatError::InvalidField(
            format!("Empty tuner id: {:?}", text)
        ));
    }

    digits.chars().try_fold(0u16, |id, c| {
        let digit = c.to_digit(16).ok_or_else(|| {
            HeartbeatError::InvalidField(format!("Tuner id is not hexadecimal: {:?}", text))
        })?;
        Ok((id << 4) | digit as u16)
    })
}

/// Render a tuner id as zero-padded lowercase hex
pub fn format_tuner_id(id: u16) -> String {
    format!("{:0width$x}", id, width = TUNER_ID_HEX_DIGITS)
}
