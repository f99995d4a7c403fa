//! # Heartbeat Encoder
//!
//! Packs quantized heartbeats into 272-bit datagrams and chains datagrams into
//! a stream.

use bitvec::prelude::*;
use chrono::{DateTime, Utc};

use super::bits::{read_field, write_field};
use super::protocol::*;
use super::quantize::quantize;
use crate::error::Result;

/// Encode one quantized heartbeat into a complete datagram
///
/// # Arguments
///
/// * `heartbeat` - Heartbeat already reduced to wire-scale values
///
/// # Returns
///
/// * `DatagramBits` - 272-bit datagram bracketed by the start and end markers
///
/// # Algorithm
///
/// Each field is written at its fixed offset, MSB first. Values wider than
/// their field keep only their low-order bits. The reserved bits and every
/// carousel slot past `carousel_count` stay zero.
///
/// # Examples
///
/// ```
/// use heartbeat_link::codec::encoder::encode_datagram;
/// use heartbeat_link::codec::protocol::*;
///
/// let heartbeat = QuantizedHeartbeat {
///     client_id: 1,
///     timestamp_delta: 0,
///     tuner_vendor: 0x0bda,
///     tuner_model: 0x2838,
///     tuner_preset: 0,
///     signal_lock: true,
///     service_lock: true,
///     signal_strength: 5,
///     snr: 20,
///     bitrate: 12,
///     carousel_count: 0,
///     carousel_status: vec![],
/// };
///
/// let datagram = encode_datagram(&heartbeat);
/// assert_eq!(&datagram.as_raw_slice()[..3], &START_MARKER);
/// assert_eq!(&datagram.as_raw_slice()[31..], &END_MARKER);
/// ```
pub fn encode_datagram(heartbeat: &QuantizedHeartbeat) -> DatagramBits {
    let mut datagram = DatagramBits::ZERO;
    let bits = datagram.as_mut_bitslice();

    bits[START_MARKER_FIELD].copy_from_bitslice(START_MARKER.view_bits::<Msb0>());
    write_field(&mut bits[CLIENT_ID_FIELD], heartbeat.client_id);
    write_field(&mut bits[TIMESTAMP_FIELD], u128::from(heartbeat.timestamp_delta));
    write_field(&mut bits[TUNER_VENDOR_FIELD], u128::from(heartbeat.tuner_vendor));
    write_field(&mut bits[TUNER_MODEL_FIELD], u128::from(heartbeat.tuner_model));
    write_field(&mut bits[TUNER_PRESET_FIELD], u128::from(heartbeat.tuner_preset));
    bits.set(SIGNAL_LOCK_BIT, heartbeat.signal_lock);
    bits.set(SERVICE_LOCK_BIT, heartbeat.service_lock);
    write_field(&mut bits[SIGNAL_STRENGTH_FIELD], u128::from(heartbeat.signal_strength));
    write_field(&mut bits[SNR_FIELD], u128::from(heartbeat.snr));
    write_field(&mut bits[BITRATE_FIELD], u128::from(heartbeat.bitrate));
    write_field(&mut bits[CAROUSEL_COUNT_FIELD], u128::from(heartbeat.carousel_count));

    // Only as many slots as the count that actually made it onto the wire
    let slots = read_field(&bits[CAROUSEL_COUNT_FIELD]) as usize;
    for (slot, &ok) in heartbeat.carousel_status.iter().take(slots).enumerate() {
        bits.set(CAROUSEL_STATUS_FIELD.start + slot, ok);
    }

    bits[END_MARKER_FIELD].copy_from_bitslice(END_MARKER.view_bits::<Msb0>());

    datagram
}

/// Encode a newest-first heartbeat sequence into a byte stream
///
/// The newest heartbeat's timestamp is stored relative to `now`; every older
/// heartbeat is stored relative to its newer neighbour's own timestamp.
///
/// # Arguments
///
/// * `heartbeats` - Heartbeats in strictly decreasing timestamp order
/// * `now` - Anchor of the timestamp chain
///
/// # Returns
///
/// * `Result<Vec<u8>>` - Concatenated datagrams, 34 bytes per heartbeat
///
/// # Errors
///
/// Returns `InvalidField` if a heartbeat cannot be quantized.
pub fn encode_stream(heartbeats: &[Heartbeat], now: DateTime<Utc>) -> Result<Vec<u8>> {
    let mut stream = Vec::with_capacity(heartbeats.len() * DATAGRAM_BYTES);
    let mut base_time = now;

    for heartbeat in heartbeats {
        let quantized = quantize(heartbeat, base_time)?;
        base_time = heartbeat.timestamp;
        stream.extend_from_slice(encode_datagram(&quantized).as_raw_slice());
    }

    Ok(stream)
}

/// Encode a heartbeat sequence anchored at the current wall-clock time
pub fn encode_stream_now(heartbeats: &[Heartbeat]) -> Result<Vec<u8>> {
    encode_stream(heartbeats, Utc::now())
}
