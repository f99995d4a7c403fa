//! # Heartbeat Decoder
//!
//! Locates marker-delimited datagrams inside a received byte stream, unpacks
//! them, and rebuilds absolute timestamps from the delta chain.

use bitvec::prelude::*;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::bits::read_field;
use super::protocol::*;
use super::quantize::dequantize;
use crate::error::{HeartbeatError, Result};

/// What to do with a marker-bounded span narrower than a full datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShortDatagramPolicy {
    /// Fail the whole decode call
    #[default]
    Abort,

    /// Drop the span, report it, and keep decoding
    Skip,
}

/// Marker-bounded span dropped under [`ShortDatagramPolicy::Skip`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedSpan {
    /// Bit offset of the span's start marker in the stream
    pub offset: usize,

    /// Bits between the start of the start marker and the end of the end marker
    pub bits: usize,
}

/// Result of decoding a stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedStream {
    /// Decoded heartbeats, newest first
    pub heartbeats: Vec<Heartbeat>,

    /// Short spans that were dropped
    pub skipped: Vec<SkippedSpan>,
}

/// Find every non-overlapping, byte-aligned occurrence of `marker`
///
/// # Returns
///
/// * `Vec<usize>` - Bit offsets of each occurrence, in stream order
pub fn find_markers(stream: &[u8], marker: &[u8; MARKER_BYTES]) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut index = 0;

    while index + MARKER_BYTES <= stream.len() {
        if stream[index..index + MARKER_BYTES] == marker[..] {
            positions.push(index * 8);
            index += MARKER_BYTES;
        } else {
            index += 1;
        }
    }

    positions
}

/// Decode a single datagram
///
/// # Arguments
///
/// * `bits` - Datagram from the first bit of its start marker to the last bit
///   of its end marker
///
/// # Returns
///
/// * `Result<QuantizedHeartbeat>` - Wire-scale heartbeat; its timestamp is
///   still a delta and needs the chain's base time to become absolute
///
/// # Errors
///
/// Returns error if:
/// - The slice is shorter than 272 bits
/// - The start marker or end marker bytes do not match
pub fn decode_datagram(bits: &BitSlice<u8, Msb0>) -> Result<QuantizedHeartbeat> {
    decode_datagram_at(bits, 0)
}

/// Decode a datagram located at bit `offset` of a larger stream
///
/// Spans longer than a datagram are trusted: fields are read at their fixed
/// offsets from the start marker and the end marker is expected at the tail.
fn decode_datagram_at(bits: &BitSlice<u8, Msb0>, offset: usize) -> Result<QuantizedHeartbeat> {
    if bits.len() < DATAGRAM_BITS {
        return Err(HeartbeatError::ShortDatagram {
            offset,
            bits: bits.len(),
        });
    }

    if &bits[START_MARKER_FIELD] != START_MARKER.view_bits::<Msb0>() {
        return Err(HeartbeatError::InvalidMarker { offset });
    }

    let end_marker_start = bits.len() - MARKER_BITS;
    if &bits[end_marker_start..] != END_MARKER.view_bits::<Msb0>() {
        return Err(HeartbeatError::InvalidMarker {
            offset: offset + end_marker_start,
        });
    }

    let carousel_count = read_field(&bits[CAROUSEL_COUNT_FIELD]) as u8;
    let carousel_status = bits[CAROUSEL_STATUS_FIELD]
        .iter()
        .by_vals()
        .take(usize::from(carousel_count))
        .collect();

    Ok(QuantizedHeartbeat {
        client_id: read_field(&bits[CLIENT_ID_FIELD]),
        timestamp_delta: read_field(&bits[TIMESTAMP_FIELD]) as u8,
        tuner_vendor: read_field(&bits[TUNER_VENDOR_FIELD]) as u16,
        tuner_model: read_field(&bits[TUNER_MODEL_FIELD]) as u16,
        tuner_preset: read_field(&bits[TUNER_PRESET_FIELD]) as u8,
        signal_lock: bits[SIGNAL_LOCK_BIT],
        service_lock: bits[SERVICE_LOCK_BIT],
        signal_strength: read_field(&bits[SIGNAL_STRENGTH_FIELD]) as u8,
        snr: read_field(&bits[SNR_FIELD]) as u8,
        bitrate: read_field(&bits[BITRATE_FIELD]) as u8,
        carousel_count,
        carousel_status,
    })
}

/// Decode a stream, failing on any short datagram
///
/// # Arguments
///
/// * `stream` - Received bytes; may carry garbage around the datagrams
/// * `now` - Anchor of the timestamp chain (the newest heartbeat's base time)
///
/// # Returns
///
/// * `Result<Vec<Heartbeat>>` - Heartbeats newest first, the order they were encoded in
///
/// # Errors
///
/// Returns `MalformedStream` if start and end marker counts differ and
/// `ShortDatagram` if a marker-bounded span is too narrow.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use heartbeat_link::codec::decoder::decode_stream;
///
/// let heartbeats = decode_stream(b"no datagrams here", Utc::now()).unwrap();
/// assert!(heartbeats.is_empty());
/// ```
pub fn decode_stream(stream: &[u8], now: DateTime<Utc>) -> Result<Vec<Heartbeat>> {
    decode_stream_with(stream, now, ShortDatagramPolicy::Abort).map(|decoded| decoded.heartbeats)
}

/// Decode a stream anchored at the current wall-clock time
pub fn decode_stream_now(stream: &[u8], policy: ShortDatagramPolicy) -> Result<DecodedStream> {
    decode_stream_with(stream, Utc::now(), policy)
}

/// Decode a stream with an explicit short-datagram policy
///
/// # Algorithm
///
/// 1. Scan for start markers and end markers independently
/// 2. Reject the stream if the counts differ
/// 3. Pair the i-th start with the i-th end
/// 4. Walk the pairs in stream order (newest first) with a running base time
///    that starts at `now`; each decoded heartbeat's absolute time becomes the
///    base for the next, older one
///
/// A skipped span leaves the base time untouched since its delta is unknown.
pub fn decode_stream_with(
    stream: &[u8],
    now: DateTime<Utc>,
    policy: ShortDatagramPolicy,
) -> Result<DecodedStream> {
    let starts = find_markers(stream, &START_MARKER);
    let ends = find_markers(stream, &END_MARKER);

    if starts.len() != ends.len() {
        return Err(HeartbeatError::MalformedStream {
            starts: starts.len(),
            ends: ends.len(),
        });
    }

    let bits = stream.view_bits::<Msb0>();
    let mut decoded = DecodedStream {
        heartbeats: Vec::with_capacity(starts.len()),
        skipped: Vec::new(),
    };
    let mut base_time = now;

    for (&start, &end) in starts.iter().zip(ends.iter()) {
        // An end marker ahead of its start leaves an empty span
        let span_len = (end + MARKER_BITS).saturating_sub(start);
        let span = &bits[start..start + span_len];

        match decode_datagram_at(span, start) {
            Ok(quantized) => {
                let heartbeat = dequantize(&quantized, base_time);
                base_time = heartbeat.timestamp;
                decoded.heartbeats.push(heartbeat);
            }
            Err(HeartbeatError::ShortDatagram { offset, bits })
                if policy == ShortDatagramPolicy::Skip =>
            {
                decoded.skipped.push(SkippedSpan { offset, bits });
            }
            Err(e) => return Err(e),
        }
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encoder::{encode_datagram, encode_stream};
    use crate::codec::quantize::quantize;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 6, 1, 12, 0, 0).unwrap()
    }

    fn heartbeat(timestamp: DateTime<Utc>) -> Heartbeat {
        Heartbeat {
            client_id: Uuid::parse_str("0e6f0a1c-2b3d-4c5e-8f70-91a2b3c4d5e6").unwrap(),
            timestamp,
            tuner_vendor: "0bda".to_string(),
            tuner_model: "2838".to_string(),
            tuner_preset: 3,
            signal_lock: true,
            service_lock: true,
            signal_strength: 72.0,
            snr: 2.5,
            bitrate: 183_400,
            carousel_count: 5,
            carousel_status: vec![true, false, true, true, false],
        }
    }

    fn single_datagram() -> Vec<u8> {
        encode_stream(&[heartbeat(now())], now()).unwrap()
    }

    #[test]
    fn test_find_markers() {
        let stream = [0x00, 0x4F, 0x48, 0x44, 0x4F, 0x48, 0x44, 0x11];
        assert_eq!(find_markers(&stream, &START_MARKER), vec![8, 32]);
        assert!(find_markers(&stream, &END_MARKER).is_empty());
    }

    #[test]
    fn test_find_markers_at_stream_edges() {
        let stream = [0x44, 0x48, 0x4F, 0x00, 0x44, 0x48, 0x4F];
        assert_eq!(find_markers(&stream, &END_MARKER), vec![0, 32]);
        assert!(find_markers(&stream[..2], &END_MARKER).is_empty());
        assert!(find_markers(&[], &START_MARKER).is_empty());
    }

    #[test]
    fn test_find_markers_back_to_back() {
        let stream = b"DHODHO";
        assert_eq!(find_markers(stream, &END_MARKER), vec![0, 24]);
    }

    #[test]
    fn test_decode_datagram_roundtrip_fields() {
        let quantized = quantize(&heartbeat(now()), now()).unwrap();
        let datagram = encode_datagram(&quantized);

        let decoded = decode_datagram(&datagram[..]).unwrap();
        assert_eq!(decoded, quantized);
    }

    #[test]
    fn test_decode_clamped_fields_yield_ceiling() {
        let mut loud = heartbeat(now());
        loud.signal_strength = 1_000.0;
        loud.snr = 40.0;
        loud.bitrate = 5_000_000;

        let quantized = quantize(&loud, now()).unwrap();
        let decoded = decode_datagram(&encode_datagram(&quantized)[..]).unwrap();
        let restored = dequantize(&decoded, now());

        assert_eq!(restored.signal_strength, 100.0);
        assert!((restored.snr - 3.1).abs() < 1e-9);
        assert_eq!(restored.bitrate, 630_000);

        // Re-encoding the ceiling changes nothing
        assert_eq!(quantize(&restored, now()).unwrap(), decoded);
    }

    #[test]
    fn test_decode_datagram_too_short() {
        let stream = single_datagram();
        let bits = stream.view_bits::<Msb0>();

        match decode_datagram(&bits[..DATAGRAM_BITS - 1]) {
            Err(HeartbeatError::ShortDatagram { offset, bits }) => {
                assert_eq!(offset, 0);
                assert_eq!(bits, DATAGRAM_BITS - 1);
            }
            other => panic!("Expected ShortDatagram, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_datagram_invalid_start_marker() {
        let mut stream = single_datagram();
        stream[0] ^= 0xFF;

        match decode_datagram(stream.view_bits::<Msb0>()) {
            Err(HeartbeatError::InvalidMarker { offset }) => assert_eq!(offset, 0),
            other => panic!("Expected InvalidMarker, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_datagram_invalid_end_marker() {
        let mut stream = single_datagram();
        stream[33] ^= 0x01;

        match decode_datagram(stream.view_bits::<Msb0>()) {
            Err(HeartbeatError::InvalidMarker { offset }) => assert_eq!(offset, 248),
            other => panic!("Expected InvalidMarker, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_datagram_carousel_bounded_by_count() {
        let stream = single_datagram();
        let decoded = decode_datagram(stream.view_bits::<Msb0>()).unwrap();

        assert_eq!(decoded.carousel_count, 5);
        assert_eq!(decoded.carousel_status, vec![true, false, true, true, false]);
    }

    #[test]
    fn test_decode_empty_stream() {
        assert!(decode_stream(&[], now()).unwrap().is_empty());
    }

    #[test]
    fn test_decode_stream_roundtrip() {
        let mut older = heartbeat(now() - Duration::seconds(33));
        older.signal_lock = false;
        older.service_lock = false;
        older.carousel_count = 2;
        older.carousel_status = vec![false, true];

        let heartbeats = vec![
            heartbeat(now() - Duration::seconds(3)),
            heartbeat(now() - Duration::seconds(21)),
            older,
        ];

        let stream = encode_stream(&heartbeats, now()).unwrap();
        let decoded = decode_stream(&stream, now()).unwrap();

        assert_eq!(decoded.len(), heartbeats.len());
        for (original, restored) in heartbeats.iter().zip(decoded.iter()) {
            assert_eq!(restored.client_id, original.client_id);
            assert_eq!(restored.tuner_vendor, original.tuner_vendor);
            assert_eq!(restored.tuner_model, original.tuner_model);
            assert_eq!(restored.tuner_preset, original.tuner_preset);
            assert_eq!(restored.signal_lock, original.signal_lock);
            assert_eq!(restored.service_lock, original.service_lock);
            assert_eq!(restored.signal_strength, 70.0);
            assert!((restored.snr - original.snr).abs() < 0.1);
            assert_eq!(restored.bitrate, 180_000);
            assert_eq!(restored.carousel_count, original.carousel_count);
            assert_eq!(restored.carousel_status, original.carousel_status);
        }

        // Each gap is stored in whole 5 s units of the original gap
        let error = decoded[0].timestamp - heartbeats[0].timestamp;
        assert!(error >= Duration::zero() && error < Duration::seconds(5));
        assert_eq!(decoded[1].timestamp, now() - Duration::seconds(15));
        assert_eq!(decoded[2].timestamp, now() - Duration::seconds(25));
    }

    #[test]
    fn test_decode_stream_chain_reconstruction() {
        let heartbeats = vec![heartbeat(now()), heartbeat(now() - Duration::seconds(12))];

        let stream = encode_stream(&heartbeats, now()).unwrap();
        let bits = stream.view_bits::<Msb0>();

        let newer = decode_datagram(&bits[..DATAGRAM_BITS]).unwrap();
        let older = decode_datagram(&bits[DATAGRAM_BITS..]).unwrap();
        assert_eq!(newer.timestamp_delta, 0);
        assert_eq!(older.timestamp_delta, 2);

        let decoded = decode_stream(&stream, now()).unwrap();
        assert_eq!(decoded[0].timestamp, now());
        assert_eq!(decoded[1].timestamp, now() - Duration::seconds(10));
    }

    #[test]
    fn test_decode_stream_chain_with_late_anchor() {
        let heartbeats = vec![heartbeat(now()), heartbeat(now() - Duration::seconds(12))];

        for offset in [3, 4, 7] {
            let anchor = now() + Duration::seconds(offset);
            let stream = encode_stream(&heartbeats, anchor).unwrap();
            let bits = stream.view_bits::<Msb0>();

            let older = decode_datagram(&bits[DATAGRAM_BITS..]).unwrap();
            assert_eq!(older.timestamp_delta, 2, "anchor = now + {}s", offset);

            let decoded = decode_stream(&stream, anchor).unwrap();
            let newest_error = decoded[0].timestamp - now();
            assert!(newest_error >= Duration::zero() && newest_error < Duration::seconds(5));
            assert_eq!(decoded[0].timestamp - decoded[1].timestamp, Duration::seconds(10));
        }
    }

    #[test]
    fn test_decode_stream_marker_counts_match_records() {
        let heartbeats: Vec<_> = (0..4)
            .map(|i| heartbeat(now() - Duration::seconds(10 * i)))
            .collect();
        let stream = encode_stream(&heartbeats, now()).unwrap();

        let starts = find_markers(&stream, &START_MARKER);
        let ends = find_markers(&stream, &END_MARKER);
        assert_eq!(starts.len(), 4);
        assert_eq!(ends.len(), 4);

        for (start, end) in starts.iter().zip(ends.iter()) {
            assert_eq!(end - start, DATAGRAM_BITS - MARKER_BITS);
        }
    }

    #[test]
    fn test_decode_stream_truncated_end_marker() {
        let heartbeats = vec![heartbeat(now()), heartbeat(now() - Duration::seconds(12))];
        let mut stream = encode_stream(&heartbeats, now()).unwrap();
        stream.truncate(stream.len() - MARKER_BYTES);

        match decode_stream(&stream, now()) {
            Err(HeartbeatError::MalformedStream { starts, ends }) => {
                assert_eq!(starts, 2);
                assert_eq!(ends, 1);
            }
            other => panic!("Expected MalformedStream, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_stream_marker_bytes_in_payload() {
        // Client id ends in the start marker bytes 4F 48 44
        let mut heartbeat = heartbeat(now());
        heartbeat.client_id = Uuid::parse_str("0e6f0a1c-2b3d-4c5e-8f70-91a2b34f4844").unwrap();
        let stream = encode_stream(&[heartbeat], now()).unwrap();

        // The datagram itself is intact
        assert!(decode_datagram(stream.view_bits::<Msb0>()).is_ok());

        // but the framer cannot tell the payload from a marker
        match decode_stream(&stream, now()) {
            Err(HeartbeatError::MalformedStream { starts, ends }) => {
                assert_eq!(starts, 2);
                assert_eq!(ends, 1);
            }
            other => panic!("Expected MalformedStream, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_stream_skips_leading_garbage() {
        let mut stream = vec![0x00, 0x13, 0x37, 0x4F, 0x44];
        stream.extend(single_datagram());
        stream.extend_from_slice(&[0xAA, 0x55]);

        let decoded = decode_stream(&stream, now()).unwrap();
        assert_eq!(decoded, vec![heartbeat_restored()]);
    }

    fn heartbeat_restored() -> Heartbeat {
        let mut restored = heartbeat(now());
        restored.signal_strength = 70.0;
        restored.bitrate = 180_000;
        restored
    }

    fn short_span_then_datagram() -> Vec<u8> {
        let mut stream = START_MARKER.to_vec();
        stream.extend_from_slice(&[0u8; 10]);
        stream.extend_from_slice(&END_MARKER);
        stream.extend(single_datagram());
        stream
    }

    #[test]
    fn test_decode_stream_short_span_aborts_by_default() {
        match decode_stream(&short_span_then_datagram(), now()) {
            Err(HeartbeatError::ShortDatagram { offset, bits }) => {
                assert_eq!(offset, 0);
                assert_eq!(bits, 16 * 8);
            }
            other => panic!("Expected ShortDatagram, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_stream_short_span_skipped() {
        let decoded = decode_stream_with(
            &short_span_then_datagram(),
            now(),
            ShortDatagramPolicy::Skip,
        )
        .unwrap();

        assert_eq!(decoded.skipped, vec![SkippedSpan { offset: 0, bits: 128 }]);
        assert_eq!(decoded.heartbeats, vec![heartbeat_restored()]);
    }

    #[test]
    fn test_decode_stream_dropped_byte() {
        let heartbeats = vec![heartbeat(now()), heartbeat(now() - Duration::seconds(12))];
        let mut stream = encode_stream(&heartbeats, now()).unwrap();
        stream.remove(10); // inside the first client id

        assert!(matches!(
            decode_stream(&stream, now()),
            Err(HeartbeatError::ShortDatagram { offset: 0, .. })
        ));

        let decoded = decode_stream_with(&stream, now(), ShortDatagramPolicy::Skip).unwrap();
        assert_eq!(decoded.skipped.len(), 1);
        assert_eq!(decoded.heartbeats.len(), 1);
        // The lost newest delta leaves the base at "now"
        assert_eq!(decoded.heartbeats[0].timestamp, now() - Duration::seconds(10));
    }

    #[test]
    fn test_decode_stream_misordered_markers() {
        let mut stream = END_MARKER.to_vec();
        stream.extend(single_datagram());
        stream.extend_from_slice(&START_MARKER);

        assert!(matches!(
            decode_stream(&stream, now()),
            Err(HeartbeatError::ShortDatagram { bits: 0, .. })
        ));

        let decoded = decode_stream_with(&stream, now(), ShortDatagramPolicy::Skip).unwrap();
        assert!(decoded.heartbeats.is_empty());
        assert_eq!(decoded.skipped.len(), 2);
    }

    #[test]
    fn test_decode_stream_oversized_span_is_trusted() {
        let mut stream = single_datagram();
        // Two padding bytes just before the end marker
        stream.insert(31, 0);
        stream.insert(31, 0);

        let decoded = decode_stream(&stream, now()).unwrap();
        assert_eq!(decoded, vec![heartbeat_restored()]);
    }

    #[test]
    fn test_decode_stream_clamped_timestamp() {
        let heartbeats = vec![heartbeat(now() - Duration::seconds(300))];
        let stream = encode_stream(&heartbeats, now()).unwrap();

        let decoded = decode_stream(&stream, now()).unwrap();
        assert_eq!(decoded[0].timestamp, now() - Duration::seconds(75));
    }

    #[test]
    fn test_policy_default_is_abort() {
        assert_eq!(ShortDatagramPolicy::default(), ShortDatagramPolicy::Abort);
    }
}
