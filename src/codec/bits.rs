//! # Bit-Width Primitives
//!
//! Fixed-width unsigned fields inside a datagram, most-significant bit first.
//!
//! Values are first rendered into the smallest whole number of bytes that can
//! hold the field, then only the low-order bits of interest are copied into the
//! datagram. Reading zero-extends the field back to full bytes before
//! reinterpreting it as an integer. Both directions silently drop any bits
//! that do not fit: overflow is truncation, never an error.

use bitvec::prelude::*;

/// Widest field the primitives handle (a full UUID)
pub const MAX_FIELD_BITS: usize = 128;

/// Clamp `value` into `[min, max]`
///
/// # Examples
///
/// ```
/// use heartbeat_link::codec::bits::clamp;
///
/// assert_eq!(clamp(42, 0, 31), 31);
/// assert_eq!(clamp(-3, 0, 31), 0);
/// assert_eq!(clamp(7, 0, 31), 7);
/// ```
pub fn clamp(value: i64, min: i64, max: i64) -> i64 {
    value.max(min).min(max)
}

/// Clamp `value` into `[0, max]`
pub fn clamp_max(value: i64, max: u32) -> u32 {
    clamp(value, 0, i64::from(max)) as u32
}

/// Number of whole bytes needed to hold `width` bits
pub fn storage_bytes(width: usize) -> usize {
    (width + 7) / 8
}

/// Write the low `field.len()` bits of `value` into `field`, MSB first
///
/// # Panics
///
/// Panics if the field is wider than [`MAX_FIELD_BITS`]. Field widths are
/// fixed by the datagram layout, so this only fires on a layout bug.
pub fn write_field(field: &mut BitSlice<u8, Msb0>, value: u128) {
    let width = field.len();
    assert!(width <= MAX_FIELD_BITS, "field of {} bits is too wide", width);

    let bytes = value.to_be_bytes();
    let stored = &bytes[bytes.len() - storage_bytes(width)..];
    let bits = stored.view_bits::<Msb0>();

    field.copy_from_bitslice(&bits[bits.len() - width..]);
}

/// Read `field` as an unsigned integer, zero-extending the missing high bits
///
/// # Panics
///
/// Panics if the field is wider than [`MAX_FIELD_BITS`].
pub fn read_field(field: &BitSlice<u8, Msb0>) -> u128 {
    let width = field.len();
    assert!(width <= MAX_FIELD_BITS, "field of {} bits is too wide", width);

    let mut bytes = [0u8; MAX_FIELD_BITS / 8];
    let bits = bytes.view_bits_mut::<Msb0>();
    bits[MAX_FIELD_BITS - width..].copy_from_bitslice(field);

    u128::from_be_bytes(bytes)
}
