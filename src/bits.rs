//! Bit-level primitives behind the accessor.
//!
//! ## Native widths
//!
//! Byte-aligned 8/16/32/64-bit integers and 32/64-bit floats go through
//! `byteorder` with the field's declared byte order.
//!
//! ## Bitfields
//!
//! A bitfield is addressed by the offset of its **most significant bit**,
//! whatever the byte order:
//!
//! | Byte order | Span | Byte order used for extraction |
//! |---|---|---|
//! | `BIG_ENDIAN` | `offset/8 ..= (offset+size-1)/8` | natural |
//! | `LITTLE_ENDIAN` | `offset/8 - n + 1 ..= offset/8`, `n = ((offset%8)+size-1)/8 + 1` | reversed (upper byte first) |
//!
//! The span is concatenated into one integer, the bits in front of the field
//! (in the first byte) are masked off and the bits behind it are shifted out.
//! Writing is the inverse: the out-of-field bits of the first and last byte are
//! kept, the field bits are replaced.

use crate::types::Endianness;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Byte-aligned native integer widths.
pub fn is_native_width(bit_size: i64) -> bool {
    matches!(bit_size, 8 | 16 | 32 | 64)
}

pub fn byte_aligned(bit_offset: i64) -> bool {
    bit_offset.rem_euclid(8) == 0
}

/// Decode an unsigned native-width integer from exactly `bit_size / 8` bytes.
pub fn read_native_uint(bytes: &[u8], bit_size: i64, endianness: Endianness) -> u64 {
    match (bit_size, endianness) {
        (8, _) => bytes[0] as u64,
        (16, Endianness::Big) => BigEndian::read_u16(bytes) as u64,
        (16, Endianness::Little) => LittleEndian::read_u16(bytes) as u64,
        (32, Endianness::Big) => BigEndian::read_u32(bytes) as u64,
        (32, Endianness::Little) => LittleEndian::read_u32(bytes) as u64,
        (_, Endianness::Big) => BigEndian::read_u64(bytes),
        (_, Endianness::Little) => LittleEndian::read_u64(bytes),
    }
}

/// Decode a signed native-width integer.
pub fn read_native_int(bytes: &[u8], bit_size: i64, endianness: Endianness) -> i64 {
    match (bit_size, endianness) {
        (8, _) => bytes[0] as i8 as i64,
        (16, Endianness::Big) => BigEndian::read_i16(bytes) as i64,
        (16, Endianness::Little) => LittleEndian::read_i16(bytes) as i64,
        (32, Endianness::Big) => BigEndian::read_i32(bytes) as i64,
        (32, Endianness::Little) => LittleEndian::read_i32(bytes) as i64,
        (_, Endianness::Big) => BigEndian::read_i64(bytes),
        (_, Endianness::Little) => LittleEndian::read_i64(bytes),
    }
}

/// Encode the low `bit_size` bits of `raw` into exactly `bit_size / 8` bytes.
pub fn write_native_uint(out: &mut [u8], bit_size: i64, endianness: Endianness, raw: u64) {
    match (bit_size, endianness) {
        (8, _) => out[0] = raw as u8,
        (16, Endianness::Big) => BigEndian::write_u16(out, raw as u16),
        (16, Endianness::Little) => LittleEndian::write_u16(out, raw as u16),
        (32, Endianness::Big) => BigEndian::write_u32(out, raw as u32),
        (32, Endianness::Little) => LittleEndian::write_u32(out, raw as u32),
        (_, Endianness::Big) => BigEndian::write_u64(out, raw),
        (_, Endianness::Little) => LittleEndian::write_u64(out, raw),
    }
}

/// Decode an IEEE-754 float of 32 or 64 bits.
pub fn read_float(bytes: &[u8], bit_size: i64, endianness: Endianness) -> f64 {
    match (bit_size, endianness) {
        (32, Endianness::Big) => BigEndian::read_f32(bytes) as f64,
        (32, Endianness::Little) => LittleEndian::read_f32(bytes) as f64,
        (_, Endianness::Big) => BigEndian::read_f64(bytes),
        (_, Endianness::Little) => LittleEndian::read_f64(bytes),
    }
}

pub fn write_float(out: &mut [u8], bit_size: i64, endianness: Endianness, value: f64) {
    match (bit_size, endianness) {
        (32, Endianness::Big) => BigEndian::write_f32(out, value as f32),
        (32, Endianness::Little) => LittleEndian::write_f32(out, value as f32),
        (_, Endianness::Big) => BigEndian::write_f64(out, value),
        (_, Endianness::Little) => LittleEndian::write_f64(out, value),
    }
}

/// Inclusive byte span `(lower, upper)` covering a bitfield.
///
/// `None` when a little-endian field would start before byte 0.
pub fn bitfield_span(bit_offset: usize, bit_size: usize, endianness: Endianness) -> Option<(usize, usize)> {
    match endianness {
        Endianness::Big => Some((bit_offset / 8, (bit_offset + bit_size - 1) / 8)),
        Endianness::Little => {
            let num_bytes = ((bit_offset % 8) + bit_size - 1) / 8 + 1;
            let upper = bit_offset / 8;
            let lower = (upper + 1).checked_sub(num_bytes)?;
            Some((lower, upper))
        }
    }
}

/// Span bytes in extraction order (reversed for little endian).
fn span_bytes(buffer: &[u8], lower: usize, upper: usize, endianness: Endianness) -> Vec<u8> {
    let span = &buffer[lower..=upper];
    match endianness {
        Endianness::Big => span.to_vec(),
        Endianness::Little => span.iter().rev().copied().collect(),
    }
}

/// Extract `bit_size` (1..=64) bits whose MSB sits at `bit_offset`.
///
/// The span must already be known to be valid for `buffer`.
pub fn extract_bits(
    buffer: &[u8],
    bit_offset: usize,
    bit_size: usize,
    lower: usize,
    upper: usize,
    endianness: Endianness,
) -> u64 {
    let data = span_bytes(buffer, lower, upper, endianness);
    let start_bits = bit_offset % 8;
    let total_bits = data.len() * 8;
    let right_shift = total_bits - start_bits - bit_size;

    let start_mask = (0xFFu16 >> start_bits) as u8;
    let mut acc: u128 = (data[0] & start_mask) as u128;
    for b in &data[1..] {
        acc = (acc << 8) | *b as u128;
    }
    (acc >> right_shift) as u64
}

/// Store the low `bit_size` bits of `raw` with the MSB at `bit_offset`, keeping
/// all neighbouring bits of the span.
pub fn insert_bits(
    buffer: &mut [u8],
    bit_offset: usize,
    bit_size: usize,
    lower: usize,
    upper: usize,
    endianness: Endianness,
    raw: u64,
) {
    let data = span_bytes(buffer, lower, upper, endianness);
    let start_bits = bit_offset % 8;
    let total_bits = data.len() * 8;
    let end_bits = total_bits - start_bits - bit_size;

    let start_mask = !((0xFFu16 >> start_bits) as u8);
    let end_mask = ((1u16 << end_bits) - 1) as u8;
    let field_mask: u128 = if bit_size >= 64 {
        u64::MAX as u128
    } else {
        (1u128 << bit_size) - 1
    };

    // Bits in front of the field, moved down to sit just above it.
    let head = (data[0] & start_mask) as u128 >> (8 - start_bits);
    let mut acc = (head << bit_size) | (raw as u128 & field_mask);
    let last = data.len() - 1;
    acc = (acc << end_bits) | (data[last] & end_mask) as u128;

    let mut bytes = vec![0u8; data.len()];
    for slot in bytes.iter_mut().rev() {
        *slot = (acc & 0xFF) as u8;
        acc >>= 8;
    }
    if endianness == Endianness::Little {
        bytes.reverse();
    }
    buffer[lower..=upper].copy_from_slice(&bytes);
}

/// Two's-complement interpretation of a `bit_size`-bit raw value.
///
/// A single set bit reads as -1.
pub fn sign_extend(raw: u64, bit_size: usize) -> i64 {
    if bit_size >= 64 {
        return raw as i64;
    }
    if raw & (1u64 << (bit_size - 1)) != 0 {
        (raw as i128 - (1i128 << bit_size)) as i64
    } else {
        raw as i64
    }
}

/// Low `bit_size` bits of a (possibly negative) value, as stored in the buffer.
pub fn to_raw(value: i128, bit_size: usize) -> u64 {
    if bit_size >= 64 {
        value as u64
    } else {
        (value & ((1i128 << bit_size) - 1)) as u64
    }
}
