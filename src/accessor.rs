//! Bit-exact read/write of typed fields in a byte buffer.
//!
//! Every operation is a pure function of (layout, buffer, value). Reads never
//! touch the buffer; writes mutate it in place and may grow or shrink it for
//! variable-length STRING/BLOCK fields and open-ended arrays.
//!
//! ## Offsets and sizes
//!
//! - A negative `bit_offset` counts from the end of the buffer.
//! - A zero or negative `bit_size` (STRING/BLOCK only) means "the rest of the
//!   buffer, minus `|bit_size|` bits".
//! - A zero or negative `array_size` works the same way for whole arrays.
//!
//! ## Errors
//!
//! Nothing is retried or logged here; every problem is returned as an
//! [`AccessorError`] at the point it is detected.

use crate::bits;
use crate::item::FieldDescriptor;
use crate::types::{DataType, Endianness, OverflowPolicy};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccessorError {
    /// Requested bit range does not fit the buffer.
    #[error("{0}")]
    BufferBounds(String),
    /// STRING/BLOCK/FLOAT at a non-byte-aligned offset.
    #[error("{0}")]
    Alignment(String),
    /// Impossible layout (bad FLOAT size, bad little-endian span, bad array size).
    #[error("{0}")]
    Geometry(String),
    /// Value violates the overflow policy, or does not fit a fixed-size field.
    #[error("{0}")]
    Overflow(String),
    /// Unrecognized data type, endianness or overflow token.
    #[error("{0}")]
    UnknownType(String),
    /// Value cannot be coerced to the field's data type.
    #[error("{0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

impl Access {
    fn as_str(self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
        }
    }
}

fn buffer_error(
    access: Access,
    buffer_len: usize,
    data_type: DataType,
    given_offset: i64,
    given_size: i64,
) -> AccessorError {
    AccessorError::BufferBounds(format!(
        "{} byte buffer insufficient to {} {} at bit_offset {} with bit_size {}",
        buffer_len,
        access.as_str(),
        data_type,
        given_offset,
        given_size
    ))
}

fn alignment_error(given_offset: i64, data_type: DataType) -> AccessorError {
    AccessorError::Alignment(format!(
        "bit_offset {} is not byte aligned for data_type {}",
        given_offset, data_type
    ))
}

fn float_size_error(given_size: i64, data_type: DataType) -> AccessorError {
    AccessorError::Geometry(format!(
        "bit_size is {} but must be 32 or 64 for data_type {}",
        given_size, data_type
    ))
}

fn unknown_type_error(data_type: DataType) -> AccessorError {
    AccessorError::UnknownType(format!("data_type {} is not recognized", data_type))
}

fn little_endian_error(given_offset: i64, given_size: i64) -> AccessorError {
    AccessorError::Geometry(format!(
        "LITTLE_ENDIAN bitfield with bit_offset {} and bit_size {} is invalid",
        given_offset, given_size
    ))
}

fn bitfield_too_wide(bit_size: i64, data_type: DataType) -> AccessorError {
    AccessorError::Geometry(format!(
        "bit_size {} exceeds 64 bits for data_type {}",
        bit_size, data_type
    ))
}

fn len_bits(buffer_len: usize) -> i64 {
    buffer_len as i64 * 8
}

/// Validate the size/offset pair and resolve a negative offset.
fn resolve_offset(
    access: Access,
    given_offset: i64,
    given_size: i64,
    data_type: DataType,
    buffer_len: usize,
) -> Result<i64, AccessorError> {
    if given_size <= 0 && !data_type.is_variable_capable() {
        return Err(AccessorError::Geometry(format!(
            "bit_size {} must be positive for data types other than 'STRING' and 'BLOCK'",
            given_size
        )));
    }
    if given_size <= 0 && given_offset < 0 {
        return Err(AccessorError::Geometry(format!(
            "negative or zero bit_sizes ({}) cannot be given with negative bit_offsets ({})",
            given_size, given_offset
        )));
    }
    let mut bit_offset = given_offset;
    if given_offset < 0 {
        bit_offset = len_bits(buffer_len) + given_offset;
        if bit_offset < 0 {
            return Err(buffer_error(access, buffer_len, data_type, given_offset, given_size));
        }
    }
    Ok(bit_offset)
}

/// Byte bounds of `[bit_offset, bit_offset + bit_size)` and whether they fit.
///
/// Little-endian integer bitfields are allowed to run past the end as long as
/// their lower byte index is inside the buffer: their MSB-relative span only
/// ever touches bytes at or below `bit_offset / 8`.
fn check_bounds(
    bit_offset: i64,
    bit_size: i64,
    buffer_len: usize,
    endianness: Endianness,
    data_type: DataType,
) -> (bool, i64, i64) {
    let lower = bit_offset.div_euclid(8);
    let upper = bit_offset.saturating_add(bit_size - 1).div_euclid(8);
    let len = buffer_len as i64;
    let mut ok = true;
    if upper >= len {
        let tolerated = endianness == Endianness::Little
            && data_type.is_integer()
            && !(bits::byte_aligned(bit_offset) && bits::is_native_width(bit_size))
            && lower < len;
        if !tolerated {
            ok = false;
        }
    }
    (ok, lower, upper)
}

/// `(min, max, hex_max)` accepted for an integer field of `bit_size` bits.
///
/// `hex_max` is the unsigned maximum of the width: signed fields may be given
/// their raw bit pattern (e.g. `0xFF` for an 8-bit INT) under `ERROR_ALLOW_HEX`.
pub fn overflow_ranges(bit_size: i64, data_type: DataType) -> (i128, i128, i128) {
    let n = bit_size.clamp(1, 64) as u32;
    let hex_max = (1i128 << n) - 1;
    match data_type {
        DataType::Int if n == 1 => (-1, 1, 1),
        DataType::Int => {
            let half = 1i128 << (n - 1);
            (-half, half - 1, hex_max)
        }
        _ => (0, hex_max, hex_max),
    }
}

/// Apply an overflow policy to an integer about to be written.
pub fn check_overflow(
    value: i128,
    bit_size: i64,
    data_type: DataType,
    overflow: OverflowPolicy,
) -> Result<i128, AccessorError> {
    let (min, max, hex_max) = overflow_ranges(bit_size, data_type);
    let invalid = || {
        AccessorError::Overflow(format!(
            "value of {} invalid for {}-bit {}",
            value, bit_size, data_type
        ))
    };
    match overflow {
        OverflowPolicy::Truncate => {
            // Always lands on the unsigned equivalent; anything above the
            // signed max collapses to the min.
            let v = value.rem_euclid(hex_max + 1);
            Ok(if v > max { min } else { v })
        }
        OverflowPolicy::Saturate => Ok(value.clamp(min, max)),
        OverflowPolicy::Error => {
            if value > max || value < min {
                Err(invalid())
            } else {
                Ok(value)
            }
        }
        OverflowPolicy::ErrorAllowHex => {
            if value > hex_max || value < min {
                Err(invalid())
            } else {
                Ok(value)
            }
        }
    }
}

fn integer_value(value: i128, data_type: DataType) -> Value {
    match data_type {
        DataType::Int => match i64::try_from(value) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::UInt(value as u64),
        },
        _ => Value::UInt(value as u64),
    }
}

fn empty_value(data_type: DataType) -> Value {
    match data_type {
        DataType::Block => Value::Block(Vec::new()),
        _ => Value::String(String::new()),
    }
}

/// Elements of an array write, coerced and checked before any byte moves.
enum Elements {
    Raw(Vec<u64>),
    Floats(Vec<f64>),
    Each(Vec<Value>),
}

struct ArrayPlan {
    bit_offset: i64,
    bit_size: i64,
    data_type: DataType,
    num_writes: usize,
    endianness: Endianness,
    overflow: OverflowPolicy,
}

impl ArrayPlan {
    fn prepare(&self, values: &[Value], given_offset: i64) -> Result<Elements, AccessorError> {
        let (bit_size, data_type) = (self.bit_size, self.data_type);
        let zero = Value::Int(0);
        let padded = values.iter().chain(std::iter::repeat(&zero)).take(self.num_writes);
        let aligned = bits::byte_aligned(self.bit_offset);
        match data_type {
            DataType::String | DataType::Block => {
                if !aligned {
                    return Err(alignment_error(given_offset, data_type));
                }
                padded
                    .map(|value| match value {
                        Value::Int(_) | Value::UInt(_) => {
                            let x = value.to_integer()?;
                            let byte = u8::try_from(x).map_err(|_| {
                                AccessorError::Overflow(format!(
                                    "value of {} does not fit into a byte for data_type {}",
                                    x, data_type
                                ))
                            })?;
                            Ok(Value::Block(vec![byte]))
                        }
                        other => Ok(other.clone()),
                    })
                    .collect::<Result<Vec<Value>, AccessorError>>()
                    .map(Elements::Each)
            }
            DataType::Int | DataType::UInt if aligned && bits::is_native_width(bit_size) => padded
                .map(|v| {
                    let checked = check_overflow(v.to_integer()?, bit_size, data_type, self.overflow)?;
                    Ok(bits::to_raw(checked, bit_size as usize))
                })
                .collect::<Result<Vec<u64>, AccessorError>>()
                .map(Elements::Raw),
            DataType::Int | DataType::UInt => {
                if self.endianness == Endianness::Little && bit_size > 1 {
                    return Err(AccessorError::Geometry(
                        "write_array does not support little endian bit fields with bit_size greater than 1-bit"
                            .to_string(),
                    ));
                }
                for v in padded.clone() {
                    check_overflow(v.to_integer()?, bit_size, data_type, self.overflow)?;
                }
                Ok(Elements::Each(padded.cloned().collect()))
            }
            DataType::Float => {
                if !aligned {
                    return Err(alignment_error(given_offset, data_type));
                }
                if bit_size != 32 && bit_size != 64 {
                    return Err(float_size_error(bit_size, data_type));
                }
                padded
                    .map(|v| checked_float(v.to_float()?, bit_size))
                    .collect::<Result<Vec<f64>, AccessorError>>()
                    .map(Elements::Floats)
            }
            DataType::Derived => Err(unknown_type_error(data_type)),
        }
    }

    fn encode(&self, elements: Elements, buffer: &mut Vec<u8>) -> Result<(), AccessorError> {
        let width = (self.bit_size / 8) as usize;
        let start = self.bit_offset.div_euclid(8) as usize;
        match elements {
            Elements::Raw(raws) => {
                for (i, raw) in raws.into_iter().enumerate() {
                    let at = start + i * width;
                    bits::write_native_uint(&mut buffer[at..at + width], self.bit_size, self.endianness, raw);
                }
            }
            Elements::Floats(floats) => {
                for (i, f) in floats.into_iter().enumerate() {
                    let at = start + i * width;
                    bits::write_float(&mut buffer[at..at + width], self.bit_size, self.endianness, f);
                }
            }
            Elements::Each(values) => {
                let mut offset = self.bit_offset;
                for value in &values {
                    BinaryAccessor::write(
                        value,
                        offset,
                        self.bit_size,
                        self.data_type,
                        buffer,
                        self.endianness,
                        self.overflow,
                    )?;
                    offset += self.bit_size;
                }
            }
        }
        Ok(())
    }
}

/// Reject finite values a 32-bit float cannot hold.
fn checked_float(value: f64, bit_size: i64) -> Result<f64, AccessorError> {
    if bit_size == 32 && value.is_finite() && value.abs() > f32::MAX as f64 {
        return Err(AccessorError::Overflow(format!(
            "value of {:e} invalid for 32-bit FLOAT",
            value
        )));
    }
    Ok(value)
}

/// Stateless reader/writer of typed fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryAccessor;

impl BinaryAccessor {
    /// Read one scalar field.
    pub fn read(
        bit_offset: i64,
        bit_size: i64,
        data_type: DataType,
        buffer: &[u8],
        endianness: Endianness,
    ) -> Result<Value, AccessorError> {
        let given_offset = bit_offset;
        let given_size = bit_size;
        let bit_offset = resolve_offset(Access::Read, given_offset, given_size, data_type, buffer.len())?;

        let mut bit_size = bit_size;
        if bit_size <= 0 && data_type.is_variable_capable() {
            bit_size = len_bits(buffer.len()) - bit_offset + bit_size;
            if bit_size == 0 {
                return Ok(empty_value(data_type));
            }
            if bit_size < 0 {
                return Err(buffer_error(Access::Read, buffer.len(), data_type, given_offset, given_size));
            }
        }

        let (ok, lower, upper) = check_bounds(bit_offset, bit_size, buffer.len(), endianness, data_type);
        if !ok {
            return Err(buffer_error(Access::Read, buffer.len(), data_type, given_offset, given_size));
        }

        match data_type {
            DataType::String | DataType::Block => {
                if !bits::byte_aligned(bit_offset) {
                    return Err(alignment_error(given_offset, data_type));
                }
                let bytes = &buffer[lower as usize..=upper as usize];
                if data_type == DataType::Block {
                    return Ok(Value::Block(bytes.to_vec()));
                }
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                match std::str::from_utf8(&bytes[..end]) {
                    Ok(s) => Ok(Value::String(s.to_string())),
                    // Binary content: hand back the raw range instead of failing.
                    Err(_) => Ok(Value::Block(bytes.to_vec())),
                }
            }
            DataType::Int | DataType::UInt => {
                if bits::byte_aligned(bit_offset) && bits::is_native_width(bit_size) {
                    let bytes = &buffer[lower as usize..=upper as usize];
                    return Ok(if data_type == DataType::Int {
                        Value::Int(bits::read_native_int(bytes, bit_size, endianness))
                    } else {
                        Value::UInt(bits::read_native_uint(bytes, bit_size, endianness))
                    });
                }
                if bit_size > 64 {
                    return Err(bitfield_too_wide(bit_size, data_type));
                }
                let (offset, size) = (bit_offset as usize, bit_size as usize);
                let (lo, hi) = bits::bitfield_span(offset, size, endianness)
                    .ok_or_else(|| little_endian_error(given_offset, given_size))?;
                let raw = bits::extract_bits(buffer, offset, size, lo, hi, endianness);
                Ok(if data_type == DataType::Int {
                    Value::Int(bits::sign_extend(raw, size))
                } else {
                    Value::UInt(raw)
                })
            }
            DataType::Float => {
                if !bits::byte_aligned(bit_offset) {
                    return Err(alignment_error(given_offset, data_type));
                }
                if bit_size != 32 && bit_size != 64 {
                    return Err(float_size_error(given_size, data_type));
                }
                let bytes = &buffer[lower as usize..=upper as usize];
                Ok(Value::Float(bits::read_float(bytes, bit_size, endianness)))
            }
            DataType::Derived => Err(unknown_type_error(data_type)),
        }
    }

    /// Write one scalar field and return the value actually encoded.
    pub fn write(
        value: &Value,
        bit_offset: i64,
        bit_size: i64,
        data_type: DataType,
        buffer: &mut Vec<u8>,
        endianness: Endianness,
        overflow: OverflowPolicy,
    ) -> Result<Value, AccessorError> {
        let given_offset = bit_offset;
        let given_size = bit_size;
        let bit_offset = resolve_offset(Access::Write, given_offset, given_size, data_type, buffer.len())?;

        match data_type {
            DataType::String | DataType::Block => Self::write_bytes(
                value,
                bit_offset,
                given_offset,
                given_size,
                data_type,
                buffer,
                endianness,
                overflow,
            ),
            DataType::Int | DataType::UInt => {
                let (ok, lower, upper) = check_bounds(bit_offset, bit_size, buffer.len(), endianness, data_type);
                if !ok {
                    return Err(buffer_error(Access::Write, buffer.len(), data_type, given_offset, given_size));
                }
                if bit_size > 64 {
                    return Err(bitfield_too_wide(bit_size, data_type));
                }
                let v = check_overflow(value.to_integer()?, bit_size, data_type, overflow)?;
                let raw = bits::to_raw(v, bit_size as usize);

                if bits::byte_aligned(bit_offset) && bits::is_native_width(bit_size) {
                    let out = &mut buffer[lower as usize..=upper as usize];
                    bits::write_native_uint(out, bit_size, endianness, raw);
                } else {
                    let (offset, size) = (bit_offset as usize, bit_size as usize);
                    let (lo, hi) = bits::bitfield_span(offset, size, endianness)
                        .ok_or_else(|| little_endian_error(given_offset, given_size))?;
                    bits::insert_bits(buffer, offset, size, lo, hi, endianness, raw);
                }
                Ok(integer_value(v, data_type))
            }
            DataType::Float => {
                let (ok, lower, upper) = check_bounds(bit_offset, bit_size, buffer.len(), endianness, data_type);
                if !ok {
                    return Err(buffer_error(Access::Write, buffer.len(), data_type, given_offset, given_size));
                }
                let f = value.to_float()?;
                if !bits::byte_aligned(bit_offset) {
                    return Err(alignment_error(given_offset, data_type));
                }
                if bit_size != 32 && bit_size != 64 {
                    return Err(float_size_error(given_size, data_type));
                }
                let f = checked_float(f, bit_size)?;
                let out = &mut buffer[lower as usize..=upper as usize];
                bits::write_float(out, bit_size, endianness, f);
                Ok(Value::Float(f))
            }
            DataType::Derived => {
                let (ok, _, _) = check_bounds(bit_offset, bit_size, buffer.len(), endianness, data_type);
                if !ok {
                    return Err(buffer_error(Access::Write, buffer.len(), data_type, given_offset, given_size));
                }
                Err(unknown_type_error(data_type))
            }
        }
    }

    /// STRING/BLOCK write, fixed or variable size.
    #[allow(clippy::too_many_arguments)]
    fn write_bytes(
        value: &Value,
        bit_offset: i64,
        given_offset: i64,
        given_size: i64,
        data_type: DataType,
        buffer: &mut Vec<u8>,
        endianness: Endianness,
        overflow: OverflowPolicy,
    ) -> Result<Value, AccessorError> {
        let bytes = value.to_bytes()?;
        let bit_size = if given_size <= 0 {
            bytes.len() as i64 * 8
        } else {
            given_size
        };
        let (ok, lower, _) = check_bounds(bit_offset, bit_size, buffer.len(), endianness, data_type);
        if !ok && given_size > 0 {
            return Err(buffer_error(Access::Write, buffer.len(), data_type, given_offset, given_size));
        }
        if !bits::byte_aligned(bit_offset) {
            return Err(alignment_error(given_offset, data_type));
        }
        let lower = lower as usize;

        if given_size <= 0 {
            // The field spans up to the last `end_bytes` bytes, which are kept.
            let end_bytes = (-given_size.div_euclid(8)) as usize;
            if lower + end_bytes > buffer.len() {
                return Err(buffer_error(Access::Write, buffer.len(), data_type, given_offset, given_size));
            }
            let field_end = buffer.len() - end_bytes;
            buffer.splice(lower..field_end, bytes.iter().copied());
        } else {
            let byte_size = (bit_size / 8) as usize;
            let field = &mut buffer[lower..lower + byte_size];
            if bytes.len() > byte_size {
                if overflow != OverflowPolicy::Truncate {
                    return Err(AccessorError::Overflow(format!(
                        "value of {} bytes does not fit into {} bytes for data_type {}",
                        bytes.len(),
                        byte_size,
                        data_type
                    )));
                }
                field.copy_from_slice(&bytes[..byte_size]);
            } else {
                field[..bytes.len()].copy_from_slice(&bytes);
                field[bytes.len()..].fill(0);
            }
        }
        Ok(value.clone())
    }

    /// Read `array_size` bits worth of `bit_size`-bit elements.
    pub fn read_array(
        bit_offset: i64,
        bit_size: i64,
        data_type: DataType,
        array_size: i64,
        buffer: &[u8],
        endianness: Endianness,
    ) -> Result<Value, AccessorError> {
        if buffer.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        let given_offset = bit_offset;
        let given_size = bit_size;
        let given_array_size = array_size;

        if bit_size <= 0 {
            return Err(AccessorError::Geometry(format!(
                "bit_size {} must be positive for arrays",
                given_size
            )));
        }
        let mut bit_offset = bit_offset;
        if bit_offset < 0 {
            bit_offset += len_bits(buffer.len());
            if bit_offset < 0 {
                return Err(buffer_error(Access::Read, buffer.len(), data_type, given_offset, given_size));
            }
        }
        let mut array_size = array_size;
        if array_size <= 0 {
            if given_offset < 0 {
                return Err(AccessorError::Geometry(format!(
                    "negative or zero array_size ({}) cannot be given with negative bit_offset ({})",
                    given_array_size, given_offset
                )));
            }
            array_size = len_bits(buffer.len()) - bit_offset + array_size;
            if array_size == 0 {
                return Ok(Value::Array(Vec::new()));
            }
            if array_size < 0 {
                return Err(buffer_error(Access::Read, buffer.len(), data_type, given_offset, given_size));
            }
        }
        if array_size % bit_size != 0 {
            return Err(AccessorError::Geometry(format!(
                "array_size {} not a multiple of bit_size {}",
                given_array_size, given_size
            )));
        }
        let num_items = (array_size / bit_size) as usize;
        let aligned = bits::byte_aligned(bit_offset);

        match data_type {
            DataType::String | DataType::Block => {
                if !aligned {
                    return Err(alignment_error(given_offset, data_type));
                }
                Self::read_each(bit_offset, bit_size, data_type, num_items, buffer, endianness)
            }
            DataType::Int | DataType::UInt => {
                if aligned && bits::is_native_width(bit_size) {
                    let bytes = Self::array_bytes(bit_offset, array_size, buffer, data_type, given_offset, given_size)?;
                    let width = (bit_size / 8) as usize;
                    let values = bytes
                        .chunks_exact(width)
                        .map(|chunk| {
                            if data_type == DataType::Int {
                                Value::Int(bits::read_native_int(chunk, bit_size, endianness))
                            } else {
                                Value::UInt(bits::read_native_uint(chunk, bit_size, endianness))
                            }
                        })
                        .collect();
                    return Ok(Value::Array(values));
                }
                if endianness == Endianness::Little && bit_size > 1 {
                    return Err(AccessorError::Geometry(
                        "read_array does not support little endian bit fields with bit_size greater than 1-bit"
                            .to_string(),
                    ));
                }
                Self::read_each(bit_offset, bit_size, data_type, num_items, buffer, endianness)
            }
            DataType::Float => {
                if !aligned {
                    return Err(alignment_error(given_offset, data_type));
                }
                if bit_size != 32 && bit_size != 64 {
                    return Err(float_size_error(given_size, data_type));
                }
                let bytes = Self::array_bytes(bit_offset, array_size, buffer, data_type, given_offset, given_size)?;
                let width = (bit_size / 8) as usize;
                let values = bytes
                    .chunks_exact(width)
                    .map(|chunk| Value::Float(bits::read_float(chunk, bit_size, endianness)))
                    .collect();
                Ok(Value::Array(values))
            }
            DataType::Derived => Err(unknown_type_error(data_type)),
        }
    }

    fn read_each(
        mut bit_offset: i64,
        bit_size: i64,
        data_type: DataType,
        num_items: usize,
        buffer: &[u8],
        endianness: Endianness,
    ) -> Result<Value, AccessorError> {
        let mut values = Vec::with_capacity(num_items);
        for _ in 0..num_items {
            values.push(Self::read(bit_offset, bit_size, data_type, buffer, endianness)?);
            bit_offset += bit_size;
        }
        Ok(Value::Array(values))
    }

    /// Bytes backing a byte-aligned native-width array.
    fn array_bytes<'a>(
        bit_offset: i64,
        array_size: i64,
        buffer: &'a [u8],
        data_type: DataType,
        given_offset: i64,
        given_size: i64,
    ) -> Result<&'a [u8], AccessorError> {
        let lower = (bit_offset / 8) as usize;
        let upper = ((bit_offset + array_size - 1) / 8) as usize;
        if upper >= buffer.len() {
            return Err(buffer_error(Access::Read, buffer.len(), data_type, given_offset, given_size));
        }
        Ok(&buffer[lower..=upper])
    }

    /// Write an array of elements; missing trailing elements are written as zero.
    #[allow(clippy::too_many_arguments)]
    pub fn write_array(
        values: &[Value],
        bit_offset: i64,
        bit_size: i64,
        data_type: DataType,
        array_size: i64,
        buffer: &mut Vec<u8>,
        endianness: Endianness,
        overflow: OverflowPolicy,
    ) -> Result<Value, AccessorError> {
        let given_offset = bit_offset;
        let given_size = bit_size;
        let given_array_size = array_size;

        if bit_size <= 0 {
            return Err(AccessorError::Geometry(format!(
                "bit_size {} must be positive for arrays",
                given_size
            )));
        }
        let mut bit_offset = bit_offset;
        if bit_offset < 0 {
            bit_offset += len_bits(buffer.len());
            if bit_offset < 0 {
                return Err(buffer_error(Access::Write, buffer.len(), data_type, given_offset, given_size));
            }
        }

        // Resolve the target length first; the buffer is only resized once
        // every element has been validated.
        let mut array_size = array_size;
        let mut resize = None;
        if array_size <= 0 {
            if given_offset < 0 {
                return Err(AccessorError::Geometry(format!(
                    "negative or zero array_size ({}) cannot be given with negative bit_offset ({})",
                    given_array_size, given_offset
                )));
            }
            // Exactly `values.len()` elements in front of the preserved tail bytes.
            let end_bytes = -given_array_size.div_euclid(8);
            let upper = (bit_offset + bit_size * values.len() as i64 - 1).div_euclid(8);
            let old_upper = buffer.len() as i64 - 1 - end_bytes;
            resize = Some((upper, old_upper));
        }
        let target_len = match resize {
            Some((upper, old_upper)) => (buffer.len() as i64 + upper - old_upper).max(0) as usize,
            None => buffer.len(),
        };
        if resize.is_some() {
            array_size += len_bits(target_len) - bit_offset;
        }

        let num_writes = if given_array_size <= 0 {
            values.len() as i64
        } else {
            array_size / bit_size
        };
        if bit_offset + num_writes * bit_size > len_bits(target_len) {
            return Err(buffer_error(Access::Write, buffer.len(), data_type, given_offset, given_size));
        }
        if array_size % bit_size != 0 {
            return Err(AccessorError::Geometry(format!(
                "array_size {} not a multiple of bit_size {}",
                given_array_size, given_size
            )));
        }
        if (num_writes as usize) < values.len() {
            return Err(AccessorError::Overflow(format!(
                "too many values {} for given array_size {} and bit_size {}",
                values.len(),
                given_array_size,
                given_size
            )));
        }

        let plan = ArrayPlan {
            bit_offset,
            bit_size,
            data_type,
            num_writes: num_writes as usize,
            endianness,
            overflow,
        };
        let elements = plan.prepare(values, given_offset)?;

        match resize {
            None if !matches!(elements, Elements::Each(_)) => plan.encode(elements, buffer)?,
            None => {
                // Per-element writes can still fail on a later element.
                let mut scratch = buffer.clone();
                plan.encode(elements, &mut scratch)?;
                *buffer = scratch;
            }
            Some((upper, old_upper)) => {
                let mut scratch = buffer.clone();
                if upper < old_upper {
                    scratch.drain((upper + 1) as usize..(old_upper + 1) as usize);
                } else if upper > old_upper {
                    let diff = (upper - old_upper) as usize;
                    let at = (old_upper + 1).max(0) as usize;
                    scratch.splice(at..at, std::iter::repeat(0u8).take(diff));
                }
                plan.encode(elements, &mut scratch)?;
                *buffer = scratch;
            }
        }
        Ok(Value::Array(values.to_vec()))
    }

    /// Read a field described by `item`. DERIVED items yield `None`.
    pub fn read_item(item: &FieldDescriptor, buffer: &[u8]) -> Result<Option<Value>, AccessorError> {
        if item.data_type == DataType::Derived {
            return Ok(None);
        }
        let value = match item.array_size {
            Some(array_size) => Self::read_array(
                item.bit_offset,
                item.bit_size,
                item.data_type,
                array_size,
                buffer,
                item.endianness,
            )?,
            None => Self::read(item.bit_offset, item.bit_size, item.data_type, buffer, item.endianness)?,
        };
        Ok(Some(value))
    }

    /// Write a field described by `item`. DERIVED items are a no-op.
    pub fn write_item(
        item: &FieldDescriptor,
        value: &Value,
        buffer: &mut Vec<u8>,
    ) -> Result<Option<Value>, AccessorError> {
        if item.data_type == DataType::Derived {
            return Ok(None);
        }
        let written = match item.array_size {
            Some(array_size) => {
                let values = value.as_array().ok_or_else(|| {
                    AccessorError::InvalidValue(format!(
                        "values must be an Array but is {}",
                        value.type_name()
                    ))
                })?;
                Self::write_array(
                    values,
                    item.bit_offset,
                    item.bit_size,
                    item.data_type,
                    array_size,
                    buffer,
                    item.endianness,
                    item.overflow,
                )?
            }
            None => Self::write(
                value,
                item.bit_offset,
                item.bit_size,
                item.data_type,
                buffer,
                item.endianness,
                item.overflow,
            )?,
        };
        Ok(Some(written))
    }
}
