//! Accessor fuzz target: the first 8 bytes pick offset, size, type, endianness,
//! overflow policy and array size; the rest is the buffer.
//! Reads and writes must return an error instead of panicking for any layout.
//! Build with: cargo fuzz run accessor_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use binary_accessor::{BinaryAccessor, DataType, Endianness, OverflowPolicy, Value};
#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let (head, rest) = data.split_at(8);
    let bit_offset = i16::from_be_bytes([head[0], head[1]]) as i64;
    let bit_size = i16::from_be_bytes([head[2], head[3]]) as i64 % 200;
    let data_type = match head[4] % 6 {
        0 => DataType::Int,
        1 => DataType::UInt,
        2 => DataType::Float,
        3 => DataType::String,
        4 => DataType::Block,
        _ => DataType::Derived,
    };
    let endianness = if head[5] & 1 == 0 { Endianness::Big } else { Endianness::Little };
    let overflow = match (head[5] >> 1) % 4 {
        0 => OverflowPolicy::Truncate,
        1 => OverflowPolicy::Saturate,
        2 => OverflowPolicy::Error,
        _ => OverflowPolicy::ErrorAllowHex,
    };
    let array_size = i16::from_be_bytes([head[6], head[7]]) as i64;

    let _ = BinaryAccessor::read(bit_offset, bit_size, data_type, rest, endianness);
    let _ = BinaryAccessor::read_array(bit_offset, bit_size, data_type, array_size, rest, endianness);

    let value = match data_type {
        DataType::Float => Value::Float(f64::from(head[0])),
        DataType::String | DataType::Block => Value::Block(rest.iter().take(16).copied().collect()),
        _ => Value::Int(i64::from_be_bytes([head[0], head[1], head[2], head[3], head[4], head[5], head[6], head[7]])),
    };
    let mut buffer = rest.to_vec();
    let _ = BinaryAccessor::write(&value, bit_offset, bit_size, data_type, &mut buffer, endianness, overflow);
    let mut buffer = rest.to_vec();
    let values = vec![value; 3];
    let _ = BinaryAccessor::write_array(
        &values,
        bit_offset,
        bit_size,
        data_type,
        array_size,
        &mut buffer,
        endianness,
        overflow,
    );
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run accessor_fuzz");
}
