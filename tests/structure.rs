//! Structure: item management, defined length, buffer checks, formatted
//! output and length-driven items.

use binary_accessor::dump::hex_dump;
use binary_accessor::{
    DataType, Endianness, FieldDescriptor, OverflowPolicy, Structure, StructureError, Value, VariableBitSize,
};

fn append(s: &mut Structure, name: &str, bit_size: i64, data_type: DataType) {
    s.append_item(name, bit_size, data_type, None, None, OverflowPolicy::Error)
        .expect("append item");
}

fn length_driven(name: &str, bit_offset: i64, bit_size: i64, data_type: DataType, length_item: &str) -> FieldDescriptor {
    FieldDescriptor::new(name, bit_offset, bit_size, data_type, Endianness::Big, None)
        .expect("descriptor")
        .with_variable_bit_size(VariableBitSize::new(length_item))
}

#[test]
fn test_append_tracks_defined_length() {
    let mut s = Structure::new("INST", Endianness::Big);
    assert!(!s.is_defined());
    append(&mut s, "a", 8, DataType::UInt);
    append(&mut s, "B", 16, DataType::UInt);
    append(&mut s, "C", 32, DataType::Float);
    assert_eq!(s.defined_length_bits(), 56);
    assert_eq!(s.defined_length(), 7);
    assert_eq!(s.length(), 7);
    assert!(s.is_fixed_size());

    let c = s.get_item("c").expect("case-insensitive lookup");
    assert_eq!((c.name.as_str(), c.bit_offset), ("C", 24));

    s.write("A", 1u64).expect("write A");
    s.write("B", 0x0203u64).expect("write B");
    s.write("C", 1.5f64).expect("write C");
    assert_eq!(s.buffer(), &[0x01, 0x02, 0x03, 0x3F, 0xC0, 0x00, 0x00]);
    assert_eq!(s.read("b"), Ok(Some(Value::UInt(0x0203))));
}

#[test]
fn test_derived_items_read_as_none() {
    let mut s = Structure::new("INST", Endianness::Big);
    append(&mut s, "A", 8, DataType::UInt);
    append(&mut s, "CALC", 0, DataType::Derived);
    assert_eq!(s.get_item("CALC").expect("derived").bit_offset, 0);
    assert_eq!(s.defined_length(), 1);
    assert_eq!(s.read("CALC"), Ok(None));
    assert_eq!(s.write("CALC", 5u64), Ok(None));
    assert_eq!(s.buffer(), &[0x00]);
}

#[test]
fn test_items_sort_by_offset_with_negative_offsets_last() {
    let mut s = Structure::new("INST", Endianness::Little);
    s.define_item("CRC", -16, 16, DataType::UInt, None, None, OverflowPolicy::Error)
        .expect("crc");
    s.define_item("B", 8, 8, DataType::UInt, None, None, OverflowPolicy::Error)
        .expect("b");
    s.define_item("A", 0, 8, DataType::UInt, None, Some(Endianness::Big), OverflowPolicy::Error)
        .expect("a");
    let names: Vec<_> = s.items().iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, ["A", "B", "CRC"]);
    assert_eq!(s.defined_length(), 4);
    assert_eq!(s.get_item("A").expect("a").endianness, Endianness::Big);
    assert_eq!(s.get_item("B").expect("b").endianness, Endianness::Little);

    s.write("CRC", 0xBEEFu64).expect("crc");
    assert_eq!(s.buffer(), &[0x00, 0x00, 0xEF, 0xBE]);
}

#[test]
fn test_redefine_replaces_item() {
    let mut s = Structure::new("INST", Endianness::Big);
    append(&mut s, "A", 8, DataType::UInt);
    s.define_item("A", 0, 16, DataType::Int, None, None, OverflowPolicy::Error)
        .expect("redefine");
    assert_eq!(s.items().len(), 1);
    assert_eq!(s.get_item("A").expect("a").data_type, DataType::Int);
    assert_eq!(s.defined_length(), 2);
}

#[test]
fn test_delete_and_rename() {
    let mut s = Structure::new("INST", Endianness::Big);
    append(&mut s, "A", 8, DataType::UInt);
    append(&mut s, "B", 8, DataType::UInt);

    let removed = s.delete_item("b").expect("delete");
    assert_eq!(removed.name, "B");
    assert_eq!(s.get_item("B"), Err(StructureError::UnknownItem("B".to_string())));
    assert_eq!(s.defined_length(), 2, "deleting does not shrink the defined length");
    assert_eq!(
        s.delete_item("NOPE").unwrap_err().to_string(),
        "Unknown item: NOPE"
    );

    s.write("A", 7u64).expect("write");
    s.rename_item("A", "alpha").expect("rename");
    assert_eq!(s.read("ALPHA"), Ok(Some(Value::UInt(7))));
    assert!(s.get_item("A").is_err());
}

#[test]
fn test_invalid_items_are_rejected() {
    let mut s = Structure::new("INST", Endianness::Big);
    let err = s
        .define_item("F", 4, 32, DataType::Float, None, None, OverflowPolicy::Error)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "F: bit_offset for 'FLOAT', 'STRING', and 'BLOCK' items must be byte aligned"
    );
    let err = s
        .define_item("WIDE", 0, 65, DataType::UInt, None, None, OverflowPolicy::Error)
        .unwrap_err();
    assert!(matches!(err, StructureError::Item(_)));
    assert!(!s.is_defined());
}

#[test]
fn test_append_after_open_ended_item() {
    let mut s = Structure::new("INST", Endianness::Big);
    append(&mut s, "HDR", 8, DataType::UInt);
    append(&mut s, "REST", 0, DataType::Block);
    assert!(!s.is_fixed_size());
    let err = s
        .append_item("MORE", 8, DataType::UInt, None, None, OverflowPolicy::Error)
        .unwrap_err();
    assert_eq!(err, StructureError::AppendAfterVariable);

    s.set_buffer(&[0x01, 0xAA, 0xBB, 0xCC]).expect("longer buffer is fine");
    assert_eq!(s.read("REST"), Ok(Some(Value::Block(vec![0xAA, 0xBB, 0xCC]))));
    s.write("REST", vec![0x11u8]).expect("shrink rest");
    assert_eq!(s.buffer(), &[0x01, 0x11]);
}

#[test]
fn test_set_buffer_checks_length() {
    let mut s = Structure::new("INST", Endianness::Big);
    append(&mut s, "A", 8, DataType::UInt);
    append(&mut s, "B", 16, DataType::UInt);

    let err = s.set_buffer(&[0x01]).unwrap_err();
    assert_eq!(err, StructureError::Buffer("Buffer length less than defined length".to_string()));
    assert_eq!(s.buffer(), &[0x01, 0x00, 0x00], "short buffer is installed and padded");

    let err = s.set_buffer(&[1, 2, 3, 4]).unwrap_err();
    assert_eq!(err.to_string(), "Buffer length greater than defined length");

    s.set_short_buffer_allowed(true);
    s.set_buffer(&[0x09]).expect("short allowed");
    assert_eq!(s.read("A"), Ok(Some(Value::UInt(9))));
    assert_eq!(s.read("B"), Ok(Some(Value::UInt(0))));
}

#[test]
fn test_read_all_and_formatted() {
    let mut s = Structure::new("INST", Endianness::Big);
    append(&mut s, "CALC", 0, DataType::Derived);
    append(&mut s, "A", 8, DataType::UInt);
    append(&mut s, "S", 32, DataType::String);
    append(&mut s, "BLK", 16, DataType::Block);
    s.write("A", 1u64).expect("a");
    s.write("S", "AB").expect("s");
    s.write("BLK", vec![0x01u8, 0x02]).expect("blk");

    let all = s.read_all().expect("read all");
    let names: Vec<_> = all.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["CALC", "A", "S", "BLK"]);

    let expected = format!(
        "CALC: <derived>\nA: 1\nS: AB\nBLK:\n{}",
        hex_dump(&[0x01, 0x02], 2)
    );
    assert_eq!(s.formatted(0, &[]).expect("formatted"), expected);

    let indented = s.formatted(2, &["calc", "BLK"]).expect("formatted");
    assert_eq!(indented, "  A: 1\n  S: AB\n");
}

#[test]
fn test_length_driven_string_shifts_later_items() {
    let mut s = Structure::new("VAR", Endianness::Big);
    append(&mut s, "LEN", 8, DataType::UInt);
    s.define(length_driven("STR", 8, 0, DataType::String, "len"))
        .expect("define STR");
    append(&mut s, "TAIL", 16, DataType::UInt);
    assert!(!s.is_fixed_size());
    assert_eq!(s.length(), 3);

    assert_eq!(s.read("STR"), Ok(Some(Value::String(String::new()))));
    s.write("TAIL", 0xBEEFu64).expect("tail");

    let written = s.write("STR", "HELLO").expect("grow");
    assert_eq!(written, Some(Value::String("HELLO".to_string())));
    assert_eq!(s.buffer(), b"\x05HELLO\xBE\xEF");
    assert_eq!(s.read("TAIL"), Ok(Some(Value::UInt(0xBEEF))));

    s.write("STR", "HI").expect("shrink");
    assert_eq!(s.buffer(), b"\x02HI\xBE\xEF");
    assert_eq!(s.read("STR"), Ok(Some(Value::String("HI".to_string()))));
    assert_eq!(s.read("TAIL"), Ok(Some(Value::UInt(0xBEEF))));
}

#[test]
fn test_length_driven_write_is_atomic() {
    let mut s = Structure::new("VAR", Endianness::Big);
    append(&mut s, "LEN", 8, DataType::UInt);
    s.define(length_driven("DATA", 8, 0, DataType::Block, "LEN"))
        .expect("define DATA");
    s.write("DATA", vec![0xAAu8; 3]).expect("write");
    let before = s.buffer().to_vec();

    // 300 bytes do not fit an 8-bit length item.
    let err = s.write("DATA", vec![0u8; 300]).unwrap_err();
    assert!(matches!(err, StructureError::Accessor(_)));
    assert_eq!(s.buffer(), before.as_slice());
}

#[test]
fn test_length_driven_array() {
    let mut s = Structure::new("VAR", Endianness::Big);
    append(&mut s, "COUNT", 8, DataType::UInt);
    let mut var = VariableBitSize::new("COUNT");
    var.length_bits_per_count = 16;
    let vals = FieldDescriptor::new("VALS", 8, 16, DataType::UInt, Endianness::Big, Some(0))
        .expect("descriptor")
        .with_variable_bit_size(var);
    s.define(vals).expect("define VALS");

    let values = Value::Array(vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)]);
    s.write("VALS", values.clone()).expect("write array");
    assert_eq!(s.buffer(), &[3, 0, 1, 0, 2, 0, 3]);
    assert_eq!(s.read("VALS"), Ok(Some(values)));
    assert_eq!(s.read("COUNT"), Ok(Some(Value::UInt(3))));
}

#[test]
fn test_quic_variable_integer() {
    let mut s = Structure::new("QUIC", Endianness::Big);
    append(&mut s, "LEN", 2, DataType::UInt);
    s.define(length_driven("VAL", 2, 6, DataType::UInt, "LEN"))
        .expect("define VAL");
    append(&mut s, "TAIL", 8, DataType::UInt);
    s.write("TAIL", 0xAAu64).expect("tail");

    s.write("VAL", 37u64).expect("one byte");
    assert_eq!(s.buffer(), &[0x25, 0xAA]);
    assert_eq!(s.read("VAL"), Ok(Some(Value::UInt(37))));

    s.write("VAL", 1000u64).expect("two bytes");
    assert_eq!(s.buffer(), &[0x43, 0xE8, 0xAA]);
    assert_eq!(s.read("LEN"), Ok(Some(Value::UInt(1))));
    assert_eq!(s.read("VAL"), Ok(Some(Value::UInt(1000))));
    assert_eq!(s.read("TAIL"), Ok(Some(Value::UInt(0xAA))));

    s.write("VAL", 5u64).expect("back to one byte");
    assert_eq!(s.buffer(), &[0x05, 0xAA]);
}

#[test]
fn test_quic_rejects_unknown_size_code() {
    let mut s = Structure::new("QUIC", Endianness::Big);
    append(&mut s, "LEN", 8, DataType::UInt);
    s.define(length_driven("VAL", 8, 6, DataType::UInt, "LEN"))
        .expect("define VAL");
    s.set_buffer(&[7, 0]).expect("buffer");
    let err = s.write("VAL", 1u64).unwrap_err();
    assert_eq!(
        err,
        StructureError::VariableSize("Value LEN has unknown QUIC bit size encoding".to_string())
    );
    assert_eq!(s.buffer(), &[7, 0]);
}

#[test]
fn test_length_item_must_come_first() {
    let mut s = Structure::new("VAR", Endianness::Big);
    s.define(length_driven("STR", 0, 0, DataType::String, "LEN"))
        .expect("define STR");
    s.define_item("LEN", 8, 8, DataType::UInt, None, None, OverflowPolicy::Error)
        .expect("define LEN");
    assert!(matches!(s.read("STR"), Err(StructureError::VariableSize(_))));
    assert!(matches!(s.write("STR", "X"), Err(StructureError::VariableSize(_))));
}
