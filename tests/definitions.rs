//! Packet definition loading: keywords, modifiers, identification, command
//! building and error reporting.

use std::io::Write;

use binary_accessor::parser::WarningKind;
use binary_accessor::{
    load_file, parse, DataType, DefinitionError, Endianness, OverflowPolicy, PacketKind, StructureError, Value,
};

const INST: &str = r#"
# Instrument definitions
TELEMETRY INST HEALTH_STATUS BIG_ENDIAN "Health and status"
  APPEND_ID_ITEM CCSDSAPID 16 UINT 1 "Packet id"
  APPEND_ITEM TEMP1 16 INT "Temperature 1"
    OVERFLOW SATURATE
  APPEND_ITEM MODE 8 UINT
  APPEND_ITEM NAME 64 STRING "Name"
  APPEND_ITEM SPARE 8 UINT "" LITTLE_ENDIAN

TELEMETRY INST ADCS BIG_ENDIAN
  APPEND_ID_ITEM CCSDSAPID 16 UINT 2
  APPEND_ARRAY_ITEM Q 32 FLOAT 128 "Quaternion"

TELEMETRY INST RAW BIG_ENDIAN
  APPEND_ITEM DATA 0 BLOCK

COMMAND INST COLLECT BIG_ENDIAN "Start a collect"
  APPEND_ID_PARAMETER OPCODE 8 UINT 0 255 0x10 "Opcode"
  APPEND_PARAMETER DURATION 32 FLOAT 0.0 10.0 1.5
  APPEND_PARAMETER LABEL 32 STRING "ABC"
"#;

fn line_message(source: &str) -> String {
    parse(source).expect_err("definition should fail").to_string()
}

#[test]
fn test_load_packets() {
    let defs = parse(INST).expect("parse");
    assert_eq!(defs.telemetry.len(), 3);
    assert_eq!(defs.commands.len(), 1);
    assert!(defs.warnings.is_empty());

    let hs = defs.get_telemetry("inst", "health_status").expect("HS");
    assert_eq!(hs.kind, PacketKind::Telemetry);
    assert_eq!(hs.description.as_deref(), Some("Health and status"));
    assert_eq!(hs.structure.defined_length(), 14);
    let names: Vec<_> = hs.structure.items().iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, ["CCSDSAPID", "TEMP1", "MODE", "NAME", "SPARE"]);

    let temp = hs.structure.get_item("TEMP1").expect("TEMP1");
    assert_eq!(temp.overflow, OverflowPolicy::Saturate);
    assert_eq!(temp.description.as_deref(), Some("Temperature 1"));
    let spare = hs.structure.get_item("SPARE").expect("SPARE");
    assert_eq!(spare.endianness, Endianness::Little);
    assert_eq!(spare.bit_offset, 104);
    assert_eq!(hs.item_lines.get("TEMP1"), Some(&5));

    let adcs = defs.get_telemetry("INST", "ADCS").expect("ADCS");
    let q = adcs.structure.get_item("Q").expect("Q");
    assert_eq!((q.data_type, q.bit_size, q.array_size), (DataType::Float, 32, Some(128)));

    let raw = defs.get_telemetry("INST", "RAW").expect("RAW");
    assert!(!raw.structure.is_fixed_size());
}

#[test]
fn test_parameters_carry_limits_and_defaults() {
    let defs = parse(INST).expect("parse");
    let cmd = defs.get_command("INST", "COLLECT").expect("COLLECT");
    assert_eq!(cmd.kind, PacketKind::Command);

    let opcode = cmd.structure.get_item("OPCODE").expect("OPCODE");
    assert_eq!(opcode.minimum, Some(Value::UInt(0)));
    assert_eq!(opcode.maximum, Some(Value::UInt(255)));
    assert_eq!(opcode.id_value, Some(Value::UInt(0x10)));
    assert_eq!(opcode.default, Some(Value::UInt(0x10)));

    let label = cmd.structure.get_item("LABEL").expect("LABEL");
    assert_eq!(label.minimum, None);
    assert_eq!(label.default, Some(Value::String("ABC".to_string())));

    let built = cmd.build_command().expect("build");
    assert_eq!(built.buffer(), &[0x10, 0x3F, 0xC0, 0x00, 0x00, b'A', b'B', b'C', 0x00]);
    assert!(cmd.identify(built.buffer()));
}

#[test]
fn test_identify_telemetry() {
    let defs = parse(INST).expect("parse");

    let mut hs = vec![0u8; 14];
    hs[1] = 1;
    hs[2] = 0xFF;
    hs[3] = 0xFE;
    let packet = defs.identify_telemetry("INST", &hs).expect("HS");
    assert_eq!(packet.name, "HEALTH_STATUS");
    let decoded = packet.decode(&hs).expect("decode");
    assert_eq!(decoded.read("TEMP1"), Ok(Some(Value::Int(-2))));

    let mut adcs = vec![0u8; 18];
    adcs[1] = 2;
    assert_eq!(defs.identify_telemetry("INST", &adcs).map(|p| p.name.as_str()), Some("ADCS"));

    // No ID match: the packet without ID items is the catch-all.
    let other = [0x00, 0x09, 0x01];
    assert_eq!(defs.identify_telemetry("INST", &other).map(|p| p.name.as_str()), Some("RAW"));
    assert!(defs.identify_telemetry("OTHER", &other).is_none());
}

#[test]
fn test_decode_and_write_through_overflow() {
    let defs = parse(INST).expect("parse");
    let hs = defs.get_telemetry("INST", "HEALTH_STATUS").expect("HS");
    let mut s = hs.decode(&[0u8; 14]).expect("decode");
    assert_eq!(s.write("TEMP1", 40_000i64), Ok(Some(Value::Int(32_767))));
    s.write("NAME", "probe").expect("name");
    assert_eq!(s.read("NAME"), Ok(Some(Value::String("probe".to_string()))));

    let err = hs.decode(&[0u8; 4]).unwrap_err();
    assert!(matches!(err, StructureError::Buffer(_)));
}

#[test]
fn test_variable_bit_size_and_allow_short() {
    let defs = parse(
        "TELEMETRY INST VAR BIG_ENDIAN\n\
         \x20 APPEND_ITEM LEN 8 UINT\n\
         \x20 APPEND_ITEM STR 0 STRING\n\
         \x20   VARIABLE_BIT_SIZE LEN\n\
         \x20 APPEND_ITEM CRC 16 UINT\n\
         TELEMETRY INST SHORT BIG_ENDIAN\n\
         \x20 ALLOW_SHORT\n\
         \x20 APPEND_ITEM A 32 UINT\n",
    )
    .expect("parse");

    let var = defs.get_telemetry("INST", "VAR").expect("VAR");
    let s = var.decode(b"\x05HELLO\x12\x34").expect("decode");
    assert_eq!(s.read("STR"), Ok(Some(Value::String("HELLO".to_string()))));
    assert_eq!(s.read("CRC"), Ok(Some(Value::UInt(0x1234))));

    let short = defs.get_telemetry("INST", "SHORT").expect("SHORT");
    let s = short.decode(&[0x01]).expect("short buffers allowed");
    assert_eq!(s.read("A"), Ok(Some(Value::UInt(0x0100_0000))));
}

#[test]
fn test_warnings() {
    let defs = parse(
        "TELEMETRY INST A BIG_ENDIAN\n  ITEM X 0 8 UINT\n  ITEM X 8 8 UINT\n  ARRAY_ITEM BIG 16 8 UINT 800000\n",
    )
    .expect("parse");
    let kinds: Vec<_> = defs.warnings.iter().map(|w| (w.line, w.kind)).collect();
    assert_eq!(kinds, [(3, WarningKind::ItemRedefined), (4, WarningKind::LargeArray)]);

    let packet = defs.get_telemetry("INST", "A").expect("A");
    assert_eq!(packet.structure.get_item("X").expect("X").bit_offset, 8);
    assert_eq!(packet.item_lines.get("X"), Some(&3));
}

#[test]
fn test_keyword_errors_report_line() {
    assert_eq!(
        line_message("COMMAND INST C BIG_ENDIAN\n  APPEND_ITEM A 8 UINT\n"),
        "line 2: APPEND_ITEM is only valid in a TELEMETRY packet"
    );
    assert_eq!(
        line_message("TELEMETRY INST T BIG_ENDIAN\n  APPEND_PARAMETER A 8 UINT 0 1 0\n"),
        "line 2: APPEND_PARAMETER is only valid in a COMMAND"
    );
    assert_eq!(
        line_message("TELEMETRY INST T BIG_ENDIAN\n  BOGUS 1\n"),
        "line 2: unknown keyword 'BOGUS'"
    );
    assert_eq!(
        line_message("TELEMETRY INST T BIG_ENDIAN\n  OVERFLOW TRUNCATE\n"),
        "line 2: OVERFLOW must follow an item definition"
    );
    assert_eq!(
        line_message("APPEND_ITEM A 8 UINT\n"),
        "line 1: APPEND_ITEM must follow TELEMETRY or COMMAND"
    );
    assert_eq!(
        line_message("TELEMETRY INST T MIDDLE_ENDIAN\n"),
        "line 1: unknown endianness MIDDLE_ENDIAN - must be BIG_ENDIAN or LITTLE_ENDIAN"
    );
    assert_eq!(
        line_message("TELEMETRY INST T BIG_ENDIAN\n  APPEND_ITEM A 8\n"),
        "line 2: APPEND_ITEM is missing parameter DATA_TYPE"
    );
    assert_eq!(
        line_message("TELEMETRY INST T BIG_ENDIAN\n  APPEND_ITEM A 8 UINT desc BIG_ENDIAN extra\n"),
        "line 2: APPEND_ITEM has too many parameters (unexpected 'extra')"
    );
    assert_eq!(
        line_message("TELEMETRY INST T BIG_ENDIAN\n  APPEND_ITEM A eight UINT\n"),
        "line 2: invalid BIT_SIZE 'eight'"
    );
}

#[test]
fn test_item_errors_report_line() {
    let err = parse("TELEMETRY INST T BIG_ENDIAN\n\n  ITEM F 4 32 FLOAT\n").unwrap_err();
    assert_eq!(err.line(), Some(3));
    assert!(matches!(err, DefinitionError::Item { source: StructureError::Item(_), .. }));

    let err = parse("TELEMETRY INST T BIG_ENDIAN\n  APPEND_ITEM DATA 0 BLOCK\n  APPEND_ITEM X 8 UINT\n").unwrap_err();
    assert_eq!(err.line(), Some(3));
    assert!(matches!(
        err,
        DefinitionError::Item { source: StructureError::AppendAfterVariable, .. }
    ));

    let err = parse("TELEMETRY INST T BIG_ENDIAN\n  APPEND_ITEM S 0 STRING\n    VARIABLE_BIT_SIZE LEN 0\n").unwrap_err();
    assert_eq!(err.to_string(), "line 3: LENGTH_BITS_PER_COUNT must be positive");
}

#[test]
fn test_syntax_errors() {
    let err = parse("TELEMETRY INST T BIG_ENDIAN \"unterminated\n").unwrap_err();
    assert!(matches!(err, DefinitionError::Syntax { line: 1, .. }));

    let err = parse("TELEMETRY INST T BIG_ENDIAN\n  9ITEM A 0 8 UINT\n").unwrap_err();
    assert!(matches!(err, DefinitionError::Syntax { line: 2, .. }));
}

#[test]
fn test_lower_case_keywords_and_comments() {
    let defs = parse("telemetry inst t big_endian # trailing comment\n  append_item a 8 uint\n")
        .expect("parse");
    let packet = defs.get_telemetry("INST", "T").expect("T");
    assert_eq!(packet.structure.get_item("A").expect("A").data_type, DataType::UInt);
}

#[test]
fn test_load_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(INST.as_bytes()).expect("write defs");
    let defs = load_file(file.path()).expect("load");
    assert_eq!(defs.packets().count(), 4);

    let missing = file.path().with_extension("missing");
    let err = load_file(&missing).unwrap_err();
    assert!(matches!(err, DefinitionError::Io { .. }));
    assert_eq!(err.line(), None);
}
