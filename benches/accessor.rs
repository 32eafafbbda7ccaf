//! Benchmark: scalar reads (native widths vs. unaligned bitfields), writes under
//! each overflow policy, array reads, and a full decode of a parsed packet
//! definition (identify + read_all) over a synthetic stream of packets.

use binary_accessor::{parse, BinaryAccessor, DataType, Endianness, OverflowPolicy, Value};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const DEFS: &str = r#"
TELEMETRY INST HEALTH_STATUS BIG_ENDIAN
  APPEND_ID_ITEM APID 16 UINT 1
  APPEND_ITEM TEMP1 16 INT
  APPEND_ITEM TEMP2 13 UINT
  APPEND_ITEM FLAGS 3 UINT
  APPEND_ITEM VOLTS 32 FLOAT
  APPEND_ITEM NAME 64 STRING
  APPEND_ARRAY_ITEM SAMPLES 16 UINT 256
TELEMETRY INST EVENT BIG_ENDIAN
  APPEND_ID_ITEM APID 16 UINT 2
  APPEND_ITEM LEN 8 UINT
  APPEND_ITEM TEXT 0 STRING
    VARIABLE_BIT_SIZE LEN
"#;

fn buffer(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 37 + 11) as u8).collect()
}

fn packet_stream() -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for i in 0..1_000u16 {
        if i % 4 == 3 {
            let text = format!("event {}", i);
            let mut p = vec![0x00, 0x02, text.len() as u8];
            p.extend_from_slice(text.as_bytes());
            out.push(p);
        } else {
            let mut p = buffer(50);
            p[0] = 0x00;
            p[1] = 0x01;
            p[10..18].copy_from_slice(b"PROBE\0\0\0");
            out.push(p);
        }
    }
    out
}

fn bench_scalar(c: &mut Criterion) {
    let data = buffer(64);

    c.bench_function("read_uint32_be", |b| {
        b.iter(|| BinaryAccessor::read(black_box(32), 32, DataType::UInt, black_box(&data), Endianness::Big))
    });
    c.bench_function("read_bitfield_13_be", |b| {
        b.iter(|| BinaryAccessor::read(black_box(30), 13, DataType::UInt, black_box(&data), Endianness::Big))
    });
    c.bench_function("read_bitfield_37_le", |b| {
        b.iter(|| BinaryAccessor::read(black_box(40), 37, DataType::Int, black_box(&data), Endianness::Little))
    });
    c.bench_function("read_string_64", |b| {
        b.iter(|| BinaryAccessor::read(black_box(0), 64, DataType::String, black_box(b"HELLO\0\0\0"), Endianness::Big))
    });

    let mut out = vec![0u8; 64];
    let value = Value::Int(300);
    for overflow in [
        OverflowPolicy::Truncate,
        OverflowPolicy::Saturate,
        OverflowPolicy::ErrorAllowHex,
    ] {
        c.bench_function(&format!("write_int9_{}", overflow.as_str().to_ascii_lowercase()), |b| {
            b.iter(|| {
                BinaryAccessor::write(
                    black_box(&value),
                    3,
                    9,
                    DataType::Int,
                    &mut out,
                    Endianness::Big,
                    overflow,
                )
            })
        });
    }
}

fn bench_array(c: &mut Criterion) {
    let data = buffer(4096);
    c.bench_function("read_array_uint16_2048", |b| {
        b.iter(|| BinaryAccessor::read_array(0, 16, DataType::UInt, 0, black_box(&data), Endianness::Little))
    });
    c.bench_function("read_array_uint4_256", |b| {
        b.iter(|| BinaryAccessor::read_array(0, 4, DataType::UInt, 1024, black_box(&data), Endianness::Big))
    });
}

fn decode_stream(defs: &binary_accessor::PacketDefinitions, stream: &[Vec<u8>]) -> usize {
    let mut items = 0usize;
    for packet in stream {
        let Some(def) = defs.identify_telemetry("INST", packet) else {
            continue;
        };
        let Ok(structure) = def.decode(packet) else {
            continue;
        };
        if let Ok(values) = structure.read_all() {
            items += values.len();
        }
    }
    items
}

fn bench_decode(c: &mut Criterion) {
    let defs = parse(DEFS).expect("parse definitions");
    let stream = packet_stream();
    let total_bytes: usize = stream.iter().map(Vec::len).sum();
    let total_items = decode_stream(&defs, &stream);
    eprintln!(
        "decode: {} packets, {} items, {} bytes (one warm-up pass)",
        stream.len(),
        total_items,
        total_bytes
    );

    c.bench_function("decode_1000_packets", |b| {
        b.iter(|| black_box(decode_stream(&defs, black_box(&stream))))
    });

    const ITERS: u32 = 200;
    let start = std::time::Instant::now();
    for _ in 0..ITERS {
        decode_stream(&defs, &stream);
    }
    let ns = start.elapsed().as_nanos() / (ITERS as u128);
    let packets_per_sec = stream.len() as f64 / (ns as f64 / 1e9);
    let mb_per_sec = total_bytes as f64 / (ns as f64 / 1e9) / 1e6;
    eprintln!();
    eprintln!("--- Sustained decode rate ({} packets, {} bytes) ---", stream.len(), total_bytes);
    eprintln!(
        "  identify+read_all | {:>8.2} us/stream | ~{:.2} M packets/s | {:>6.2} MB/s",
        ns as f64 / 1000.0,
        packets_per_sec / 1e6,
        mb_per_sec
    );
    eprintln!("---");
}

criterion_group!(benches, bench_scalar, bench_array, bench_decode);
criterion_main!(benches);
