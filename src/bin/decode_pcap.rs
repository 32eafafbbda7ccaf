use binary_accessor::capture;
use binary_accessor::dump::hex_dump;
use binary_accessor::{load_file, PacketDefinition, PacketDefinitions};
use pcap_parser::pcapng::Block as PcapNgBlock;
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Linktype, PcapBlockOwned, PcapError};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "usage: decode_pcap <capture.pcap|capture.pcapng|payload.bin> <definitions.txt> \
[--packet=TARGET:PACKET | --target=TARGET] [--raw] [--verbose] [--dump[=path]] [--frame=N]";

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Which packet definition(s) a payload is decoded with.
enum Selection<'a> {
    Fixed(&'a PacketDefinition),
    Identify(String),
}

#[derive(Default)]
struct Counts {
    decoded: u64,
    failed: u64,
}

struct Decoder<'a> {
    defs: &'a PacketDefinitions,
    selection: Selection<'a>,
    verbose: bool,
    dump: Option<Box<dyn Write>>,
    frame_filter: Option<u64>,
    packets: u64,
    payloads: u64,
    unidentified: u64,
    per_packet: BTreeMap<String, Counts>,
    first_errors: BTreeMap<String, String>,
}

impl<'a> Decoder<'a> {
    fn dump_enabled(&self, index: u64) -> bool {
        self.dump.is_some() && self.frame_filter.map(|f| f == index).unwrap_or(true)
    }

    fn payload(&mut self, index: u64, payload: &[u8]) {
        self.payloads += 1;
        let packet = match &self.selection {
            Selection::Fixed(p) => Some(*p),
            Selection::Identify(target) => self.defs.identify_telemetry(target, payload),
        };
        let packet = match packet {
            Some(p) => p,
            None => {
                self.unidentified += 1;
                if self.verbose {
                    let show = payload.len().min(16);
                    eprintln!(
                        "note: payload {} matched no packet (first {} bytes: {:02x?})",
                        index,
                        show,
                        &payload[..show]
                    );
                }
                if self.dump_enabled(index) {
                    if let Some(w) = self.dump.as_mut() {
                        let _ = writeln!(w, "=== payload {}  len {}  (unidentified) ===", index, payload.len());
                        let _ = write!(w, "{}", hex_dump(payload, 2));
                    }
                }
                return;
            }
        };
        let key = format!("{} {}", packet.target, packet.name);
        let dump_this = self.dump_enabled(index);
        let counts = self.per_packet.entry(key.clone()).or_default();

        let result = packet
            .decode(payload)
            .and_then(|s| s.formatted(4, &[]));
        match result {
            Ok(text) => {
                counts.decoded += 1;
                if dump_this {
                    if let Some(w) = self.dump.as_mut() {
                        let _ = writeln!(w, "=== payload {}  len {}  {} ===", index, payload.len(), key);
                        let _ = write!(w, "{}", hex_dump(payload, 2));
                        let _ = write!(w, "{}", text);
                    }
                }
            }
            Err(e) => {
                counts.failed += 1;
                self.first_errors.entry(key.clone()).or_insert_with(|| e.to_string());
                if dump_this {
                    if let Some(w) = self.dump.as_mut() {
                        let _ = writeln!(w, "=== payload {}  len {}  {} ===", index, payload.len(), key);
                        let _ = write!(w, "{}", hex_dump(payload, 2));
                        let _ = writeln!(w, "  decode error: {}", e);
                    }
                }
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let mut raw_args: Vec<String> = std::env::args().skip(1).collect();
    let mut take_flag = |names: &[&str]| -> bool {
        match raw_args.iter().position(|a| names.contains(&a.as_str())) {
            Some(pos) => {
                raw_args.remove(pos);
                true
            }
            None => false,
        }
    };
    let verbose = take_flag(&["--verbose", "-v"]);
    let raw = take_flag(&["--raw"]);
    let dump_path: Option<PathBuf> = raw_args
        .iter()
        .position(|a| a.starts_with("--dump"))
        .and_then(|pos| {
            let arg = raw_args.remove(pos);
            if arg == "--dump" {
                Some(PathBuf::from("-"))
            } else {
                arg.strip_prefix("--dump=").map(PathBuf::from)
            }
        });
    let frame_filter: Option<u64> = raw_args
        .iter()
        .position(|a| a.starts_with("--frame="))
        .and_then(|pos| {
            let arg = raw_args.remove(pos);
            arg.strip_prefix("--frame=").and_then(|s| s.parse().ok())
        });
    let packet_arg: Option<String> = raw_args
        .iter()
        .position(|a| a.starts_with("--packet="))
        .map(|pos| raw_args.remove(pos))
        .and_then(|a| a.strip_prefix("--packet=").map(str::to_string));
    let target_arg: Option<String> = raw_args
        .iter()
        .position(|a| a.starts_with("--target="))
        .map(|pos| raw_args.remove(pos))
        .and_then(|a| a.strip_prefix("--target=").map(str::to_string));
    let mut args = raw_args.into_iter();
    let capture_path: PathBuf = args.next().map(PathBuf::from).ok_or_else(|| anyhow::anyhow!(USAGE))?;
    let defs_path: PathBuf = args.next().map(PathBuf::from).ok_or_else(|| anyhow::anyhow!(USAGE))?;

    let defs = load_file(&defs_path)?;
    for w in &defs.warnings {
        eprintln!("{}:{}: warning: {}", defs_path.display(), w.line, w.message);
    }

    let selection = match (packet_arg, target_arg) {
        (Some(selector), _) => {
            let (target, packet) = selector
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("--packet expects TARGET:PACKET, got '{}'", selector))?;
            let def = defs
                .get_telemetry(target, packet)
                .ok_or_else(|| anyhow::anyhow!("no telemetry packet {} {} in {}", target, packet, defs_path.display()))?;
            Selection::Fixed(def)
        }
        (None, Some(target)) => Selection::Identify(target),
        (None, None) => {
            let mut targets: Vec<&str> = defs.telemetry.keys().map(|(t, _)| t.as_str()).collect();
            targets.dedup();
            match targets.as_slice() {
                [only] => Selection::Identify(only.to_string()),
                [] => anyhow::bail!("{} defines no telemetry packets", defs_path.display()),
                _ => anyhow::bail!("several targets defined; pick one with --target=TARGET or --packet=TARGET:PACKET"),
            }
        }
    };

    let dump: Option<Box<dyn Write>> = match &dump_path {
        Some(p) if p.as_os_str() == "-" => Some(Box::new(std::io::stdout())),
        Some(p) => Some(Box::new(File::create(p)?)),
        None => None,
    };

    let mut decoder = Decoder {
        defs: &defs,
        selection,
        verbose,
        dump,
        frame_filter,
        packets: 0,
        payloads: 0,
        unidentified: 0,
        per_packet: BTreeMap::new(),
        first_errors: BTreeMap::new(),
    };

    if raw {
        let bytes = std::fs::read(&capture_path)?;
        decoder.packets = 1;
        decoder.payload(1, &bytes);
    } else {
        // Probe file type (pcap vs pcapng) using the magic at start of file.
        let mut probe = [0u8; 4];
        {
            let mut f = File::open(&capture_path)?;
            f.read_exact(&mut probe)?;
        }
        let file = File::open(&capture_path)?;
        if probe == [0x0a, 0x0d, 0x0d, 0x0a] {
            run_pcapng(file, &mut decoder)?;
        } else {
            run_legacy_pcap(file, &mut decoder)?;
        }
    }
    if let Some(w) = decoder.dump.as_mut() {
        w.flush()?;
    }

    eprintln!("capture: {}", capture_path.display());
    eprintln!("definitions: {}", defs_path.display());
    eprintln!("packets: {}", decoder.packets);
    eprintln!("payloads: {}", decoder.payloads);
    eprintln!("unidentified: {}", decoder.unidentified);
    if !decoder.per_packet.is_empty() {
        eprintln!("packet summary:");
        for (name, counts) in &decoder.per_packet {
            eprintln!("  {}: decoded={}, failed={}", name, counts.decoded, counts.failed);
            if let Some(err) = decoder.first_errors.get(name) {
                eprintln!("    first error: {}", err);
            }
        }
    }
    Ok(())
}

fn run_legacy_pcap<R: Read>(file: R, decoder: &mut Decoder) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcap::LegacyPcapReader::new(1 << 20, file)?;
    let mut linktype: Option<Linktype> = None;
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(h) => linktype = Some(h.network),
                    PcapBlockOwned::Legacy(b) => {
                        decoder.packets += 1;
                        let lt = linktype.unwrap_or(Linktype(1));
                        if let Some(udp_payload) = capture::udp_payload(lt.0, b.data) {
                            let index = decoder.packets;
                            decoder.payload(index, udp_payload);
                        }
                    }
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| anyhow::anyhow!("pcap refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcap read error: {:?}", e)),
        }
    }
    Ok(())
}

fn run_pcapng<R: Read>(file: R, decoder: &mut Decoder) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcapng::PcapNGReader::new(1 << 20, file)?;
    let mut if_linktypes: Vec<Linktype> = Vec::new();
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                if let PcapBlockOwned::NG(b) = block {
                    let frame = match &b {
                        PcapNgBlock::InterfaceDescription(idb) => {
                            if_linktypes.push(idb.linktype);
                            None
                        }
                        PcapNgBlock::EnhancedPacket(epb) => {
                            let lt = if_linktypes.get(epb.if_id as usize).copied().unwrap_or(Linktype(1));
                            Some((lt, epb.packet_data()))
                        }
                        PcapNgBlock::SimplePacket(spb) => {
                            let lt = if_linktypes.first().copied().unwrap_or(Linktype(1));
                            Some((lt, spb.packet_data()))
                        }
                        _ => None,
                    };
                    if let Some((lt, frame)) = frame {
                        decoder.packets += 1;
                        if let Some(udp_payload) = capture::udp_payload(lt.0, frame) {
                            let index = decoder.packets;
                            decoder.payload(index, udp_payload);
                        }
                    }
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| anyhow::anyhow!("pcapng refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcapng read error: {:?}", e)),
        }
    }
    Ok(())
}
