//! Format values for display (structure dumps, CLI output).

use crate::value::Value;

const BYTES_PER_LINE: usize = 16;

/// Hex dump of `bytes`: one line per 16 bytes, offset, hex words and printable ASCII.
///
/// ```text
///   00000000: 48 65 6C 6C 6F 00 01                             Hello..
/// ```
pub fn hex_dump(bytes: &[u8], indent: usize) -> String {
    let pad = " ".repeat(indent);
    let mut out = String::new();
    for (line, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        let hex = chunk
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ");
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        out.push_str(&format!(
            "{}{:08X}: {:<width$}  {}\n",
            pad,
            line * BYTES_PER_LINE,
            hex,
            ascii,
            width = BYTES_PER_LINE * 3 - 1
        ));
    }
    out
}

/// Format one item line: `NAME: value`, or `NAME:` followed by a hex dump for blocks.
pub fn item_line(name: &str, value: Option<&Value>, indent: usize) -> String {
    let pad = " ".repeat(indent);
    match value {
        None => format!("{}{}: <derived>\n", pad, name),
        Some(Value::Block(b)) => {
            let mut s = format!("{}{}:\n", pad, name);
            s.push_str(&hex_dump(b, indent + 2));
            s
        }
        Some(v) => format!("{}{}: {}\n", pad, name, v),
    }
}
