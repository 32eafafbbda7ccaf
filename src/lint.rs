//! Linter for packet definition files.
//!
//! ## Rules
//!
//! - **ParseError**: the file does not load. Reported alone.
//! - **ItemOverlap**: two items of a packet share bits and neither is marked `OVERLAP`.
//! - **ItemRedefined**: an item name is defined twice in one packet.
//! - **LargeArray**: an array of 100,000 or more elements (use a BLOCK).
//! - **KeywordCase**: keywords are written in upper case.
//! - **NoTrailingWhitespace**: lines must not end in spaces or tabs.
//!
//! Run the linter via the `lint_defs` binary: `lint_defs defs/inst.txt`.
//! Exit code 1 if any error-level findings.

use crate::parser::{self, DefinitionError, PacketDefinitions, WarningKind};

/// Severity of a lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

/// Identifies which rule produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintRule {
    ParseError,
    ItemOverlap,
    ItemRedefined,
    LargeArray,
    KeywordCase,
    NoTrailingWhitespace,
}

impl LintRule {
    pub fn id(&self) -> &'static str {
        match self {
            LintRule::ParseError => "parse-error",
            LintRule::ItemOverlap => "item-overlap",
            LintRule::ItemRedefined => "item-redefined",
            LintRule::LargeArray => "large-array",
            LintRule::KeywordCase => "keyword-case",
            LintRule::NoTrailingWhitespace => "no-trailing-whitespace",
        }
    }
}

/// A single lint message with location.
#[derive(Debug, Clone)]
pub struct LintMessage {
    pub line: usize,
    pub column: usize,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

fn parse_error(e: &DefinitionError) -> LintMessage {
    let column = match e {
        DefinitionError::Syntax { column, .. } => *column,
        _ => 1,
    };
    LintMessage {
        line: e.line().unwrap_or(1),
        column,
        rule: LintRule::ParseError,
        severity: Severity::Error,
        message: e.to_string(),
    }
}

/// Load `source` and run all rules. Returns messages in line order.
pub fn lint(source: &str) -> Vec<LintMessage> {
    match parser::parse(source) {
        Ok(defs) => lint_loaded(source, &defs),
        Err(e) => vec![parse_error(&e)],
    }
}

/// Run all rules on `source` whose definitions are already loaded.
pub fn lint_loaded(source: &str, defs: &PacketDefinitions) -> Vec<LintMessage> {
    let mut out = Vec::new();

    for (i, line) in source.lines().enumerate() {
        if line != line.trim_end() {
            out.push(LintMessage {
                line: i + 1,
                column: line.trim_end().len() + 1,
                rule: LintRule::NoTrailingWhitespace,
                severity: Severity::Warning,
                message: "trailing whitespace not allowed".to_string(),
            });
        }
    }

    // Text already loaded, so this cannot fail.
    if let Ok(statements) = parser::statements(source) {
        for st in statements {
            if st.keyword != st.keyword.to_ascii_uppercase() {
                out.push(LintMessage {
                    line: st.line,
                    column: st.column,
                    rule: LintRule::KeywordCase,
                    severity: Severity::Warning,
                    message: format!(
                        "keyword '{}' should be written '{}'",
                        st.keyword,
                        st.keyword.to_ascii_uppercase()
                    ),
                });
            }
        }
    }

    for warning in &defs.warnings {
        let rule = match warning.kind {
            WarningKind::ItemRedefined => LintRule::ItemRedefined,
            WarningKind::LargeArray => LintRule::LargeArray,
        };
        out.push(LintMessage {
            line: warning.line,
            column: 1,
            rule,
            severity: Severity::Warning,
            message: warning.message.clone(),
        });
    }

    for packet in defs.packets() {
        let items = packet.structure.items();
        for (i, a) in items.iter().enumerate() {
            let (a_start, a_end) = match a.bit_range() {
                Some(r) => r,
                None => continue,
            };
            for b in &items[i + 1..] {
                if a.overlap || b.overlap {
                    continue;
                }
                let (b_start, b_end) = match b.bit_range() {
                    Some(r) => r,
                    None => continue,
                };
                if a_start < b_end && b_start < a_end {
                    let line = packet.item_lines.get(&b.name).copied().unwrap_or(1);
                    out.push(LintMessage {
                        line,
                        column: 1,
                        rule: LintRule::ItemOverlap,
                        severity: Severity::Warning,
                        message: format!(
                            "{} {}: item {} (bits {}..{}) overlaps {} (bits {}..{})",
                            packet.target, packet.name, b.name, b_start, b_end, a.name, a_start, a_end
                        ),
                    });
                }
            }
        }
    }

    out.sort_by_key(|m| (m.line, m.column));
    out
}

/// Rewrite `source` to satisfy the text rules: upper-case keywords, no trailing whitespace.
///
/// Sources that do not parse only get their trailing whitespace removed.
pub fn fix(source: &str) -> String {
    let keywords: Vec<(usize, usize, usize)> = parser::statements(source)
        .map(|st| {
            st.iter()
                .map(|s| (s.line, s.column, s.keyword.len()))
                .collect()
        })
        .unwrap_or_default();
    let mut out_lines: Vec<String> = Vec::new();
    for (i, line) in source.lines().enumerate() {
        let mut text = line.trim_end().to_string();
        for &(_, column, len) in keywords.iter().filter(|k| k.0 == i + 1) {
            // pest columns count chars
            let start = text.char_indices().nth(column - 1).map(|(b, _)| b);
            if let Some(start) = start {
                if let Some(kw) = text.get(start..start + len) {
                    let upper = kw.to_ascii_uppercase();
                    text.replace_range(start..start + len, &upper);
                }
            }
        }
        out_lines.push(text);
    }
    let mut fixed = out_lines.join("\n");
    if source.ends_with('\n') {
        fixed.push('\n');
    }
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_uppercases_keywords() {
        let fixed = fix("telemetry INST HS big_endian  \n  append_item a 8 UINT\n");
        assert_eq!(fixed, "TELEMETRY INST HS big_endian\n  APPEND_ITEM a 8 UINT\n");
    }

    #[test]
    fn lint_trailing_whitespace() {
        let msgs = lint("TELEMETRY INST HS BIG_ENDIAN \n  APPEND_ITEM A 8 UINT\n");
        let hits: Vec<_> = msgs.iter().filter(|m| m.rule == LintRule::NoTrailingWhitespace).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].column, 29);
    }

    #[test]
    fn lint_clean_passes() {
        let msgs = lint("TELEMETRY INST HS BIG_ENDIAN\n  APPEND_ITEM A 8 UINT\n  APPEND_ITEM B 8 UINT\n");
        assert!(msgs.is_empty(), "clean definition should have no findings: {:?}", msgs);
    }
}
