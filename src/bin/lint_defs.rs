//! Lint packet definition files.
//!
//! Usage:
//!   lint_defs [OPTIONS] [FILE ...]
//!   lint_defs < defs.txt
//!
//! Options:
//!   --fix, -f    Rewrite files with upper-case keywords and no trailing whitespace
//!                before linting. With stdin: print the fixed source to stdout.
//!   --human, -H  Human-readable output
//!
//! Exit code 1 if any file has an error-level finding.

use binary_accessor::lint::{fix, lint, LintMessage, Severity};
use std::io::{self, Read, Write};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Clone, Copy)]
enum OutputStyle {
    Compact,
    Human,
}

fn print_message(path: &str, m: &LintMessage, style: OutputStyle) {
    match style {
        OutputStyle::Compact => {
            println!(
                "{}:{}:{}: {}: {} [{}]",
                path,
                m.line,
                m.column,
                m.severity.as_str(),
                m.message,
                m.rule.id()
            );
        }
        OutputStyle::Human => {
            println!("  {} {}:{}: {}", path, m.line, m.column, m.message);
            println!("    rule: {} ({})", m.rule.id(), m.severity.as_str());
        }
    }
}

#[derive(Default)]
struct Totals {
    errors: usize,
    warnings: usize,
}

impl Totals {
    /// Print and count; true when any message is an error.
    fn report(&mut self, path: &str, messages: &[LintMessage], style: OutputStyle) -> bool {
        for m in messages {
            match m.severity {
                Severity::Error => self.errors += 1,
                Severity::Warning => self.warnings += 1,
            }
            print_message(path, m, style);
        }
        messages.iter().any(|m| m.severity == Severity::Error)
    }
}

fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let fix_sources = if let Some(pos) = args.iter().position(|a| a == "--fix" || a == "-f") {
        args.remove(pos);
        true
    } else {
        false
    };
    let style = if let Some(pos) = args.iter().position(|a| a == "--human" || a == "-H") {
        args.remove(pos);
        OutputStyle::Human
    } else {
        OutputStyle::Compact
    };

    let mut has_error = false;
    let mut totals = Totals::default();

    if args.is_empty() {
        let mut src = String::new();
        io::stdin().read_to_string(&mut src)?;
        if fix_sources {
            io::stdout().write_all(fix(&src).as_bytes())?;
            return Ok(());
        }
        has_error |= totals.report("<stdin>", &lint(&src), style);
    } else {
        for path in &args {
            let path = Path::new(path);
            let mut src = match std::fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("{}: {}", path.display(), e);
                    has_error = true;
                    continue;
                }
            };
            if fix_sources {
                let fixed = fix(&src);
                if fixed != src {
                    if let Err(e) = std::fs::write(path, &fixed) {
                        eprintln!("{}: write failed: {}", path.display(), e);
                        has_error = true;
                        continue;
                    }
                    eprintln!("{}: fixed", path.display());
                    src = fixed;
                }
            }
            let messages = lint(&src);
            has_error |= totals.report(&path.display().to_string(), &messages, style);
        }
    }

    if totals.errors > 0 || totals.warnings > 0 {
        eprintln!("lint: {} error(s), {} warning(s)", totals.errors, totals.warnings);
    }
    if has_error {
        std::process::exit(1);
    }
    Ok(())
}
