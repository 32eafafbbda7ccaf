//! Definition parser fuzz target: feed arbitrary text to the loader and the linter.
//! Neither may panic; both report problems as values.
//! Build with: cargo fuzz run parser_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    if let Ok(defs) = binary_accessor::parse(s) {
        for packet in defs.packets() {
            let _ = packet.build_command();
        }
    }
    let _ = binary_accessor::lint::lint(s);
    let _ = binary_accessor::lint::fix(s);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parser_fuzz");
}
