//! Debug-trace environment switches.
//!
//! `WINPTYDBG` (non-empty) enables trace output; `WINPTYDBGFLAGS` is a
//! comma-separated list of extra dump switches (`input` turns on the
//! keystroke dump).

use once_cell::sync::Lazy;

static DEBUG_FLAGS: Lazy<Vec<String>> = Lazy::new(|| {
    std::env::var("WINPTYDBGFLAGS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
});

/// Whether debug tracing was requested via `WINPTYDBG`.
pub fn tracing_requested() -> bool {
    std::env::var("WINPTYDBG").map_or(false, |v| !v.is_empty())
}

/// Whether a named flag appears in `WINPTYDBGFLAGS`.
pub fn has_debug_flag(flag: &str) -> bool {
    DEBUG_FLAGS.iter().any(|f| f == flag)
}

/// Render input bytes the way the keystroke dump prints them: caret
/// notation for control bytes, then the hex byte values.
pub fn dump_input_bytes(input: &[u8]) -> String {
    let mut out = String::new();
    for &b in input {
        match b {
            0..=0x1F => {
                out.push('^');
                out.push((b + 0x40) as char);
            }
            0x7F => out.push_str("^?"),
            _ => out.push(b as char),
        }
    }
    out.push_str(" (");
    for (i, &b) in input.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", b));
    }
    out.push(')');
    out
}
