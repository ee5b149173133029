//! Keyboard-layout lookup: one UTF-16 code unit → virtual key + base
//! modifier bits, per the US layout. Stands in for the platform layout
//! query; characters with no mapping are emitted with a zero virtual key.

use winbridge_core::keys::{vk, LEFT_CTRL_PRESSED, SHIFT_PRESSED};

/// Resolve `(virtual_key, base modifier bits)` for a code unit.
pub fn vk_key_scan(unit: u16) -> Option<(u16, u32)> {
    if unit > 0x7F {
        return None;
    }
    let b = unit as u8;
    Some(match b {
        b'a'..=b'z' => (b.to_ascii_uppercase() as u16, 0),
        b'A'..=b'Z' => (b as u16, SHIFT_PRESSED),
        b'0'..=b'9' => (b as u16, 0),
        b' ' => (vk::SPACE, 0),
        b'\r' => (vk::RETURN, 0),
        b'\n' => (vk::RETURN, LEFT_CTRL_PRESSED),
        b'\t' => (vk::TAB, 0),
        0x08 => (vk::BACK, 0),
        0x1B => (vk::ESCAPE, 0),
        // Shifted digit row.
        b')' => (b'0' as u16, SHIFT_PRESSED),
        b'!' => (b'1' as u16, SHIFT_PRESSED),
        b'@' => (b'2' as u16, SHIFT_PRESSED),
        b'#' => (b'3' as u16, SHIFT_PRESSED),
        b'$' => (b'4' as u16, SHIFT_PRESSED),
        b'%' => (b'5' as u16, SHIFT_PRESSED),
        b'^' => (b'6' as u16, SHIFT_PRESSED),
        b'&' => (b'7' as u16, SHIFT_PRESSED),
        b'*' => (b'8' as u16, SHIFT_PRESSED),
        b'(' => (b'9' as u16, SHIFT_PRESSED),
        // OEM punctuation, unshifted / shifted.
        b';' => (vk::OEM_1, 0),
        b':' => (vk::OEM_1, SHIFT_PRESSED),
        b'=' => (vk::OEM_PLUS, 0),
        b'+' => (vk::OEM_PLUS, SHIFT_PRESSED),
        b',' => (vk::OEM_COMMA, 0),
        b'<' => (vk::OEM_COMMA, SHIFT_PRESSED),
        b'-' => (vk::OEM_MINUS, 0),
        b'_' => (vk::OEM_MINUS, SHIFT_PRESSED),
        b'.' => (vk::OEM_PERIOD, 0),
        b'>' => (vk::OEM_PERIOD, SHIFT_PRESSED),
        b'/' => (vk::OEM_2, 0),
        b'?' => (vk::OEM_2, SHIFT_PRESSED),
        b'`' => (vk::OEM_3, 0),
        b'~' => (vk::OEM_3, SHIFT_PRESSED),
        b'[' => (vk::OEM_4, 0),
        b'{' => (vk::OEM_4, SHIFT_PRESSED),
        b'\\' => (vk::OEM_5, 0),
        b'|' => (vk::OEM_5, SHIFT_PRESSED),
        b']' => (vk::OEM_6, 0),
        b'}' => (vk::OEM_6, SHIFT_PRESSED),
        b'\'' => (vk::OEM_7, 0),
        b'"' => (vk::OEM_7, SHIFT_PRESSED),
        // Remaining control characters arrive from Ctrl-letter chords.
        0x01..=0x1A => ((b'A' + b - 1) as u16, LEFT_CTRL_PRESSED),
        _ => return None,
    })
}
