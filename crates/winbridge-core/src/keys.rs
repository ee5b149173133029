//! Virtual-key codes, modifier masks, and synthetic key-event records.
//!
//! These mirror the console subsystem's key-event vocabulary: a key event
//! names a virtual key, carries at most one UTF-16 code unit of text, and a
//! modifier bitmask. Characters outside the BMP therefore arrive as two
//! events, one per surrogate unit.

use std::fmt;

/// Virtual-key codes (the subset the bridge synthesizes).
pub mod vk {
    pub const BACK: u16 = 0x08;
    pub const TAB: u16 = 0x09;
    pub const RETURN: u16 = 0x0D;
    pub const SHIFT: u16 = 0x10;
    pub const CONTROL: u16 = 0x11;
    pub const MENU: u16 = 0x12; // Alt
    pub const PAUSE: u16 = 0x13;
    pub const ESCAPE: u16 = 0x1B;
    pub const SPACE: u16 = 0x20;
    pub const PRIOR: u16 = 0x21; // PageUp
    pub const NEXT: u16 = 0x22; // PageDown
    pub const END: u16 = 0x23;
    pub const HOME: u16 = 0x24;
    pub const LEFT: u16 = 0x25;
    pub const UP: u16 = 0x26;
    pub const RIGHT: u16 = 0x27;
    pub const DOWN: u16 = 0x28;
    pub const INSERT: u16 = 0x2D;
    pub const DELETE: u16 = 0x2E;
    pub const F1: u16 = 0x70;
    pub const F2: u16 = 0x71;
    pub const F3: u16 = 0x72;
    pub const F4: u16 = 0x73;
    pub const F5: u16 = 0x74;
    pub const F6: u16 = 0x75;
    pub const F7: u16 = 0x76;
    pub const F8: u16 = 0x77;
    pub const F9: u16 = 0x78;
    pub const F10: u16 = 0x79;
    pub const F11: u16 = 0x7A;
    pub const F12: u16 = 0x7B;
    pub const OEM_1: u16 = 0xBA; // ;:
    pub const OEM_PLUS: u16 = 0xBB; // =+
    pub const OEM_COMMA: u16 = 0xBC; // ,<
    pub const OEM_MINUS: u16 = 0xBD; // -_
    pub const OEM_PERIOD: u16 = 0xBE; // .>
    pub const OEM_2: u16 = 0xBF; // /?
    pub const OEM_3: u16 = 0xC0; // `~
    pub const OEM_4: u16 = 0xDB; // [{
    pub const OEM_5: u16 = 0xDC; // \|
    pub const OEM_6: u16 = 0xDD; // ]}
    pub const OEM_7: u16 = 0xDE; // '"
}

// Modifier / control-key-state bits.
pub const RIGHT_ALT_PRESSED: u32 = 0x0001;
pub const LEFT_ALT_PRESSED: u32 = 0x0002;
pub const RIGHT_CTRL_PRESSED: u32 = 0x0004;
pub const LEFT_CTRL_PRESSED: u32 = 0x0008;
pub const SHIFT_PRESSED: u32 = 0x0010;
pub const ENHANCED_KEY: u32 = 0x0100;

/// Name for a virtual key where one exists, for the keystroke dump.
pub fn vk_name(virtual_key: u16) -> Option<&'static str> {
    Some(match virtual_key {
        vk::BACK => "BACK",
        vk::TAB => "TAB",
        vk::RETURN => "RETURN",
        vk::SHIFT => "SHIFT",
        vk::CONTROL => "CONTROL",
        vk::MENU => "MENU",
        vk::PAUSE => "PAUSE",
        vk::ESCAPE => "ESCAPE",
        vk::SPACE => "SPACE",
        vk::PRIOR => "PRIOR",
        vk::NEXT => "NEXT",
        vk::END => "END",
        vk::HOME => "HOME",
        vk::LEFT => "LEFT",
        vk::UP => "UP",
        vk::RIGHT => "RIGHT",
        vk::DOWN => "DOWN",
        vk::INSERT => "INSERT",
        vk::DELETE => "DELETE",
        vk::F1 => "F1",
        vk::F2 => "F2",
        vk::F3 => "F3",
        vk::F4 => "F4",
        vk::F5 => "F5",
        vk::F6 => "F6",
        vk::F7 => "F7",
        vk::F8 => "F8",
        vk::F9 => "F9",
        vk::F10 => "F10",
        vk::F11 => "F11",
        vk::F12 => "F12",
        vk::OEM_1 => "OEM_1",
        vk::OEM_PLUS => "OEM_PLUS",
        vk::OEM_COMMA => "OEM_COMMA",
        vk::OEM_MINUS => "OEM_MINUS",
        vk::OEM_PERIOD => "OEM_PERIOD",
        vk::OEM_2 => "OEM_2",
        vk::OEM_3 => "OEM_3",
        vk::OEM_4 => "OEM_4",
        vk::OEM_5 => "OEM_5",
        vk::OEM_6 => "OEM_6",
        vk::OEM_7 => "OEM_7",
        _ => return None,
    })
}

/// A logical key: what the input map yields for a matched sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub virtual_key: u16,
    pub unicode_char: u16,
    pub key_state: u32,
}

impl Key {
    pub const fn new(virtual_key: u16, unicode_char: u16, key_state: u32) -> Self {
        Self {
            virtual_key,
            unicode_char,
            key_state,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key_state & SHIFT_PRESSED != 0 {
            write!(f, "Shift-")?;
        }
        if self.key_state & (LEFT_CTRL_PRESSED | RIGHT_CTRL_PRESSED) != 0 {
            write!(f, "Ctrl-")?;
        }
        if self.key_state & (LEFT_ALT_PRESSED | RIGHT_ALT_PRESSED) != 0 {
            write!(f, "Alt-")?;
        }
        let is_literal = (self.virtual_key >= b'A' as u16 && self.virtual_key <= b'Z' as u16)
            || (self.virtual_key >= b'0' as u16 && self.virtual_key <= b'9' as u16);
        if let Some(name) = vk_name(self.virtual_key) {
            write!(f, "{}", name)?;
        } else if is_literal {
            write!(f, "{}", self.virtual_key as u8 as char)?;
        } else {
            write!(f, "{:#x}", self.virtual_key)?;
        }
        if (32..=126).contains(&self.unicode_char) {
            write!(f, " ch='{}'", self.unicode_char as u8 as char)
        } else {
            write!(f, " ch={:#x}", self.unicode_char)
        }
    }
}

/// One synthetic key event as queued into the console input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRecord {
    pub key_down: bool,
    pub repeat_count: u16,
    pub virtual_key: u16,
    pub unicode_char: u16,
    pub control_key_state: u32,
}

impl InputRecord {
    pub fn key(key_down: bool, virtual_key: u16, unicode_char: u16, state: u32) -> Self {
        Self {
            key_down,
            repeat_count: 1,
            virtual_key,
            unicode_char,
            control_key_state: state,
        }
    }
}
