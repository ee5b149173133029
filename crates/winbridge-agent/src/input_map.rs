//! Escape-sequence trie: byte sequences → logical keys.
//!
//! Lookup finds the longest prefix of the input that names a key, and
//! reports whether a longer sequence is still possible so the caller can
//! wait for more bytes.

use std::collections::HashMap;

use winbridge_core::keys::{vk, Key, LEFT_ALT_PRESSED, LEFT_CTRL_PRESSED, SHIFT_PRESSED};

#[derive(Debug, Default)]
pub struct InputMap {
    key: Option<Key>,
    children: HashMap<u8, InputMap>,
}

/// Result of matching the head of an input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    /// Longest key matched, with the byte length it consumed.
    pub key: Option<Key>,
    pub match_len: usize,
    /// The entire input is a live prefix of some longer sequence.
    pub incomplete: bool,
}

impl InputMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, sequence: &[u8], key: Key) {
        match sequence.split_first() {
            None => self.key = Some(key),
            Some((&b, rest)) => self.children.entry(b).or_default().set(rest, key),
        }
    }

    pub fn lookup(&self, input: &[u8]) -> Lookup {
        let mut node = self;
        let mut best: Option<Key> = None;
        let mut best_len = 0;
        for (i, &b) in input.iter().enumerate() {
            node = match node.children.get(&b) {
                Some(child) => child,
                None => {
                    return Lookup {
                        key: best,
                        match_len: best_len,
                        incomplete: false,
                    }
                }
            };
            if let Some(key) = node.key {
                best = Some(key);
                best_len = i + 1;
            }
        }
        Lookup {
            key: best,
            match_len: best_len,
            incomplete: !node.children.is_empty(),
        }
    }
}

// xterm encodes modifiers as `1 + (shift·1 + alt·2 + ctrl·4)`.
fn modifier_state(code: u8) -> u32 {
    let bits = code.saturating_sub(1);
    let mut state = 0;
    if bits & 1 != 0 {
        state |= SHIFT_PRESSED;
    }
    if bits & 2 != 0 {
        state |= LEFT_ALT_PRESSED;
    }
    if bits & 4 != 0 {
        state |= LEFT_CTRL_PRESSED;
    }
    state
}

/// The standard terminal sequences.
pub fn default_input_map() -> InputMap {
    let mut map = InputMap::new();

    map.set(b"\x1b", Key::new(vk::ESCAPE, 0x1B, 0));
    map.set(b"\x7f", Key::new(vk::BACK, 0x08, 0));
    map.set(b"\r", Key::new(vk::RETURN, b'\r' as u16, 0));
    map.set(b"\t", Key::new(vk::TAB, b'\t' as u16, 0));
    map.set(b"\x1b[Z", Key::new(vk::TAB, b'\t' as u16, SHIFT_PRESSED));

    // Cursor and Home/End keys, in both CSI and SS3 forms, plus the xterm
    // modifier grid `CSI 1 ; m <letter>`.
    let letters: &[(u8, u16)] = &[
        (b'A', vk::UP),
        (b'B', vk::DOWN),
        (b'C', vk::RIGHT),
        (b'D', vk::LEFT),
        (b'H', vk::HOME),
        (b'F', vk::END),
    ];
    for &(letter, key) in letters {
        map.set(&[0x1B, b'[', letter], Key::new(key, 0, 0));
        map.set(&[0x1B, b'O', letter], Key::new(key, 0, 0));
        for m in 2..=8u8 {
            map.set(
                &[0x1B, b'[', b'1', b';', b'0' + m, letter],
                Key::new(key, 0, modifier_state(m)),
            );
        }
    }

    // Editing keys and F5-F12: `CSI code ~` with the same modifier grid.
    let tildes: &[(&[u8], u16)] = &[
        (b"1", vk::HOME),
        (b"2", vk::INSERT),
        (b"3", vk::DELETE),
        (b"4", vk::END),
        (b"5", vk::PRIOR),
        (b"6", vk::NEXT),
        (b"7", vk::HOME),
        (b"8", vk::END),
        (b"11", vk::F1),
        (b"12", vk::F2),
        (b"13", vk::F3),
        (b"14", vk::F4),
        (b"15", vk::F5),
        (b"17", vk::F6),
        (b"18", vk::F7),
        (b"19", vk::F8),
        (b"20", vk::F9),
        (b"21", vk::F10),
        (b"23", vk::F11),
        (b"24", vk::F12),
    ];
    for &(code, key) in tildes {
        let mut seq = vec![0x1B, b'['];
        seq.extend_from_slice(code);
        seq.push(b'~');
        map.set(&seq, Key::new(key, 0, 0));
        for m in 2..=8u8 {
            let mut seq = vec![0x1B, b'['];
            seq.extend_from_slice(code);
            seq.extend_from_slice(&[b';', b'0' + m, b'~']);
            map.set(&seq, Key::new(key, 0, modifier_state(m)));
        }
    }

    // F1-F4 in SS3 form, with modified variants in CSI form.
    let fkeys: &[(u8, u16)] = &[
        (b'P', vk::F1),
        (b'Q', vk::F2),
        (b'R', vk::F3),
        (b'S', vk::F4),
    ];
    for &(letter, key) in fkeys {
        map.set(&[0x1B, b'O', letter], Key::new(key, 0, 0));
        for m in 2..=8u8 {
            map.set(
                &[0x1B, b'[', b'1', b';', b'0' + m, letter],
                Key::new(key, 0, modifier_state(m)),
            );
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup() {
        let mut map = InputMap::new();
        let key = Key::new(vk::UP, 0, 0);
        map.set(b"\x1b[A", key);
        let hit = map.lookup(b"\x1b[A");
        assert_eq!(hit.key, Some(key));
        assert_eq!(hit.match_len, 3);
        assert!(!hit.incomplete);
    }

    #[test]
    fn strict_prefix_is_incomplete() {
        let map = default_input_map();
        let hit = map.lookup(b"\x1b[");
        assert!(hit.incomplete);
        assert_eq!(hit.key, None);
    }

    #[test]
    fn lone_escape_matches_but_stays_live() {
        let map = default_input_map();
        let hit = map.lookup(b"\x1b");
        assert_eq!(hit.key.unwrap().virtual_key, vk::ESCAPE);
        assert_eq!(hit.match_len, 1);
        assert!(hit.incomplete, "ESC can still grow into a sequence");
    }

    #[test]
    fn longest_match_wins() {
        let map = default_input_map();
        // ESC followed by junk: the ESC entry itself is the best match.
        let hit = map.lookup(b"\x1b[A");
        assert_eq!(hit.key.unwrap().virtual_key, vk::UP);
        assert_eq!(hit.match_len, 3);
    }

    #[test]
    fn unknown_byte_after_prefix_returns_best() {
        let map = default_input_map();
        let hit = map.lookup(b"\x1bq");
        assert_eq!(hit.key.unwrap().virtual_key, vk::ESCAPE);
        assert_eq!(hit.match_len, 1);
        assert!(!hit.incomplete);
    }

    #[test]
    fn modified_arrow_carries_state() {
        let map = default_input_map();
        let hit = map.lookup(b"\x1b[1;5C");
        let key = hit.key.unwrap();
        assert_eq!(key.virtual_key, vk::RIGHT);
        assert_eq!(key.key_state, LEFT_CTRL_PRESSED);
        let hit = map.lookup(b"\x1b[1;2A");
        assert_eq!(hit.key.unwrap().key_state, SHIFT_PRESSED);
    }

    #[test]
    fn delete_and_page_keys() {
        let map = default_input_map();
        assert_eq!(map.lookup(b"\x1b[3~").key.unwrap().virtual_key, vk::DELETE);
        assert_eq!(map.lookup(b"\x1b[6~").key.unwrap().virtual_key, vk::NEXT);
        assert_eq!(map.lookup(b"\x1b[24~").key.unwrap().virtual_key, vk::F12);
    }
}
