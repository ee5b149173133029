//! Input translator: downstream terminal bytes → console key events.
//!
//! Bytes queue up until they resolve: through the escape-sequence trie,
//! through the DSR reply matcher, or through the per-character rules. An
//! ambiguous tail (for example a lone ESC) is resolved by round-tripping a
//! Device Status Report through the downstream terminal, or after a
//! one-second flush timeout, whichever comes first.

use std::time::{Duration, Instant};

use tracing::debug;
use winbridge_core::debug::{dump_input_bytes, has_debug_flag};
use winbridge_core::keys::{
    vk, InputRecord, Key, LEFT_ALT_PRESSED, LEFT_CTRL_PRESSED, RIGHT_ALT_PRESSED,
    RIGHT_CTRL_PRESSED, SHIFT_PRESSED,
};

use crate::console::Console;
use crate::input_map::{default_input_map, InputMap};
use crate::layout::vk_key_scan;

/// How long an unresolved escape prefix may sit in the queue.
pub const INCOMPLETE_ESCAPE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Emits a DSR query (`ESC [ 6 n`) toward the downstream terminal.
pub trait DsrSender {
    fn send_dsr(&mut self);
}

/// Outcome of matching a DSR reply at the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DsrMatch {
    No,
    Incomplete,
    Match(usize),
}

pub struct ConsoleInput {
    input_map: InputMap,
    byte_queue: Vec<u8>,
    dsr_sent: bool,
    last_write: Instant,
    dump_input: bool,
}

impl ConsoleInput {
    pub fn new() -> Self {
        Self {
            input_map: default_input_map(),
            byte_queue: Vec::new(),
            dsr_sent: false,
            last_write: Instant::now(),
            dump_input: has_debug_flag("input"),
        }
    }

    /// Append downstream bytes and decode whatever resolves. If undecoded
    /// bytes remain and no DSR is in flight, one is sent to flush the
    /// terminal's side of any partial sequence.
    pub fn write_input(&mut self, console: &mut Console, input: &[u8], dsr: &mut dyn DsrSender) {
        if input.is_empty() {
            return;
        }
        if self.dump_input {
            debug!(bytes = %dump_input_bytes(input), "input chars");
        }
        self.byte_queue.extend_from_slice(input);
        self.do_write(console, false);
        if !self.byte_queue.is_empty() && !self.dsr_sent {
            debug!("sending DSR to flush partial input");
            dsr.send_dsr();
            self.dsr_sent = true;
        }
        self.last_write = Instant::now();
    }

    /// Force out an escape prefix that has sat unresolved past the timeout.
    pub fn flush_incomplete_escape(&mut self, console: &mut Console) {
        if !self.byte_queue.is_empty() && self.last_write.elapsed() >= INCOMPLETE_ESCAPE_TIMEOUT {
            self.do_write(console, true);
            self.byte_queue.clear();
        }
    }

    pub fn has_pending_bytes(&self) -> bool {
        !self.byte_queue.is_empty()
    }

    fn do_write(&mut self, console: &mut Console, is_eof: bool) {
        let queue = std::mem::take(&mut self.byte_queue);
        let mut records = Vec::new();
        let mut idx = 0;
        while idx < queue.len() {
            match self.scan_key_press(&mut records, console, &queue[idx..], is_eof) {
                Some(consumed) => idx += consumed,
                None => break,
            }
        }
        self.byte_queue = queue[idx..].to_vec();
        console.write_input(&records);
    }

    /// Decode one key press from the head of `input`. `None` means the
    /// bytes are an incomplete sequence and more input (or EOF) is needed.
    fn scan_key_press(
        &mut self,
        records: &mut Vec<InputRecord>,
        console: &mut Console,
        input: &[u8],
        is_eof: bool,
    ) -> Option<usize> {
        // Ctrl-C becomes a console control event while processed input is
        // enabled, not a key in the queue.
        if input[0] == 0x03 && console.processed_input_mode() {
            debug!("Ctrl-C -> console control event");
            console.post_ctrl_c_event();
            return Some(1);
        }

        match match_dsr(input) {
            DsrMatch::Match(len) => {
                debug!("received a DSR reply");
                self.dsr_sent = false;
                return Some(len);
            }
            DsrMatch::Incomplete if !is_eof => return None,
            _ => {}
        }

        let hit = self.input_map.lookup(input);
        if !is_eof && hit.incomplete {
            return None;
        }
        if let Some(key) = hit.key {
            self.append_key_press(records, key.virtual_key, key.unicode_char, key.key_state);
            return Some(hit.match_len);
        }

        // Alt-<char>. `ESC ESC` is deliberately not Alt-ESC: the second ESC
        // starts a fresh match instead.
        if input[0] == 0x1B && input.len() >= 2 && input[1] != 0x1B {
            let len = utf8_char_length(input[1]);
            if 1 + len > input.len() {
                return None;
            }
            self.append_utf8_char(records, &input[1..1 + len], LEFT_ALT_PRESSED);
            return Some(1 + len);
        }

        // A plain UTF-8 character.
        let len = utf8_char_length(input[0]);
        if len > input.len() {
            return None;
        }
        self.append_utf8_char(records, &input[..len], 0);
        Some(len)
    }

    fn append_utf8_char(&mut self, records: &mut Vec<InputRecord>, bytes: &[u8], key_state: u32) {
        let ch = match std::str::from_utf8(bytes) {
            Ok(s) => s.chars().next().unwrap_or(char::REPLACEMENT_CHARACTER),
            Err(_) => char::REPLACEMENT_CHARACTER,
        };
        let mut units = [0u16; 2];
        for &unit in ch.encode_utf16(&mut units).iter() {
            let mut virtual_key = 0;
            let mut state = key_state;
            if let Some((vkc, base)) = vk_key_scan(unit) {
                virtual_key = vkc;
                state |= base;
            }
            self.append_key_press(records, virtual_key, unit, state);
        }
    }

    /// Emit the press/release choreography for one logical key: modifiers
    /// press in Ctrl, Alt, Shift order with a cumulative mask, and release
    /// in reverse. Ctrl+Alt zeroes the press character; Alt zeroes the
    /// release character.
    fn append_key_press(
        &mut self,
        records: &mut Vec<InputRecord>,
        virtual_key: u16,
        unicode_char: u16,
        key_state: u32,
    ) {
        let ctrl = key_state & (LEFT_CTRL_PRESSED | RIGHT_CTRL_PRESSED) != 0;
        let alt = key_state & (LEFT_ALT_PRESSED | RIGHT_ALT_PRESSED) != 0;
        let shift = key_state & SHIFT_PRESSED != 0;

        if self.dump_input {
            let key = Key::new(virtual_key, unicode_char, key_state);
            debug!(key = %key, "keypress");
        }

        let mut step = 0u32;
        if ctrl {
            step |= LEFT_CTRL_PRESSED;
            records.push(InputRecord::key(true, vk::CONTROL, 0, step));
        }
        if alt {
            step |= LEFT_ALT_PRESSED;
            records.push(InputRecord::key(true, vk::MENU, 0, step));
        }
        if shift {
            step |= SHIFT_PRESSED;
            records.push(InputRecord::key(true, vk::SHIFT, 0, step));
        }
        let mut ch = unicode_char;
        if ctrl && alt {
            ch = 0;
        }
        records.push(InputRecord::key(true, virtual_key, ch, step));
        if alt {
            ch = 0;
        }
        records.push(InputRecord::key(false, virtual_key, ch, step));
        if shift {
            step &= !SHIFT_PRESSED;
            records.push(InputRecord::key(false, vk::SHIFT, 0, step));
        }
        if alt {
            step &= !LEFT_ALT_PRESSED;
            records.push(InputRecord::key(false, vk::MENU, 0, step));
        }
        if ctrl {
            step &= !LEFT_CTRL_PRESSED;
            records.push(InputRecord::key(false, vk::CONTROL, 0, step));
        }
    }
}

impl Default for ConsoleInput {
    fn default() -> Self {
        Self::new()
    }
}

/// UTF-8 sequence length from the lead byte; malformed leads consume one.
fn utf8_char_length(first: u8) -> usize {
    if first & 0x80 == 0 {
        1
    } else if first & 0xE0 == 0xC0 {
        2
    } else if first & 0xF0 == 0xE0 {
        3
    } else if first & 0xF8 == 0xF0 {
        4
    } else {
        1
    }
}

/// Match `ESC [ digits ; digits R` at the head of the input.
fn match_dsr(input: &[u8]) -> DsrMatch {
    let mut i = 0;
    macro_rules! advance {
        () => {{
            i += 1;
            if i == input.len() {
                return DsrMatch::Incomplete;
            }
        }};
    }
    if input.is_empty() {
        return DsrMatch::Incomplete;
    }
    if input[i] != 0x1B {
        return DsrMatch::No;
    }
    advance!();
    if input[i] != b'[' {
        return DsrMatch::No;
    }
    advance!();
    if !input[i].is_ascii_digit() {
        return DsrMatch::No;
    }
    while input[i].is_ascii_digit() {
        advance!();
    }
    if input[i] != b';' {
        return DsrMatch::No;
    }
    advance!();
    if !input[i].is_ascii_digit() {
        return DsrMatch::No;
    }
    while input[i].is_ascii_digit() {
        advance!();
    }
    if input[i] != b'R' {
        return DsrMatch::No;
    }
    DsrMatch::Match(i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use winbridge_core::keys::LEFT_ALT_PRESSED;

    #[derive(Default)]
    struct DsrRecorder {
        sent: usize,
    }

    impl DsrSender for DsrRecorder {
        fn send_dsr(&mut self) {
            self.sent += 1;
        }
    }

    fn rig() -> (ConsoleInput, Console, DsrRecorder) {
        (
            ConsoleInput::new(),
            Console::with_buffer_height(80, 25, 100).unwrap(),
            DsrRecorder::default(),
        )
    }

    fn records(console: &mut Console) -> Vec<InputRecord> {
        console.take_input_records()
    }

    fn assert_balanced(records: &[InputRecord]) {
        let mut mask = 0u32;
        for rec in records {
            mask = rec.control_key_state;
        }
        assert_eq!(mask, 0, "modifier mask did not return to zero");
    }

    #[test]
    fn plain_text_emits_press_release_pairs() {
        let (mut input, mut console, mut dsr) = rig();
        input.write_input(&mut console, b"hi", &mut dsr);
        let recs = records(&mut console);
        assert_eq!(recs.len(), 4);
        assert!(recs[0].key_down && !recs[1].key_down);
        assert_eq!(recs[0].unicode_char, b'h' as u16);
        assert_eq!(recs[0].virtual_key, b'H' as u16);
        assert_eq!(dsr.sent, 0);
        assert!(!input.has_pending_bytes());
    }

    #[test]
    fn arrow_key_matches_without_dsr() {
        let (mut input, mut console, mut dsr) = rig();
        input.write_input(&mut console, b"\x1b[A", &mut dsr);
        let recs = records(&mut console);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].virtual_key, vk::UP);
        assert!(recs[0].key_down);
        assert!(!recs[1].key_down);
        assert_eq!(dsr.sent, 0);
        assert!(!input.has_pending_bytes());
    }

    #[test]
    fn lone_escape_waits_then_flushes() {
        let (mut input, mut console, mut dsr) = rig();
        input.write_input(&mut console, b"\x1b", &mut dsr);
        assert!(records(&mut console).is_empty());
        assert_eq!(dsr.sent, 1, "ambiguous ESC should trigger a DSR query");
        assert!(input.has_pending_bytes());

        // Not yet stale: nothing happens.
        input.flush_incomplete_escape(&mut console);
        assert!(records(&mut console).is_empty());

        input.last_write = Instant::now() - INCOMPLETE_ESCAPE_TIMEOUT;
        input.flush_incomplete_escape(&mut console);
        let recs = records(&mut console);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].virtual_key, vk::ESCAPE);
        assert!(!input.has_pending_bytes());
    }

    #[test]
    fn dsr_reply_is_consumed_silently() {
        let (mut input, mut console, mut dsr) = rig();
        input.write_input(&mut console, b"\x1b", &mut dsr);
        assert_eq!(dsr.sent, 1);
        // The terminal answers the DSR; the pending ESC turns out to be the
        // start of the reply.
        input.write_input(&mut console, b"[12;40R", &mut dsr);
        assert!(records(&mut console).is_empty());
        assert!(!input.has_pending_bytes());
        assert_eq!(dsr.sent, 1, "no second query after the reply");
    }

    #[test]
    fn alt_char_sets_alt_modifier() {
        let (mut input, mut console, mut dsr) = rig();
        input.write_input(&mut console, b"\x1bx", &mut dsr);
        let recs = records(&mut console);
        // MENU down, key down, key up (char zeroed), MENU up.
        assert_eq!(recs.len(), 4);
        assert_eq!(recs[0].virtual_key, vk::MENU);
        assert_eq!(recs[1].unicode_char, b'x' as u16);
        assert!(recs[1].control_key_state & LEFT_ALT_PRESSED != 0);
        assert_eq!(recs[2].unicode_char, 0);
        assert_balanced(&recs);
    }

    #[test]
    fn escape_escape_is_not_alt_escape() {
        let (mut input, mut console, mut dsr) = rig();
        input.write_input(&mut console, b"\x1b\x1b", &mut dsr);
        // The first ESC resolves as the Escape key; the second stays queued
        // as a fresh (still ambiguous) match.
        let recs = records(&mut console);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].virtual_key, vk::ESCAPE);
        assert!(input.has_pending_bytes());
    }

    #[test]
    fn split_utf8_waits_for_completion() {
        let (mut input, mut console, mut dsr) = rig();
        let bytes = "é".as_bytes();
        input.write_input(&mut console, &bytes[..1], &mut dsr);
        assert!(records(&mut console).is_empty());
        input.write_input(&mut console, &bytes[1..], &mut dsr);
        let recs = records(&mut console);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].unicode_char, 'é' as u16);
        assert_eq!(recs[0].virtual_key, 0, "no layout mapping, raw unit");
    }

    #[test]
    fn astral_char_emits_both_surrogates() {
        let (mut input, mut console, mut dsr) = rig();
        input.write_input(&mut console, "🦀".as_bytes(), &mut dsr);
        let recs = records(&mut console);
        assert_eq!(recs.len(), 4);
        assert_eq!(recs[0].unicode_char, 0xD83E);
        assert_eq!(recs[2].unicode_char, 0xDD80);
    }

    #[test]
    fn ctrl_c_raises_console_event_in_processed_mode() {
        let (mut input, mut console, mut dsr) = rig();
        input.write_input(&mut console, b"\x03", &mut dsr);
        assert!(records(&mut console).is_empty());
        assert_eq!(console.take_ctrl_c_events(), 1);
    }

    #[test]
    fn ctrl_c_is_a_key_in_raw_mode() {
        let (mut input, mut console, mut dsr) = rig();
        console.set_input_mode(0);
        input.write_input(&mut console, b"\x03", &mut dsr);
        let recs = records(&mut console);
        assert!(!recs.is_empty());
        assert_eq!(console.take_ctrl_c_events(), 0);
        // Ctrl chord: CONTROL down, C down, C up, CONTROL up.
        assert_eq!(recs[0].virtual_key, vk::CONTROL);
        assert_eq!(recs[1].virtual_key, b'C' as u16);
        assert_balanced(&recs);
    }

    #[test]
    fn shift_ctrl_alt_choreography_is_balanced() {
        let (mut input, _console, _) = rig();
        let mut recs = Vec::new();
        input.append_key_press(
            &mut recs,
            vk::UP,
            0,
            SHIFT_PRESSED | LEFT_CTRL_PRESSED | LEFT_ALT_PRESSED,
        );
        assert_eq!(recs.len(), 8);
        assert_eq!(recs[0].virtual_key, vk::CONTROL);
        assert_eq!(recs[1].virtual_key, vk::MENU);
        assert_eq!(recs[2].virtual_key, vk::SHIFT);
        assert_eq!(recs[3].virtual_key, vk::UP);
        assert_eq!(recs[4].virtual_key, vk::UP);
        assert_eq!(recs[5].virtual_key, vk::SHIFT);
        assert_eq!(recs[6].virtual_key, vk::MENU);
        assert_eq!(recs[7].virtual_key, vk::CONTROL);
        assert_balanced(&recs);
    }

    #[test]
    fn malformed_lead_byte_consumes_one_byte() {
        let (mut input, mut console, mut dsr) = rig();
        input.write_input(&mut console, &[0xFF, b'a'], &mut dsr);
        let recs = records(&mut console);
        assert_eq!(recs.len(), 4);
        assert_eq!(recs[0].unicode_char, char::REPLACEMENT_CHARACTER as u16);
        assert_eq!(recs[2].unicode_char, b'a' as u16);
    }
}
