//! VT write path: child output bytes → console grid mutations.
//!
//! This is deliberately a small interpreter, covering what console clients
//! emit through a pty line discipline: printable UTF-8, the C0 controls,
//! cursor addressing, erase, and 16-color SGR. Unknown sequences are
//! swallowed so a fancy client cannot corrupt the grid.

use winbridge_core::cell::{
    ATTR_REVERSE, ATTR_UNDERSCORE, BG_INTENSITY, DEFAULT_ATTR, FG_INTENSITY,
};

use crate::console::Console;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Ground,
    Escape,
    Csi,
    Osc,
    OscEsc,
    Charset,
}

/// Parser state carried across output chunks.
#[derive(Debug, Default)]
pub(crate) struct OutputParser {
    state: State,
    params: Vec<u16>,
    current: Option<u16>,
    private: bool,
    utf8: Vec<u8>,
    attr_set: bool,
    attr: u16,
}

// ANSI color index (R low bit) → console color nibble (B low bit).
fn console_color(ansi: u16) -> u16 {
    let ansi = ansi & 0x7;
    ((ansi & 0x1) << 2) | (ansi & 0x2) | ((ansi & 0x4) >> 2)
}

impl OutputParser {
    fn attr(&self) -> u16 {
        if self.attr_set {
            self.attr
        } else {
            DEFAULT_ATTR
        }
    }

    pub(crate) fn advance(&mut self, console: &mut Console, bytes: &[u8]) {
        for &b in bytes {
            match self.state {
                State::Ground => self.ground(console, b),
                State::Escape => self.escape(console, b),
                State::Csi => self.csi(console, b),
                State::Osc => {
                    match b {
                        0x07 => self.state = State::Ground,
                        0x1B => self.state = State::OscEsc,
                        _ => {}
                    }
                }
                State::OscEsc => {
                    self.state = if b == b'\\' { State::Ground } else { State::Osc };
                }
                State::Charset => self.state = State::Ground,
            }
        }
    }

    fn ground(&mut self, console: &mut Console, b: u8) {
        if !self.utf8.is_empty() {
            self.continue_utf8(console, b);
            return;
        }
        match b {
            0x1B => self.state = State::Escape,
            b'\r' => console.carriage_return(),
            b'\n' => console.line_feed(),
            0x08 => console.backspace(),
            b'\t' => console.tab(),
            0x07 => {}
            0x00..=0x1F => {}
            0x20..=0x7E => console.put_char(b as char, self.attr()),
            0x7F => {}
            _ => self.continue_utf8(console, b),
        }
    }

    fn continue_utf8(&mut self, console: &mut Console, b: u8) {
        // A new lead byte (or ASCII) while a sequence is pending means the
        // pending bytes were malformed; emit a replacement and restart.
        if !self.utf8.is_empty() && (b < 0x80 || b >= 0xC0) {
            self.utf8.clear();
            console.put_char(char::REPLACEMENT_CHARACTER, self.attr());
            self.ground(console, b);
            return;
        }
        self.utf8.push(b);
        let need = match self.utf8[0] {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        if self.utf8.len() >= need {
            let taken = std::mem::take(&mut self.utf8);
            match std::str::from_utf8(&taken) {
                Ok(s) => {
                    for ch in s.chars() {
                        console.put_char(ch, self.attr());
                    }
                }
                Err(_) => console.put_char(char::REPLACEMENT_CHARACTER, self.attr()),
            }
        }
    }

    fn escape(&mut self, console: &mut Console, b: u8) {
        match b {
            b'[' => {
                self.params.clear();
                self.current = None;
                self.private = false;
                self.state = State::Csi;
            }
            b']' => self.state = State::Osc,
            b'M' => {
                // Reverse index: move up one row within the window.
                let (row, col) = console.cursor();
                let top = console.window_rect().top;
                if row > top {
                    console.set_cursor(row - 1, col);
                }
                self.state = State::Ground;
            }
            b'(' | b')' => self.state = State::Charset,
            _ => self.state = State::Ground,
        }
    }

    fn csi(&mut self, console: &mut Console, b: u8) {
        match b {
            b'0'..=b'9' => {
                let cur = self.current.unwrap_or(0);
                self.current = Some(cur.saturating_mul(10).saturating_add((b - b'0') as u16));
            }
            b';' => {
                self.params.push(self.current.take().unwrap_or(0));
            }
            b'?' | b'>' | b'<' | b'=' => self.private = true,
            b' '..=b'/' => {}
            _ => {
                if let Some(cur) = self.current.take() {
                    self.params.push(cur);
                }
                if !self.private {
                    self.dispatch_csi(console, b);
                }
                self.state = State::Ground;
            }
        }
    }

    fn param(&self, idx: usize, default: u16) -> u16 {
        match self.params.get(idx) {
            Some(&v) if v != 0 => v,
            _ => default,
        }
    }

    fn dispatch_csi(&mut self, console: &mut Console, final_byte: u8) {
        let (width, _) = console.buffer_size();
        let window = console.window_rect();
        match final_byte {
            b'A' => {
                let n = self.param(0, 1) as usize;
                let (row, col) = console.cursor();
                let target = row.saturating_sub(n).max(window.top);
                console.set_cursor(target, col);
            }
            b'B' => {
                let n = self.param(0, 1) as usize;
                let (row, col) = console.cursor();
                let target = (row + n).min(window.bottom() - 1);
                console.set_cursor(target, col);
            }
            b'C' => {
                let n = self.param(0, 1) as usize;
                let (row, col) = console.cursor();
                console.set_cursor(row, (col + n).min(width - 1));
            }
            b'D' => {
                let n = self.param(0, 1) as usize;
                let (row, col) = console.cursor();
                console.set_cursor(row, col.saturating_sub(n));
            }
            b'G' => {
                let col = self.param(0, 1) as usize - 1;
                let (row, _) = console.cursor();
                console.set_cursor(row, col);
            }
            b'H' | b'f' => {
                let row = self.param(0, 1) as usize - 1;
                let col = self.param(1, 1) as usize - 1;
                console.move_cursor_in_window(row, col);
            }
            b'd' => {
                let row = self.param(0, 1) as usize - 1;
                let (_, col) = console.cursor();
                console.move_cursor_in_window(row, col);
            }
            b'J' => self.erase_display(console),
            b'K' => self.erase_line(console),
            b'm' => self.select_graphics(),
            _ => {}
        }
    }

    fn erase_display(&mut self, console: &mut Console) {
        let mode = self.params.first().copied().unwrap_or(0);
        let window = console.window_rect();
        let (row, col) = console.cursor();
        let attr = self.attr();
        match mode {
            0 => {
                console.clear_span(row, col, window.width, attr);
                for r in row + 1..window.bottom() {
                    console.clear_span(r, 0, window.width, attr);
                }
            }
            1 => {
                for r in window.top..row {
                    console.clear_span(r, 0, window.width, attr);
                }
                console.clear_span(row, 0, col + 1, attr);
            }
            _ => console.clear_all(attr),
        }
    }

    fn erase_line(&mut self, console: &mut Console) {
        let mode = self.params.first().copied().unwrap_or(0);
        let window = console.window_rect();
        let (row, col) = console.cursor();
        let attr = self.attr();
        match mode {
            0 => console.clear_span(row, col, window.width, attr),
            1 => console.clear_span(row, 0, col + 1, attr),
            _ => console.clear_span(row, 0, window.width, attr),
        }
    }

    fn select_graphics(&mut self) {
        if self.params.is_empty() {
            self.params.push(0);
        }
        let params = std::mem::take(&mut self.params);
        let mut i = 0;
        while i < params.len() {
            let p = params[i];
            match p {
                0 => {
                    self.attr_set = false;
                    self.attr = DEFAULT_ATTR;
                }
                1 => self.set_attr(self.attr() | FG_INTENSITY),
                4 => self.set_attr(self.attr() | ATTR_UNDERSCORE),
                7 => self.set_attr(self.attr() | ATTR_REVERSE),
                22 => self.set_attr(self.attr() & !FG_INTENSITY),
                24 => self.set_attr(self.attr() & !ATTR_UNDERSCORE),
                27 => self.set_attr(self.attr() & !ATTR_REVERSE),
                30..=37 => self.set_attr((self.attr() & !0x7) | console_color(p - 30)),
                39 => self.set_attr((self.attr() & !0xF) | (DEFAULT_ATTR & 0xF)),
                40..=47 => self.set_attr((self.attr() & !0x70) | (console_color(p - 40) << 4)),
                49 => self.set_attr(self.attr() & !0xF0),
                90..=97 => {
                    self.set_attr((self.attr() & !0xF) | console_color(p - 90) | FG_INTENSITY)
                }
                100..=107 => self.set_attr(
                    (self.attr() & !0xF0) | (console_color(p - 100) << 4) | BG_INTENSITY,
                ),
                38 | 48 => {
                    // 256/truecolor introducers: skip their arguments and
                    // leave the 16-color attribute untouched.
                    if params.get(i + 1) == Some(&5) {
                        i += 2;
                    } else if params.get(i + 1) == Some(&2) {
                        i += 4;
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    fn set_attr(&mut self, attr: u16) {
        self.attr = attr;
        self.attr_set = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winbridge_core::cell::{FG_GREEN, FG_RED};

    fn console() -> Console {
        Console::with_buffer_height(40, 10, 100).unwrap()
    }

    #[test]
    fn sgr_colors_land_in_attribute_word() {
        let mut c = console();
        // ANSI red (31) maps to the console's R bit, not its low (blue) bit.
        c.write_output(b"\x1b[31mr\x1b[0mn");
        let red = c.read_cell(0, 0).unwrap();
        assert_eq!(red.attr & 0xF, FG_RED);
        let normal = c.read_cell(0, 1).unwrap();
        assert_eq!(normal.attr, DEFAULT_ATTR);
    }

    #[test]
    fn sgr_bright_green_background() {
        let mut c = console();
        c.write_output(b"\x1b[102mx");
        let cell = c.read_cell(0, 0).unwrap();
        assert_eq!(cell.attr & 0xF0, (FG_GREEN << 4) | BG_INTENSITY);
    }

    #[test]
    fn cup_is_window_relative() {
        let mut c = Console::with_buffer_height(40, 5, 100).unwrap();
        for _ in 0..20 {
            c.write_output(b"\r\n");
        }
        let top = c.window_rect().top;
        c.write_output(b"\x1b[2;3Hz");
        assert_eq!(c.cursor(), (top + 1, 3));
        assert_eq!(c.read_cell(top + 1, 2).unwrap().ch, 'z');
    }

    #[test]
    fn split_escape_sequence_across_chunks() {
        let mut c = console();
        c.write_output(b"\x1b[3");
        c.write_output(b"1mx");
        assert_eq!(c.read_cell(0, 0).unwrap().attr & 0xF, FG_RED);
    }

    #[test]
    fn split_utf8_across_chunks() {
        let mut c = console();
        let bytes = "é".as_bytes();
        c.write_output(&bytes[..1]);
        c.write_output(&bytes[1..]);
        assert_eq!(c.read_cell(0, 0).unwrap().ch, 'é');
    }

    #[test]
    fn erase_line_to_end() {
        let mut c = console();
        c.write_output(b"abcdef\r\x1b[2C\x1b[K");
        assert_eq!(c.row_text(0), "ab");
    }

    #[test]
    fn osc_title_is_swallowed() {
        let mut c = console();
        c.write_output(b"\x1b]0;my title\x07ok");
        assert_eq!(c.row_text(0), "ok");
    }

    #[test]
    fn private_modes_are_ignored() {
        let mut c = console();
        c.write_output(b"\x1b[?25lx");
        assert_eq!(c.row_text(0), "x");
    }
}
