//! Downstream terminal encoder.
//!
//! Renders scraper output as a small ANSI subset. The encoder is stateful:
//! it remembers which absolute line the downstream cursor sits on, so a
//! cycle's line updates become `\r\n` hops plus repainted lines, and the
//! closing cursor frame repositions and re-shows the cursor.

use winbridge_core::cell::{Cell, ATTR_REVERSE, ATTR_UNDERSCORE, DEFAULT_ATTR};

pub struct Terminal {
    remote_line: i64,
    cursor_hidden: bool,
}

// Console color nibble (B low bit) → ANSI color index (R low bit).
fn ansi_color(console: u16) -> u16 {
    let c = console & 0x7;
    ((c & 0x1) << 2) | (c & 0x2) | ((c & 0x4) >> 2)
}

impl Terminal {
    pub fn new() -> Self {
        Self {
            remote_line: 0,
            cursor_hidden: false,
        }
    }

    /// Forget downstream state after a tracking reset; optionally repaint
    /// from a blank screen.
    pub fn reset(&mut self, send_clear: bool, new_line: i64, out: &mut Vec<u8>) {
        if send_clear {
            out.extend_from_slice(b"\x1b[1;1H\x1b[2J");
        }
        self.remote_line = new_line;
    }

    fn hide_cursor(&mut self, out: &mut Vec<u8>) {
        if !self.cursor_hidden {
            out.extend_from_slice(b"\x1b[?25l");
            self.cursor_hidden = true;
        }
    }

    fn show_cursor(&mut self, out: &mut Vec<u8>) {
        if self.cursor_hidden {
            out.extend_from_slice(b"\x1b[?25h");
            self.cursor_hidden = false;
        }
    }

    fn move_to_line(&mut self, line: i64, out: &mut Vec<u8>) {
        if line > self.remote_line {
            for _ in self.remote_line..line {
                out.extend_from_slice(b"\r\n");
            }
        } else if line < self.remote_line {
            out.extend_from_slice(format!("\x1b[{}A", self.remote_line - line).as_bytes());
        }
        self.remote_line = line;
    }

    /// Repaint one absolute line from its cells.
    pub fn send_line(&mut self, line: i64, cells: &[Cell], width: usize, out: &mut Vec<u8>) {
        self.hide_cursor(out);
        self.move_to_line(line, out);
        out.push(b'\r');

        let width = width.min(cells.len());
        let mut end = width;
        while end > 0 && cells[end - 1].ch == ' ' && cells[end - 1].attr == DEFAULT_ATTR {
            end -= 1;
        }

        // Each line ends (and a reset leaves the stream) in SGR 0, so the
        // downstream attribute state at the start of a line is the default.
        let mut attr = DEFAULT_ATTR;
        let mut buf = [0u8; 4];
        for cell in &cells[..end] {
            if attr != cell.attr {
                self.emit_sgr(cell.attr, out);
                attr = cell.attr;
            }
            let ch = if (cell.ch as u32) < 0x20 { ' ' } else { cell.ch };
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
        out.extend_from_slice(b"\x1b[0m\x1b[K");
    }

    fn emit_sgr(&self, attr: u16, out: &mut Vec<u8>) {
        let mut seq = String::from("\x1b[0");
        let fg = ansi_color(attr);
        let bg = ansi_color(attr >> 4);
        let fg_base = if attr & 0x8 != 0 { 90 } else { 30 };
        let bg_base = if attr & 0x80 != 0 { 100 } else { 40 };
        if fg != 7 || fg_base == 90 {
            seq.push_str(&format!(";{}", fg_base + fg));
        }
        if bg != 0 || bg_base == 100 {
            seq.push_str(&format!(";{}", bg_base + bg));
        }
        if attr & ATTR_UNDERSCORE != 0 {
            seq.push_str(";4");
        }
        if attr & ATTR_REVERSE != 0 {
            seq.push_str(";7");
        }
        seq.push('m');
        out.extend_from_slice(seq.as_bytes());
    }

    /// Close a scrape cycle: park the downstream cursor on the console's
    /// absolute cursor position and make it visible again.
    pub fn finish_output(&mut self, line: i64, col: usize, out: &mut Vec<u8>) {
        self.move_to_line(line, out);
        out.push(b'\r');
        if col > 0 {
            out.extend_from_slice(format!("\x1b[{}C", col).as_bytes());
        }
        self.show_cursor(out);
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(text: &str) -> Vec<Cell> {
        text.chars().map(|ch| Cell::new(ch, DEFAULT_ATTR)).collect()
    }

    #[test]
    fn plain_line_is_cr_text_clear() {
        let mut t = Terminal::new();
        let mut out = Vec::new();
        t.send_line(0, &cells("hi"), 2, &mut out);
        let s = String::from_utf8(out).unwrap();
        assert_eq!(s, "\x1b[?25l\rhi\x1b[0m\x1b[K");
    }

    #[test]
    fn moving_down_emits_newlines() {
        let mut t = Terminal::new();
        let mut out = Vec::new();
        t.send_line(0, &cells("a"), 1, &mut out);
        out.clear();
        t.send_line(2, &cells("b"), 1, &mut out);
        let s = String::from_utf8(out).unwrap();
        assert!(s.starts_with("\r\n\r\n"));
    }

    #[test]
    fn trailing_default_blanks_are_trimmed() {
        let mut t = Terminal::new();
        let mut out = Vec::new();
        let mut line = cells("x");
        line.extend(std::iter::repeat(Cell::default()).take(10));
        t.send_line(0, &line, 11, &mut out);
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("\rx\x1b[0m"));
    }

    #[test]
    fn colored_cell_emits_sgr() {
        let mut t = Terminal::new();
        let mut out = Vec::new();
        // Console red is nibble value 4; ANSI red is 31.
        let line = vec![Cell::new('r', 0x0004)];
        t.send_line(0, &line, 1, &mut out);
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("\x1b[0;31mr"));
    }

    #[test]
    fn finish_repositions_and_shows_cursor() {
        let mut t = Terminal::new();
        let mut out = Vec::new();
        t.send_line(3, &cells("abc"), 3, &mut out);
        out.clear();
        t.finish_output(3, 2, &mut out);
        let s = String::from_utf8(out).unwrap();
        assert_eq!(s, "\r\x1b[2C\x1b[?25h");
    }

    #[test]
    fn cursor_frame_can_move_back_up() {
        let mut t = Terminal::new();
        let mut out = Vec::new();
        t.send_line(5, &cells("x"), 1, &mut out);
        out.clear();
        t.finish_output(2, 0, &mut out);
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("\x1b[3A"));
    }
}
