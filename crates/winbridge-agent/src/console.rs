//! The console-subsystem model.
//!
//! A console is a tall off-screen buffer of cells, a visible window
//! rectangle sliding over it, a cursor addressed in buffer coordinates, an
//! input-event queue, and a mode word. The model is a single-writer
//! resource: every mutation happens on the agent task.
//!
//! Child output mutates the grid through the VT write path in `feed`; the
//! scraper reads lines and writes sync markers directly. `freeze` pins the
//! grid for the duration of a scrape: output arriving while frozen is
//! queued and applied on `unfreeze`.

use std::collections::VecDeque;

use anyhow::{bail, Result};
use winbridge_core::cell::{Cell, MAX_CONSOLE_WIDTH};
use winbridge_core::keys::InputRecord;

use crate::feed::OutputParser;
use crate::scraper::BUFFER_LINE_COUNT;

// Console input-mode bits (the subset the bridge interprets).
pub const ENABLE_PROCESSED_INPUT: u32 = 0x0001;
pub const ENABLE_LINE_INPUT: u32 = 0x0002;
pub const ENABLE_ECHO_INPUT: u32 = 0x0004;

/// Startup input mode: processed + line + echo.
pub const DEFAULT_INPUT_MODE: u32 = ENABLE_PROCESSED_INPUT | ENABLE_LINE_INPUT | ENABLE_ECHO_INPUT;

/// The visible window rectangle. Width always equals the buffer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRect {
    pub top: usize,
    pub height: usize,
    pub width: usize,
}

impl WindowRect {
    pub fn bottom(&self) -> usize {
        self.top + self.height
    }
}

pub struct Console {
    width: usize,
    rows: Vec<Vec<Cell>>,
    window_top: usize,
    window_height: usize,
    cursor_row: usize,
    cursor_col: usize,
    input_mode: u32,
    input_queue: VecDeque<InputRecord>,
    ctrl_c_events: u32,
    frozen: bool,
    pending_output: Vec<u8>,
    parser: OutputParser,
}

impl Console {
    /// Console with the standard tall buffer.
    pub fn new(cols: usize, rows: usize) -> Result<Self> {
        Self::with_buffer_height(cols, rows, BUFFER_LINE_COUNT)
    }

    /// Console with an explicit buffer height (smaller in tests).
    pub fn with_buffer_height(cols: usize, rows: usize, buffer_height: usize) -> Result<Self> {
        if cols == 0 || cols > MAX_CONSOLE_WIDTH {
            bail!("console width {} out of range (1..={})", cols, MAX_CONSOLE_WIDTH);
        }
        if rows == 0 || rows > buffer_height {
            bail!("console height {} out of range (1..={})", rows, buffer_height);
        }
        Ok(Self {
            width: cols,
            rows: vec![vec![Cell::default(); cols]; buffer_height],
            window_top: 0,
            window_height: rows,
            cursor_row: 0,
            cursor_col: 0,
            input_mode: DEFAULT_INPUT_MODE,
            input_queue: VecDeque::new(),
            ctrl_c_events: 0,
            frozen: false,
            pending_output: Vec::new(),
            parser: OutputParser::default(),
        })
    }

    // ========== Geometry ==========

    pub fn buffer_size(&self) -> (usize, usize) {
        (self.width, self.rows.len())
    }

    pub fn window_rect(&self) -> WindowRect {
        WindowRect {
            top: self.window_top,
            height: self.window_height,
            width: self.width,
        }
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_row, self.cursor_col)
    }

    pub(crate) fn set_cursor(&mut self, row: usize, col: usize) {
        self.cursor_row = row.min(self.rows.len() - 1);
        self.cursor_col = col.min(self.width.saturating_sub(1));
    }

    /// Change buffer width and window placement. The buffer height is
    /// fixed; rows are truncated or blank-padded to the new width.
    pub fn reposition(&mut self, cols: usize, window_top: usize, window_height: usize) -> Result<()> {
        if cols == 0 || cols > MAX_CONSOLE_WIDTH {
            bail!("console width {} out of range (1..={})", cols, MAX_CONSOLE_WIDTH);
        }
        if window_height == 0 || window_top + window_height > self.rows.len() {
            bail!(
                "window {}+{} exceeds buffer height {}",
                window_top,
                window_height,
                self.rows.len()
            );
        }
        for row in &mut self.rows {
            row.resize(cols, Cell::default());
        }
        self.width = cols;
        self.window_top = window_top;
        self.window_height = window_height;
        self.cursor_row = self.cursor_row.min(self.rows.len() - 1);
        self.cursor_col = self.cursor_col.min(cols - 1);
        Ok(())
    }

    // ========== Grid access ==========

    pub fn read_line(&self, row: usize) -> Result<&[Cell]> {
        match self.rows.get(row) {
            Some(r) => Ok(r),
            None => bail!("row {} outside buffer", row),
        }
    }

    pub fn read_cell(&self, row: usize, col: usize) -> Result<Cell> {
        let line = self.read_line(row)?;
        match line.get(col) {
            Some(c) => Ok(*c),
            None => bail!("column {} outside buffer", col),
        }
    }

    /// Write a vertical strip of cells in one column (sync markers).
    pub fn write_column(&mut self, top: usize, col: usize, cells: &[Cell]) -> Result<()> {
        if top + cells.len() > self.rows.len() || col >= self.width {
            bail!("column write outside buffer");
        }
        for (i, cell) in cells.iter().enumerate() {
            self.rows[top + i][col] = *cell;
        }
        Ok(())
    }

    // ========== Output path (child → grid) ==========

    /// Apply child output. While frozen the bytes are queued and applied by
    /// `unfreeze`.
    pub fn write_output(&mut self, bytes: &[u8]) {
        if self.frozen {
            self.pending_output.extend_from_slice(bytes);
            return;
        }
        let mut parser = std::mem::take(&mut self.parser);
        parser.advance(self, bytes);
        self.parser = parser;
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
        if !self.pending_output.is_empty() {
            let pending = std::mem::take(&mut self.pending_output);
            self.write_output(&pending);
        }
    }

    // Grid primitives used by the VT write path.

    pub(crate) fn put_char(&mut self, ch: char, attr: u16) {
        if self.cursor_col >= self.width {
            self.cursor_col = 0;
            self.advance_row();
        }
        let row = self.cursor_row;
        let col = self.cursor_col;
        self.rows[row][col] = Cell::new(ch, attr);
        self.cursor_col += 1;
    }

    pub(crate) fn carriage_return(&mut self) {
        self.cursor_col = 0;
    }

    pub(crate) fn line_feed(&mut self) {
        self.advance_row();
    }

    pub(crate) fn backspace(&mut self) {
        if self.cursor_col > 0 {
            self.cursor_col -= 1;
        }
    }

    pub(crate) fn tab(&mut self) {
        let next = (self.cursor_col / 8 + 1) * 8;
        self.cursor_col = next.min(self.width - 1);
    }

    /// Move the cursor down one row, sliding the window after it and
    /// scrolling the buffer once the bottom is reached. A buffer scroll
    /// discards the top line, which is exactly what the sync marker exists
    /// to detect.
    fn advance_row(&mut self) {
        if self.cursor_row + 1 < self.rows.len() {
            self.cursor_row += 1;
        } else {
            self.rows.remove(0);
            self.rows.push(vec![Cell::default(); self.width]);
        }
        if self.cursor_row >= self.window_top + self.window_height {
            self.window_top = self.cursor_row + 1 - self.window_height;
        }
    }

    /// Cursor addressing is window-relative on the write path.
    pub(crate) fn move_cursor_in_window(&mut self, rel_row: usize, col: usize) {
        let row = self.window_top + rel_row.min(self.window_height - 1);
        self.set_cursor(row, col);
    }

    pub(crate) fn cursor_window_row(&self) -> usize {
        self.cursor_row.saturating_sub(self.window_top)
    }

    /// Clear a span of one buffer row.
    pub(crate) fn clear_span(&mut self, row: usize, from: usize, to: usize, attr: u16) {
        if let Some(line) = self.rows.get_mut(row) {
            let to = to.min(line.len());
            for cell in &mut line[from.min(to)..to] {
                *cell = Cell::blank(attr);
            }
        }
    }

    /// Full clear: every line blanked, window back to the buffer top,
    /// cursor home. This is how a shell's clear-screen lands in the model
    /// and is the one operation that moves the window upward.
    pub(crate) fn clear_all(&mut self, attr: u16) {
        for row in &mut self.rows {
            row.fill(Cell::blank(attr));
        }
        self.window_top = 0;
        self.cursor_row = 0;
        self.cursor_col = 0;
    }

    // ========== Input queue ==========

    pub fn input_mode(&self) -> u32 {
        self.input_mode
    }

    pub fn set_input_mode(&mut self, mode: u32) {
        self.input_mode = mode;
    }

    pub fn processed_input_mode(&self) -> bool {
        self.input_mode & ENABLE_PROCESSED_INPUT != 0
    }

    pub fn write_input(&mut self, records: &[InputRecord]) {
        self.input_queue.extend(records.iter().copied());
    }

    pub fn take_input_records(&mut self) -> Vec<InputRecord> {
        self.input_queue.drain(..).collect()
    }

    /// Raise a console Ctrl-C event (processed-input mode only).
    pub fn post_ctrl_c_event(&mut self) {
        self.ctrl_c_events += 1;
    }

    pub fn take_ctrl_c_events(&mut self) -> u32 {
        std::mem::take(&mut self.ctrl_c_events)
    }

    // ========== Test / diagnostic helpers ==========

    /// The characters of one buffer row, trailing blanks trimmed.
    pub fn row_text(&self, row: usize) -> String {
        let line = match self.rows.get(row) {
            Some(l) => l,
            None => return String::new(),
        };
        let s: String = line.iter().map(|c| c.ch).collect();
        s.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_fills_grid_and_advances_cursor() {
        let mut c = Console::new(80, 25).unwrap();
        c.write_output(b"hi");
        assert_eq!(c.row_text(0), "hi");
        assert_eq!(c.cursor(), (0, 2));
        c.write_output(b"\r\n");
        assert_eq!(c.cursor(), (1, 0));
    }

    #[test]
    fn window_slides_down_as_output_grows() {
        let mut c = Console::with_buffer_height(40, 5, 100).unwrap();
        for i in 0..10 {
            c.write_output(format!("line{}\r\n", i).as_bytes());
        }
        let w = c.window_rect();
        assert_eq!(c.cursor().0, 10);
        assert_eq!(w.top, 10 + 1 - 5);
        assert_eq!(c.row_text(9), "line9");
    }

    #[test]
    fn buffer_scrolls_at_capacity() {
        let mut c = Console::with_buffer_height(40, 5, 8).unwrap();
        for i in 0..10 {
            c.write_output(format!("line{}\r\n", i).as_bytes());
        }
        // Three lines scrolled off the top; line3 is now the first row.
        assert_eq!(c.row_text(0), "line3");
        let w = c.window_rect();
        assert_eq!(w.bottom(), 8);
    }

    #[test]
    fn freeze_queues_output() {
        let mut c = Console::new(80, 25).unwrap();
        c.freeze();
        c.write_output(b"later");
        assert_eq!(c.row_text(0), "");
        c.unfreeze();
        assert_eq!(c.row_text(0), "later");
    }

    #[test]
    fn wide_geometry_is_rejected() {
        assert!(Console::new(MAX_CONSOLE_WIDTH + 1, 25).is_err());
        let mut c = Console::new(80, 25).unwrap();
        assert!(c.reposition(MAX_CONSOLE_WIDTH + 1, 0, 25).is_err());
    }

    #[test]
    fn clear_all_homes_window_and_cursor() {
        let mut c = Console::with_buffer_height(40, 5, 50).unwrap();
        for i in 0..20 {
            c.write_output(format!("x{}\r\n", i).as_bytes());
        }
        assert!(c.window_rect().top > 0);
        c.write_output(b"\x1b[2J");
        assert_eq!(c.window_rect().top, 0);
        assert_eq!(c.cursor(), (0, 0));
        assert_eq!(c.row_text(0), "");
    }
}
