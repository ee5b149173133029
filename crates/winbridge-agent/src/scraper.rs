//! Console scraper / differ.
//!
//! The console gives no change notifications, so the agent polls: freeze
//! the console, work out how far the buffer has scrolled (via the sync
//! marker planted in the off-screen region), work out which lines may have
//! changed, and retransmit exactly the lines whose cells differ from the
//! shadow copy of what was last sent.
//!
//! Lines are named by *absolute* line number: buffer row + the cumulative
//! scroll count. Absolute line numbers never decrease within a session
//! reset epoch.

use anyhow::Result;
use tracing::{debug, trace};
use winbridge_core::cell::{Cell, DEFAULT_ATTR, MAX_CONSOLE_WIDTH};

use crate::console::{Console, WindowRect};
use crate::terminal::Terminal;

/// Off-screen buffer height and shadow ring capacity.
pub const BUFFER_LINE_COUNT: usize = 3000;
/// Cells in a sync marker strip.
pub const SYNC_MARKER_LEN: usize = 16;
/// Rows of scrollback to keep between the marker and the window top.
pub const SYNC_THRESHOLD: i64 = 200;

pub struct Scraper {
    /// Ring of the last-transmitted cells per absolute line.
    shadow: Vec<Vec<Cell>>,
    sync_row: i64,
    sync_counter: u32,
    scraped_line_count: i64,
    scrolled_count: i64,
    max_buffered_line: i64,
    dirty_window_top: i64,
    dirty_line_count: i64,
}

impl Scraper {
    pub fn new(console: &Console) -> Self {
        Self {
            shadow: vec![vec![Cell::new('\0', 0); MAX_CONSOLE_WIDTH]; BUFFER_LINE_COUNT],
            sync_row: -1,
            sync_counter: 0,
            scraped_line_count: console.window_rect().top as i64,
            scrolled_count: 0,
            max_buffered_line: -1,
            dirty_window_top: -1,
            dirty_line_count: 0,
        }
    }

    pub fn scrolled_count(&self) -> i64 {
        self.scrolled_count
    }

    pub fn scraped_line_count(&self) -> i64 {
        self.scraped_line_count
    }

    pub fn sync_row(&self) -> i64 {
        self.sync_row
    }

    /// Drop all tracking state and start over from the current window.
    pub fn reset(
        &mut self,
        console: &Console,
        terminal: &mut Terminal,
        send_clear: bool,
        out: &mut Vec<u8>,
    ) {
        for row in &mut self.shadow {
            row.fill(Cell::new('\0', 0));
        }
        self.sync_row = -1;
        self.scraped_line_count = console.window_rect().top as i64;
        self.scrolled_count = 0;
        self.max_buffered_line = -1;
        self.dirty_window_top = -1;
        self.dirty_line_count = 0;
        terminal.reset(send_clear, self.scraped_line_count, out);
    }

    /// One poll cycle. A console read failure aborts the cycle (the next
    /// tick retries); the console is unfrozen on every path.
    pub fn scrape(
        &mut self,
        console: &mut Console,
        terminal: &mut Terminal,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        console.freeze();
        let result = self.scrape_frozen(console, terminal, out);
        console.unfreeze();
        result
    }

    fn scrape_frozen(
        &mut self,
        console: &mut Console,
        terminal: &mut Terminal,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let (cursor_row, cursor_col) = console.cursor();
        let window = console.window_rect();

        if self.sync_row != -1 {
            match self.find_sync_marker(console)? {
                None => {
                    debug!("sync marker lost, resetting console tracking");
                    self.reset(console, terminal, true, out);
                }
                Some(marker_row) if marker_row < self.sync_row => {
                    self.scrolled_count += self.sync_row - marker_row;
                    self.sync_row = marker_row;
                    // The buffer scrolled, so the whole window is suspect.
                    self.mark_entire_window_dirty(window);
                }
                Some(_) => {}
            }
        }

        // Window movement: down means scrolled content, up means the client
        // cleared the screen and the tracking epoch is over.
        if self.dirty_window_top != -1 {
            if (window.top as i64) > self.dirty_window_top {
                self.mark_entire_window_dirty(window);
            } else if (window.top as i64) < self.dirty_window_top {
                debug!("window moved upward, resetting console tracking");
                self.reset(console, terminal, true, out);
            }
        }
        self.dirty_window_top = window.top as i64;
        self.dirty_line_count = self
            .dirty_line_count
            .max(cursor_row as i64 + 1)
            .max(window.top as i64);
        self.scan_for_dirty_lines(console, window)?;

        // Lines below scrolled_count have left the buffer entirely (a burst
        // larger than the buffer between two ticks) and cannot be re-read.
        let first_line = self
            .scraped_line_count
            .min(window.top as i64 + self.scrolled_count)
            .max(self.scrolled_count);
        let stop_line = self.dirty_line_count.min(window.bottom() as i64) + self.scrolled_count;

        let w = window.width;
        let mut saw_modified = false;
        for line in first_line..stop_line {
            let row = (line - self.scrolled_count) as usize;
            let cur = console.read_line(row)?;
            let slot = line as usize % self.shadow.len();
            if saw_modified
                || line > self.max_buffered_line
                || cur[..w] != self.shadow[slot][..w]
            {
                trace!(line, "sending line");
                terminal.send_line(line, cur, w, out);
                let pad_attr = cur[w - 1].attr;
                let slot_row = &mut self.shadow[slot];
                slot_row[..w].copy_from_slice(cur);
                for cell in &mut slot_row[w..] {
                    *cell = Cell::blank(pad_attr);
                }
                self.max_buffered_line = self.max_buffered_line.max(line);
                // Once one line went out, everything after it in this pass
                // goes out too, keeping the downstream frame in order.
                saw_modified = true;
            }
        }

        self.scraped_line_count = window.top as i64 + self.scrolled_count;

        if (window.top as i64) > SYNC_THRESHOLD {
            let want = window.top as i64 - SYNC_THRESHOLD;
            if self.sync_row != want {
                self.create_sync_marker(console, want)?;
            }
        }

        terminal.finish_output(cursor_row as i64 + self.scrolled_count, cursor_col, out);
        Ok(())
    }

    /// Apply a new client geometry. Matches how a console window resizes by
    /// hand: the window stays bottom-pinned if it was at the buffer bottom
    /// or no longer fits, otherwise its top stays put.
    pub fn resize(&mut self, console: &mut Console, cols: usize, rows: usize) -> Result<()> {
        console.freeze();
        let result = self.resize_frozen(console, cols, rows);
        console.unfreeze();
        result
    }

    fn resize_frozen(&mut self, console: &mut Console, cols: usize, rows: usize) -> Result<()> {
        let (_, buffer_height) = console.buffer_size();
        let window = console.window_rect();
        anyhow::ensure!(
            cols >= 1 && cols <= MAX_CONSOLE_WIDTH,
            "refusing width {} (max {})",
            cols,
            MAX_CONSOLE_WIDTH
        );
        anyhow::ensure!(
            rows >= 1 && rows <= buffer_height,
            "refusing height {} (buffer holds {})",
            rows,
            buffer_height
        );

        let new_top = if window.bottom() == buffer_height || window.top + rows >= buffer_height {
            buffer_height - rows
        } else {
            window.top
        };

        if self.dirty_window_top != -1 && self.dirty_window_top < window.top as i64 {
            self.mark_entire_window_dirty(window);
        }
        self.dirty_window_top = new_top as i64;

        console.reposition(cols, new_top, rows)
    }

    fn mark_entire_window_dirty(&mut self, window: WindowRect) {
        self.dirty_line_count = self.dirty_line_count.max(window.bottom() as i64);
    }

    /// Advance the dirty high-water mark past every line that holds
    /// anything: a non-blank character, or an attribute differing from the
    /// immediately preceding cell in scan order.
    fn scan_for_dirty_lines(&mut self, console: &Console, window: WindowRect) -> Result<()> {
        let w = window.width;
        let mut prev_attr = if self.dirty_line_count >= 1 {
            console
                .read_cell(self.dirty_line_count as usize - 1, w - 1)?
                .attr
        } else {
            console.read_cell(0, 0)?.attr
        };
        for line in self.dirty_line_count.max(0)..window.bottom() as i64 {
            let cells = console.read_line(line as usize)?;
            for cell in &cells[..w] {
                if cell.ch != ' ' || cell.attr != prev_attr {
                    self.dirty_line_count = line + 1;
                }
                prev_attr = cell.attr;
            }
        }
        Ok(())
    }

    fn sync_marker_text(&self) -> Vec<Cell> {
        format!("S*Y*N*C*{:08x}", self.sync_counter)
            .bytes()
            .take(SYNC_MARKER_LEN)
            .map(|b| Cell::new(b as char, DEFAULT_ATTR))
            .collect()
    }

    /// Search column 0 for the marker, from its last known row upward.
    fn find_sync_marker(&self, console: &Console) -> Result<Option<i64>> {
        let marker = self.sync_marker_text();
        let (_, buffer_height) = console.buffer_size();
        let limit = (self.sync_row as usize + SYNC_MARKER_LEN).min(buffer_height);
        let mut column = Vec::with_capacity(limit);
        for row in 0..limit {
            column.push(console.read_cell(row, 0)?);
        }
        for i in (0..=self.sync_row as usize).rev() {
            if i + SYNC_MARKER_LEN > limit {
                continue;
            }
            if (0..SYNC_MARKER_LEN).all(|j| column[i + j].ch == marker[j].ch) {
                return Ok(Some(i as i64));
            }
        }
        Ok(None)
    }

    fn create_sync_marker(&mut self, console: &mut Console, row: i64) -> Result<()> {
        self.sync_counter = self.sync_counter.wrapping_add(1);
        let marker = self.sync_marker_text();
        self.sync_row = row;
        console.write_column(row as usize, 0, &marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rig {
        console: Console,
        scraper: Scraper,
        terminal: Terminal,
    }

    impl Rig {
        fn new(cols: usize, rows: usize, buffer_height: usize) -> Self {
            let console = Console::with_buffer_height(cols, rows, buffer_height).unwrap();
            let scraper = Scraper::new(&console);
            Self {
                console,
                scraper,
                terminal: Terminal::new(),
            }
        }

        fn feed(&mut self, bytes: &[u8]) {
            self.console.write_output(bytes);
        }

        fn feed_lines(&mut self, n: usize, text: &str) {
            for _ in 0..n {
                self.console.write_output(format!("{}\r\n", text).as_bytes());
            }
        }

        fn scrape(&mut self) -> String {
            let mut out = Vec::new();
            self.scraper
                .scrape(&mut self.console, &mut self.terminal, &mut out)
                .unwrap();
            String::from_utf8_lossy(&out).into_owned()
        }

        fn assert_invariants(&self) {
            let w = self.console.window_rect();
            assert!(self.scraper.scrolled_count() >= 0);
            assert!(
                self.scraper.scraped_line_count()
                    <= w.top as i64 + self.scraper.scrolled_count() + w.height as i64
            );
        }
    }

    #[test]
    fn first_scrape_paints_text_then_goes_quiet() {
        let mut rig = Rig::new(80, 25, 100);
        rig.feed(b"hi");
        let out = rig.scrape();
        assert!(out.contains("hi"));
        assert!(out.contains("\x1b[2C"), "cursor frame at column 2: {:?}", out);
        let out = rig.scrape();
        assert!(!out.contains("hi"), "unchanged line resent: {:?}", out);
        assert!(!out.contains("\x1b[K"));
        rig.assert_invariants();
    }

    #[test]
    fn attribute_only_change_in_last_cell_is_resent() {
        let mut rig = Rig::new(10, 4, 100);
        rig.feed("x".repeat(10).as_bytes());
        rig.scrape();
        // Rewrite only the final cell with reverse video.
        rig.feed(b"\r\x1b[9C\x1b[7mx");
        let out = rig.scrape();
        assert!(out.contains(";7m"), "attribute change not emitted: {:?}", out);
        rig.assert_invariants();
    }

    #[test]
    fn no_marker_at_threshold_exactly() {
        let mut rig = Rig::new(80, 25, 600);
        rig.feed_lines(224, "");
        assert_eq!(rig.console.window_rect().top, 200);
        rig.scrape();
        assert_eq!(rig.scraper.sync_row(), -1);
    }

    #[test]
    fn marker_placed_above_threshold() {
        let mut rig = Rig::new(80, 25, 600);
        rig.feed_lines(230, "x");
        let top = rig.console.window_rect().top as i64;
        assert!(top > SYNC_THRESHOLD);
        rig.scrape();
        assert_eq!(rig.scraper.sync_row(), top - SYNC_THRESHOLD);
        // The marker is a vertical strip in column 0.
        let strip: String = (0..SYNC_MARKER_LEN)
            .map(|i| {
                rig.console
                    .read_cell((top - SYNC_THRESHOLD) as usize + i, 0)
                    .unwrap()
                    .ch
            })
            .collect();
        assert!(strip.starts_with("S*Y*N*C*"), "strip was {:?}", strip);
    }

    #[test]
    fn buffer_scroll_is_detected_and_marker_replaced() {
        let mut rig = Rig::new(80, 25, 300);
        rig.feed_lines(280, "x");
        rig.scrape();
        let marker_before = rig.scraper.sync_row();
        assert!(marker_before > 0);
        assert_eq!(rig.scraper.scrolled_count(), 0);

        // 60 more lines run the cursor past the buffer bottom: 41 lines
        // scroll off the top.
        rig.feed_lines(60, "y");
        rig.scrape();
        assert_eq!(rig.scraper.scrolled_count(), 41);
        let top = rig.console.window_rect().top as i64;
        assert_eq!(rig.scraper.sync_row(), top - SYNC_THRESHOLD);
        rig.assert_invariants();
    }

    #[test]
    fn lost_marker_resets_tracking() {
        let mut rig = Rig::new(80, 25, 600);
        rig.feed_lines(230, "x");
        rig.scrape();
        assert!(rig.scraper.sync_row() >= 0);
        // Clobber the marker cells.
        let row = rig.scraper.sync_row() as usize;
        let junk: Vec<Cell> = "????????????????".chars().map(|c| Cell::new(c, 7)).collect();
        rig.console.write_column(row, 0, &junk).unwrap();
        let out = rig.scrape();
        assert_eq!(rig.scraper.scrolled_count(), 0);
        assert!(out.contains("\x1b[2J"), "reset did not clear downstream");
        // The same cycle plants a fresh marker below the window top.
        let top = rig.console.window_rect().top as i64;
        assert_eq!(rig.scraper.sync_row(), top - SYNC_THRESHOLD);
        rig.assert_invariants();
    }

    #[test]
    fn clear_screen_resets_and_repaints() {
        let mut rig = Rig::new(80, 25, 200);
        rig.feed_lines(60, "before");
        rig.scrape();
        rig.feed(b"\x1b[2Jafter");
        let out = rig.scrape();
        assert!(out.contains("\x1b[2J"));
        assert!(out.contains("after"));
        assert_eq!(rig.scraper.scrolled_count(), 0);
        rig.assert_invariants();
    }

    #[test]
    fn resize_bottom_pinned_window() {
        let mut rig = Rig::new(80, 25, 100);
        rig.feed_lines(120, "z");
        rig.scrape();
        assert_eq!(rig.console.window_rect().bottom(), 100);
        rig.scraper.resize(&mut rig.console, 120, 40).unwrap();
        let w = rig.console.window_rect();
        assert_eq!(w.top + 40, 100);
        assert_eq!(w.width, 120);
        rig.assert_invariants();
    }

    #[test]
    fn resize_keeps_top_when_window_fits() {
        let mut rig = Rig::new(80, 25, 3000);
        rig.feed_lines(10, "a");
        rig.scrape();
        let top_before = rig.console.window_rect().top;
        rig.scraper.resize(&mut rig.console, 100, 30).unwrap();
        assert_eq!(rig.console.window_rect().top, top_before);
    }

    #[test]
    fn double_resize_is_idempotent() {
        let mut rig = Rig::new(80, 25, 3000);
        rig.feed(b"hello");
        rig.scrape();
        rig.scraper.resize(&mut rig.console, 100, 30).unwrap();
        rig.scrape();
        rig.scraper.resize(&mut rig.console, 100, 30).unwrap();
        let out = rig.scrape();
        assert!(!out.contains("\x1b[K"), "second identical resize repainted: {:?}", out);
    }

    #[test]
    fn oversized_resize_is_rejected() {
        let mut rig = Rig::new(80, 25, 3000);
        assert!(rig
            .scraper
            .resize(&mut rig.console, MAX_CONSOLE_WIDTH + 1, 25)
            .is_err());
        assert_eq!(rig.console.window_rect().width, 80);
    }

    #[test]
    fn scrape_cursor_only_moves_forward() {
        let mut rig = Rig::new(40, 10, 3000);
        let mut prev_scraped = rig.scraper.scraped_line_count();
        for round in 0..30 {
            rig.feed_lines(7, &format!("round{}", round));
            rig.scrape();
            let scraped = rig.scraper.scraped_line_count();
            assert!(scraped >= prev_scraped, "scrape cursor moved backwards");
            prev_scraped = scraped;
            rig.assert_invariants();
        }
    }
}
