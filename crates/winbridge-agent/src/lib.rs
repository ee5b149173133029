//! winbridge-agent - the console side of a bridge session.
//!
//! The agent owns an in-process console model, hosts the child process on a
//! pty whose output feeds that model, scrapes the model for changes to send
//! downstream, and translates downstream bytes into synthetic console key
//! events.
//!
//! # Components
//! - `console` + `feed`: the console-subsystem model and its VT write path
//! - `scraper` + `terminal`: change detection and ANSI emission
//! - `input_map` + `console_input` + `layout`: byte stream → key events
//! - `child`: pty-hosted child process
//! - `agent`: the single-task control/data/poll loop

pub mod agent;
pub mod child;
pub mod console;
pub mod console_input;
mod feed;
pub mod input_map;
pub mod layout;
pub mod scraper;
pub mod show_input;
pub mod terminal;

pub use agent::{run, POLL_INTERVAL};
pub use console::Console;
pub use scraper::{Scraper, BUFFER_LINE_COUNT, SYNC_MARKER_LEN, SYNC_THRESHOLD};
