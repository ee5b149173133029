//! winbridge-core - shared building blocks for the winbridge workspace
//!
//! Leaf crate holding everything both sides of a session agree on:
//! - `cell`: the console cell and its packed attribute word
//! - `codec`: raw byte buffers with the wire's integer/string encodings
//! - `protocol`: typed control-pipe messages and packet framing
//! - `pipes`: local pipe transport (bind/accept/connect with timeouts)
//! - `keys`: virtual-key codes, modifier masks, and key-event records
//! - `cmdline`: command-line join/split used on both ends of StartProcess
//! - `debug`: WINPTYDBG / WINPTYDBGFLAGS helpers

pub mod cell;
pub mod cmdline;
pub mod codec;
pub mod debug;
pub mod keys;
pub mod pipes;
pub mod protocol;

pub use cell::{Cell, DEFAULT_ATTR, MAX_CONSOLE_WIDTH};
pub use keys::{InputRecord, Key};
pub use pipes::{PipeListener, PipeScope, PipeStream};
pub use protocol::{Message, STATUS_ERROR, STATUS_OK, STILL_ACTIVE};
