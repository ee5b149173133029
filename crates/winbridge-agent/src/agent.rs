//! The agent loop.
//!
//! One task owns the console, scraper, and translator. Reader tasks turn
//! the control pipe into a stream of typed messages and the data pipe into
//! a stream of byte chunks; the child's pty reader thread does the same for
//! child output. A 25 ms interval drives scrape cycles and the input-flush
//! timeout. Every control request gets exactly one reply word.

use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use winbridge_core::keys::{vk, InputRecord, LEFT_ALT_PRESSED, RIGHT_ALT_PRESSED};
use winbridge_core::protocol::{
    read_message, write_reply, Message, STATUS_ERROR, STATUS_OK, STILL_ACTIVE,
};
use winbridge_core::PipeStream;

use crate::child::{ChildEvent, ChildProcess, StartSpec};
use crate::console::Console;
use crate::console_input::{ConsoleInput, DsrSender};
use crate::scraper::Scraper;
use crate::terminal::Terminal;

/// Scrape period. Latency/CPU trade-off; the reference value.
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Collects DSR queries for the next data-pipe write.
#[derive(Default)]
struct DsrQueue(Vec<u8>);

impl DsrSender for DsrQueue {
    fn send_dsr(&mut self) {
        self.0.extend_from_slice(b"\x1b[6n");
    }
}

/// Run a session on connected control and data pipes. Returns when either
/// peer disconnects.
pub async fn run(control: PipeStream, data: PipeStream, cols: usize, rows: usize) -> Result<()> {
    let mut console = Console::new(cols, rows)?;
    let mut scraper = Scraper::new(&console);
    let mut terminal = Terminal::new();
    let mut input = ConsoleInput::new();

    let (mut control_rd, mut control_wr) = control.into_split();
    let (mut data_rd, mut data_wr) = data.into_split();

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            match read_message(&mut control_rd).await {
                Ok(Some(msg)) => {
                    if msg_tx.send(msg).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "control pipe failed");
                    break;
                }
            }
        }
    });

    let (data_tx, mut data_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match data_rd.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if data_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let (child_tx, mut child_rx) = mpsc::unbounded_channel::<ChildEvent>();
    let mut child: Option<ChildProcess> = None;
    let mut exit_code: Option<u32> = None;
    let mut output_closed = false;
    let mut pending_surrogate: Option<u16> = None;
    let mut data_open = true;

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(cols, rows, "agent session started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                input.flush_incomplete_escape(&mut console);
                if data_open {
                    let mut out = Vec::new();
                    if let Err(e) = scraper.scrape(&mut console, &mut terminal, &mut out) {
                        // Abort this cycle only; the next tick starts fresh.
                        warn!(error = %e, "scrape cycle aborted");
                    } else if !out.is_empty() && data_wr.write_all(&out).await.is_err() {
                        debug!("data pipe gone, shutting down");
                        break;
                    }
                }
                deliver_input(&mut console, &mut child, &mut pending_surrogate);
                // Close the data pipe only once the child is gone AND its
                // last output has been scraped, or the final frame races
                // the pty reader thread.
                if exit_code.is_some() && output_closed && data_open {
                    let _ = data_wr.shutdown().await;
                    data_open = false;
                }
            }
            msg = msg_rx.recv() => {
                let Some(msg) = msg else {
                    debug!("control pipe closed, shutting down");
                    break;
                };
                let reply = dispatch(
                    msg,
                    &mut console,
                    &mut scraper,
                    &mut child,
                    &child_tx,
                    exit_code,
                );
                if write_reply(&mut control_wr, reply).await.is_err() {
                    break;
                }
            }
            bytes = data_rx.recv() => {
                let Some(bytes) = bytes else {
                    debug!("data pipe closed, shutting down");
                    break;
                };
                let mut dsr = DsrQueue::default();
                input.write_input(&mut console, &bytes, &mut dsr);
                if !dsr.0.is_empty() && data_open && data_wr.write_all(&dsr.0).await.is_err() {
                    break;
                }
                deliver_input(&mut console, &mut child, &mut pending_surrogate);
            }
            Some(event) = child_rx.recv() => {
                match event {
                    ChildEvent::Output(bytes) => console.write_output(&bytes),
                    ChildEvent::OutputClosed => output_closed = true,
                    ChildEvent::Exited(code) => {
                        info!(code, "child exited");
                        exit_code = Some(code);
                    }
                }
            }
        }
    }

    if let Some(child) = child.as_mut() {
        child.kill();
    }
    info!("agent session ended");
    Ok(())
}

fn dispatch(
    msg: Message,
    console: &mut Console,
    scraper: &mut Scraper,
    child: &mut Option<ChildProcess>,
    child_tx: &mpsc::UnboundedSender<ChildEvent>,
    exit_code: Option<u32>,
) -> u32 {
    match msg {
        Message::Ping => STATUS_OK,
        Message::StartProcess {
            app,
            cmdline,
            cwd,
            env,
            desktop,
        } => {
            // Desktop placement is not modelled here; the field travels
            // with the message for clients that care.
            let _ = desktop;
            if child.is_some() {
                warn!("start requested but a child is already running");
                return STATUS_ERROR;
            }
            let spec = StartSpec {
                app,
                cmdline,
                cwd,
                env,
            };
            let window = console.window_rect();
            match ChildProcess::spawn(&spec, window.width as u16, window.height as u16, child_tx.clone())
            {
                Ok(c) => {
                    *child = Some(c);
                    STATUS_OK
                }
                Err(e) => {
                    warn!(error = %e, "start_process failed");
                    STATUS_ERROR
                }
            }
        }
        Message::SetSize { cols, rows } | Message::WindowSize { cols, rows } => {
            match scraper.resize(console, cols as usize, rows as usize) {
                Ok(()) => {
                    if let Some(c) = child.as_ref() {
                        c.resize(cols as u16, rows as u16).ok();
                    }
                    STATUS_OK
                }
                Err(e) => {
                    warn!(error = %e, cols, rows, "resize rejected");
                    STATUS_ERROR
                }
            }
        }
        Message::GetExitCode => exit_code.unwrap_or(STILL_ACTIVE),
        Message::GetProcessId => child.as_ref().map(|c| c.pid()).unwrap_or(0),
        Message::SetConsoleMode { mode } => {
            console.set_input_mode(mode);
            STATUS_OK
        }
        Message::InputRecord(rec) => {
            console.write_input(&[rec]);
            STATUS_OK
        }
    }
}

/// Drain the console input queue into the child's terminal.
fn deliver_input(
    console: &mut Console,
    child: &mut Option<ChildProcess>,
    pending_surrogate: &mut Option<u16>,
) {
    let ctrl_c = console.take_ctrl_c_events();
    let records = console.take_input_records();
    let Some(child) = child.as_mut() else {
        return;
    };
    let mut bytes = Vec::new();
    // A Ctrl-C event travels through the pty line discipline, which is
    // what actually interrupts the foreground process group.
    for _ in 0..ctrl_c {
        bytes.push(0x03);
    }
    for rec in records {
        encode_record(&mut bytes, rec, pending_surrogate);
    }
    if !bytes.is_empty() {
        if let Err(e) = child.write(&bytes) {
            warn!(error = %e, "write to child failed");
        }
    }
}

/// Re-encode one key-down record as terminal bytes for the pty child.
fn encode_record(out: &mut Vec<u8>, rec: InputRecord, pending_surrogate: &mut Option<u16>) {
    if !rec.key_down {
        return;
    }
    if rec.unicode_char != 0 {
        let alt = rec.control_key_state & (LEFT_ALT_PRESSED | RIGHT_ALT_PRESSED) != 0;
        if let Some(high) = pending_surrogate.take() {
            if (0xDC00..=0xDFFF).contains(&rec.unicode_char) {
                let scalar =
                    0x10000 + (((high as u32) - 0xD800) << 10) + ((rec.unicode_char as u32) - 0xDC00);
                if let Some(ch) = char::from_u32(scalar) {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
                return;
            }
        }
        if (0xD800..=0xDBFF).contains(&rec.unicode_char) {
            *pending_surrogate = Some(rec.unicode_char);
            return;
        }
        if let Some(ch) = char::from_u32(rec.unicode_char as u32) {
            if alt {
                out.push(0x1B);
            }
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
        return;
    }
    let seq: &[u8] = match rec.virtual_key {
        vk::UP => b"\x1b[A",
        vk::DOWN => b"\x1b[B",
        vk::RIGHT => b"\x1b[C",
        vk::LEFT => b"\x1b[D",
        vk::HOME => b"\x1b[H",
        vk::END => b"\x1b[F",
        vk::PRIOR => b"\x1b[5~",
        vk::NEXT => b"\x1b[6~",
        vk::INSERT => b"\x1b[2~",
        vk::DELETE => b"\x1b[3~",
        vk::F1 => b"\x1bOP",
        vk::F2 => b"\x1bOQ",
        vk::F3 => b"\x1bOR",
        vk::F4 => b"\x1bOS",
        vk::F5 => b"\x1b[15~",
        vk::F6 => b"\x1b[17~",
        vk::F7 => b"\x1b[18~",
        vk::F8 => b"\x1b[19~",
        vk::F9 => b"\x1b[20~",
        vk::F10 => b"\x1b[21~",
        vk::F11 => b"\x1b[23~",
        vk::F12 => b"\x1b[24~",
        _ => return,
    };
    out.extend_from_slice(seq);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrow_record_becomes_escape_sequence() {
        let mut out = Vec::new();
        let mut surrogate = None;
        encode_record(
            &mut out,
            InputRecord::key(true, vk::UP, 0, 0),
            &mut surrogate,
        );
        encode_record(
            &mut out,
            InputRecord::key(false, vk::UP, 0, 0),
            &mut surrogate,
        );
        assert_eq!(out, b"\x1b[A");
    }

    #[test]
    fn surrogate_pair_reassembles() {
        let mut out = Vec::new();
        let mut surrogate = None;
        encode_record(
            &mut out,
            InputRecord::key(true, 0, 0xD83E, 0),
            &mut surrogate,
        );
        assert!(out.is_empty());
        encode_record(
            &mut out,
            InputRecord::key(true, 0, 0xDD80, 0),
            &mut surrogate,
        );
        assert_eq!(out, "🦀".as_bytes());
    }

    #[test]
    fn alt_char_gets_escape_prefix() {
        let mut out = Vec::new();
        let mut surrogate = None;
        encode_record(
            &mut out,
            InputRecord::key(true, b'X' as u16, b'x' as u16, LEFT_ALT_PRESSED),
            &mut surrogate,
        );
        assert_eq!(out, b"\x1bx");
    }

    #[test]
    fn modifier_presses_produce_no_bytes() {
        let mut out = Vec::new();
        let mut surrogate = None;
        encode_record(
            &mut out,
            InputRecord::key(true, vk::CONTROL, 0, 0x8),
            &mut surrogate,
        );
        assert!(out.is_empty());
    }
}
