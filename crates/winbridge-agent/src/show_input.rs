//! `--show-input` diagnostic: run the translator against the live terminal
//! and dump every byte chunk and synthesized key event.

use std::io::{Read, Write};
use std::sync::mpsc;
use std::time::Duration;

use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use winbridge_core::debug::dump_input_bytes;
use winbridge_core::keys::Key;

use crate::console::Console;
use crate::console_input::{ConsoleInput, DsrSender};

struct StdoutDsr;

impl DsrSender for StdoutDsr {
    fn send_dsr(&mut self) {
        let mut out = std::io::stdout();
        out.write_all(b"\x1b[6n").ok();
        out.flush().ok();
    }
}

pub fn run(with_mouse: bool) -> i32 {
    println!("Dumping translated key events. Press Ctrl-C to quit.");
    if enable_raw_mode().is_err() {
        eprintln!("winbridge-agent: stdin is not a terminal");
        return 1;
    }
    if with_mouse {
        execute!(std::io::stdout(), EnableMouseCapture).ok();
    }

    let mut console = match Console::new(80, 25) {
        Ok(c) => c,
        Err(_) => return 1,
    };
    let mut input = ConsoleInput::new();
    let mut dsr = StdoutDsr;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 256];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut quit = false;
    while !quit {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(bytes) => {
                print!("input: {}\r\n", dump_input_bytes(&bytes));
                input.write_input(&mut console, &bytes, &mut dsr);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                input.flush_incomplete_escape(&mut console);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        for rec in console.take_input_records() {
            let key = Key::new(rec.virtual_key, rec.unicode_char, rec.control_key_state);
            print!(
                "  {} {}\r\n",
                if rec.key_down { "down" } else { "up  " },
                key
            );
        }
        if console.take_ctrl_c_events() > 0 {
            quit = true;
        }
        std::io::stdout().flush().ok();
    }

    if with_mouse {
        execute!(std::io::stdout(), DisableMouseCapture).ok();
    }
    disable_raw_mode().ok();
    0
}
