//! The pty-hosted child process.
//!
//! The child runs on a pty; its output is forwarded over a channel into the
//! agent task, which feeds the console model. A second thread waits for
//! exit and reports the code the same way.

use std::collections::HashMap;
use std::io::{Read, Write};

use anyhow::{bail, Context, Result};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use winbridge_core::cmdline::split_cmdline;
use winbridge_core::codec::decode_env_block;

/// Child lifecycle events delivered to the agent task.
#[derive(Debug)]
pub enum ChildEvent {
    Output(Vec<u8>),
    /// The pty has no more output (every process holding it has let go).
    OutputClosed,
    Exited(u32),
}

pub struct StartSpec {
    pub app: String,
    pub cmdline: String,
    pub cwd: String,
    /// Double-NUL environment block; empty means inherit.
    pub env: String,
}

pub struct ChildProcess {
    pid: u32,
    writer: Box<dyn Write + Send>,
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl ChildProcess {
    pub fn spawn(
        spec: &StartSpec,
        cols: u16,
        rows: u16,
        events: UnboundedSender<ChildEvent>,
    ) -> Result<Self> {
        let argv = if spec.cmdline.is_empty() {
            vec![spec.app.clone()]
        } else {
            split_cmdline(&spec.cmdline)
        };
        if argv.is_empty() || argv[0].is_empty() {
            bail!("empty command line");
        }
        let program = if spec.app.is_empty() { &argv[0] } else { &spec.app };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("openpty failed")?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(&argv[1..]);
        if !spec.cwd.is_empty() {
            cmd.cwd(&spec.cwd);
        }

        // CommandBuilder starts from an empty environment, so inherit
        // explicitly unless the caller supplied a block.
        let supplied: HashMap<String, String> = decode_env_block(&spec.env).into_iter().collect();
        if supplied.is_empty() {
            for (key, value) in std::env::vars() {
                cmd.env(key, value);
            }
        } else {
            for (key, value) in &supplied {
                cmd.env(key, value);
            }
        }
        if !supplied.contains_key("TERM") {
            cmd.env("TERM", "xterm-256color");
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("failed to spawn {}", program))?;
        let pid = child.process_id().unwrap_or(0);
        info!(pid, program = %program, "child spawned");

        let writer = pair.master.take_writer().context("pty writer")?;
        let mut reader = pair.master.try_clone_reader().context("pty reader")?;
        let killer = child.clone_killer();

        let output_events = events.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if output_events.send(ChildEvent::Output(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("child output stream closed");
            let _ = output_events.send(ChildEvent::OutputClosed);
        });

        std::thread::spawn(move || {
            let code = match child.wait() {
                Ok(status) => status.exit_code(),
                Err(e) => {
                    warn!(error = %e, "wait on child failed");
                    1
                }
            };
            let _ = events.send(ChildEvent::Exited(code));
        });

        Ok(Self {
            pid,
            writer,
            master: pair.master,
            killer,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Write input bytes to the child's terminal.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("pty resize failed")
    }

    pub fn kill(&mut self) {
        self.killer.kill().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn spawn_echoes_output_and_exit() {
        let (tx, mut rx) = unbounded_channel();
        let spec = StartSpec {
            app: String::new(),
            cmdline: "echo hello-child".to_string(),
            cwd: String::new(),
            env: String::new(),
        };
        let child = ChildProcess::spawn(&spec, 80, 25, tx).unwrap();
        assert!(child.pid() > 0);

        // Drain until both threads hang up so late output is not missed.
        let mut output = Vec::new();
        let mut exit = None;
        loop {
            match tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv())
                .await
                .expect("child events timed out")
            {
                Some(ChildEvent::Output(bytes)) => output.extend_from_slice(&bytes),
                Some(ChildEvent::OutputClosed) => {}
                Some(ChildEvent::Exited(code)) => exit = Some(code),
                None => break,
            }
        }
        assert_eq!(exit, Some(0));
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("hello-child"), "output was {:?}", text);
    }

    #[test]
    fn empty_command_line_is_rejected() {
        let (tx, _rx) = unbounded_channel();
        let spec = StartSpec {
            app: String::new(),
            cmdline: String::new(),
            cwd: String::new(),
            env: String::new(),
        };
        assert!(ChildProcess::spawn(&spec, 80, 25, tx).is_err());
    }
}
