//! winbridge - client-side session library.
//!
//! A [`Session`] owns the two pipes of one bridge and the agent process
//! behind them. `open` creates the pipes, launches the agent, and performs
//! the handshake; the typed request methods then drive the agent over the
//! control pipe while the data pipe carries terminal bytes both ways.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};
use winbridge_core::cell::MAX_CONSOLE_WIDTH;
use winbridge_core::codec::encode_env_block;
use winbridge_core::pipes::{PipeListener, PipeScope, PipeStream};
use winbridge_core::protocol::{read_reply, write_message, Message, STATUS_OK, STILL_ACTIVE};

/// Pipe namespace for sessions opened through this library. Keeping the
/// counter inside the scope value keeps concurrent sessions independent.
static PIPE_SCOPE: Lazy<PipeScope> = Lazy::new(|| PipeScope::new("winbridge"));

/// Exit-code value while the child is still running (or never started).
pub const EXIT_STILL_ACTIVE: u32 = STILL_ACTIVE;

/// A live bridge session.
#[derive(Debug)]
pub struct Session {
    control: PipeStream,
    data: Option<PipeStream>,
    data_path: PathBuf,
    agent: tokio::process::Child,
}

impl Session {
    /// Create the session pipes, launch the agent, and shake hands.
    /// Failure tears everything down: no pipes or agent are leaked.
    pub async fn open(cols: usize, rows: usize) -> Result<Session> {
        if cols == 0 || cols > MAX_CONSOLE_WIDTH || rows == 0 {
            bail!("bad console geometry {}x{}", cols, rows);
        }

        let pair = PIPE_SCOPE.next_pair();
        let control_listener = PipeListener::bind(&pair.control)?;
        let data_listener = PipeListener::bind(&pair.data)?;

        let agent_program = find_agent_program()?;
        let mut cmd = tokio::process::Command::new(&agent_program);
        cmd.arg(&pair.control)
            .arg(&pair.data)
            .arg(cols.to_string())
            .arg(rows.to_string())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null());
        if show_console() {
            cmd.stderr(std::process::Stdio::inherit());
        } else {
            cmd.stderr(std::process::Stdio::null());
        }
        let mut agent = cmd
            .spawn()
            .with_context(|| format!("failed to launch {}", agent_program.display()))?;
        debug!(agent = %agent_program.display(), pid = ?agent.id(), "agent launched");

        let connected = async {
            let control = control_listener.accept().await?;
            let data = data_listener.accept().await?;
            Ok::<_, anyhow::Error>((control, data))
        }
        .await;

        let (mut control, data) = match connected {
            Ok(ends) => ends,
            Err(e) => {
                agent.kill().await.ok();
                return Err(e.context("agent did not connect"));
            }
        };

        // Handshake: anything but a zero word means whatever connected to
        // our pipes is not the agent we launched.
        let handshake = timeout(winbridge_core::pipes::CONNECT_TIMEOUT, async {
            write_message(&mut control, &Message::Ping).await?;
            let word = read_reply(&mut control).await?;
            if word != 0 {
                bail!("unexpected handshake reply {}", word);
            }
            Ok(())
        })
        .await
        .unwrap_or_else(|_| Err(anyhow!("handshake timed out")));
        if let Err(e) = handshake {
            agent.kill().await.ok();
            return Err(e.context("handshake failed"));
        }

        Ok(Session {
            control,
            data: Some(data),
            data_path: pair.data,
            agent,
        })
    }

    async fn request(&mut self, msg: &Message) -> Result<u32> {
        write_message(&mut self.control, msg)
            .await
            .context("control pipe write failed")?;
        read_reply(&mut self.control)
            .await
            .context("control pipe read failed")
    }

    /// Launch the child process inside the agent's console.
    ///
    /// `env` of `None` lets the child inherit the agent's environment; the
    /// marshalled block always carries the extra trailing NUL.
    pub async fn start_process(
        &mut self,
        app: &str,
        cmdline: &str,
        cwd: &str,
        env: Option<&[(String, String)]>,
    ) -> Result<()> {
        let env_block = match env {
            None => String::new(),
            Some(vars) => encode_env_block(vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
        };
        let msg = Message::StartProcess {
            app: app.to_string(),
            cmdline: cmdline.to_string(),
            cwd: cwd.to_string(),
            env: env_block,
            desktop: desktop_name(),
        };
        let status = self.request(&msg).await?;
        if status != STATUS_OK {
            bail!("agent refused to start process (status {})", status);
        }
        Ok(())
    }

    pub async fn set_size(&mut self, cols: usize, rows: usize) -> Result<()> {
        let msg = Message::SetSize {
            cols: cols as u32,
            rows: rows as u32,
        };
        let status = self.request(&msg).await?;
        if status != STATUS_OK {
            bail!("agent refused size {}x{} (status {})", cols, rows, status);
        }
        Ok(())
    }

    pub async fn set_console_mode(&mut self, mode: u32) -> Result<()> {
        let status = self.request(&Message::SetConsoleMode { mode }).await?;
        if status != STATUS_OK {
            bail!("agent refused console mode (status {})", status);
        }
        Ok(())
    }

    /// Child exit code; [`EXIT_STILL_ACTIVE`] while it is running.
    pub async fn get_exit_code(&mut self) -> Result<u32> {
        self.request(&Message::GetExitCode).await
    }

    /// Child process id, or 0 before a child is started.
    pub async fn get_process_id(&mut self) -> Result<u32> {
        self.request(&Message::GetProcessId).await
    }

    /// Take ownership of the data pipe (once).
    pub fn take_data_pipe(&mut self) -> Result<PipeStream> {
        self.data
            .take()
            .ok_or_else(|| anyhow!("data pipe already taken"))
    }

    pub fn data_pipe_name(&self) -> &Path {
        &self.data_path
    }

    /// Close both pipes; the agent observes the disconnect and exits.
    pub async fn close(mut self) {
        drop(self.data.take());
        drop(self.control);
        match timeout(Duration::from_millis(1000), self.agent.wait()).await {
            Ok(Ok(status)) => debug!(?status, "agent exited"),
            Ok(Err(e)) => warn!(error = %e, "wait on agent failed"),
            Err(_) => {
                warn!("agent did not exit after close, killing it");
                self.agent.kill().await.ok();
            }
        }
    }
}

fn show_console() -> bool {
    std::env::var("WINPTY_SHOW_CONSOLE").map_or(false, |v| !v.is_empty())
}

fn desktop_name() -> String {
    std::env::var("DISPLAY").unwrap_or_default()
}

/// The agent binary ships next to whatever executable links this library;
/// `WINBRIDGE_AGENT` overrides for development layouts.
fn find_agent_program() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("WINBRIDGE_AGENT") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
        bail!("WINBRIDGE_AGENT={} does not exist", path.display());
    }
    let exe = std::env::current_exe().context("current_exe failed")?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow!("executable has no parent directory"))?;
    let candidate = dir.join("winbridge-agent");
    if candidate.exists() {
        return Ok(candidate);
    }
    bail!(
        "winbridge-agent not found next to {} (set WINBRIDGE_AGENT)",
        exe.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_oversized_geometry() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt.block_on(Session::open(0, 25)).unwrap_err();
        assert!(err.to_string().contains("geometry"));
        let err = rt
            .block_on(Session::open(MAX_CONSOLE_WIDTH + 1, 25))
            .unwrap_err();
        assert!(err.to_string().contains("geometry"));
    }
}
