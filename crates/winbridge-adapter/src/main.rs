//! winbridge - run a console program behind a pseudo-terminal bridge.
//!
//! Presents an ordinary raw-mode TTY to the user: stdin bytes go to the
//! session's data pipe, scraper output comes back to stdout, window-size
//! changes propagate as resize requests, and the process exits with the
//! child's exit code.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::tty::IsTty;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use winbridge::{Session, EXIT_STILL_ACTIVE};
use winbridge_core::cmdline::join_cmdline;

#[derive(Parser, Debug)]
#[command(name = "winbridge", version)]
#[command(about = "Run a console program behind a pseudo-terminal bridge")]
struct Args {
    /// Program to run
    prog: String,

    /// Arguments for the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Re-enables cooked mode on every exit path, including panics.
struct RawModeGuard {
    active: AtomicBool,
}

impl RawModeGuard {
    fn enable() -> Result<Self> {
        enable_raw_mode().context("failed to enter raw mode")?;
        Ok(Self {
            active: AtomicBool::new(true),
        })
    }

    fn restore(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            disable_raw_mode().ok();
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if winbridge_core::debug::tracing_requested() {
        "debug".to_string()
    } else {
        "warn".to_string()
    };
    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => std::process::exit(code as i32),
        Err(e) => {
            eprintln!("winbridge: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<u32> {
    if !std::io::stdin().is_tty() {
        bail!("input is not a tty");
    }
    if !std::io::stdout().is_tty() {
        bail!("output is not a tty");
    }

    let (mut cols, mut rows) = crossterm::terminal::size().context("cannot query window size")?;
    let mut session = Session::open(cols as usize, rows as usize).await?;

    let cmdline = join_cmdline(std::iter::once(args.prog.as_str()).chain(args.args.iter().map(String::as_str)));
    let cwd = std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let env: Vec<(String, String)> = std::env::vars().collect();
    session.start_process("", &cmdline, &cwd, Some(&env[..])).await?;

    let data = session.take_data_pipe()?;
    let (mut data_rd, mut data_wr) = data.into_split();

    // Blocking stdin reads live on their own thread; everything else is
    // driven from the select loop below.
    let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    std::thread::spawn(move || {
        use std::io::Read;
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdin_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut winch = signal(SignalKind::window_change()).context("SIGWINCH handler")?;
    let raw = RawModeGuard::enable()?;

    let mut stdout = tokio::io::stdout();
    let mut buf = [0u8; 4096];
    let mut stdin_open = true;
    loop {
        tokio::select! {
            read = data_rd.read(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stdout.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                        stdout.flush().await.ok();
                    }
                }
            }
            bytes = stdin_rx.recv(), if stdin_open => {
                match bytes {
                    Some(bytes) => {
                        if data_wr.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!("stdin closed");
                        stdin_open = false;
                        data_wr.shutdown().await.ok();
                    }
                }
            }
            _ = winch.recv() => {
                if let Ok((new_cols, new_rows)) = crossterm::terminal::size() {
                    if (new_cols, new_rows) != (cols, rows) {
                        (cols, rows) = (new_cols, new_rows);
                        if let Err(e) = session.set_size(cols as usize, rows as usize).await {
                            warn!(error = %e, "resize rejected");
                        }
                    }
                }
            }
        }
    }

    let code = fetch_exit_code(&mut session).await;
    raw.restore();
    session.close().await;
    Ok(code)
}

/// The agent closes the data pipe right after the child's final frame, so
/// the exit code is normally available immediately; poll briefly in case
/// the exit notification is still in flight.
async fn fetch_exit_code(session: &mut Session) -> u32 {
    for _ in 0..20 {
        match session.get_exit_code().await {
            Ok(EXIT_STILL_ACTIVE) => tokio::time::sleep(Duration::from_millis(25)).await,
            Ok(code) => return code,
            Err(_) => return 0,
        }
    }
    0
}
