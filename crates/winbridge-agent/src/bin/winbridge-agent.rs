//! winbridge-agent - console-side agent process.
//!
//! Ordinarily launched by the winbridge library with the two session pipe
//! names; also carries diagnostic modes for poking at the input pipeline.

use std::path::PathBuf;

use clap::Parser;
use tracing::error;
use winbridge_agent::scraper::BUFFER_LINE_COUNT;
use winbridge_core::cell::MAX_CONSOLE_WIDTH;
use winbridge_core::pipes::PipeStream;

#[derive(Parser, Debug)]
#[command(name = "winbridge-agent", version)]
#[command(about = "Console-side agent for winbridge sessions")]
struct Args {
    /// Control pipe name
    control_pipe: Option<PathBuf>,

    /// Data pipe name
    data_pipe: Option<PathBuf>,

    /// Initial console width
    cols: Option<usize>,

    /// Initial console height
    rows: Option<usize>,

    /// Dump key events translated from terminal input
    #[arg(long)]
    show_input: bool,

    /// Include mouse sequences in the --show-input dump
    #[arg(long, requires = "show_input")]
    with_mouse: bool,

    /// Print the desktop name a session would use
    #[arg(long)]
    create_desktop: bool,
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

    if args.show_input {
        std::process::exit(winbridge_agent::show_input::run(args.with_mouse));
    }
    if args.create_desktop {
        // Desktop isolation is not modelled on this platform; report the
        // ambient display so callers see what a child would attach to.
        println!("{}", std::env::var("DISPLAY").unwrap_or_default());
        return;
    }

    let (Some(control), Some(data), Some(cols), Some(rows)) =
        (args.control_pipe, args.data_pipe, args.cols, args.rows)
    else {
        eprintln!("Usage: winbridge-agent <controlPipeName> <dataPipeName> <cols> <rows>");
        std::process::exit(1);
    };
    if cols == 0 || cols > MAX_CONSOLE_WIDTH || rows == 0 || rows > BUFFER_LINE_COUNT {
        eprintln!("winbridge-agent: bad geometry {}x{}", cols, rows);
        std::process::exit(1);
    }

    let control = match PipeStream::connect(&control).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("winbridge-agent: {:#}", e);
            std::process::exit(1);
        }
    };
    let data = match PipeStream::connect(&data).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("winbridge-agent: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = winbridge_agent::run(control, data, cols, rows).await {
        error!(error = %e, "session ended abnormally");
    }
}
