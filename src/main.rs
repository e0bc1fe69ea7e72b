// memsim: sparse memory simulator with a time-travel trace inspector

use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use clap::Parser;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use memsim::config::{
    SimulatorConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MEMORY_POWER, DEFAULT_SNAPSHOT_LIMIT,
    DEFAULT_START,
};
use memsim::replay::ReplayEngine;
use memsim::trace::parse_trace;
use memsim::ui::App;

/// Replay a memory trace against a sparse simulated address space
#[derive(clap::Parser)]
#[command(name = "memsim", version)]
struct Cli {
    /// Trace file to replay
    trace: PathBuf,

    /// First simulated address (ignored if the trace has a `range` line)
    #[arg(long, default_value_t = DEFAULT_START, value_parser = parse_address)]
    start: u64,

    /// The simulated range is 2^N bytes wide
    #[arg(long, default_value_t = DEFAULT_MEMORY_POWER)]
    memory_power: u32,

    /// Leaf size of the segment tree, in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_parser = parse_address)]
    chunk_size: u64,

    /// Budget for the replay history, in MiB
    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_LIMIT / (1024 * 1024))]
    snapshot_limit_mb: usize,

    /// Print the replay output instead of opening the inspector
    #[arg(long)]
    batch: bool,
}

impl Cli {
    fn config(&self) -> SimulatorConfig {
        SimulatorConfig {
            start: self.start,
            memory_power: self.memory_power,
            chunk_size: self.chunk_size,
            snapshot_limit: self.snapshot_limit_mb.saturating_mul(1024 * 1024),
        }
    }
}

/// Decimal or `0x`-prefixed hexadecimal
fn parse_address(text: &str) -> Result<u64, String> {
    let cleaned = text.replace('_', "");
    let parsed = match cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", text, e))
}

fn main() -> anyhow::Result<()> {
    initialize_logging();

    let cli = Cli::parse();

    let source = fs::read_to_string(&cli.trace)
        .with_context(|| format!("cannot read trace file '{}'", cli.trace.display()))?;
    let program = parse_trace(&source)
        .with_context(|| format!("cannot parse '{}'", cli.trace.display()))?;
    info!(statements = program.statements.len(), "parsed trace");

    let mut engine = ReplayEngine::new(program, &cli.config())?;
    if let Err(e) = engine.run() {
        warn!(error = %e, "replay stopped early");
        if !cli.batch {
            eprintln!("{}", e);
            eprintln!("Entering inspector with partial history...");
        }
    }

    if cli.batch {
        for line in engine.output().get_output() {
            println!("{}", line);
        }
        if engine.diagnostic().is_some() {
            std::process::exit(1);
        }
        return Ok(());
    }

    engine.rewind_to_start()?;
    run_inspector(engine, source)
}

fn run_inspector(engine: ReplayEngine, source: String) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(engine, source);
    let res = app.run(&mut terminal);

    // Restore terminal even if the app failed
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res.context("inspector failed")
}

fn initialize_logging() {
    let env_filter = env::var("RUST_LOG").unwrap_or_default();
    let filter = EnvFilter::from_str(&env_filter).unwrap_or_else(|_| EnvFilter::new("off"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_filter(filter))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("4096"), Ok(4096));
        assert_eq!(parse_address("0x1000"), Ok(4096));
        assert_eq!(parse_address("0x1_000"), Ok(4096));
        assert!(parse_address("0xzz").is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["memsim", "trace.mt"]);
        assert_eq!(cli.config(), SimulatorConfig::default());
        assert!(!cli.batch);
    }
}
