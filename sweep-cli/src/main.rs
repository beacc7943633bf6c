//! # sweep
//!
//! Runs every combination of a parameter matrix until each has the target
//! number of recorded trials.
//!
//! ## Example
//!
//! ```bash
//! # How many trials are still missing?
//! sweep --config sweep.toml --target 3 --dry
//!
//! # Run them, recording into the `owl` table
//! sweep --config sweep.toml --target 3 --mode owl
//!
//! # Run the job once by hand with extra arguments; records nothing
//! sweep --config sweep.toml -- -Dipa.duration=10
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{manual, sweep};

/// Parameter sweep runner.
#[derive(Parser, Debug)]
#[command(name = "sweep")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Recorded trials wanted per combination
    #[arg(long, short, default_value_t = 1)]
    pub target: u64,

    /// Results table to record into and deduplicate against
    #[arg(long, short, default_value = "owl")]
    pub mode: String,

    /// Failures already charged against the failure budget
    #[arg(long, short, default_value_t = 0)]
    pub failures: u64,

    /// Comma-separated machine list (default: SLURM allocation or this host)
    #[arg(long, short = 'n')]
    pub machines: Option<String>,

    /// Configuration file
    #[arg(long, default_value = "sweep.toml")]
    pub config: PathBuf,

    /// Report current/target counts without running anything
    #[arg(long)]
    pub dry: bool,

    /// Echo job output and enable debug logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Run the job once with these extra arguments and exit
    #[arg(last = true)]
    pub manual: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.manual.is_empty() {
        sweep::run(&cli).await
    } else {
        manual::run(&cli).await
    }
}

/// Install the tracing subscriber; `RUST_LOG` overrides the default level.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
