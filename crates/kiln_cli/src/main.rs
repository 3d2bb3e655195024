//! Kiln CLI: firmware builds through a shared compiler cache.
//!
//! `kiln run` generates the build tree, injects the cache wrapper and runs the
//! real compile step. `kiln inject` only does the injection, and `kiln cache`
//! inspects or prunes the cache store.

#![warn(missing_docs)]

mod cache;
mod inject;
mod run;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Kiln: a caching front-end for firmware compiles.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Firmware builds through a shared compiler cache")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `kiln.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate, inject the cache wrapper, then compile.
    Run(RunArgs),
    /// Inject the cache wrapper into an already generated build directory.
    Inject {
        /// Firmware description file (e.g. `kitchen.yaml`).
        description: PathBuf,
    },
    /// Inspect or prune the cache store.
    Cache {
        /// The cache operation.
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Arguments for the `kiln run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Subcommand forwarded to the compile step (e.g. `compile`, `upload`).
    pub subcommand: String,

    /// Firmware description file (e.g. `kitchen.yaml`).
    pub description: PathBuf,

    /// Extra arguments appended to the compile command.
    #[arg(last = true)]
    pub extra: Vec<String>,
}

/// Cache maintenance operations.
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show entry count and size.
    Stats {
        /// Output format.
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },
    /// Evict least recently used entries until under the size limit.
    Trim {
        /// Size limit to trim to (e.g. `512M`); defaults to the configured maximum.
        #[arg(long)]
        max_size: Option<String>,
    },
    /// Remove every entry.
    Clear,
}

/// Report output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<PathBuf>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version go to stdout and succeed; usage errors exit 1.
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            process::exit(code);
        }
    };

    init_logging(cli.verbose);

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };

    let result = match cli.command {
        Command::Run(ref args) => run::run(args, &global),
        Command::Inject { ref description } => inject::run(description, &global),
        Command::Cache { ref action } => cache::run(action, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Installs the stderr log subscriber, filtered by `KILN_LOG`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("KILN_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
