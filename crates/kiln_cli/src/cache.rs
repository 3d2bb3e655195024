//! `kiln cache`: store statistics and maintenance.

use std::path::PathBuf;

use kiln_cache::{CacheStats, CacheStore};
use kiln_cli::{load_project_config, resolve_settings, Status};
use kiln_common::ByteSize;
use serde::Serialize;

use crate::{CacheAction, GlobalArgs, ReportFormat};

/// `kiln cache stats --format json` output.
#[derive(Debug, Serialize)]
struct StatsReport {
    dir: PathBuf,
    entries: u64,
    bytes: u64,
    max_bytes: u64,
}

/// Runs a `kiln cache` subcommand.
pub fn run(action: &CacheAction, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    let config = load_project_config(global.config.as_deref(), &cwd)?;
    let settings = resolve_settings(&config)?;
    let store = CacheStore::new(&settings);
    let status = Status::new(global.quiet);

    match action {
        CacheAction::Stats { format } => {
            let stats = store.stats()?;
            match format {
                ReportFormat::Text => print_stats(&store, stats, settings.max_size),
                ReportFormat::Json => {
                    let report = StatsReport {
                        dir: store.root().to_path_buf(),
                        entries: stats.entries,
                        bytes: stats.bytes,
                        max_bytes: settings.max_size.bytes(),
                    };
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
        }
        CacheAction::Trim { max_size } => {
            let report = match max_size {
                Some(text) => store.trim(text.parse::<ByteSize>()?)?,
                None => store.trim_to_max()?,
            };
            status.line(
                "Trimmed",
                format_args!(
                    "{} entries ({} freed), {} remaining",
                    report.removed,
                    ByteSize::new(report.freed),
                    ByteSize::new(report.remaining.bytes)
                ),
            );
        }
        CacheAction::Clear => {
            let removed = store.clear()?;
            status.line(
                "Cleared",
                format_args!("{removed} entries from {}", store.root().display()),
            );
        }
    }
    Ok(0)
}

fn print_stats(store: &CacheStore, stats: CacheStats, max_size: ByteSize) {
    println!("Location: {}", store.root().display());
    println!("Entries:  {}", stats.entries);
    println!("Size:     {} of {}", ByteSize::new(stats.bytes), max_size);
}
