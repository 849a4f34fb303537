//! `spn index`: manage the manifest index.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};
use metaspn_lake::Lake;
use metaspn_lake::activity::format_timestamp;
use serde::Serialize;

use crate::output::{OutputMode, kv, render, section};

#[derive(Args, Debug)]
pub struct IndexArgs {
    #[command(subcommand)]
    pub command: IndexCommand,
}

#[derive(Subcommand, Debug)]
pub enum IndexCommand {
    /// Rebuild the manifest from a full scan of the event log.
    Rebuild,
    /// Show whether a manifest exists and how current it is.
    Status,
}

#[derive(Debug, Serialize)]
struct RebuildOutput {
    activity_count: usize,
    duplicate_count: usize,
    file_count: usize,
    elapsed_ms: u128,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    persisted: bool,
    loaded: bool,
    usable: bool,
    total: Option<usize>,
    stale_entries: usize,
    last_updated: Option<String>,
}

/// Execute `spn index <subcommand>`.
///
/// # Errors
///
/// Returns an error if the repository cannot be opened or the manifest
/// cannot be written.
pub fn run_index(args: &IndexArgs, output: OutputMode, root: &Path) -> Result<()> {
    let mut lake = Lake::open(root)?;
    match args.command {
        IndexCommand::Rebuild => {
            let report = lake.rebuild_index()?;
            let out = RebuildOutput {
                activity_count: report.activity_count,
                duplicate_count: report.duplicate_count,
                file_count: report.file_count,
                elapsed_ms: report.elapsed.as_millis(),
            };
            render(output, &out, |r, w| {
                writeln!(
                    w,
                    "indexed {} activities from {} files ({} duplicates) in {}ms",
                    r.activity_count, r.file_count, r.duplicate_count, r.elapsed_ms
                )
            })
        }
        IndexCommand::Status => {
            let index = lake.index();
            let stale_entries = if index.exists() {
                index.find_stale(lake.log())?.len()
            } else {
                0
            };
            let out = StatusOutput {
                persisted: index.is_persisted(),
                loaded: index.exists(),
                usable: index.is_usable(),
                total: index.total(),
                stale_entries,
                last_updated: index.manifest().map(|m| format_timestamp(&m.last_updated)),
            };
            render(output, &out, |r, w| {
                section(w, "Manifest")?;
                kv(w, "persisted", r.persisted.to_string())?;
                kv(w, "loaded", r.loaded.to_string())?;
                kv(w, "usable", r.usable.to_string())?;
                kv(w, "total", r.total.map_or_else(|| "-".to_string(), |n| n.to_string()))?;
                kv(w, "stale", r.stale_entries.to_string())?;
                kv(w, "last updated", r.last_updated.as_deref().unwrap_or("-"))?;
                if !r.loaded {
                    writeln!(w)?;
                    writeln!(w, "queries use full scans; run `spn index rebuild` to build one")?;
                } else if !r.usable {
                    writeln!(w)?;
                    writeln!(w, "event log changed since the last index write; queries use full scans")?;
                    writeln!(w, "run `spn index rebuild` to refresh it")?;
                }
                Ok(())
            })
        }
    }
}
