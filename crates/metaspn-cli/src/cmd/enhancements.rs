//! `spn enhancements`: inspect computed enhancement layers.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};
use metaspn_lake::Lake;
use metaspn_lake::activity::format_timestamp;
use metaspn_lake::enhancement::{EnhancementKind, EnhancementRecord};
use serde::Serialize;

use crate::output::{OutputMode, kv, render, rule, section};

#[derive(Args, Debug)]
pub struct EnhancementsArgs {
    #[command(subcommand)]
    pub command: EnhancementsCommand,
}

#[derive(Subcommand, Debug)]
pub enum EnhancementsCommand {
    /// Per-kind record counts and version state.
    Status,
    /// List archived snapshots for one kind, newest first.
    History {
        /// quality_scores, game_signatures or embeddings.
        kind: EnhancementKind,
    },
    /// Every stored value for one activity, newest first.
    Timeline {
        kind: EnhancementKind,
        activity_id: String,
    },
}

#[derive(Debug, Serialize)]
struct KindStatus {
    kind: &'static str,
    present: bool,
    stored_version: Option<String>,
    current_version: String,
    needs_recompute: bool,
    records: usize,
    history_files: usize,
}

#[derive(Debug, Serialize)]
struct HistoryOutput {
    kind: &'static str,
    files: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TimelineRow {
    source: String,
    #[serde(flatten)]
    record: EnhancementRecord,
}

/// Execute `spn enhancements <subcommand>`.
///
/// # Errors
///
/// Returns an error if the repository cannot be opened or an enhancement
/// file cannot be read.
pub fn run_enhancements(args: &EnhancementsArgs, output: OutputMode, root: &Path) -> Result<()> {
    let lake = Lake::open(root)?;
    let store = lake.enhancements();

    match &args.command {
        EnhancementsCommand::Status => {
            let mut kinds = Vec::with_capacity(EnhancementKind::ALL.len());
            for kind in EnhancementKind::ALL {
                kinds.push(KindStatus {
                    kind: kind.as_str(),
                    present: store.has(kind),
                    stored_version: store.stored_version(kind),
                    current_version: store.current_version(kind).to_string(),
                    needs_recompute: store.needs_recompute(kind),
                    records: store.load(kind)?.len(),
                    history_files: store.list_history(kind)?.len(),
                });
            }
            render(output, &kinds, |kinds, w| {
                section(w, "Enhancements")?;
                for k in kinds {
                    let stored = k.stored_version.as_deref().unwrap_or("-");
                    let flag = if k.needs_recompute { "  (recompute)" } else { "" };
                    kv(
                        w,
                        k.kind,
                        format!(
                            "{} records, v{stored} / v{}, {} archived{flag}",
                            k.records, k.current_version, k.history_files
                        ),
                    )?;
                }
                Ok(())
            })
        }
        EnhancementsCommand::History { kind } => {
            let out = HistoryOutput {
                kind: kind.as_str(),
                files: store.list_history(*kind)?.into_iter().map(|f| f.name).collect(),
            };
            render(output, &out, |r, w| {
                if r.files.is_empty() {
                    return writeln!(w, "no history for {}", r.kind);
                }
                for name in &r.files {
                    writeln!(w, "{name}")?;
                }
                Ok(())
            })
        }
        EnhancementsCommand::Timeline { kind, activity_id } => {
            let rows: Vec<TimelineRow> = store
                .timeline(*kind, activity_id)?
                .into_iter()
                .map(|entry| TimelineRow {
                    source: entry.source.to_string(),
                    record: entry.record,
                })
                .collect();
            render(output, &rows, |rows, w| {
                if rows.is_empty() {
                    return writeln!(w, "no {kind} records for {activity_id}");
                }
                for row in rows {
                    writeln!(
                        w,
                        "{}  v{:<6} {}",
                        format_timestamp(&row.record.computed_at),
                        row.record.algorithm_version,
                        row.source
                    )?;
                }
                rule(w)?;
                writeln!(w, "{} entries", rows.len())
            })
        }
    }
}
