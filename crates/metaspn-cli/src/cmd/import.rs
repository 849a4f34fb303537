//! `spn import`: bulk-append records from a JSON or JSONL file.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use metaspn_lake::Lake;
use metaspn_lake::activity::{ParsedRecord, decode_document};
use serde::Serialize;

use crate::output::{OutputMode, render};

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// File to import. `.jsonl` is read line by line; anything else as one
    /// JSON document (object or array).
    pub file: PathBuf,
}

#[derive(Debug, Default, Serialize)]
struct ImportReport {
    imported: usize,
    unrecognized: usize,
    malformed: usize,
    newly_indexed: Option<usize>,
}

/// Execute `spn import`.
///
/// Legacy shapes are normalized on the way in, so imported records land in
/// the event log in canonical form.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the append fails.
pub fn run_import(args: &ImportArgs, output: OutputMode, root: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let is_jsonl = args.file.extension().is_some_and(|ext| ext == "jsonl");

    let mut report = ImportReport::default();
    let mut batch = Vec::new();
    for record in decode_document(&contents, is_jsonl) {
        match record.record {
            ParsedRecord::Activity(activity) => batch.push(*activity),
            ParsedRecord::Blank => {}
            ParsedRecord::Unrecognized => report.unrecognized += 1,
            ParsedRecord::Malformed(err) => {
                tracing::warn!(line = record.line, error = %err, "skipping malformed record");
                report.malformed += 1;
            }
        }
    }

    let mut lake = Lake::open(root)?;
    if !batch.is_empty() {
        let outcome = lake.append(&batch)?;
        report.newly_indexed = outcome.indexed.map(|r| r.added);
    }
    report.imported = batch.len();

    render(output, &report, |r, w| {
        writeln!(
            w,
            "imported {} activities ({} unrecognized, {} malformed)",
            r.imported, r.unrecognized, r.malformed
        )
    })
}
