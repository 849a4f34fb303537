//! `spn recover`: truncate torn trailing lines left by interrupted appends.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use metaspn_lake::Lake;
use serde::Serialize;

use crate::output::{OutputMode, render};

#[derive(Args, Debug, Default)]
pub struct RecoverArgs {}

#[derive(Debug, Serialize)]
struct Repaired {
    file_path: String,
    bytes_truncated: u64,
}

#[derive(Debug, Serialize)]
struct RecoverReport {
    repaired: Vec<Repaired>,
}

/// Execute `spn recover`.
///
/// # Errors
///
/// Returns an error if a file cannot be read or truncated.
pub fn run_recover(_args: &RecoverArgs, output: OutputMode, root: &Path) -> Result<()> {
    let lake = Lake::open(root)?;
    let repaired = lake
        .log()
        .recover_torn_writes()?
        .into_iter()
        .map(|t| Repaired {
            file_path: t.file_path,
            bytes_truncated: t.bytes_truncated,
        })
        .collect();
    let report = RecoverReport { repaired };
    render(output, &report, |r, w| {
        if r.repaired.is_empty() {
            return writeln!(w, "no torn writes found");
        }
        for file in &r.repaired {
            writeln!(w, "truncated {} bytes from {}", file.bytes_truncated, file.file_path)?;
        }
        Ok(())
    })
}
