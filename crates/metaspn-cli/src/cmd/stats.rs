//! `spn stats`: aggregate counters for the whole lake.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use metaspn_lake::Lake;
use metaspn_lake::activity::format_timestamp;
use serde::Serialize;

use crate::output::{OutputMode, kv, render, section};

#[derive(Args, Debug, Default)]
pub struct StatsArgs {}

#[derive(Debug, Serialize)]
struct StatsReport {
    source: &'static str,
    total: usize,
    earliest: Option<String>,
    latest: Option<String>,
    by_platform: BTreeMap<String, usize>,
    by_year: BTreeMap<String, usize>,
    by_type: BTreeMap<String, usize>,
}

/// Execute `spn stats`.
///
/// # Errors
///
/// Returns an error if the repository cannot be opened or read.
pub fn run_stats(_args: &StatsArgs, output: OutputMode, root: &Path) -> Result<()> {
    let lake = Lake::open(root)?;
    let loader = lake.loader();
    let stats = loader.stats()?;
    let range = loader.date_range()?;

    let report = StatsReport {
        source: loader.source().as_str(),
        total: stats.total(),
        earliest: range.map(|(lo, _)| format_timestamp(&lo)),
        latest: range.map(|(_, hi)| format_timestamp(&hi)),
        by_platform: stats.by_platform,
        by_year: stats.by_year,
        by_type: stats.by_type,
    };
    render(output, &report, render_stats_human)
}

fn render_stats_human(r: &StatsReport, w: &mut dyn Write) -> std::io::Result<()> {
    section(w, "Activity lake")?;
    kv(w, "total", r.total.to_string())?;
    kv(w, "source", r.source)?;
    if let (Some(lo), Some(hi)) = (&r.earliest, &r.latest) {
        kv(w, "range", format!("{lo} .. {hi}"))?;
    }
    for (heading, counts) in [
        ("By platform", &r.by_platform),
        ("By type", &r.by_type),
        ("By year", &r.by_year),
    ] {
        writeln!(w)?;
        section(w, heading)?;
        for (key, count) in counts {
            kv(w, key, count.to_string())?;
        }
    }
    Ok(())
}
