//! `spn count`: number of activities matching a filter.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use metaspn_lake::Lake;
use serde::Serialize;

use super::query::FilterArgs;
use crate::output::{OutputMode, render};

#[derive(Args, Debug, Default)]
pub struct CountArgs {
    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Debug, Serialize)]
struct CountReport {
    count: usize,
    source: &'static str,
}

/// Execute `spn count`.
///
/// # Errors
///
/// Returns an error if the repository cannot be opened or read.
pub fn run_count(args: &CountArgs, output: OutputMode, root: &Path) -> Result<()> {
    let lake = Lake::open(root)?;
    let loader = lake.loader();
    let report = CountReport {
        count: loader.count(&args.filter.to_filter())?,
        source: loader.source().as_str(),
    };
    render(output, &report, |r, w| writeln!(w, "{}", r.count))
}
