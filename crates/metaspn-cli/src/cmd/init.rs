//! `spn init`: create the repository skeleton.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use metaspn_lake::Lake;
use serde::Serialize;

use crate::output::{OutputMode, kv, render};

#[derive(Args, Debug, Default)]
pub struct InitArgs {}

#[derive(Debug, Serialize)]
struct InitReport {
    root: String,
    already_initialized: bool,
    manifest: bool,
}

/// Execute `spn init`. Idempotent: an existing repository and its config
/// are left alone.
///
/// ```text
/// .metaspn/config.toml
/// sources/
/// artifacts/
///   enhancements/
///   indexes/by_date/
///   indexes/by_platform/
/// ```
///
/// # Errors
///
/// Returns an error if any directory or the config cannot be created.
pub fn run_init(_args: &InitArgs, output: OutputMode, root: &Path) -> Result<()> {
    let already_initialized = root.join(".metaspn").is_dir();
    let lake = Lake::init(root)?;
    let report = InitReport {
        root: lake.layout().root().display().to_string(),
        already_initialized,
        manifest: lake.index().is_persisted(),
    };
    render(output, &report, |r, w| {
        if r.already_initialized {
            writeln!(w, "repository already initialized")?;
        } else {
            writeln!(w, "initialized repository")?;
        }
        kv(w, "root", &r.root)
    })
}
