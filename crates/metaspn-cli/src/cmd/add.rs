//! `spn add`: append one activity to the event log.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use metaspn_lake::activity::format_timestamp;
use metaspn_lake::{Activity, ActivityType, Lake};
use serde::Serialize;

use crate::cmd::query::parse_when;
use crate::output::{OutputMode, render};

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Platform the activity happened on (e.g. podcast, blog).
    #[arg(long)]
    pub platform: String,

    /// `create` or `consume`.
    #[arg(long = "type", value_name = "TYPE")]
    pub activity_type: ActivityType,

    /// When it happened (RFC 3339 or YYYY-MM-DD). Defaults to now.
    #[arg(long, value_parser = parse_when)]
    pub timestamp: Option<DateTime<Utc>>,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub content: Option<String>,

    #[arg(long)]
    pub url: Option<String>,

    /// Duration in seconds.
    #[arg(long)]
    pub duration: Option<u64>,

    /// Explicit id. Derived from the record's content when omitted.
    #[arg(long)]
    pub id: Option<String>,
}

impl AddArgs {
    fn to_activity(&self) -> Activity {
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);
        let mut builder = Activity::builder(timestamp, self.platform.clone(), self.activity_type);
        if let Some(id) = &self.id {
            builder = builder.id(id.clone());
        }
        if let Some(title) = &self.title {
            builder = builder.title(title.clone());
        }
        if let Some(content) = &self.content {
            builder = builder.content(content.clone());
        }
        if let Some(url) = &self.url {
            builder = builder.url(url.clone());
        }
        if let Some(seconds) = self.duration {
            builder = builder.duration_seconds(seconds);
        }
        builder.build()
    }
}

#[derive(Debug, Serialize)]
struct AddReport {
    activity_id: String,
    timestamp: String,
    file_path: String,
    line_number: u64,
    indexed: bool,
}

/// Execute `spn add`.
///
/// # Errors
///
/// Returns an error if the repository cannot be opened or the append fails.
pub fn run_add(args: &AddArgs, output: OutputMode, root: &Path) -> Result<()> {
    let mut lake = Lake::open(root)?;
    let activity = args.to_activity();
    let outcome = lake.append(std::slice::from_ref(&activity))?;
    let location = outcome
        .locations
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("append returned no location"))?;

    tracing::info!(id = %activity.activity_id, file = %location.file_path, "activity appended");
    let report = AddReport {
        activity_id: activity.activity_id,
        timestamp: format_timestamp(&activity.timestamp),
        file_path: location.file_path,
        line_number: location.line_number,
        indexed: outcome.indexed.is_some_and(|r| r.added > 0),
    };
    render(output, &report, |r, w| {
        writeln!(w, "added {} -> {}:{}", r.activity_id, r.file_path, r.line_number)
    })
}
