//! `spn query`: list activities matching a filter.

use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use metaspn_lake::activity::{format_timestamp, parse_timestamp};
use metaspn_lake::enhancement::{EnhancedActivity, EnhancementMaps, Origin};
use metaspn_lake::{Activity, ActivityFilter, ActivityType, Lake};
use serde::Serialize;

use crate::output::{OutputMode, render};

/// Filter flags shared by `query` and `count`.
#[derive(Args, Debug, Default, Clone)]
pub struct FilterArgs {
    /// Only this platform (e.g. podcast, blog, twitter).
    #[arg(long)]
    pub platform: Option<String>,

    /// Only `create` or `consume` activities.
    #[arg(long = "type", value_name = "TYPE")]
    pub activity_type: Option<ActivityType>,

    /// Inclusive lower bound (RFC 3339 or YYYY-MM-DD).
    #[arg(long, value_parser = parse_when)]
    pub since: Option<DateTime<Utc>>,

    /// Inclusive upper bound (RFC 3339 or YYYY-MM-DD).
    #[arg(long, value_parser = parse_when)]
    pub until: Option<DateTime<Utc>>,

    /// Stop after this many results.
    #[arg(long)]
    pub limit: Option<usize>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> ActivityFilter {
        ActivityFilter {
            platform: self.platform.clone(),
            activity_type: self.activity_type,
            start: self.since,
            end: self.until,
            limit: self.limit,
        }
    }
}

pub fn parse_when(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(raw).ok_or_else(|| format!("invalid timestamp '{raw}'"))
}

#[derive(Args, Debug, Default)]
pub struct QueryArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Join the latest enhancement values onto each activity.
    #[arg(long)]
    pub enhanced: bool,
}

#[derive(Debug, Serialize)]
struct QueryReport {
    source: &'static str,
    count: usize,
    activities: Vec<Row>,
}

#[derive(Debug, Serialize)]
struct Row {
    #[serde(flatten)]
    activity: Activity,
    #[serde(skip_serializing_if = "Option::is_none")]
    enhancements: Option<EnhancementView>,
}

#[derive(Debug, Serialize)]
struct EnhancementView {
    quality_score: Option<f64>,
    quality_origin: Option<&'static str>,
    primary_game: Option<&'static str>,
    game_origin: Option<&'static str>,
    embedding_dimensions: Option<usize>,
}

const fn origin_name(origin: Origin) -> &'static str {
    match origin {
        Origin::Enhancement => "enhancement",
        Origin::Embedded => "embedded",
    }
}

impl From<EnhancedActivity> for Row {
    fn from(joined: EnhancedActivity) -> Self {
        let view = EnhancementView {
            quality_score: joined.quality_score.map(|q| q.value),
            quality_origin: joined.quality_score.map(|q| origin_name(q.origin)),
            primary_game: joined.primary_game(),
            game_origin: joined.game_signature.map(|g| origin_name(g.origin)),
            embedding_dimensions: joined.embedding.as_ref().map(|e| e.dimensions),
        };
        Self {
            activity: joined.activity,
            enhancements: Some(view),
        }
    }
}

/// Execute `spn query`.
///
/// # Errors
///
/// Returns an error if the repository cannot be opened or read.
pub fn run_query(args: &QueryArgs, output: OutputMode, root: &Path) -> Result<()> {
    let lake = Lake::open(root)?;
    let loader = lake.loader();
    let filter = args.filter.to_filter();

    let activities: Vec<Row> = if args.enhanced {
        let maps = EnhancementMaps::load(lake.enhancements()).context("failed to load enhancements")?;
        loader.query_enhanced(&filter, &maps)?.map(Row::from).collect()
    } else {
        loader
            .query(&filter)?
            .map(|activity| Row {
                activity,
                enhancements: None,
            })
            .collect()
    };

    let report = QueryReport {
        source: loader.source().as_str(),
        count: activities.len(),
        activities,
    };
    render(output, &report, |r, w| {
        for row in &r.activities {
            let a = &row.activity;
            write!(
                w,
                "{}  {:<10} {:<8} {}  {}",
                format_timestamp(&a.timestamp),
                a.platform,
                a.activity_type,
                a.activity_id,
                a.title.as_deref().unwrap_or("-"),
            )?;
            if let Some(view) = &row.enhancements {
                if let Some(score) = view.quality_score {
                    write!(w, "  q={score:.2}")?;
                }
                if let Some(game) = view.primary_game {
                    write!(w, "  game={game}")?;
                }
            }
            writeln!(w)?;
        }
        writeln!(w, "{} activities ({})", r.count, r.source)
    })
}
