//! Manifest index: a derived, disposable secondary index over the event log.
//!
//! The master manifest (`artifacts/indexes/manifest.json`) maps every
//! activity id to its storage location and carries aggregate counters.
//! Per-month and per-platform shard files are written next to it so a
//! single-platform reader need not load the whole index.
//!
//! # Invariants
//!
//! - The master manifest is the only source of truth inside the index.
//!   Shards are always regenerated from it, never read back into it.
//! - A full rebuild yields exactly one entry per unique id; the first
//!   occurrence in scan order wins.
//! - `total_activities` always equals the number of entries.
//! - Incremental updates only add entries for ids not already present.
//! - The manifest records the byte length of every event-log file it has
//!   seen. When the log on disk no longer matches, the index is stale and
//!   the loader stops trusting it until the next rebuild.

pub mod query;
pub mod shard;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::activity::{ActivityType, month_key};
use crate::error::ErrorCode;
use crate::event_log::{EventLog, EventLogError, LocatedActivity};
use crate::layout::{Partition, RepoLayout};
use crate::store::{Store, StoreError};

pub use shard::Shard;

/// Format version written to `manifest.json`.
pub const MANIFEST_VERSION: &str = "2.0";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read index file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("index file {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no manifest has been built for this repository")]
    Missing,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    EventLog(#[from] EventLogError),
}

impl ManifestError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } | Self::Corrupt { .. } => ErrorCode::ManifestCorrupt,
            Self::Missing => ErrorCode::ManifestMissing,
            Self::Store(e) => e.code(),
            Self::EventLog(e) => e.code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted types
// ---------------------------------------------------------------------------

/// Location and identifying fields of one activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub activity_id: String,
    pub source_type: Partition,
    pub platform: String,
    pub activity_type: ActivityType,
    pub timestamp: DateTime<Utc>,
    /// `/`-separated path relative to the repository root.
    pub file_path: String,
    /// 1-based line (JSONL) or array position (JSON).
    pub line_number: u64,
}

impl From<&LocatedActivity> for IndexEntry {
    fn from(located: &LocatedActivity) -> Self {
        let activity = &located.activity;
        Self {
            activity_id: activity.activity_id.clone(),
            source_type: located.location.partition,
            platform: activity.platform.clone(),
            activity_type: activity.activity_type,
            timestamp: activity.timestamp,
            file_path: located.location.file_path.clone(),
            line_number: located.location.line_number,
        }
    }
}

impl IndexEntry {
    #[must_use]
    pub fn month_key(&self) -> String {
        month_key(&self.timestamp)
    }
}

/// Aggregate counters kept alongside the entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestStats {
    #[serde(default)]
    pub by_platform: BTreeMap<String, usize>,
    #[serde(default)]
    pub by_year: BTreeMap<String, usize>,
    #[serde(default)]
    pub by_type: BTreeMap<String, usize>,
}

impl ManifestStats {
    /// Count one activity.
    pub fn record(&mut self, platform: &str, activity_type: ActivityType, timestamp: &DateTime<Utc>) {
        *self.by_platform.entry(platform.to_string()).or_insert(0) += 1;
        *self
            .by_year
            .entry(timestamp.format("%Y").to_string())
            .or_insert(0) += 1;
        *self
            .by_type
            .entry(activity_type.as_str().to_string())
            .or_insert(0) += 1;
    }

    /// Sum of the per-type counters.
    #[must_use]
    pub fn total(&self) -> usize {
        self.by_type.values().sum()
    }
}

/// The master manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub total_activities: usize,
    pub activities: BTreeMap<String, IndexEntry>,
    #[serde(default)]
    pub stats: ManifestStats,
    /// Byte length of each event-log file, keyed by relative path, as of
    /// the last write to this manifest.
    #[serde(default)]
    pub file_sizes: BTreeMap<String, u64>,
}

impl Manifest {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            last_updated: Utc::now(),
            total_activities: 0,
            activities: BTreeMap::new(),
            stats: ManifestStats::default(),
            file_sizes: BTreeMap::new(),
        }
    }

    /// Add an entry unless its id is already indexed.
    fn insert(&mut self, entry: IndexEntry) -> bool {
        if self.activities.contains_key(&entry.activity_id) {
            return false;
        }
        self.stats
            .record(&entry.platform, entry.activity_type, &entry.timestamp);
        self.activities.insert(entry.activity_id.clone(), entry);
        self.total_activities = self.activities.len();
        true
    }
}

// ---------------------------------------------------------------------------
// In-memory lookup tables
// ---------------------------------------------------------------------------

/// Id sets derived from the master on load. Never persisted directly.
#[derive(Debug, Clone, Default)]
struct Lookups {
    by_platform: BTreeMap<String, BTreeSet<String>>,
    by_month: BTreeMap<String, BTreeSet<String>>,
    by_type: BTreeMap<ActivityType, BTreeSet<String>>,
}

impl Lookups {
    fn from_manifest(manifest: &Manifest) -> Self {
        let mut lookups = Self::default();
        for entry in manifest.activities.values() {
            lookups.insert(entry);
        }
        lookups
    }

    fn insert(&mut self, entry: &IndexEntry) {
        let id = entry.activity_id.clone();
        self.by_platform
            .entry(entry.platform.clone())
            .or_default()
            .insert(id.clone());
        self.by_month
            .entry(entry.month_key())
            .or_default()
            .insert(id.clone());
        self.by_type.entry(entry.activity_type).or_default().insert(id);
    }
}

#[derive(Debug, Clone)]
struct Loaded {
    manifest: Manifest,
    lookups: Lookups,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Report returned after a full rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    /// Unique activities indexed.
    pub activity_count: usize,
    /// Records skipped because their id was already indexed.
    pub duplicate_count: usize,
    /// Event-log files scanned.
    pub file_count: usize,
    pub elapsed: Duration,
}

/// Report returned by [`ManifestIndex::update_incremental`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReport {
    pub added: usize,
    /// Ids already present in the index.
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// ManifestIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ManifestIndex {
    layout: RepoLayout,
    store: Store,
    state: Option<Loaded>,
    stale: bool,
}

impl ManifestIndex {
    /// An index handle that has not read anything from disk yet.
    #[must_use]
    pub const fn new(layout: RepoLayout, store: Store) -> Self {
        Self {
            layout,
            store,
            state: None,
            stale: false,
        }
    }

    /// Create a handle and load the persisted manifest when there is one.
    ///
    /// # Errors
    ///
    /// [`ManifestError::Io`] or [`ManifestError::Corrupt`] when a manifest
    /// file exists but cannot be read.
    pub fn open(layout: RepoLayout, store: Store) -> Result<Self, ManifestError> {
        let mut index = Self::new(layout, store);
        index.load()?;
        Ok(index)
    }

    /// Whether a manifest is loaded, stale or not.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.state.is_some()
    }

    /// A manifest is loaded and the event log has not changed behind its
    /// back. Drives the loader's fallback.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.state.is_some() && !self.stale
    }

    #[must_use]
    pub const fn is_stale(&self) -> bool {
        self.stale
    }

    /// Stop trusting the loaded manifest until the next rebuild.
    pub fn mark_stale(&mut self) {
        if self.state.is_some() && !self.stale {
            debug!("manifest marked stale");
            self.stale = true;
        }
    }

    /// Whether a manifest file is present on disk, loaded or not.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.layout.manifest_path().is_file()
    }

    #[must_use]
    pub fn manifest(&self) -> Option<&Manifest> {
        self.state.as_ref().map(|s| &s.manifest)
    }

    /// (Re)load the manifest from disk. Returns `false` when there is none.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn load(&mut self) -> Result<bool, ManifestError> {
        let path = self.layout.manifest_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.state = None;
                self.stale = false;
                return Ok(false);
            }
            Err(source) => return Err(ManifestError::Io { path, source }),
        };
        let mut manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|source| ManifestError::Corrupt { path: path.clone(), source })?;
        manifest.total_activities = manifest.activities.len();

        let lookups = Lookups::from_manifest(&manifest);
        debug!(path = %path.display(), total = manifest.total_activities, "loaded manifest");
        self.state = Some(Loaded { manifest, lookups });
        self.stale = false;
        Ok(true)
    }

    /// Compare the event log on disk with the file sizes recorded in the
    /// manifest and mark the index stale on any difference. Returns whether
    /// the index is usable afterwards.
    ///
    /// # Errors
    ///
    /// [`ManifestError::EventLog`] if the event log cannot be listed.
    pub fn verify(&mut self, log: &EventLog) -> Result<bool, ManifestError> {
        let Some(state) = &self.state else {
            return Ok(false);
        };
        if self.stale {
            return Ok(false);
        }
        let current = file_sizes(log)?;
        if current != state.manifest.file_sizes {
            let changed = current
                .keys()
                .chain(state.manifest.file_sizes.keys())
                .filter(|path| current.get(*path) != state.manifest.file_sizes.get(*path))
                .collect::<BTreeSet<_>>();
            warn!(
                files = changed.len(),
                "event log changed since the manifest was written, using full scans until rebuilt"
            );
            self.stale = true;
        }
        Ok(!self.stale)
    }

    // -----------------------------------------------------------------------
    // Build
    // -----------------------------------------------------------------------

    /// Load the persisted manifest, or rebuild it when there is none, it is
    /// stale or `force` is set. Returns `Some(report)` only when a rebuild
    /// ran.
    ///
    /// # Errors
    ///
    /// Any load, scan or write failure.
    pub fn build(&mut self, log: &EventLog, force: bool) -> Result<Option<RebuildReport>, ManifestError> {
        if !force && self.load()? && self.verify(log)? {
            return Ok(None);
        }
        self.rebuild(log).map(Some)
    }

    /// Discard the index and rebuild it from a full scan of the event log.
    ///
    /// 1. Record the size of every event-log file
    /// 2. Scan every file once, first occurrence of an id wins
    /// 3. Persist the master manifest atomically
    /// 4. Remove every shard file and regenerate shards from the master
    ///
    /// Sizes are taken before the scan, so a record appended concurrently
    /// leaves the new manifest stale rather than silently missing it.
    ///
    /// # Errors
    ///
    /// Any scan or write failure. On a write failure the previous manifest
    /// file is left untouched.
    pub fn rebuild(&mut self, log: &EventLog) -> Result<RebuildReport, ManifestError> {
        let start = Instant::now();
        let file_sizes = file_sizes(log)?;
        let file_count = file_sizes.len();

        let mut manifest = Manifest::empty();
        manifest.file_sizes = file_sizes;
        let mut duplicate_count = 0;
        for located in log.scan_all()? {
            let id = located.activity.activity_id.clone();
            if !manifest.insert(IndexEntry::from(&located)) {
                duplicate_count += 1;
                debug!(
                    activity_id = %id,
                    path = %located.location.file_path,
                    line = located.location.line_number,
                    "duplicate activity id, keeping first occurrence"
                );
            }
        }
        manifest.last_updated = Utc::now();
        let lookups = Lookups::from_manifest(&manifest);

        self.store
            .write_document(&self.layout.manifest_path(), &manifest)?;
        shard::clear_dir(&self.layout.by_date_dir())?;
        shard::clear_dir(&self.layout.by_platform_dir())?;
        write_shards(
            &self.store,
            &self.layout,
            &lookups,
            lookups.by_month.keys().map(String::as_str),
            lookups.by_platform.keys().map(String::as_str),
        )?;

        let report = RebuildReport {
            activity_count: manifest.total_activities,
            duplicate_count,
            file_count,
            elapsed: start.elapsed(),
        };
        info!(
            activities = report.activity_count,
            duplicates = report.duplicate_count,
            files = report.file_count,
            "manifest rebuilt"
        );
        self.state = Some(Loaded { manifest, lookups });
        self.stale = false;
        Ok(report)
    }

    /// Index newly appended activities without rescanning.
    ///
    /// Ids already present are skipped. Only the shards of months and
    /// platforms the batch touched are rewritten. The recorded sizes of the
    /// touched files are refreshed unless the index is already stale.
    ///
    /// # Errors
    ///
    /// [`ManifestError::Missing`] when no manifest exists, otherwise any
    /// write failure.
    pub fn update_incremental(&mut self, batch: &[LocatedActivity]) -> Result<UpdateReport, ManifestError> {
        if self.state.is_none() && !self.load()? {
            return Err(ManifestError::Missing);
        }
        let Self {
            layout,
            store,
            state,
            stale,
        } = self;
        let Some(state) = state.as_mut() else {
            return Err(ManifestError::Missing);
        };

        let mut report = UpdateReport {
            added: 0,
            skipped: 0,
        };
        let mut months = BTreeSet::new();
        let mut platforms = BTreeSet::new();
        let mut touched = BTreeSet::new();
        for located in batch {
            touched.insert(located.location.file_path.as_str());
            let entry = IndexEntry::from(located);
            if state.manifest.activities.contains_key(&entry.activity_id) {
                report.skipped += 1;
                continue;
            }
            months.insert(entry.month_key());
            platforms.insert(entry.platform.clone());
            state.lookups.insert(&entry);
            state.manifest.insert(entry);
            report.added += 1;
        }
        let mut resized = false;
        if !*stale {
            for relative in touched {
                let path = layout.resolve(relative);
                let len = fs::metadata(&path)
                    .map_err(|source| ManifestError::Io { path, source })?
                    .len();
                let previous = state.manifest.file_sizes.insert(relative.to_string(), len);
                resized |= previous != Some(len);
            }
        }
        if report.added == 0 && !resized {
            return Ok(report);
        }

        state.manifest.last_updated = Utc::now();
        store.write_document(&layout.manifest_path(), &state.manifest)?;
        write_shards(
            store,
            layout,
            &state.lookups,
            months.iter().map(String::as_str),
            platforms.iter().map(String::as_str),
        )?;
        debug!(added = report.added, skipped = report.skipped, "manifest updated incrementally");
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Staleness
    // -----------------------------------------------------------------------

    /// Ids present in the event log but absent from the index, in scan
    /// order. With no index loaded every id is stale.
    ///
    /// # Errors
    ///
    /// Any scan failure.
    pub fn find_stale(&self, log: &EventLog) -> Result<Vec<String>, ManifestError> {
        Ok(log
            .scan()?
            .map(|located| located.activity.activity_id)
            .filter(|id| self.lookup(id).is_none())
            .collect())
    }
}

/// Current byte length of every event-log file.
fn file_sizes(log: &EventLog) -> Result<BTreeMap<String, u64>, ManifestError> {
    let mut sizes = BTreeMap::new();
    for file in log.files()? {
        let len = fs::metadata(&file.path)
            .map_err(|source| ManifestError::Io {
                path: file.path.clone(),
                source,
            })?
            .len();
        sizes.insert(file.relative, len);
    }
    Ok(sizes)
}

/// Regenerate the shards for the given months and platforms from the
/// in-memory lookups.
fn write_shards<'a>(
    store: &Store,
    layout: &RepoLayout,
    lookups: &Lookups,
    months: impl Iterator<Item = &'a str>,
    platforms: impl Iterator<Item = &'a str>,
) -> Result<(), ManifestError> {
    for month in months {
        if let Some(ids) = lookups.by_month.get(month) {
            shard::write(store, &layout.by_date_dir(), month, ids)?;
        }
    }
    for platform in platforms {
        let Some(ids) = lookups.by_platform.get(platform) else {
            continue;
        };
        if !shard::is_writable_key(platform) {
            warn!(platform, "platform name is not a valid file name, skipping shard");
            continue;
        }
        shard::write(store, &layout.by_platform_dir(), platform, ids)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, parse_timestamp};
    use crate::platform::PlatformRegistry;
    use tempfile::TempDir;

    fn setup() -> (TempDir, EventLog, ManifestIndex) {
        let tmp = TempDir::new().expect("tempdir");
        let layout = RepoLayout::init(tmp.path()).expect("init");
        let log = EventLog::new(layout.clone(), PlatformRegistry::with_defaults(), Store::default());
        let index = ManifestIndex::new(layout, Store::default());
        (tmp, log, index)
    }

    fn activity(platform: &str, ty: ActivityType, ts: &str, title: &str) -> Activity {
        Activity::builder(parse_timestamp(ts).expect("ts"), platform, ty)
            .title(title)
            .build()
    }

    fn seed(log: &EventLog) -> Vec<LocatedActivity> {
        log.append_batch(&[
            activity("podcast", ActivityType::Create, "2024-01-05T10:00:00Z", "ep1"),
            activity("podcast", ActivityType::Consume, "2024-02-01T10:00:00Z", "listen"),
            activity("blog", ActivityType::Create, "2023-12-24T10:00:00Z", "post"),
        ])
        .expect("seed")
    }

    // -----------------------------------------------------------------------
    // Rebuild
    // -----------------------------------------------------------------------

    #[test]
    fn rebuild_indexes_every_activity() {
        let (_tmp, log, mut index) = setup();
        seed(&log);
        let report = index.rebuild(&log).expect("rebuild");
        assert_eq!(report.activity_count, 3);
        assert_eq!(report.duplicate_count, 0);
        assert_eq!(report.file_count, 3);

        let manifest = index.manifest().expect("loaded");
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert_eq!(manifest.total_activities, 3);
        assert_eq!(manifest.stats.by_platform["podcast"], 2);
        assert_eq!(manifest.stats.by_year["2024"], 2);
        assert_eq!(manifest.stats.by_type["create"], 2);
    }

    #[test]
    fn rebuild_keeps_first_duplicate() {
        let (_tmp, log, mut index) = setup();
        let dup = activity("blog", ActivityType::Create, "2024-01-01T00:00:00Z", "dup");
        log.append(&dup).expect("first");
        log.append(&dup).expect("second");

        let report = index.rebuild(&log).expect("rebuild");
        assert_eq!(report.activity_count, 1);
        assert_eq!(report.duplicate_count, 1);
        let entry = index.lookup(&dup.activity_id).expect("entry");
        assert_eq!(entry.line_number, 1);
    }

    #[test]
    fn rebuild_writes_shards_and_clears_stale_ones() {
        let (_tmp, log, mut index) = setup();
        let layout = log.layout().clone();
        fs::write(layout.by_platform_dir().join("gone.json"), "{}").expect("stale shard");
        seed(&log);
        index.rebuild(&log).expect("rebuild");

        assert!(!layout.by_platform_dir().join("gone.json").exists());
        let shard = index.platform_shard("podcast").expect("read").expect("shard");
        assert_eq!(shard.key, "podcast");
        assert_eq!(shard.activity_ids.len(), 2);
        assert!(layout.by_date_dir().join("2023-12.json").is_file());
    }

    #[test]
    fn persisted_manifest_uses_documented_shape() {
        let (_tmp, log, mut index) = setup();
        let located = seed(&log);
        index.rebuild(&log).expect("rebuild");
        let raw = fs::read_to_string(log.layout().manifest_path()).expect("read");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(json["version"], "2.0");
        assert_eq!(json["total_activities"], 3);
        let id = &located[0].activity.activity_id;
        let entry = &json["activities"][id];
        assert_eq!(entry["source_type"], "artifact");
        assert_eq!(entry["activity_type"], "create");
        assert_eq!(entry["file_path"], "artifacts/podcast/episodes.jsonl");
        assert_eq!(entry["line_number"], 1);
        assert_eq!(entry["timestamp"], "2024-01-05T10:00:00Z");
        assert!(json["stats"]["by_year"].is_object());
    }

    #[test]
    fn build_loads_unless_forced() {
        let (_tmp, log, mut index) = setup();
        seed(&log);
        assert!(index.build(&log, false).expect("build").is_some());

        let mut reopened = ManifestIndex::new(log.layout().clone(), Store::default());
        assert!(reopened.build(&log, false).expect("build").is_none());
        assert_eq!(reopened.total(), Some(3));
        assert!(reopened.build(&log, true).expect("build").is_some());
    }

    #[test]
    fn corrupt_manifest_is_reported() {
        let (_tmp, log, _index) = setup();
        fs::write(log.layout().manifest_path(), "{not json").expect("write");
        let err = ManifestIndex::open(log.layout().clone(), Store::default()).expect_err("corrupt");
        assert_eq!(err.code(), ErrorCode::ManifestCorrupt);
    }

    // -----------------------------------------------------------------------
    // Incremental
    // -----------------------------------------------------------------------

    #[test]
    fn incremental_requires_manifest() {
        let (_tmp, log, mut index) = setup();
        let located = seed(&log);
        let err = index.update_incremental(&located).expect_err("missing");
        assert!(matches!(err, ManifestError::Missing));
    }

    #[test]
    fn incremental_adds_only_new_ids() {
        let (_tmp, log, mut index) = setup();
        let seeded = seed(&log);
        index.rebuild(&log).expect("rebuild");

        let fresh = log
            .append(&activity("youtube", ActivityType::Create, "2024-03-03T00:00:00Z", "video"))
            .expect("append");
        let mut batch = seeded;
        batch.push(fresh.clone());
        let report = index.update_incremental(&batch).expect("update");
        assert_eq!(report, UpdateReport { added: 1, skipped: 3 });

        assert_eq!(index.total(), Some(4));
        assert_eq!(index.count_platform("youtube"), Some(1));
        assert!(log.layout().by_date_dir().join("2024-03.json").is_file());

        let reopened = ManifestIndex::open(log.layout().clone(), Store::default()).expect("open");
        assert_eq!(
            reopened.lookup(&fresh.activity.activity_id),
            Some(&IndexEntry::from(&fresh))
        );
    }

    #[test]
    fn incremental_matches_rebuild() {
        let (_tmp, log, mut index) = setup();
        seed(&log);
        index.rebuild(&log).expect("rebuild");
        let more = log
            .append_batch(&[
                activity("blog", ActivityType::Consume, "2024-01-09T00:00:00Z", "read"),
                activity("podcast", ActivityType::Create, "2024-01-10T00:00:00Z", "ep2"),
            ])
            .expect("append");
        index.update_incremental(&more).expect("update");

        let mut rebuilt = ManifestIndex::new(log.layout().clone(), Store::default());
        rebuilt.rebuild(&log).expect("rebuild");
        let a = index.manifest().expect("a");
        let b = rebuilt.manifest().expect("b");
        assert_eq!(a.activities, b.activities);
        assert_eq!(a.stats, b.stats);
        assert_eq!(
            index.platform_shard("podcast").expect("a"),
            rebuilt.platform_shard("podcast").expect("b")
        );
    }

    #[test]
    fn find_stale_reports_unindexed_ids() {
        let (_tmp, log, mut index) = setup();
        seed(&log);
        index.rebuild(&log).expect("rebuild");
        let late = log
            .append(&activity("blog", ActivityType::Create, "2024-05-05T00:00:00Z", "late"))
            .expect("append");
        assert_eq!(index.find_stale(&log).expect("stale"), vec![late.activity.activity_id]);
    }

    #[test]
    fn unindexed_append_makes_manifest_stale() {
        let (_tmp, log, mut index) = setup();
        seed(&log);
        index.rebuild(&log).expect("rebuild");
        assert!(index.verify(&log).expect("verify"));
        assert_eq!(index.manifest().expect("loaded").file_sizes.len(), 3);

        log.append(&activity("blog", ActivityType::Create, "2024-05-05T00:00:00Z", "late"))
            .expect("append");
        let mut reopened = ManifestIndex::open(log.layout().clone(), Store::default()).expect("open");
        assert!(reopened.is_usable());
        assert!(!reopened.verify(&log).expect("verify"));
        assert!(reopened.exists());
        assert!(reopened.is_stale());
        assert!(!reopened.is_usable());

        reopened.rebuild(&log).expect("rebuild");
        assert!(reopened.is_usable());
        assert_eq!(reopened.total(), Some(4));
    }

    #[test]
    fn incremental_update_keeps_manifest_fresh() {
        let (_tmp, log, mut index) = setup();
        seed(&log);
        index.rebuild(&log).expect("rebuild");
        let more = log
            .append(&activity("blog", ActivityType::Create, "2024-05-05T00:00:00Z", "late"))
            .expect("append");
        index.update_incremental(&[more]).expect("update");

        let mut reopened = ManifestIndex::open(log.layout().clone(), Store::default()).expect("open");
        assert!(reopened.verify(&log).expect("verify"));
    }

    #[test]
    fn build_rebuilds_stale_manifest() {
        let (_tmp, log, mut index) = setup();
        seed(&log);
        index.rebuild(&log).expect("rebuild");
        log.append(&activity("blog", ActivityType::Create, "2024-05-05T00:00:00Z", "late"))
            .expect("append");

        let mut reopened = ManifestIndex::new(log.layout().clone(), Store::default());
        let report = reopened.build(&log, false).expect("build").expect("rebuilt");
        assert_eq!(report.activity_count, 4);
        assert!(reopened.is_usable());
    }

    #[test]
    fn manifest_without_file_sizes_is_stale() {
        let (_tmp, log, mut index) = setup();
        seed(&log);
        index.rebuild(&log).expect("rebuild");
        let path = log.layout().manifest_path();
        let mut json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        json.as_object_mut().expect("object").remove("file_sizes");
        fs::write(&path, json.to_string()).expect("write");

        let mut reopened = ManifestIndex::open(log.layout().clone(), Store::default()).expect("open");
        assert_eq!(reopened.total(), Some(3));
        assert!(!reopened.verify(&log).expect("verify"));
    }
}
