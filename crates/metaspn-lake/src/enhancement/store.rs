//! Latest/history storage for enhancement records.
//!
//! ```text
//! artifacts/enhancements/<kind>/
//!   latest.jsonl
//!   history/2024-01-28_v1.0_algorithm_update.jsonl
//!   history/2024-01-28_v1.0_algorithm_update_1.jsonl
//! ```
//!
//! # Invariants
//!
//! - `latest.jsonl` is replaced atomically; a reader sees the old file or
//!   the new one, never a mix.
//! - History files are frozen copies. Nothing in this module rewrites or
//!   deletes them.
//! - Archiving copies before it overwrites, so a failed overwrite never
//!   loses the previous latest.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{EnhancementError, EnhancementKind, EnhancementRecord, UNVERSIONED};
use crate::activity::Activity;
use crate::config::EnhancementConfig;
use crate::layout::{RepoLayout, is_valid_segment};
use crate::store::Store;

const LATEST_FILE: &str = "latest.jsonl";
const HISTORY_DIR: &str = "history";

/// Version used in an archive name when latest has no readable first record.
const UNKNOWN_VERSION: &str = "unknown";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How [`EnhancementStore::save`] treats the existing latest file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Atomically replace latest.
    #[default]
    Overwrite,
    /// Append lines for incremental backfill.
    Append,
}

/// One frozen snapshot under `history/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFile {
    pub name: String,
    pub path: PathBuf,
}

/// Which file a timeline record came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSource {
    Latest,
    /// File name under `history/`.
    History(String),
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::History(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub record: EnhancementRecord,
    pub source: RecordSource,
}

/// What [`EnhancementStore::refresh`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No latest existed; everything was computed.
    Initial { computed: usize },
    /// Version changed; latest was archived and fully recomputed.
    Recomputed { computed: usize, archived: PathBuf },
    /// Version current; only activities without a record were computed.
    Backfilled { computed: usize },
}

/// Computes enhancement records for one kind. Implemented by the scoring
/// subsystem; the store only decides what to compute and where it goes.
pub trait Scorer {
    fn kind(&self) -> EnhancementKind;

    /// One record per activity it could score. Records are re-stamped with
    /// the store's current version before they are saved.
    fn compute(&self, activities: &[&Activity]) -> Vec<EnhancementRecord>;
}

// ---------------------------------------------------------------------------
// EnhancementStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EnhancementStore {
    layout: RepoLayout,
    store: Store,
    versions: EnhancementConfig,
}

impl EnhancementStore {
    #[must_use]
    pub const fn new(layout: RepoLayout, store: Store, versions: EnhancementConfig) -> Self {
        Self {
            layout,
            store,
            versions,
        }
    }

    #[must_use]
    pub fn kind_dir(&self, kind: EnhancementKind) -> PathBuf {
        self.layout.enhancements_dir().join(kind.as_str())
    }

    #[must_use]
    pub fn latest_path(&self, kind: EnhancementKind) -> PathBuf {
        self.kind_dir(kind).join(LATEST_FILE)
    }

    #[must_use]
    pub fn history_dir(&self, kind: EnhancementKind) -> PathBuf {
        self.kind_dir(kind).join(HISTORY_DIR)
    }

    /// Whether a non-empty latest file exists.
    #[must_use]
    pub fn has(&self, kind: EnhancementKind) -> bool {
        fs::metadata(self.latest_path(kind)).is_ok_and(|m| m.is_file() && m.len() > 0)
    }

    // -----------------------------------------------------------------------
    // Versions
    // -----------------------------------------------------------------------

    /// Version a fresh computation must stamp, from config.
    #[must_use]
    pub fn current_version(&self, kind: EnhancementKind) -> &str {
        self.versions.version_for(kind)
    }

    /// `algorithm_version` of the first record in latest. A first record
    /// without one counts as `"0.0"`. `None` when latest is missing, empty
    /// or its first line is not a JSON object.
    #[must_use]
    pub fn stored_version(&self, kind: EnhancementKind) -> Option<String> {
        let first = self.first_latest_record(kind)?;
        Some(recorded_version(&first).unwrap_or(UNVERSIONED).to_string())
    }

    /// First line of latest decoded as a JSON object.
    fn first_latest_record(&self, kind: EnhancementKind) -> Option<serde_json::Map<String, serde_json::Value>> {
        let path = self.latest_path(kind);
        let line = match first_line(&path) {
            Ok(line) => line?,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "cannot read enhancement file");
                }
                return None;
            }
        };
        match serde_json::from_str(&line).ok()? {
            serde_json::Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// True when latest is missing or unreadable, or its stored version
    /// differs from the current one. Only version strings are compared.
    #[must_use]
    pub fn needs_recompute(&self, kind: EnhancementKind) -> bool {
        self.stored_version(kind)
            .is_none_or(|stored| stored != self.current_version(kind))
    }

    // -----------------------------------------------------------------------
    // Latest
    // -----------------------------------------------------------------------

    /// Latest record per activity id. Unparseable lines are logged and
    /// skipped; for repeated ids the last line wins.
    ///
    /// # Errors
    ///
    /// [`EnhancementError::Io`] if an existing file cannot be read.
    pub fn load(&self, kind: EnhancementKind) -> Result<BTreeMap<String, EnhancementRecord>, EnhancementError> {
        Ok(read_records(&self.latest_path(kind), kind)?
            .into_iter()
            .map(|record| (record.activity_id.clone(), record))
            .collect())
    }

    /// Write records to latest.
    ///
    /// # Errors
    ///
    /// [`EnhancementError::Invalid`] if any record belongs to another kind
    /// or fails validation (nothing is written), otherwise any store
    /// failure.
    pub fn save(
        &self,
        kind: EnhancementKind,
        records: &[EnhancementRecord],
        mode: SaveMode,
    ) -> Result<usize, EnhancementError> {
        validate_batch(kind, records)?;
        let path = self.latest_path(kind);
        let written = match mode {
            SaveMode::Overwrite => self.store.write_all(&path, records)?,
            SaveMode::Append => self.store.append_lines(&path, records)?,
        };
        debug!(kind = %kind, written, ?mode, "saved enhancements");
        Ok(written)
    }

    /// Activities with no record in latest, in input order.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn unprocessed<'a>(
        &self,
        kind: EnhancementKind,
        activities: &'a [Activity],
    ) -> Result<Vec<&'a Activity>, EnhancementError> {
        let existing = self.load(kind)?;
        Ok(activities
            .iter()
            .filter(|a| !existing.contains_key(&a.activity_id))
            .collect())
    }

    /// Remove latest for one kind. History is kept. Returns whether a file
    /// was removed.
    ///
    /// # Errors
    ///
    /// [`EnhancementError::Io`] if the file exists but cannot be removed.
    pub fn clear(&self, kind: EnhancementKind) -> Result<bool, EnhancementError> {
        let path = self.latest_path(kind);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(kind = %kind, "cleared latest enhancements");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(EnhancementError::Io { path, source }),
        }
    }

    /// [`clear`](Self::clear) every kind. Returns how many files were removed.
    ///
    /// # Errors
    ///
    /// See [`clear`](Self::clear).
    pub fn clear_all(&self) -> Result<usize, EnhancementError> {
        let mut removed = 0;
        for kind in EnhancementKind::ALL {
            removed += usize::from(self.clear(kind)?);
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Copy latest into `history/` (when it exists) and then atomically
    /// replace it with `records`. Returns the archive path. The archive is
    /// named after the replaced `algorithm_version`, or `unknown` when the
    /// first record has none.
    ///
    /// # Errors
    ///
    /// Any validation, copy or write failure. If the copy fails latest is
    /// not touched.
    pub fn archive_and_replace(
        &self,
        kind: EnhancementKind,
        records: &[EnhancementRecord],
        reason: &str,
    ) -> Result<Option<PathBuf>, EnhancementError> {
        validate_batch(kind, records)?;
        let latest = self.latest_path(kind);
        let archived = if latest.is_file() {
            let version = self
                .first_latest_record(kind)
                .as_ref()
                .and_then(recorded_version)
                .unwrap_or(UNKNOWN_VERSION)
                .to_string();
            let history = self.history_dir(kind);
            fs::create_dir_all(&history).map_err(|source| EnhancementError::Io {
                path: history.clone(),
                source,
            })?;
            let target = next_archive_path(&history, &version, reason);
            fs::copy(&latest, &target).map_err(|source| EnhancementError::Io {
                path: target.clone(),
                source,
            })?;
            info!(kind = %kind, version = %version, archive = %target.display(), "archived latest enhancements");
            Some(target)
        } else {
            None
        };

        self.save(kind, records, SaveMode::Overwrite)?;
        Ok(archived)
    }

    /// History files, newest first (reverse name order).
    ///
    /// # Errors
    ///
    /// [`EnhancementError::Io`] if the directory exists but cannot be listed.
    pub fn list_history(&self, kind: EnhancementKind) -> Result<Vec<HistoryFile>, EnhancementError> {
        let dir = self.history_dir(kind);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(EnhancementError::Io { path: dir, source }),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| EnhancementError::Io {
                    path: dir.clone(),
                    source,
                })?
                .path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "jsonl") {
                continue;
            }
            if let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) {
                files.push(HistoryFile { name, path });
            }
        }
        files.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(files)
    }

    /// Records of one history file, keyed by activity id.
    ///
    /// # Errors
    ///
    /// [`EnhancementError::HistoryNotFound`] when `name` is not a file in
    /// `history/`.
    pub fn load_history(
        &self,
        kind: EnhancementKind,
        name: &str,
    ) -> Result<BTreeMap<String, EnhancementRecord>, EnhancementError> {
        let path = self.history_dir(kind).join(name);
        if !is_valid_segment(name) || !path.is_file() {
            return Err(EnhancementError::HistoryNotFound {
                kind,
                name: name.to_string(),
            });
        }
        Ok(read_records(&path, kind)?
            .into_iter()
            .map(|record| (record.activity_id.clone(), record))
            .collect())
    }

    /// Every stored record for one activity across latest and history,
    /// newest `computed_at` first. Equal timestamps keep latest before
    /// history and newer history files before older ones.
    ///
    /// # Errors
    ///
    /// Any read failure.
    pub fn timeline(&self, kind: EnhancementKind, activity_id: &str) -> Result<Vec<TimelineEntry>, EnhancementError> {
        let mut sources = vec![(self.latest_path(kind), RecordSource::Latest)];
        for file in self.list_history(kind)? {
            sources.push((file.path, RecordSource::History(file.name)));
        }

        let mut timeline = Vec::new();
        for (path, source) in sources {
            for record in read_records(&path, kind)? {
                if record.activity_id == activity_id {
                    timeline.push(TimelineEntry {
                        record,
                        source: source.clone(),
                    });
                }
            }
        }
        timeline.sort_by(|a, b| b.record.computed_at.cmp(&a.record.computed_at));
        Ok(timeline)
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Bring latest up to date for `scorer`'s kind.
    ///
    /// - no latest: compute everything and write it
    /// - stale version: compute everything and archive-and-replace
    /// - current version: compute only unprocessed activities and append
    ///
    /// # Errors
    ///
    /// Any read, validation or write failure.
    pub fn refresh(
        &self,
        scorer: &impl Scorer,
        activities: &[Activity],
        reason: &str,
    ) -> Result<RefreshOutcome, EnhancementError> {
        let kind = scorer.kind();
        let version = self.current_version(kind).to_string();
        let stamp = |mut records: Vec<EnhancementRecord>| {
            for record in &mut records {
                record.algorithm_version.clone_from(&version);
            }
            records
        };

        if !self.has(kind) {
            let all: Vec<&Activity> = activities.iter().collect();
            let records = stamp(scorer.compute(&all));
            let computed = self.save(kind, &records, SaveMode::Overwrite)?;
            return Ok(RefreshOutcome::Initial { computed });
        }

        if self.needs_recompute(kind) {
            let all: Vec<&Activity> = activities.iter().collect();
            let records = stamp(scorer.compute(&all));
            let archived = self.archive_and_replace(kind, &records, reason)?;
            return Ok(match archived {
                Some(archived) => RefreshOutcome::Recomputed {
                    computed: records.len(),
                    archived,
                },
                None => RefreshOutcome::Initial {
                    computed: records.len(),
                },
            });
        }

        let pending = self.unprocessed(kind, activities)?;
        if pending.is_empty() {
            return Ok(RefreshOutcome::Backfilled { computed: 0 });
        }
        let records = stamp(scorer.compute(&pending));
        let computed = self.save(kind, &records, SaveMode::Append)?;
        Ok(RefreshOutcome::Backfilled { computed })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_batch(kind: EnhancementKind, records: &[EnhancementRecord]) -> Result<(), EnhancementError> {
    for record in records {
        if record.kind() != kind {
            return Err(EnhancementError::Invalid {
                kind,
                reason: format!("record for {} holds a {} payload", record.activity_id, record.kind()),
            });
        }
        record.payload.validate()?;
    }
    Ok(())
}

fn read_records(path: &Path, kind: EnhancementKind) -> Result<Vec<EnhancementRecord>, EnhancementError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(EnhancementError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut records = Vec::new();
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut line_no = 0_u64;
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| EnhancementError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if read == 0 {
            break;
        }
        line_no += 1;
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match EnhancementRecord::from_line(kind, line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), line = line_no, error = %e, "skipping invalid enhancement record"),
        }
    }
    Ok(records)
}

/// First non-blank line, or `None` for an empty file.
fn first_line(path: &Path) -> io::Result<Option<String>> {
    let reader = BufReader::new(fs::File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(Some(trimmed.to_string()));
        }
    }
    Ok(None)
}

/// Keep archive names to one safe path segment.
fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "update".to_string()
    } else {
        cleaned
    }
}

/// `{YYYY-MM-DD}_v{version}_{reason}[_{n}].jsonl`, with `n` counting from 1
/// on collision.
fn recorded_version(record: &serde_json::Map<String, serde_json::Value>) -> Option<&str> {
    record.get("algorithm_version").and_then(serde_json::Value::as_str)
}

fn next_archive_path(history: &Path, version: &str, reason: &str) -> PathBuf {
    let stem = format!(
        "{}_v{}_{}",
        Utc::now().format("%Y-%m-%d"),
        sanitize(version),
        sanitize(reason)
    );
    let mut candidate = history.join(format!("{stem}.jsonl"));
    let mut counter = 1_u32;
    while candidate.exists() {
        candidate = history.join(format!("{stem}_{counter}.jsonl"));
        counter += 1;
    }
    candidate
}
