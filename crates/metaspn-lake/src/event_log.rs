//! Event log: the partitioned, append-only tree of activity files.
//!
//! The event log is the source of truth. Everything else in the lake is a
//! cache that can be rebuilt by scanning it.
//!
//! # Directory Layout
//!
//! ```text
//! sources/
//!   podcasts/listening-events.jsonl
//!   blogs/reading-events.jsonl
//! artifacts/
//!   podcast/episodes.jsonl
//!   twitter/tweets.jsonl
//!   twitter/archive-2021.json       # JSON array export, read-only
//! ```
//!
//! # Invariants
//!
//! - Appends go through [`Store::append_lines`]; existing bytes are never
//!   rewritten.
//! - Appends only ever target `.jsonl` files. `.json` documents are read
//!   but never written.
//! - Scans visit files in sorted relative-path order and lines in file
//!   order, so "first occurrence" of a duplicated id is well defined.
//! - A record's own `platform` and `activity_type` are authoritative; the
//!   directory it sits in only decides where it is stored.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::activity::{Activity, LineRecord, ParsedRecord, decode_document};
use crate::error::ErrorCode;
use crate::layout::{Partition, RESERVED_ARTIFACT_DIRS, RepoLayout, is_valid_segment};
use crate::platform::PlatformRegistry;
use crate::store::{Store, StoreError};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("event log I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid platform name '{0}'")]
    InvalidPlatform(String),

    #[error("platform '{platform}' appends to '{file}', which is not a .jsonl file")]
    NotAppendable { platform: String, file: String },

    #[error("platform '{platform}' appends to {dir}/, which a legacy repository does not read")]
    OutsideLegacyLayout { platform: String, dir: String },
}

impl EventLogError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } => ErrorCode::EventFileWriteFailed,
            Self::Store(e) => e.code(),
            Self::InvalidPlatform(_) => ErrorCode::MalformedRecord,
            Self::NotAppendable { .. } => ErrorCode::ConfigParseError,
            Self::OutsideLegacyLayout { .. } => ErrorCode::InvalidLayout,
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> EventLogError + '_ {
    move |source| EventLogError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One file of the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub path: PathBuf,
    /// `/`-separated path relative to the repository root.
    pub relative: String,
    pub partition: Partition,
    /// Directory name under the partition root.
    pub dir: String,
}

impl LogFile {
    /// Line-per-record file, as opposed to a whole JSON document.
    #[must_use]
    pub fn is_jsonl(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "jsonl")
    }
}

/// Where a record sits in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogLocation {
    pub partition: Partition,
    /// `/`-separated path relative to the repository root.
    pub file_path: String,
    /// 1-based line (JSONL) or array position (JSON).
    pub line_number: u64,
}

/// An activity together with its storage location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedActivity {
    pub activity: Activity,
    pub location: LogLocation,
}

/// Bytes removed from one file by [`EventLog::recover_torn_writes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TornWrite {
    pub file_path: String,
    pub bytes_truncated: u64,
}

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EventLog {
    layout: RepoLayout,
    registry: PlatformRegistry,
    store: Store,
}

impl EventLog {
    #[must_use]
    pub const fn new(layout: RepoLayout, registry: PlatformRegistry, store: Store) -> Self {
        Self {
            layout,
            registry,
            store,
        }
    }

    #[must_use]
    pub const fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    #[must_use]
    pub const fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    /// Every `.jsonl` / `.json` file under `sources/*/` and `artifacts/*/`,
    /// sorted by relative path. Reserved and hidden directories are skipped,
    /// and so is anything outside the fixed directories of a legacy
    /// repository.
    ///
    /// # Errors
    ///
    /// [`EventLogError::Io`] if a directory cannot be listed.
    pub fn files(&self) -> Result<Vec<LogFile>, EventLogError> {
        let mut files = Vec::new();
        for partition in Partition::ALL {
            let root = self.layout.partition_dir(partition);
            if !root.is_dir() {
                continue;
            }
            for dir in sorted_entries(&root)? {
                let Some(dir_name) = visible_name(&dir) else {
                    continue;
                };
                if !dir.is_dir() {
                    continue;
                }
                if !self.layout.is_log_dir(partition, &dir_name) {
                    continue;
                }
                for path in sorted_entries(&dir)? {
                    if visible_name(&path).is_none() || !path.is_file() || !is_event_file(&path) {
                        continue;
                    }
                    files.push(LogFile {
                        relative: self.layout.relative(&path),
                        path,
                        partition,
                        dir: dir_name.clone(),
                    });
                }
            }
        }
        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(files)
    }

    /// Look a file up by its manifest-relative path.
    #[must_use]
    pub fn file_at(&self, relative: &str) -> Option<LogFile> {
        let path = self.layout.resolve(relative);
        if !path.is_file() || !is_event_file(&path) {
            return None;
        }
        let mut parts = relative.split('/');
        let partition = match parts.next()? {
            "sources" => Partition::Source,
            "artifacts" => Partition::Artifact,
            _ => return None,
        };
        let dir = parts.next()?.to_string();
        if !self.layout.is_log_dir(partition, &dir) {
            return None;
        }
        Some(LogFile {
            path,
            relative: relative.to_string(),
            partition,
            dir,
        })
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Decode every record of one file without filtering.
    ///
    /// # Errors
    ///
    /// [`EventLogError::Io`] if the file cannot be read.
    pub fn read_file(&self, file: &LogFile) -> Result<Vec<LineRecord>, EventLogError> {
        let bytes = fs::read(&file.path).map_err(io_err(&file.path))?;
        let contents = String::from_utf8_lossy(&bytes);
        Ok(decode_document(&contents, file.is_jsonl()))
    }

    /// Activities of one file in file order. Records that are not
    /// activities are logged and skipped.
    ///
    /// # Errors
    ///
    /// [`EventLogError::Io`] if the file cannot be read.
    pub fn read_activities(&self, file: &LogFile) -> Result<Vec<LocatedActivity>, EventLogError> {
        let records = self.read_file(file)?;
        let mut out = Vec::with_capacity(records.len());
        for LineRecord { line, record } in records {
            match record {
                ParsedRecord::Activity(activity) => out.push(LocatedActivity {
                    activity: *activity,
                    location: LogLocation {
                        partition: file.partition,
                        file_path: file.relative.clone(),
                        line_number: line,
                    },
                }),
                ParsedRecord::Blank => {}
                ParsedRecord::Unrecognized => {
                    debug!(path = %file.relative, line, "skipping record with unrecognized shape");
                }
                ParsedRecord::Malformed(err) => {
                    warn!(path = %file.relative, line, error = %err, "skipping malformed record");
                }
            }
        }
        Ok(out)
    }

    /// Lazy scan over every activity, one file at a time. Later duplicates
    /// of an id already yielded are skipped.
    ///
    /// # Errors
    ///
    /// [`EventLogError::Io`] if the file listing fails. Files that become
    /// unreadable mid-scan are logged and skipped.
    pub fn scan(&self) -> Result<Scan<'_>, EventLogError> {
        Ok(Scan {
            log: self,
            files: self.files()?.into_iter(),
            current: Vec::new().into_iter(),
            seen: Some(HashSet::new()),
        })
    }

    /// Like [`scan`](Self::scan) but yields duplicates too.
    ///
    /// # Errors
    ///
    /// See [`scan`](Self::scan).
    pub fn scan_all(&self) -> Result<Scan<'_>, EventLogError> {
        let mut scan = self.scan()?;
        scan.seen = None;
        Ok(scan)
    }

    /// Number of unique activities.
    ///
    /// # Errors
    ///
    /// See [`scan`](Self::scan).
    pub fn count(&self) -> Result<usize, EventLogError> {
        Ok(self.scan()?.count())
    }

    // -----------------------------------------------------------------------
    // Appending
    // -----------------------------------------------------------------------

    /// Append one activity to the file the registry assigns it.
    ///
    /// # Errors
    ///
    /// [`EventLogError::InvalidPlatform`] for a platform name that is not a
    /// safe path segment, otherwise any store failure.
    pub fn append(&self, activity: &Activity) -> Result<LocatedActivity, EventLogError> {
        let mut located = self.append_batch(std::slice::from_ref(activity))?;
        located
            .pop()
            .ok_or_else(|| EventLogError::InvalidPlatform(activity.platform.clone()))
    }

    /// Append a batch with one write per target file. Returned locations
    /// follow input order.
    ///
    /// # Errors
    ///
    /// See [`append`](Self::append), plus
    /// [`EventLogError::NotAppendable`] when the registry points a platform
    /// at a whole-document `.json` file and
    /// [`EventLogError::OutsideLegacyLayout`] when a legacy repository would
    /// not read the target back. Every target is validated before any file
    /// is written.
    pub fn append_batch(&self, activities: &[Activity]) -> Result<Vec<LocatedActivity>, EventLogError> {
        let mut groups: BTreeMap<(Partition, String, String), Vec<usize>> = BTreeMap::new();
        for (idx, activity) in activities.iter().enumerate() {
            let target = self
                .registry
                .append_target(&activity.platform, activity.activity_type);
            let reserved = target.partition == Partition::Artifact
                && RESERVED_ARTIFACT_DIRS.contains(&target.dir.as_str());
            if !is_valid_segment(&activity.platform)
                || !is_valid_segment(&target.dir)
                || !is_valid_segment(&target.file)
                || reserved
            {
                return Err(EventLogError::InvalidPlatform(activity.platform.clone()));
            }
            if !self.layout.is_log_dir(target.partition, &target.dir) {
                return Err(EventLogError::OutsideLegacyLayout {
                    platform: activity.platform.clone(),
                    dir: format!("{}/{}", target.partition.dir_name(), target.dir),
                });
            }
            if !Path::new(&target.file).extension().is_some_and(|ext| ext == "jsonl") {
                return Err(EventLogError::NotAppendable {
                    platform: activity.platform.clone(),
                    file: target.file,
                });
            }
            groups
                .entry((target.partition, target.dir, target.file))
                .or_default()
                .push(idx);
        }

        let mut slots: Vec<Option<LogLocation>> = vec![None; activities.len()];
        for ((partition, dir, file), indices) in groups {
            let path = self.layout.partition_dir(partition).join(&dir).join(&file);
            let first_line = next_line_number(&path).map_err(io_err(&path))?;
            let batch: Vec<&Activity> = indices.iter().map(|&i| &activities[i]).collect();
            self.store.append_lines(&path, &batch)?;

            let relative = self.layout.relative(&path);
            for (offset, &idx) in (0_u64..).zip(indices.iter()) {
                slots[idx] = Some(LogLocation {
                    partition,
                    file_path: relative.clone(),
                    line_number: first_line + offset,
                });
            }
            debug!(path = %relative, count = indices.len(), "appended activities");
        }

        Ok(activities
            .iter()
            .zip(slots)
            .filter_map(|(activity, slot)| {
                slot.map(|location| LocatedActivity {
                    activity: activity.clone(),
                    location,
                })
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Truncate incomplete trailing lines left by interrupted appends.
    ///
    /// Only `.jsonl` files are touched. Returns one entry per repaired file.
    ///
    /// # Errors
    ///
    /// [`EventLogError::Io`] on any filesystem failure.
    pub fn recover_torn_writes(&self) -> Result<Vec<TornWrite>, EventLogError> {
        let mut repaired = Vec::new();
        for file in self.files()?.into_iter().filter(LogFile::is_jsonl) {
            if let Some(bytes) = truncate_partial_tail(&file.path).map_err(io_err(&file.path))? {
                warn!(path = %file.relative, bytes, "truncated torn write");
                repaired.push(TornWrite {
                    file_path: file.relative,
                    bytes_truncated: bytes,
                });
            }
        }
        Ok(repaired)
    }
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

/// Lazy, forward-only iterator returned by [`EventLog::scan`].
///
/// Holds at most one decoded file in memory.
pub struct Scan<'a> {
    log: &'a EventLog,
    files: std::vec::IntoIter<LogFile>,
    current: std::vec::IntoIter<LocatedActivity>,
    seen: Option<HashSet<String>>,
}

impl Iterator for Scan<'_> {
    type Item = LocatedActivity;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for item in self.current.by_ref() {
                if let Some(seen) = &mut self.seen {
                    if !seen.insert(item.activity.activity_id.clone()) {
                        debug!(
                            activity_id = %item.activity.activity_id,
                            path = %item.location.file_path,
                            line = item.location.line_number,
                            "skipping duplicate activity id"
                        );
                        continue;
                    }
                }
                return Some(item);
            }

            let file = self.files.next()?;
            match self.log.read_activities(&file) {
                Ok(items) => self.current = items.into_iter(),
                Err(e) => warn!(path = %file.relative, error = %e, "skipping unreadable event file"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_event_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "jsonl" || ext == "json")
}

fn visible_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    (!name.starts_with('.')).then_some(name)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, EventLogError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        entries.push(entry.map_err(io_err(dir))?.path());
    }
    entries.sort();
    Ok(entries)
}

const LINE_COUNT_BUFFER: usize = 64 * 1024;

/// Line number the next appended record will occupy, accounting for the
/// newline the store inserts after a torn tail. Streams the file in fixed
/// chunks.
fn next_line_number(path: &Path) -> io::Result<u64> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(1),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::with_capacity(LINE_COUNT_BUFFER, file);
    let mut newlines = 0;
    let mut last = None;
    loop {
        let chunk = match reader.fill_buf() {
            Ok(chunk) => chunk,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if chunk.is_empty() {
            break;
        }
        newlines += bytecount(chunk);
        last = chunk.last().copied();
        let len = chunk.len();
        reader.consume(len);
    }
    let partial = last.is_some_and(|b| b != b'\n');
    Ok(newlines + u64::from(partial) + 1)
}

fn bytecount(bytes: &[u8]) -> u64 {
    bytes.iter().filter(|&&b| b == b'\n').map(|_| 1_u64).sum()
}

/// Returns `Some(bytes_truncated)` if the file had a torn tail.
fn truncate_partial_tail(path: &Path) -> io::Result<Option<u64>> {
    let content = fs::read(path)?;
    let file_len = content.len() as u64;
    if file_len == 0 {
        return Ok(None);
    }

    let keep = content
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos as u64 + 1);
    if keep == file_len {
        return Ok(None);
    }

    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(keep)?;
    Ok(Some(file_len - keep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityType, parse_timestamp};
    use tempfile::TempDir;

    fn setup() -> (TempDir, EventLog) {
        let tmp = TempDir::new().expect("tempdir");
        let layout = RepoLayout::init(tmp.path()).expect("init");
        let log = EventLog::new(layout, PlatformRegistry::with_defaults(), Store::default());
        (tmp, log)
    }

    fn activity(platform: &str, ty: ActivityType, ts: &str, title: &str) -> Activity {
        Activity::builder(parse_timestamp(ts).expect("ts"), platform, ty)
            .title(title)
            .build()
    }

    // -----------------------------------------------------------------------
    // Append
    // -----------------------------------------------------------------------

    #[test]
    fn append_routes_by_registry() {
        let (_tmp, log) = setup();
        let listen = log
            .append(&activity("podcast", ActivityType::Consume, "2024-01-01T00:00:00Z", "a"))
            .expect("append");
        assert_eq!(listen.location.file_path, "sources/podcasts/listening-events.jsonl");
        assert_eq!(listen.location.partition, Partition::Source);
        assert_eq!(listen.location.line_number, 1);

        let post = log
            .append(&activity("blog", ActivityType::Create, "2024-01-02T00:00:00Z", "b"))
            .expect("append");
        assert_eq!(post.location.file_path, "artifacts/blog/posts.jsonl");
    }

    #[test]
    fn batch_locations_follow_input_order() {
        let (_tmp, log) = setup();
        let batch = vec![
            activity("blog", ActivityType::Create, "2024-01-01T00:00:00Z", "one"),
            activity("podcast", ActivityType::Create, "2024-01-02T00:00:00Z", "two"),
            activity("blog", ActivityType::Create, "2024-01-03T00:00:00Z", "three"),
        ];
        let located = log.append_batch(&batch).expect("append");
        assert_eq!(located.len(), 3);
        assert_eq!(located[0].activity, batch[0]);
        assert_eq!(located[0].location.line_number, 1);
        assert_eq!(located[1].location.file_path, "artifacts/podcast/episodes.jsonl");
        assert_eq!(located[2].location.line_number, 2);
    }

    #[test]
    fn line_numbers_continue_after_existing_content() {
        let (_tmp, log) = setup();
        let path = log.layout().root().join("artifacts/blog/posts.jsonl");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, "\n{\"junk\":1}\n{\"torn\":").expect("seed");
        let located = log
            .append(&activity("blog", ActivityType::Create, "2024-01-01T00:00:00Z", "x"))
            .expect("append");
        assert_eq!(located.location.line_number, 4);

        let file = log.file_at("artifacts/blog/posts.jsonl").expect("file");
        let read = log.read_activities(&file).expect("read");
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].location.line_number, 4);
    }

    #[test]
    fn append_rejects_unsafe_platforms() {
        let (_tmp, log) = setup();
        for platform in ["", "../escape", "indexes", "enhancements"] {
            let err = log
                .append(&activity(platform, ActivityType::Create, "2024-01-01T00:00:00Z", "x"))
                .expect_err("should reject");
            assert!(matches!(err, EventLogError::InvalidPlatform(_)), "{platform}");
        }
        assert!(log.files().expect("files").is_empty());
    }

    #[test]
    fn append_rejects_whole_document_targets() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = RepoLayout::init(tmp.path()).expect("init");
        let mut registry = PlatformRegistry::with_defaults();
        registry.register(crate::platform::PlatformSpec::new("blog").with_artifact("blog", "posts.json"));
        let log = EventLog::new(layout, registry, Store::default());

        let batch = vec![
            activity("podcast", ActivityType::Create, "2024-01-01T00:00:00Z", "fine"),
            activity("blog", ActivityType::Create, "2024-01-02T00:00:00Z", "one"),
            activity("blog", ActivityType::Create, "2024-01-03T00:00:00Z", "two"),
        ];
        let err = log.append_batch(&batch).expect_err("should reject");
        assert!(
            matches!(&err, EventLogError::NotAppendable { platform, file } if platform == "blog" && file == "posts.json")
        );
        assert_eq!(err.code(), ErrorCode::ConfigParseError);
        assert!(log.files().expect("files").is_empty());
    }

    #[test]
    fn legacy_layout_limits_files_and_targets() {
        let tmp = TempDir::new().expect("tempdir");
        for dir in ["sources/podcasts", "sources/books", "artifacts/podcast"] {
            fs::create_dir_all(tmp.path().join(dir)).expect("mkdir");
        }
        fs::write(tmp.path().join("meta.json"), "{}").expect("profile");
        fs::write(tmp.path().join("sources/books/reading-events.jsonl"), "").expect("write");
        let layout = RepoLayout::open(tmp.path()).expect("open");
        let log = EventLog::new(layout, PlatformRegistry::with_defaults(), Store::default());

        let err = log
            .append(&activity("book", ActivityType::Consume, "2024-01-01T00:00:00Z", "x"))
            .expect_err("books are not read back");
        assert!(matches!(err, EventLogError::OutsideLegacyLayout { .. }));
        assert_eq!(err.code(), ErrorCode::InvalidLayout);

        log.append(&activity("podcast", ActivityType::Consume, "2024-01-01T00:00:00Z", "y"))
            .expect("append");
        let files: Vec<String> = log.files().expect("files").into_iter().map(|f| f.relative).collect();
        assert_eq!(files, vec!["sources/podcasts/listening-events.jsonl"]);
        assert!(log.file_at("sources/books/reading-events.jsonl").is_none());
    }

    #[test]
    fn invalid_member_aborts_whole_batch() {
        let (_tmp, log) = setup();
        let batch = vec![
            activity("blog", ActivityType::Create, "2024-01-01T00:00:00Z", "ok"),
            activity("a/b", ActivityType::Create, "2024-01-01T00:00:00Z", "bad"),
        ];
        assert!(log.append_batch(&batch).is_err());
        assert_eq!(log.count().expect("count"), 0);
    }

    // -----------------------------------------------------------------------
    // Listing and scanning
    // -----------------------------------------------------------------------

    #[test]
    fn files_skip_reserved_hidden_and_foreign() {
        let (_tmp, log) = setup();
        let root = log.layout().root().to_path_buf();
        fs::create_dir_all(root.join("artifacts/youtube")).expect("mkdir");
        fs::write(root.join("artifacts/youtube/videos.jsonl"), "").expect("write");
        fs::write(root.join("artifacts/youtube/notes.txt"), "").expect("write");
        fs::write(root.join("artifacts/youtube/.hidden.jsonl"), "").expect("write");
        fs::write(root.join("artifacts/indexes/manifest.json"), "{}").expect("write");
        fs::create_dir_all(root.join("artifacts/enhancements/quality_scores")).expect("mkdir");
        fs::write(root.join("artifacts/enhancements/quality_scores/latest.jsonl"), "").expect("write");

        let files = log.files().expect("files");
        let names: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["artifacts/youtube/videos.jsonl"]);
        assert_eq!(files[0].dir, "youtube");
    }

    #[test]
    fn scan_reads_json_arrays_and_skips_bad_records() {
        let (_tmp, log) = setup();
        let root = log.layout().root().to_path_buf();
        fs::create_dir_all(root.join("artifacts/twitter")).expect("mkdir");
        let export = serde_json::json!([
            {"id": "1", "tweet": {"text": "a", "created_at": "2021-01-01T00:00:00Z"}},
            {"unknown": true},
            {"id": "2", "tweet": {"text": "b", "created_at": "2021-01-02T00:00:00Z"}}
        ]);
        fs::write(root.join("artifacts/twitter/archive.json"), export.to_string()).expect("write");
        fs::write(root.join("artifacts/twitter/tweets.jsonl"), "garbage\n\n").expect("write");

        let found: Vec<LocatedActivity> = log.scan().expect("scan").collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].activity.activity_id, "twitter_1");
        assert_eq!(found[1].location.line_number, 3);
    }

    #[test]
    fn scan_keeps_first_duplicate_only() {
        let (_tmp, log) = setup();
        let a = activity("blog", ActivityType::Create, "2024-01-01T00:00:00Z", "same");
        log.append(&a).expect("first");
        log.append(&a).expect("second");

        let unique: Vec<LocatedActivity> = log.scan().expect("scan").collect();
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].location.line_number, 1);
        assert_eq!(log.scan_all().expect("scan").count(), 2);
    }

    #[test]
    fn file_at_rejects_unknown_paths() {
        let (_tmp, log) = setup();
        assert!(log.file_at("artifacts/blog/posts.jsonl").is_none());
        assert!(log.file_at("elsewhere/x.jsonl").is_none());
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    #[test]
    fn recover_truncates_torn_tail() {
        let (_tmp, log) = setup();
        let a = activity("blog", ActivityType::Create, "2024-01-01T00:00:00Z", "x");
        let located = log.append(&a).expect("append");
        let path = log.layout().resolve(&located.location.file_path);
        let mut content = fs::read(&path).expect("read");
        let clean_len = content.len() as u64;
        content.extend_from_slice(b"{\"partial\":");
        fs::write(&path, &content).expect("write");

        let repaired = log.recover_torn_writes().expect("recover");
        assert_eq!(
            repaired,
            vec![TornWrite {
                file_path: "artifacts/blog/posts.jsonl".into(),
                bytes_truncated: 11,
            }]
        );
        assert_eq!(fs::metadata(&path).expect("meta").len(), clean_len);
        assert!(log.recover_torn_writes().expect("again").is_empty());
    }

    #[test]
    fn recover_clears_file_without_newline() {
        let (_tmp, log) = setup();
        let dir = log.layout().root().join("sources/books");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("reading-events.jsonl"), "{\"never finished").expect("write");
        let repaired = log.recover_torn_writes().expect("recover");
        assert_eq!(repaired.len(), 1);
        assert_eq!(fs::metadata(dir.join("reading-events.jsonl")).expect("meta").len(), 0);
    }

    #[test]
    fn line_count_spans_buffer_boundaries() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("big.jsonl");
        assert_eq!(next_line_number(&path).expect("missing"), 1);

        let line = "x".repeat(999);
        let body: String = (0..200).map(|_| format!("{line}\n")).collect();
        assert!(body.len() > LINE_COUNT_BUFFER);
        fs::write(&path, &body).expect("write");
        assert_eq!(next_line_number(&path).expect("count"), 201);

        fs::write(&path, format!("{body}{{\"torn")).expect("write torn");
        assert_eq!(next_line_number(&path).expect("count"), 202);
    }
}
