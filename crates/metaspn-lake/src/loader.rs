//! Activity loader: one read facade over the manifest and the event log.
//!
//! # Query paths
//!
//! - **Manifest**: candidate ids come from the index. They are grouped by
//!   the file their entry points at and each file is read once, when the
//!   iterator reaches it. An entry whose line no longer holds its id is
//!   looked up elsewhere in the same file; ids still missing get a single
//!   lazy scan of the whole log. Ids that cannot be found are dropped.
//! - **Full scan**: every file is streamed and filtered record by record.
//!   [`ActivityLoader::query`] then sorts the matches by timestamp.
//!
//! Results are a lazy, forward-only [`Activities`] iterator on both paths.
//! Only the timestamp-sorted full-scan query buffers, and it holds the
//! filtered matches only.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::activity::Activity;
use crate::enhancement::{EnhancedActivity, EnhancementError, EnhancementMaps, join_one};
use crate::error::ErrorCode;
use crate::event_log::{EventLog, EventLogError, LocatedActivity, Scan};
use crate::filter::ActivityFilter;
use crate::manifest::{ManifestError, ManifestIndex, ManifestStats};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error(transparent)]
    EventLog(#[from] EventLogError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Enhancement(#[from] EnhancementError),
}

impl LoaderError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::EventLog(e) => e.code(),
            Self::Manifest(e) => e.code(),
            Self::Enhancement(e) => e.code(),
        }
    }
}

/// Which path served a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    Manifest,
    FullScan,
}

impl QuerySource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manifest => "manifest",
            Self::FullScan => "full_scan",
        }
    }
}

// ---------------------------------------------------------------------------
// ActivityLoader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ActivityLoader<'a> {
    log: &'a EventLog,
    index: &'a ManifestIndex,
}

impl<'a> ActivityLoader<'a> {
    #[must_use]
    pub const fn new(log: &'a EventLog, index: &'a ManifestIndex) -> Self {
        Self { log, index }
    }

    /// The path the next query will take. A stale manifest is never used.
    #[must_use]
    pub const fn source(&self) -> QuerySource {
        if self.index.is_usable() {
            QuerySource::Manifest
        } else {
            QuerySource::FullScan
        }
    }

    /// Lazy matches in storage order. Never sorts.
    ///
    /// # Errors
    ///
    /// [`LoaderError::EventLog`] if the event log cannot be listed.
    pub fn stream(&self, filter: &ActivityFilter) -> Result<Activities<'a>, LoaderError> {
        let inner = match self.source() {
            QuerySource::Manifest => {
                let entries = self.index.query(filter);
                let mut groups: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
                for entry in entries {
                    groups
                        .entry(entry.file_path.clone())
                        .or_default()
                        .push((entry.activity_id.clone(), entry.line_number));
                }
                Inner::Indexed(IndexedReader::new(self.log, groups, Vec::new(), filter.clone()))
            }
            QuerySource::FullScan => Inner::Scan {
                scan: self.log.scan()?,
                filter: filter.clone(),
            },
        };
        Ok(Activities::new(inner, filter.limit))
    }

    /// [`stream`](Self::stream), sorted by timestamp on the full-scan path.
    /// Manifest-driven results carry no ordering guarantee.
    ///
    /// # Errors
    ///
    /// See [`stream`](Self::stream).
    pub fn query(&self, filter: &ActivityFilter) -> Result<Activities<'a>, LoaderError> {
        if self.source() == QuerySource::Manifest {
            return self.stream(filter);
        }
        let unlimited = ActivityFilter {
            limit: None,
            ..filter.clone()
        };
        let mut matches: Vec<Activity> = self.stream(&unlimited)?.collect();
        matches.sort_by_key(|a| a.timestamp);
        Ok(Activities::new(Inner::Sorted(matches.into_iter()), filter.limit))
    }

    /// Number of matches. Unfiltered, platform-only and type-only counts
    /// are answered from manifest counters; everything else counts the
    /// stream.
    ///
    /// # Errors
    ///
    /// See [`stream`](Self::stream).
    pub fn count(&self, filter: &ActivityFilter) -> Result<usize, LoaderError> {
        let from_stats = if self.source() == QuerySource::FullScan || filter.has_date_range() {
            None
        } else if filter.is_unfiltered() {
            self.index.total()
        } else {
            match (&filter.platform, filter.activity_type) {
                (Some(platform), None) => self.index.count_platform(platform),
                (None, Some(activity_type)) => self.index.count_type(activity_type),
                _ => None,
            }
        };
        let count = match from_stats {
            Some(count) => count,
            None => self.stream(filter)?.count(),
        };
        Ok(filter.limit.map_or(count, |limit| count.min(limit)))
    }

    /// Materialize specific ids. Unknown ids are dropped; output follows
    /// storage order, not input order.
    ///
    /// # Errors
    ///
    /// See [`stream`](Self::stream).
    pub fn load_by_ids<I, S>(&self, ids: I) -> Result<Activities<'a>, LoaderError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut groups: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
        let mut unindexed = Vec::new();
        let mut seen = HashSet::new();
        for id in ids {
            let id: String = id.into();
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.index.lookup(&id) {
                Some(entry) => groups
                    .entry(entry.file_path.clone())
                    .or_default()
                    .push((id, entry.line_number)),
                None => unindexed.push(id),
            }
        }
        let reader = IndexedReader::new(self.log, groups, unindexed, ActivityFilter::default());
        Ok(Activities::new(Inner::Indexed(reader), None))
    }

    /// Platform names present in the lake, sorted.
    ///
    /// # Errors
    ///
    /// See [`stream`](Self::stream).
    pub fn platforms(&self) -> Result<Vec<String>, LoaderError> {
        if self.source() == QuerySource::Manifest {
            return Ok(self.index.platforms().into_iter().map(str::to_string).collect());
        }
        let names: BTreeSet<String> = self.log.scan()?.map(|l| l.activity.platform).collect();
        Ok(names.into_iter().collect())
    }

    /// Earliest and latest timestamps, or `None` for an empty lake.
    ///
    /// # Errors
    ///
    /// See [`stream`](Self::stream).
    pub fn date_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, LoaderError> {
        if self.source() == QuerySource::Manifest {
            return Ok(self.index.date_range());
        }
        Ok(self.log.scan()?.fold(None, |range, located| {
            let ts = located.activity.timestamp;
            Some(match range {
                None => (ts, ts),
                Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
            })
        }))
    }

    /// Aggregate counters, from the manifest when it is usable, else by
    /// scan.
    ///
    /// # Errors
    ///
    /// See [`stream`](Self::stream).
    pub fn stats(&self) -> Result<ManifestStats, LoaderError> {
        if self.source() == QuerySource::Manifest
            && let Some(stats) = self.index.stats()
        {
            return Ok(stats.clone());
        }
        let mut stats = ManifestStats::default();
        for located in self.log.scan()? {
            let a = &located.activity;
            stats.record(&a.platform, a.activity_type, &a.timestamp);
        }
        Ok(stats)
    }

    /// [`query`](Self::query) with every result joined against `maps`.
    ///
    /// # Errors
    ///
    /// See [`stream`](Self::stream).
    pub fn query_enhanced<'m>(
        &self,
        filter: &ActivityFilter,
        maps: &'m EnhancementMaps,
    ) -> Result<impl Iterator<Item = EnhancedActivity> + use<'a, 'm>, LoaderError> {
        Ok(self.query(filter)?.map(move |activity| join_one(activity, maps)))
    }
}

// ---------------------------------------------------------------------------
// Activities
// ---------------------------------------------------------------------------

/// Lazy, forward-only, finite sequence of activities.
pub struct Activities<'a> {
    inner: Inner<'a>,
    remaining: Option<usize>,
}

enum Inner<'a> {
    Indexed(IndexedReader<'a>),
    Scan { scan: Scan<'a>, filter: ActivityFilter },
    Sorted(std::vec::IntoIter<Activity>),
}

impl<'a> Activities<'a> {
    const fn new(inner: Inner<'a>, limit: Option<usize>) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }
}

impl Iterator for Activities<'_> {
    type Item = Activity;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        let next = match &mut self.inner {
            Inner::Indexed(reader) => reader.next(),
            Inner::Scan { scan, filter } => scan
                .find(|located| filter.matches(&located.activity))
                .map(|located| located.activity),
            Inner::Sorted(items) => items.next(),
        }?;
        if let Some(remaining) = &mut self.remaining {
            *remaining -= 1;
        }
        Some(next)
    }
}

// ---------------------------------------------------------------------------
// IndexedReader
// ---------------------------------------------------------------------------

/// Materializes index candidates one file at a time.
struct IndexedReader<'a> {
    log: &'a EventLog,
    groups: std::collections::btree_map::IntoIter<String, Vec<(String, u64)>>,
    current: std::vec::IntoIter<Activity>,
    /// Ids whose entry did not lead to the record.
    missing: HashSet<String>,
    fallback: Option<Scan<'a>>,
    filter: ActivityFilter,
}

impl<'a> IndexedReader<'a> {
    fn new(
        log: &'a EventLog,
        groups: BTreeMap<String, Vec<(String, u64)>>,
        unindexed: Vec<String>,
        filter: ActivityFilter,
    ) -> Self {
        Self {
            log,
            groups: groups.into_iter(),
            current: Vec::new().into_iter(),
            missing: unindexed.into_iter().collect(),
            fallback: None,
            filter,
        }
    }

    /// Read one file and pick out the wanted ids.
    fn materialize(&mut self, file_path: &str, wanted: Vec<(String, u64)>) -> Vec<Activity> {
        let Some(file) = self.log.file_at(file_path) else {
            warn!(path = %file_path, ids = wanted.len(), "indexed file is missing, falling back to scan");
            self.missing.extend(wanted.into_iter().map(|(id, _)| id));
            return Vec::new();
        };
        let records = match self.log.read_activities(&file) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %file_path, error = %e, "indexed file is unreadable, falling back to scan");
                self.missing.extend(wanted.into_iter().map(|(id, _)| id));
                return Vec::new();
            }
        };

        let by_line: BTreeMap<u64, &LocatedActivity> =
            records.iter().map(|r| (r.location.line_number, r)).collect();
        let mut found = Vec::with_capacity(wanted.len());
        for (id, line) in wanted {
            let hit = by_line
                .get(&line)
                .copied()
                .filter(|r| r.activity.activity_id == id)
                .or_else(|| {
                    debug!(activity_id = %id, path = %file_path, line, "stale line number in manifest entry");
                    records.iter().find(|r| r.activity.activity_id == id)
                });
            match hit {
                Some(record) => found.push(record.activity.clone()),
                None => {
                    warn!(activity_id = %id, path = %file_path, "manifest entry points at a missing record");
                    self.missing.insert(id);
                }
            }
        }
        found
    }

    fn next_fallback(&mut self) -> Option<Activity> {
        if self.missing.is_empty() {
            return None;
        }
        if self.fallback.is_none() {
            match self.log.scan() {
                Ok(scan) => self.fallback = Some(scan),
                Err(e) => {
                    warn!(error = %e, ids = self.missing.len(), "cannot scan for missing ids, dropping them");
                    self.missing.clear();
                    return None;
                }
            }
        }
        let scan = self.fallback.as_mut()?;
        for located in scan.by_ref() {
            if self.missing.remove(&located.activity.activity_id) {
                return Some(located.activity);
            }
            if self.missing.is_empty() {
                break;
            }
        }
        if !self.missing.is_empty() {
            debug!(ids = self.missing.len(), "dropping ids not found in the event log");
            self.missing.clear();
        }
        None
    }
}

impl Iterator for IndexedReader<'_> {
    type Item = Activity;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(activity) = self.current.by_ref().find(|a| self.filter.matches(a)) {
                return Some(activity);
            }
            let Some((file_path, wanted)) = self.groups.next() else {
                break;
            };
            let found = self.materialize(&file_path, wanted);
            self.current = found.into_iter();
        }
        loop {
            let activity = self.next_fallback()?;
            if self.filter.matches(&activity) {
                return Some(activity);
            }
        }
    }
}
