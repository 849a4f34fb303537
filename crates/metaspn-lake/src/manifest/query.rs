//! Read-side operations of the manifest index.
//!
//! Every multi-filter query is the intersection of the single-filter id
//! sets. Date ranges are pruned by month bucket first and then checked
//! against the exact timestamps. With no manifest loaded every query is
//! empty and every count is `None`.

use std::collections::BTreeSet;
use std::ops::Bound;

use chrono::{DateTime, Utc};

use super::{IndexEntry, Loaded, ManifestError, ManifestIndex, ManifestStats, Shard, shard};
use crate::activity::{ActivityType, month_key};
use crate::filter::ActivityFilter;

impl ManifestIndex {
    #[must_use]
    pub fn lookup(&self, activity_id: &str) -> Option<&IndexEntry> {
        self.state
            .as_ref()
            .and_then(|s| s.manifest.activities.get(activity_id))
    }

    /// Every entry in id order.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.state
            .iter()
            .flat_map(|s| s.manifest.activities.values())
    }

    #[must_use]
    pub fn by_platform(&self, platform: &str) -> Vec<&IndexEntry> {
        self.query(&ActivityFilter::new().platform(platform))
    }

    #[must_use]
    pub fn by_type(&self, activity_type: ActivityType) -> Vec<&IndexEntry> {
        self.query(&ActivityFilter::new().activity_type(activity_type))
    }

    /// Entries with `start <= timestamp <= end`. Either bound may be open.
    #[must_use]
    pub fn by_date_range(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Vec<&IndexEntry> {
        let filter = ActivityFilter {
            start,
            end,
            ..ActivityFilter::default()
        };
        self.query(&filter)
    }

    /// Entries matching every predicate of `filter`, in id order. The
    /// filter's `limit` is not applied here.
    #[must_use]
    pub fn query(&self, filter: &ActivityFilter) -> Vec<&IndexEntry> {
        let Some(state) = &self.state else {
            return Vec::new();
        };
        let entries = &state.manifest.activities;

        let mut sets: Vec<BTreeSet<&str>> = Vec::new();
        if let Some(platform) = &filter.platform {
            sets.push(id_set(state.lookups.by_platform.get(platform)));
        }
        if let Some(activity_type) = filter.activity_type {
            sets.push(id_set(state.lookups.by_type.get(&activity_type)));
        }
        if filter.has_date_range() {
            sets.push(date_ids(state, filter.start, filter.end));
        }

        if sets.is_empty() {
            return entries.values().collect();
        }
        sets.sort_by_key(BTreeSet::len);
        let mut sets = sets.into_iter();
        let Some(first) = sets.next() else {
            return Vec::new();
        };
        let ids = sets.fold(first, |acc, set| acc.intersection(&set).copied().collect());
        ids.into_iter().filter_map(|id| entries.get(id)).collect()
    }

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn stats(&self) -> Option<&ManifestStats> {
        self.state.as_ref().map(|s| &s.manifest.stats)
    }

    #[must_use]
    pub fn total(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.manifest.total_activities)
    }

    #[must_use]
    pub fn count_platform(&self, platform: &str) -> Option<usize> {
        self.stats()
            .map(|stats| stats.by_platform.get(platform).copied().unwrap_or(0))
    }

    #[must_use]
    pub fn count_type(&self, activity_type: ActivityType) -> Option<usize> {
        self.stats()
            .map(|stats| stats.by_type.get(activity_type.as_str()).copied().unwrap_or(0))
    }

    /// Platform names in sorted order.
    #[must_use]
    pub fn platforms(&self) -> Vec<&str> {
        self.state
            .iter()
            .flat_map(|s| s.lookups.by_platform.keys().map(String::as_str))
            .collect()
    }

    /// Earliest and latest indexed timestamps.
    #[must_use]
    pub fn date_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.entries().fold(None, |range, entry| {
            let ts = entry.timestamp;
            Some(match range {
                None => (ts, ts),
                Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
            })
        })
    }

    // -----------------------------------------------------------------------
    // Shards
    // -----------------------------------------------------------------------

    /// Read `by_platform/{name}.json` without touching the master.
    ///
    /// # Errors
    ///
    /// [`ManifestError::Io`] or [`ManifestError::Corrupt`] when the file
    /// exists but cannot be read.
    pub fn platform_shard(&self, platform: &str) -> Result<Option<Shard>, ManifestError> {
        if !shard::is_writable_key(platform) {
            return Ok(None);
        }
        shard::read(&self.layout.by_platform_dir().join(format!("{platform}.json")))
    }

    /// Read `by_date/{YYYY-MM}.json` without touching the master.
    ///
    /// # Errors
    ///
    /// See [`platform_shard`](Self::platform_shard).
    pub fn month_shard(&self, month: &str) -> Result<Option<Shard>, ManifestError> {
        if !shard::is_writable_key(month) {
            return Ok(None);
        }
        shard::read(&self.layout.by_date_dir().join(format!("{month}.json")))
    }
}

fn id_set(ids: Option<&BTreeSet<String>>) -> BTreeSet<&str> {
    ids.into_iter().flatten().map(String::as_str).collect()
}

fn date_ids(state: &Loaded, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> BTreeSet<&str> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return BTreeSet::new();
        }
    }
    let lo = start.map_or(Bound::Unbounded, |s| Bound::Included(month_key(&s)));
    let hi = end.map_or(Bound::Unbounded, |e| Bound::Included(month_key(&e)));

    let entries = &state.manifest.activities;
    state
        .lookups
        .by_month
        .range::<String, _>((lo, hi))
        .flat_map(|(_, ids)| ids.iter())
        .filter(|id| {
            entries.get(id.as_str()).is_some_and(|entry| {
                start.is_none_or(|s| entry.timestamp >= s) && end.is_none_or(|e| entry.timestamp <= e)
            })
        })
        .map(String::as_str)
        .collect()
}
