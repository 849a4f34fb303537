//! Query filters shared by the manifest and the loader.

use chrono::{DateTime, Utc};

use crate::activity::{Activity, ActivityType};

/// Filter criteria for activity queries.
///
/// All fields are optional. When multiple fields are set, they are combined
/// with AND semantics. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityFilter {
    /// Filter by platform name (exact match).
    pub platform: Option<String>,
    /// Filter by create/consume.
    pub activity_type: Option<ActivityType>,
    /// Earliest timestamp to include.
    pub start: Option<DateTime<Utc>>,
    /// Latest timestamp to include.
    pub end: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl ActivityFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    #[must_use]
    pub const fn activity_type(mut self, activity_type: ActivityType) -> Self {
        self.activity_type = Some(activity_type);
        self
    }

    #[must_use]
    pub const fn start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    #[must_use]
    pub const fn end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// No predicate is set (a limit alone does not count).
    #[must_use]
    pub const fn is_unfiltered(&self) -> bool {
        self.platform.is_none()
            && self.activity_type.is_none()
            && self.start.is_none()
            && self.end.is_none()
    }

    /// Whether the date bounds are set.
    #[must_use]
    pub const fn has_date_range(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    /// Test the predicate against the indexed fields of a record.
    #[must_use]
    pub fn matches_fields(
        &self,
        platform: &str,
        activity_type: ActivityType,
        timestamp: &DateTime<Utc>,
    ) -> bool {
        self.platform.as_deref().is_none_or(|p| p == platform)
            && self.activity_type.is_none_or(|t| t == activity_type)
            && self.start.is_none_or(|s| *timestamp >= s)
            && self.end.is_none_or(|e| *timestamp <= e)
    }

    #[must_use]
    pub fn matches(&self, activity: &Activity) -> bool {
        self.matches_fields(&activity.platform, activity.activity_type, &activity.timestamp)
    }
}
