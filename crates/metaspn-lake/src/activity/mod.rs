//! Activity data model.
//!
//! An [`Activity`] is one immutable record of content a user created or
//! consumed. Activities are written once to the event log and never
//! rewritten; every derived layer (manifest, enhancements) references them
//! by [`Activity::activity_id`].
//!
//! # Invariants
//!
//! - `activity_id` is non-empty. When a record does not carry one, it is
//!   derived deterministically from the record's identifying fields, so
//!   re-reading the same bytes always yields the same id.
//! - Timestamps are normalized to UTC.
//! - `raw_data` is opaque; the lake never interprets it.

pub mod codec;
pub mod legacy;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use codec::{LineRecord, ParsedRecord, RecordError, decode_document, parse, parse_line, serialize};

// ---------------------------------------------------------------------------
// ActivityType
// ---------------------------------------------------------------------------

/// Whether the user produced the content or took it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActivityType {
    /// Content the user authored (tweets, episodes, posts, videos).
    Create,
    /// Content the user read, listened to or watched.
    Consume,
}

/// Error returned when parsing an unknown activity type string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown activity type '{raw}': expected one of create, consume")]
pub struct UnknownActivityType {
    /// The unrecognised input string.
    pub raw: String,
}

impl ActivityType {
    /// Both activity types.
    pub const ALL: [Self; 2] = [Self::Create, Self::Consume];

    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Consume => "consume",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = UnknownActivityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "consume" => Ok(Self::Consume),
            _ => Err(UnknownActivityType { raw: s.to_string() }),
        }
    }
}

impl Serialize for ActivityType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActivityType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// GameSignature
// ---------------------------------------------------------------------------

/// Distribution of an activity across the six value-creation games.
///
/// Each score lies in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GameSignature {
    /// Identity / canon.
    #[serde(rename = "G1", default)]
    pub g1: f64,
    /// Idea mining.
    #[serde(rename = "G2", default)]
    pub g2: f64,
    /// Models.
    #[serde(rename = "G3", default)]
    pub g3: f64,
    /// Performance.
    #[serde(rename = "G4", default)]
    pub g4: f64,
    /// Meaning.
    #[serde(rename = "G5", default)]
    pub g5: f64,
    /// Network.
    #[serde(rename = "G6", default)]
    pub g6: f64,
}

impl GameSignature {
    const NAMES: [&'static str; 6] = ["G1", "G2", "G3", "G4", "G5", "G6"];

    /// Scores in `G1..=G6` order.
    #[must_use]
    pub const fn scores(&self) -> [f64; 6] {
        [self.g1, self.g2, self.g3, self.g4, self.g5, self.g6]
    }

    /// The game with the highest score, or `None` when every score is zero.
    /// Ties resolve to the lowest-numbered game.
    #[must_use]
    pub fn primary_game(&self) -> Option<&'static str> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, score) in self.scores().into_iter().enumerate() {
            if score > best.map_or(0.0, |(_, s)| s) {
                best = Some((idx, score));
            }
        }
        best.map(|(idx, _)| Self::NAMES[idx])
    }

    /// Name of the first score outside `[0.0, 1.0]`, if any.
    #[must_use]
    pub fn out_of_range(&self) -> Option<&'static str> {
        self.scores()
            .into_iter()
            .zip(Self::NAMES)
            .find(|(score, _)| !unit_interval(*score))
            .map(|(_, name)| name)
    }
}

pub(crate) fn unit_interval(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// One record in the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    /// Unique id; see the module docs for derivation.
    pub activity_id: String,
    /// When the activity happened, in UTC.
    pub timestamp: DateTime<Utc>,
    /// Platform name, e.g. `"podcast"` or `"twitter"`.
    pub platform: String,
    /// Create or consume.
    pub activity_type: ActivityType,
    pub title: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    pub duration_seconds: Option<u64>,
    /// Quality score embedded by older exports.
    pub quality_score: Option<f64>,
    /// Game signature embedded by older exports.
    pub game_signature: Option<GameSignature>,
    /// Opaque producer-specific payload.
    pub raw_data: BTreeMap<String, Value>,
}

impl Activity {
    /// Start building an activity. The id is derived at
    /// [`ActivityBuilder::build`] unless one is supplied.
    #[must_use]
    pub fn builder(
        timestamp: DateTime<Utc>,
        platform: impl Into<String>,
        activity_type: ActivityType,
    ) -> ActivityBuilder {
        ActivityBuilder {
            activity_id: None,
            timestamp,
            platform: platform.into(),
            activity_type,
            title: None,
            content: None,
            url: None,
            duration_seconds: None,
            quality_score: None,
            game_signature: None,
            raw_data: BTreeMap::new(),
        }
    }

    /// Deterministic id for a record that does not carry one.
    ///
    /// Format: `{platform}_{16 hex chars}`, the hex being a BLAKE3 digest
    /// over the timestamp, platform, type, title, content and url.
    #[must_use]
    pub fn derive_id(
        timestamp: &DateTime<Utc>,
        platform: &str,
        activity_type: ActivityType,
        title: Option<&str>,
        content: Option<&str>,
        url: Option<&str>,
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [
            format_timestamp(timestamp).as_str(),
            platform,
            activity_type.as_str(),
            title.unwrap_or_default(),
            content.unwrap_or_default(),
            url.unwrap_or_default(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update(&[0x1f]);
        }
        let hex = hasher.finalize().to_hex();
        format!("{platform}_{}", &hex.as_str()[..16])
    }

    /// `YYYY-MM` bucket used by the manifest's date shards.
    #[must_use]
    pub fn month_key(&self) -> String {
        month_key(&self.timestamp)
    }

    /// `YYYY` bucket used by the manifest's yearly counters.
    #[must_use]
    pub fn year_key(&self) -> String {
        self.timestamp.format("%Y").to_string()
    }
}

/// Builder returned by [`Activity::builder`].
#[derive(Debug, Clone)]
#[must_use]
pub struct ActivityBuilder {
    activity_id: Option<String>,
    timestamp: DateTime<Utc>,
    platform: String,
    activity_type: ActivityType,
    title: Option<String>,
    content: Option<String>,
    url: Option<String>,
    duration_seconds: Option<u64>,
    quality_score: Option<f64>,
    game_signature: Option<GameSignature>,
    raw_data: BTreeMap<String, Value>,
}

impl ActivityBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.activity_id = Some(id.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub const fn duration_seconds(mut self, seconds: u64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub const fn quality_score(mut self, score: f64) -> Self {
        self.quality_score = Some(score);
        self
    }

    pub const fn game_signature(mut self, signature: GameSignature) -> Self {
        self.game_signature = Some(signature);
        self
    }

    pub fn raw(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.raw_data.insert(key.into(), value.into());
        self
    }

    pub fn raw_data(mut self, raw_data: BTreeMap<String, Value>) -> Self {
        self.raw_data = raw_data;
        self
    }

    /// Finish the activity, deriving its id when none was supplied.
    #[must_use]
    pub fn build(self) -> Activity {
        let activity_id = self
            .activity_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| {
                Activity::derive_id(
                    &self.timestamp,
                    &self.platform,
                    self.activity_type,
                    self.title.as_deref(),
                    self.content.as_deref(),
                    self.url.as_deref(),
                )
            });
        Activity {
            activity_id,
            timestamp: self.timestamp,
            platform: self.platform,
            activity_type: self.activity_type,
            title: self.title,
            content: self.content,
            url: self.url,
            duration_seconds: self.duration_seconds,
            quality_score: self.quality_score,
            game_signature: self.game_signature,
            raw_data: self.raw_data,
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Parse an ISO-8601 timestamp as written by any producer of the lake.
///
/// Accepts RFC 3339 (`Z` or numeric offset), offset-less date-times
/// (treated as UTC, `T` or space separated, optional fraction) and bare
/// dates (midnight UTC).
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Canonical wire form: RFC 3339 in UTC with a `Z` suffix.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// `YYYY-MM` bucket for a timestamp.
#[must_use]
pub fn month_key(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0)
            .single()
            .expect("valid date")
    }

    // -----------------------------------------------------------------------
    // ActivityType
    // -----------------------------------------------------------------------

    #[test]
    fn activity_type_round_trips_through_str() {
        for ty in ActivityType::ALL {
            assert_eq!(ty.as_str().parse::<ActivityType>(), Ok(ty));
        }
    }

    #[test]
    fn unknown_activity_type_is_rejected() {
        let err = "share".parse::<ActivityType>().expect_err("should fail");
        assert_eq!(err.raw, "share");
        assert!(err.to_string().contains("create, consume"));
    }

    #[test]
    fn activity_type_serde_is_lowercase() {
        let json = serde_json::to_string(&ActivityType::Consume).expect("serialize");
        assert_eq!(json, "\"consume\"");
        let back: ActivityType = serde_json::from_str("\"create\"").expect("deserialize");
        assert_eq!(back, ActivityType::Create);
    }

    // -----------------------------------------------------------------------
    // Ids
    // -----------------------------------------------------------------------

    #[test]
    fn derived_id_is_deterministic() {
        let a = Activity::builder(ts(2024, 1, 5), "podcast", ActivityType::Create)
            .title("Episode 1")
            .build();
        let b = Activity::builder(ts(2024, 1, 5), "podcast", ActivityType::Create)
            .title("Episode 1")
            .build();
        assert_eq!(a.activity_id, b.activity_id);
        assert!(a.activity_id.starts_with("podcast_"));
        assert_eq!(a.activity_id.len(), "podcast_".len() + 16);
    }

    #[test]
    fn derived_id_depends_on_title() {
        let a = Activity::builder(ts(2024, 1, 5), "blog", ActivityType::Create)
            .title("One")
            .build();
        let b = Activity::builder(ts(2024, 1, 5), "blog", ActivityType::Create)
            .title("Two")
            .build();
        assert_ne!(a.activity_id, b.activity_id);
    }

    #[test]
    fn supplied_id_wins_unless_empty() {
        let a = Activity::builder(ts(2024, 1, 5), "blog", ActivityType::Create)
            .id("blog_custom")
            .build();
        assert_eq!(a.activity_id, "blog_custom");

        let b = Activity::builder(ts(2024, 1, 5), "blog", ActivityType::Create)
            .id("")
            .build();
        assert!(b.activity_id.starts_with("blog_"));
    }

    #[test]
    fn buckets_follow_timestamp() {
        let a = Activity::builder(ts(2023, 7, 9), "blog", ActivityType::Create).build();
        assert_eq!(a.month_key(), "2023-07");
        assert_eq!(a.year_key(), "2023");
    }

    // -----------------------------------------------------------------------
    // Timestamps
    // -----------------------------------------------------------------------

    #[test]
    fn parses_zulu_and_offsets() {
        let zulu = parse_timestamp("2020-11-12T17:02:26Z").expect("zulu");
        let offset = parse_timestamp("2020-11-12T18:02:26+01:00").expect("offset");
        assert_eq!(zulu, offset);
    }

    #[test]
    fn parses_naive_as_utc() {
        let naive = parse_timestamp("2024-01-28T12:00:00").expect("naive");
        assert_eq!(naive, ts(2024, 1, 28));
        let spaced = parse_timestamp("2024-01-28 12:00:00").expect("spaced");
        assert_eq!(spaced, naive);
        let fractional = parse_timestamp("2024-01-28T12:00:00.250").expect("fraction");
        assert_eq!(fractional.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn parses_bare_dates() {
        let date = parse_timestamp("2024-03-01").expect("date");
        assert_eq!(format_timestamp(&date), "2024-03-01T00:00:00Z");
    }

    #[test]
    fn rejects_garbage_timestamps() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2024-13-01").is_none());
    }

    #[test]
    fn formatted_timestamps_parse_back() {
        let original = parse_timestamp("2024-05-06T07:08:09.123456Z").expect("parse");
        let text = format_timestamp(&original);
        assert_eq!(text, "2024-05-06T07:08:09.123456Z");
        assert_eq!(parse_timestamp(&text), Some(original));
    }

    // -----------------------------------------------------------------------
    // GameSignature
    // -----------------------------------------------------------------------

    #[test]
    fn primary_game_picks_highest() {
        let sig = GameSignature {
            g3: 0.7,
            g5: 0.2,
            ..GameSignature::default()
        };
        assert_eq!(sig.primary_game(), Some("G3"));
        assert_eq!(GameSignature::default().primary_game(), None);
    }

    #[test]
    fn out_of_range_names_first_offender() {
        let sig = GameSignature {
            g2: 1.5,
            g4: -0.1,
            ..GameSignature::default()
        };
        assert_eq!(sig.out_of_range(), Some("G2"));
        assert_eq!(GameSignature::default().out_of_range(), None);
    }

    #[test]
    fn game_signature_uses_uppercase_keys() {
        let sig = GameSignature {
            g1: 0.5,
            ..GameSignature::default()
        };
        let json = serde_json::to_value(sig).expect("serialize");
        assert_eq!(json["G1"], 0.5);
        let back: GameSignature =
            serde_json::from_value(serde_json::json!({"G6": 0.25})).expect("deserialize");
        assert!((back.g6 - 0.25).abs() < f64::EPSILON);
        assert!(back.g1.abs() < f64::EPSILON);
    }
}
