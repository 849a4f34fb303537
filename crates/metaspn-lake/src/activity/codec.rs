//! Record codec: JSON ⇄ [`Activity`].
//!
//! Parsing never fails a whole file. Each line (or array element) yields a
//! [`ParsedRecord`] and the caller decides what to do with the ones that
//! are not activities; the event log logs and skips them.
//!
//! A record is canonical when it carries top-level `timestamp`, `platform`
//! and `activity_type`. Anything else is handed to the legacy matchers in
//! [`super::legacy`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::{Activity, ActivityType, GameSignature, UnknownActivityType, format_timestamp, legacy};
use crate::error::ErrorCode;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a single record could not become an [`Activity`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing or empty field `{0}`")]
    MissingField(&'static str),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error(transparent)]
    UnknownActivityType(#[from] UnknownActivityType),

    #[error("no canonical fields and no legacy shape matched")]
    UnrecognizedShape,
}

impl RecordError {
    /// Machine-readable classification.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownActivityType(_) => ErrorCode::UnknownActivityType,
            _ => ErrorCode::MalformedRecord,
        }
    }
}

/// Outcome of decoding one line or array element.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRecord {
    /// A valid activity.
    Activity(Box<Activity>),
    /// Whitespace-only line.
    Blank,
    /// Neither canonical nor any known legacy shape.
    Unrecognized,
    /// Broken JSON or a recognized shape with invalid fields.
    Malformed(RecordError),
}

impl ParsedRecord {
    /// The activity, if this record holds one.
    #[must_use]
    pub fn into_activity(self) -> Option<Activity> {
        match self {
            Self::Activity(activity) => Some(*activity),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_activity(&self) -> Option<&Activity> {
        match self {
            Self::Activity(activity) => Some(activity),
            _ => None,
        }
    }

    fn from_result(result: Result<Activity, RecordError>) -> Self {
        match result {
            Ok(activity) => Self::Activity(Box::new(activity)),
            Err(RecordError::UnrecognizedShape) => Self::Unrecognized,
            Err(err) => Self::Malformed(err),
        }
    }
}

/// A [`ParsedRecord`] with its 1-based position in the document.
///
/// For JSONL the position is the physical line; for a JSON array it is the
/// element index plus one.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRecord {
    pub line: u64,
    pub record: ParsedRecord,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse one raw JSON record. Any failure yields `None`.
#[must_use]
pub fn parse(raw: &str) -> Option<Activity> {
    parse_line(raw).into_activity()
}

/// Parse one JSONL line into an explicit result.
#[must_use]
pub fn parse_line(line: &str) -> ParsedRecord {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ParsedRecord::Blank;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => ParsedRecord::from_result(from_value(&value)),
        Err(e) => ParsedRecord::Malformed(RecordError::InvalidJson(e.to_string())),
    }
}

/// Decode a whole event-log document.
///
/// `is_jsonl` selects line-per-record decoding; otherwise the document is a
/// single JSON object or an array of objects. A `.json` document that is not
/// valid JSON yields one malformed record at line 1.
#[must_use]
pub fn decode_document(contents: &str, is_jsonl: bool) -> Vec<LineRecord> {
    if is_jsonl {
        return contents
            .lines()
            .zip(1_u64..)
            .map(|(line, no)| LineRecord {
                line: no,
                record: parse_line(line),
            })
            .collect();
    }

    if contents.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(contents) {
        Ok(Value::Array(items)) => items
            .iter()
            .zip(1_u64..)
            .map(|(item, no)| LineRecord {
                line: no,
                record: ParsedRecord::from_result(from_value(item)),
            })
            .collect(),
        Ok(value) => vec![LineRecord {
            line: 1,
            record: ParsedRecord::from_result(from_value(&value)),
        }],
        Err(e) => vec![LineRecord {
            line: 1,
            record: ParsedRecord::Malformed(RecordError::InvalidJson(e.to_string())),
        }],
    }
}

/// Convert an already-decoded JSON value.
///
/// # Errors
///
/// Returns [`RecordError::UnrecognizedShape`] when neither the canonical
/// shape nor any legacy shape matches, or another [`RecordError`] when the
/// matched shape has invalid fields.
pub fn from_value(value: &Value) -> Result<Activity, RecordError> {
    let map = value.as_object().ok_or(RecordError::NotAnObject)?;
    if is_canonical(map) {
        from_canonical(map)
    } else {
        legacy::parse_legacy(map)
    }
}

fn is_canonical(map: &Map<String, Value>) -> bool {
    ["timestamp", "platform", "activity_type"]
        .iter()
        .all(|key| map.contains_key(*key))
}

fn from_canonical(map: &Map<String, Value>) -> Result<Activity, RecordError> {
    let timestamp = timestamp_field(map.get("timestamp"))?;
    let platform = str_field(map, "platform").ok_or(RecordError::MissingField("platform"))?;
    let activity_type: ActivityType = str_field(map, "activity_type")
        .ok_or(RecordError::MissingField("activity_type"))?
        .parse()?;

    let mut builder = Activity::builder(timestamp, platform, activity_type);
    if let Some(id) = str_field(map, "activity_id") {
        builder = builder.id(id);
    }
    if let Some(title) = opt_str(map, "title") {
        builder = builder.title(title);
    }
    if let Some(content) = opt_str(map, "content") {
        builder = builder.content(content);
    }
    if let Some(url) = opt_str(map, "url") {
        builder = builder.url(url);
    }
    if let Some(seconds) = map.get("duration_seconds").and_then(seconds_value) {
        builder = builder.duration_seconds(seconds);
    }
    if let Some(score) = map.get("quality_score").and_then(Value::as_f64) {
        builder = builder.quality_score(score);
    }
    if let Some(signature) = map.get("game_signature").and_then(game_signature_value) {
        builder = builder.game_signature(signature);
    }
    Ok(builder.raw_data(object_field(map, "raw_data")).build())
}

// ---------------------------------------------------------------------------
// Field helpers shared with the legacy matchers
// ---------------------------------------------------------------------------

/// String field, empty strings included.
pub(crate) fn opt_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

/// Non-empty string field.
pub(crate) fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub(crate) fn object_field(map: &Map<String, Value>, key: &str) -> BTreeMap<String, Value> {
    map.get(key)
        .and_then(Value::as_object)
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

pub(crate) fn timestamp_field(
    value: Option<&Value>,
) -> Result<chrono::DateTime<chrono::Utc>, RecordError> {
    let raw = value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(RecordError::MissingField("timestamp"))?;
    super::parse_timestamp(raw).ok_or_else(|| RecordError::InvalidTimestamp(raw.to_string()))
}

/// Whole, non-negative seconds from an integer or integral float.
pub(crate) fn seconds_value(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f >= 0.0 && f.fract() == 0.0 && f <= 9.0e15 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let seconds = f as u64;
        return Some(seconds);
    }
    None
}

pub(crate) fn game_signature_value(value: &Value) -> Option<GameSignature> {
    let signature: GameSignature = serde_json::from_value(value.clone()).ok()?;
    signature.out_of_range().is_none().then_some(signature)
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CanonicalRecord<'a> {
    timestamp: String,
    platform: &'a str,
    activity_type: ActivityType,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    game_signature: Option<&'a GameSignature>,
    raw_data: &'a BTreeMap<String, Value>,
    activity_id: &'a str,
}

impl<'a> From<&'a Activity> for CanonicalRecord<'a> {
    fn from(a: &'a Activity) -> Self {
        Self {
            timestamp: format_timestamp(&a.timestamp),
            platform: &a.platform,
            activity_type: a.activity_type,
            title: a.title.as_deref(),
            content: a.content.as_deref(),
            url: a.url.as_deref(),
            duration_seconds: a.duration_seconds,
            quality_score: a.quality_score,
            game_signature: a.game_signature.as_ref(),
            raw_data: &a.raw_data,
            activity_id: &a.activity_id,
        }
    }
}

impl Serialize for Activity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        CanonicalRecord::from(self).serialize(serializer)
    }
}

/// Serialize an activity as one canonical JSON line (no trailing newline).
///
/// # Errors
///
/// Returns the underlying `serde_json` error; only non-finite floats in
/// `raw_data` or scores can trigger it.
pub fn serialize(activity: &Activity) -> Result<String, serde_json::Error> {
    serde_json::to_string(activity)
}
