//! Enhancement records: versioned, re-derivable attributes computed per
//! activity and stored apart from the event log.
//!
//! Every record line is a flat JSON object:
//!
//! ```text
//! {"activity_id": "...", "computed_at": "...", "algorithm_version": "1.0", <payload fields>}
//! ```
//!
//! The payload fields depend on the [`EnhancementKind`]. A line is decoded
//! against the kind of the file it was read from, never by probing.

pub mod join;
pub mod store;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::activity::{GameSignature, format_timestamp, parse_timestamp, unit_interval};
use crate::error::ErrorCode;
use crate::store::StoreError;

pub use join::{EnhancedActivity, EnhancementMaps, Origin, Resolved, join_one};
pub use store::{EnhancementStore, HistoryFile, RecordSource, RefreshOutcome, SaveMode, Scorer, TimelineEntry};

/// Version assumed for a stored record that carries none.
pub const UNVERSIONED: &str = "0.0";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EnhancementError {
    #[error("enhancement I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid {kind} record: {reason}")]
    Invalid { kind: EnhancementKind, reason: String },

    #[error("history file '{name}' not found for {kind}")]
    HistoryNotFound { kind: EnhancementKind, name: String },

    #[error("unknown enhancement kind '{0}': expected one of quality_scores, game_signatures, embeddings")]
    UnknownKind(String),
}

impl EnhancementError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } => ErrorCode::EventFileWriteFailed,
            Self::Store(e) => e.code(),
            Self::Invalid { .. } | Self::UnknownKind(_) => ErrorCode::InvalidEnhancement,
            Self::HistoryNotFound { .. } => ErrorCode::HistoryNotFound,
        }
    }
}

// ---------------------------------------------------------------------------
// EnhancementKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnhancementKind {
    QualityScores,
    GameSignatures,
    Embeddings,
}

impl EnhancementKind {
    pub const ALL: [Self; 3] = [Self::QualityScores, Self::GameSignatures, Self::Embeddings];

    /// Directory name under `artifacts/enhancements/`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QualityScores => "quality_scores",
            Self::GameSignatures => "game_signatures",
            Self::Embeddings => "embeddings",
        }
    }
}

impl fmt::Display for EnhancementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnhancementKind {
    type Err = EnhancementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quality_scores" | "quality-scores" | "quality" => Ok(Self::QualityScores),
            "game_signatures" | "game-signatures" | "games" => Ok(Self::GameSignatures),
            "embeddings" | "embedding" => Ok(Self::Embeddings),
            other => Err(EnhancementError::UnknownKind(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Quality breakdown for one activity. Every score lies in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub content_score: f64,
    #[serde(default)]
    pub consistency_score: f64,
    #[serde(default)]
    pub depth_score: f64,
}

/// Game classification for one activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GameScore {
    #[serde(default)]
    pub game_signature: GameSignature,
    /// Classifier confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
}

impl GameScore {
    #[must_use]
    pub fn primary_game(&self) -> Option<&'static str> {
        self.game_signature.primary_game()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub embedding: Vec<f64>,
    #[serde(default)]
    pub model_name: String,
    /// Defaults to the vector length when absent.
    #[serde(default)]
    pub dimensions: usize,
}

impl Embedding {
    #[must_use]
    pub fn new(embedding: Vec<f64>, model_name: impl Into<String>) -> Self {
        Self {
            dimensions: embedding.len(),
            embedding,
            model_name: model_name.into(),
        }
    }
}

/// Kind-specific part of an [`EnhancementRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Quality(QualityScore),
    Game(GameScore),
    Embedding(Embedding),
}

impl Payload {
    #[must_use]
    pub const fn kind(&self) -> EnhancementKind {
        match self {
            Self::Quality(_) => EnhancementKind::QualityScores,
            Self::Game(_) => EnhancementKind::GameSignatures,
            Self::Embedding(_) => EnhancementKind::Embeddings,
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// [`EnhancementError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), EnhancementError> {
        let invalid = |reason: String| EnhancementError::Invalid {
            kind: self.kind(),
            reason,
        };
        match self {
            Self::Quality(q) => {
                for (name, value) in [
                    ("quality_score", q.quality_score),
                    ("content_score", q.content_score),
                    ("consistency_score", q.consistency_score),
                    ("depth_score", q.depth_score),
                ] {
                    if !unit_interval(value) {
                        return Err(invalid(format!("{name} must be between 0.0 and 1.0, got {value}")));
                    }
                }
            }
            Self::Game(g) => {
                if let Some(name) = g.game_signature.out_of_range() {
                    return Err(invalid(format!("{name} must be between 0.0 and 1.0")));
                }
                if !unit_interval(g.confidence) {
                    return Err(invalid(format!(
                        "confidence must be between 0.0 and 1.0, got {}",
                        g.confidence
                    )));
                }
            }
            Self::Embedding(e) => {
                if e.dimensions != e.embedding.len() {
                    return Err(invalid(format!(
                        "dimensions is {} but the vector has {} values",
                        e.dimensions,
                        e.embedding.len()
                    )));
                }
            }
        }
        Ok(())
    }

    fn decode(kind: EnhancementKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EnhancementKind::QualityScores => Self::Quality(serde_json::from_value(value)?),
            EnhancementKind::GameSignatures => Self::Game(serde_json::from_value(value)?),
            EnhancementKind::Embeddings => {
                let mut embedding: Embedding = serde_json::from_value(value)?;
                if embedding.dimensions == 0 {
                    embedding.dimensions = embedding.embedding.len();
                }
                Self::Embedding(embedding)
            }
        })
    }

    fn fields(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let value = match self {
            Self::Quality(q) => serde_json::to_value(q)?,
            Self::Game(g) => serde_json::to_value(g)?,
            Self::Embedding(e) => serde_json::to_value(e)?,
        };
        Ok(match value {
            Value::Object(map) => map,
            _ => Map::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// EnhancementRecord
// ---------------------------------------------------------------------------

/// One computed attribute for one activity.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancementRecord {
    pub activity_id: String,
    pub computed_at: DateTime<Utc>,
    /// Version of the algorithm that produced the payload.
    pub algorithm_version: String,
    pub payload: Payload,
}

impl EnhancementRecord {
    /// A record computed now.
    #[must_use]
    pub fn new(activity_id: impl Into<String>, algorithm_version: impl Into<String>, payload: Payload) -> Self {
        Self {
            activity_id: activity_id.into(),
            computed_at: Utc::now(),
            algorithm_version: algorithm_version.into(),
            payload,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EnhancementKind {
        self.payload.kind()
    }

    #[must_use]
    pub const fn quality(&self) -> Option<&QualityScore> {
        match &self.payload {
            Payload::Quality(q) => Some(q),
            _ => None,
        }
    }

    #[must_use]
    pub const fn game(&self) -> Option<&GameScore> {
        match &self.payload {
            Payload::Game(g) => Some(g),
            _ => None,
        }
    }

    #[must_use]
    pub const fn embedding(&self) -> Option<&Embedding> {
        match &self.payload {
            Payload::Embedding(e) => Some(e),
            _ => None,
        }
    }

    /// Decode one stored line as a record of `kind`.
    ///
    /// # Errors
    ///
    /// [`EnhancementError::Invalid`] for broken JSON, a missing or empty
    /// `activity_id`, an unparseable `computed_at` or out-of-range values.
    pub fn from_line(kind: EnhancementKind, line: &str) -> Result<Self, EnhancementError> {
        let invalid = |reason: String| EnhancementError::Invalid { kind, reason };
        let value: Value = serde_json::from_str(line).map_err(|e| invalid(e.to_string()))?;
        let Value::Object(map) = &value else {
            return Err(invalid("expected a JSON object".to_string()));
        };

        let activity_id = map
            .get("activity_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| invalid("missing activity_id".to_string()))?
            .to_string();
        let computed_at = map
            .get("computed_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .ok_or_else(|| invalid("missing or invalid computed_at".to_string()))?;
        let algorithm_version = map
            .get("algorithm_version")
            .and_then(Value::as_str)
            .unwrap_or(UNVERSIONED)
            .to_string();

        let payload = Payload::decode(kind, value).map_err(|e| invalid(e.to_string()))?;
        payload.validate()?;
        Ok(Self {
            activity_id,
            computed_at,
            algorithm_version,
            payload,
        })
    }
}

impl Serialize for EnhancementRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.payload.fields().map_err(serde::ser::Error::custom)?;
        let mut map = serializer.serialize_map(Some(3 + fields.len()))?;
        map.serialize_entry("activity_id", &self.activity_id)?;
        map.serialize_entry("computed_at", &format_timestamp(&self.computed_at))?;
        map.serialize_entry("algorithm_version", &self.algorithm_version)?;
        for (key, value) in &fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality(score: f64) -> Payload {
        Payload::Quality(QualityScore {
            quality_score: score,
            content_score: 0.5,
            consistency_score: 0.5,
            depth_score: 0.5,
        })
    }

    // -----------------------------------------------------------------------
    // Kinds
    // -----------------------------------------------------------------------

    #[test]
    fn kind_names_round_trip() {
        for kind in EnhancementKind::ALL {
            assert_eq!(kind.as_str().parse::<EnhancementKind>().expect("parse"), kind);
        }
        assert_eq!(
            "quality".parse::<EnhancementKind>().expect("alias"),
            EnhancementKind::QualityScores
        );
        let err = "sentiment".parse::<EnhancementKind>().expect_err("unknown");
        assert_eq!(err.code(), ErrorCode::InvalidEnhancement);
    }

    // -----------------------------------------------------------------------
    // Lines
    // -----------------------------------------------------------------------

    #[test]
    fn record_serializes_flat() {
        let record = EnhancementRecord::new("blog_1", "1.0", quality(0.8));
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["activity_id"], "blog_1");
        assert_eq!(json["algorithm_version"], "1.0");
        assert_eq!(json["quality_score"], 0.8);
        assert!(json.get("payload").is_none());

        let line = serde_json::to_string(&record).expect("line");
        let back = EnhancementRecord::from_line(EnhancementKind::QualityScores, &line).expect("parse");
        assert_eq!(back, record);
    }

    #[test]
    fn legacy_naive_computed_at_is_accepted() {
        let line = r#"{"activity_id":"a","computed_at":"2024-01-28T10:30:00.123456","quality_score":0.4}"#;
        let record = EnhancementRecord::from_line(EnhancementKind::QualityScores, line).expect("parse");
        assert_eq!(record.algorithm_version, UNVERSIONED);
        assert!(record.quality().is_some_and(|q| q.content_score.abs() < f64::EPSILON));
    }

    #[test]
    fn out_of_range_values_are_invalid() {
        let bad_quality = r#"{"activity_id":"a","computed_at":"2024-01-01T00:00:00Z","quality_score":1.2}"#;
        assert!(EnhancementRecord::from_line(EnhancementKind::QualityScores, bad_quality).is_err());

        let bad_game = r#"{"activity_id":"a","computed_at":"2024-01-01T00:00:00Z","game_signature":{"G2":2.0}}"#;
        assert!(EnhancementRecord::from_line(EnhancementKind::GameSignatures, bad_game).is_err());

        let bad_confidence = r#"{"activity_id":"a","computed_at":"2024-01-01T00:00:00Z","confidence":-1}"#;
        assert!(EnhancementRecord::from_line(EnhancementKind::GameSignatures, bad_confidence).is_err());
    }

    #[test]
    fn missing_header_fields_are_invalid() {
        for line in [
            r#"{"computed_at":"2024-01-01T00:00:00Z"}"#,
            r#"{"activity_id":"","computed_at":"2024-01-01T00:00:00Z"}"#,
            r#"{"activity_id":"a"}"#,
            r#"{"activity_id":"a","computed_at":"soon"}"#,
            "[1,2]",
            "{",
        ] {
            assert!(
                EnhancementRecord::from_line(EnhancementKind::QualityScores, line).is_err(),
                "{line}"
            );
        }
    }

    #[test]
    fn embedding_dimensions_default_to_length() {
        let line = r#"{"activity_id":"a","computed_at":"2024-01-01T00:00:00Z","embedding":[0.1,0.2,0.3],"model_name":"mini"}"#;
        let record = EnhancementRecord::from_line(EnhancementKind::Embeddings, line).expect("parse");
        let embedding = record.embedding().expect("embedding");
        assert_eq!(embedding.dimensions, 3);
        assert_eq!(embedding.model_name, "mini");

        let mismatched = r#"{"activity_id":"a","computed_at":"2024-01-01T00:00:00Z","embedding":[0.1],"dimensions":4}"#;
        assert!(EnhancementRecord::from_line(EnhancementKind::Embeddings, mismatched).is_err());
    }

    #[test]
    fn game_score_reports_primary_game() {
        let line = r#"{"activity_id":"a","computed_at":"2024-01-01T00:00:00Z","algorithm_version":"1.1","game_signature":{"G4":0.9,"G1":0.1},"confidence":0.7}"#;
        let record = EnhancementRecord::from_line(EnhancementKind::GameSignatures, line).expect("parse");
        let game = record.game().expect("game");
        assert_eq!(game.primary_game(), Some("G4"));
        assert_eq!(record.kind(), EnhancementKind::GameSignatures);
        assert!(record.quality().is_none());
    }
}
