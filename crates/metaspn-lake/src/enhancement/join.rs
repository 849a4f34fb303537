//! Joining activities with their latest enhancements.
//!
//! Older exports embedded a quality score and game signature directly on
//! the activity. The join resolves each attribute once: the enhancement
//! store wins, the embedded value is the fallback, and the result records
//! which one was used.

use std::collections::BTreeMap;

use super::{Embedding, EnhancementError, EnhancementKind, EnhancementRecord, EnhancementStore, GameScore, QualityScore};
use crate::activity::{Activity, GameSignature};

/// Where a resolved attribute came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The enhancement store's latest record.
    Enhancement,
    /// A value embedded on the activity record itself.
    Embedded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub origin: Origin,
}

impl<T> Resolved<T> {
    const fn enhancement(value: T) -> Self {
        Self {
            value,
            origin: Origin::Enhancement,
        }
    }

    const fn embedded(value: T) -> Self {
        Self {
            value,
            origin: Origin::Embedded,
        }
    }
}

/// Latest records per kind, keyed by activity id.
#[derive(Debug, Clone, Default)]
pub struct EnhancementMaps {
    pub quality: BTreeMap<String, EnhancementRecord>,
    pub games: BTreeMap<String, EnhancementRecord>,
    pub embeddings: BTreeMap<String, EnhancementRecord>,
}

impl EnhancementMaps {
    /// Load latest for every kind.
    ///
    /// # Errors
    ///
    /// Any read failure.
    pub fn load(store: &EnhancementStore) -> Result<Self, EnhancementError> {
        Self::load_kinds(store, &EnhancementKind::ALL)
    }

    /// Load latest for the given kinds only; the others stay empty.
    ///
    /// # Errors
    ///
    /// Any read failure.
    pub fn load_kinds(store: &EnhancementStore, kinds: &[EnhancementKind]) -> Result<Self, EnhancementError> {
        let mut maps = Self::default();
        for &kind in kinds {
            let loaded = store.load(kind)?;
            match kind {
                EnhancementKind::QualityScores => maps.quality = loaded,
                EnhancementKind::GameSignatures => maps.games = loaded,
                EnhancementKind::Embeddings => maps.embeddings = loaded,
            }
        }
        Ok(maps)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quality.is_empty() && self.games.is_empty() && self.embeddings.is_empty()
    }
}

/// An activity with its enhancements resolved. Lives for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedActivity {
    pub activity: Activity,
    pub quality_score: Option<Resolved<f64>>,
    /// Full breakdown, only when the score came from the store.
    pub quality: Option<QualityScore>,
    pub game_signature: Option<Resolved<GameSignature>>,
    /// Signature plus confidence, only when it came from the store.
    pub game: Option<GameScore>,
    pub embedding: Option<Embedding>,
}

impl EnhancedActivity {
    #[must_use]
    pub fn activity_id(&self) -> &str {
        &self.activity.activity_id
    }

    #[must_use]
    pub fn primary_game(&self) -> Option<&'static str> {
        self.game_signature.as_ref().and_then(|g| g.value.primary_game())
    }

    #[must_use]
    pub const fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

/// Resolve every enhancement for one activity. Never fails; a missing
/// enhancement with no embedded value is `None`.
#[must_use]
pub fn join_one(activity: Activity, maps: &EnhancementMaps) -> EnhancedActivity {
    let id = activity.activity_id.as_str();

    let quality = maps.quality.get(id).and_then(EnhancementRecord::quality).copied();
    let quality_score = quality
        .map(|q| Resolved::enhancement(q.quality_score))
        .or_else(|| activity.quality_score.map(Resolved::embedded));

    let game = maps.games.get(id).and_then(EnhancementRecord::game).copied();
    let game_signature = game
        .map(|g| Resolved::enhancement(g.game_signature))
        .or_else(|| activity.game_signature.map(Resolved::embedded));

    let embedding = maps.embeddings.get(id).and_then(EnhancementRecord::embedding).cloned();

    EnhancedActivity {
        activity,
        quality_score,
        quality,
        game_signature,
        game,
        embedding,
    }
}
