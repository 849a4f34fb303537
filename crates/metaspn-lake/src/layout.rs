//! Repository directory layout.
//!
//! ```text
//! <root>/
//!   .metaspn/config.toml
//!   sources/<dir>/*.jsonl|*.json          # consume records
//!   artifacts/<dir>/*.jsonl|*.json        # create records
//!   artifacts/enhancements/<kind>/
//!     latest.jsonl
//!     history/YYYY-MM-DD_v<version>_<reason>[_<n>].jsonl
//!   artifacts/indexes/
//!     manifest.json
//!     by_date/YYYY-MM.json
//!     by_platform/<name>.json
//! ```
//!
//! A root holding a `meta.json` profile instead of `.metaspn/` is a legacy
//! repository. It is opened read-compatible: only the fixed platform
//! directories in [`LEGACY_DIRS`] belong to its event log.
//!
//! # Invariants
//!
//! - A [`RepoLayout`] only exists for a root that passed validation, so
//!   every component built on one can assume the skeleton is present.
//! - `artifacts/enhancements` and `artifacts/indexes` are reserved and are
//!   never treated as event-log partitions.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::activity::ActivityType;
use crate::config::CONFIG_TEMPLATE;
use crate::error::ErrorCode;

pub const META_DIR: &str = ".metaspn";
pub const SOURCES_DIR: &str = "sources";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const ENHANCEMENTS_DIR: &str = "enhancements";
pub const INDEXES_DIR: &str = "indexes";

/// Directories under `artifacts/` that hold derived data.
pub const RESERVED_ARTIFACT_DIRS: [&str; 2] = [ENHANCEMENTS_DIR, INDEXES_DIR];

/// Profile file that marks a legacy repository.
pub const LEGACY_PROFILE: &str = "meta.json";

/// Event-log directories of a legacy repository.
pub const LEGACY_DIRS: [(Partition, &str); 8] = [
    (Partition::Artifact, "podcast"),
    (Partition::Artifact, "blog"),
    (Partition::Artifact, "twitter"),
    (Partition::Artifact, "youtube"),
    (Partition::Source, "podcasts"),
    (Partition::Source, "blogs"),
    (Partition::Source, "twitter"),
    (Partition::Source, "youtube"),
];

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("not a metaspn repository: {} has neither .metaspn/ nor meta.json", .0.display())]
    NotInitialized(PathBuf),

    #[error("invalid repository layout at {}: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: &'static str },

    #[error("failed to initialize repository at {}: {source}", .path.display())]
    InitFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LayoutError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized(_) => ErrorCode::NotInitialized,
            Self::Invalid { .. } => ErrorCode::InvalidLayout,
            Self::InitFailed { .. } => ErrorCode::EventFileWriteFailed,
        }
    }
}

// ---------------------------------------------------------------------------
// Partition
// ---------------------------------------------------------------------------

/// Top-level split of the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// `sources/`: content the user consumed.
    Source,
    /// `artifacts/`: content the user created.
    Artifact,
}

impl Partition {
    pub const ALL: [Self; 2] = [Self::Source, Self::Artifact];

    /// Where records of the given type are appended.
    #[must_use]
    pub const fn for_type(activity_type: ActivityType) -> Self {
        match activity_type {
            ActivityType::Create => Self::Artifact,
            ActivityType::Consume => Self::Source,
        }
    }

    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Source => SOURCES_DIR,
            Self::Artifact => ARTIFACTS_DIR,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Artifact => "artifact",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RepoLayout
// ---------------------------------------------------------------------------

/// Validated repository root and the paths derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    root: PathBuf,
    legacy: bool,
}

impl RepoLayout {
    /// Open an existing repository, standard or legacy.
    ///
    /// # Errors
    ///
    /// [`LayoutError::NotInitialized`] when neither `.metaspn/` nor a
    /// legacy `meta.json` is present and [`LayoutError::Invalid`] when
    /// neither `sources/` nor `artifacts/` exists.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LayoutError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(LayoutError::Invalid {
                path: root,
                reason: "root is not a directory",
            });
        }
        let legacy = root.join(LEGACY_PROFILE).is_file();
        if !legacy && !root.join(META_DIR).is_dir() {
            return Err(LayoutError::NotInitialized(root));
        }
        if !root.join(SOURCES_DIR).is_dir() && !root.join(ARTIFACTS_DIR).is_dir() {
            return Err(LayoutError::Invalid {
                path: root,
                reason: "neither sources/ nor artifacts/ exists",
            });
        }
        Ok(Self { root, legacy })
    }

    /// Create the skeleton (idempotent) and open it. An existing config
    /// file is left alone.
    ///
    /// # Errors
    ///
    /// [`LayoutError::InitFailed`] if any directory or the config cannot be
    /// created.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self, LayoutError> {
        let root = root.into();
        let legacy = root.join(LEGACY_PROFILE).is_file();
        let layout = Self { root, legacy };
        let dirs = [
            layout.meta_dir(),
            layout.sources_dir(),
            layout.artifacts_dir(),
            layout.enhancements_dir(),
            layout.by_date_dir(),
            layout.by_platform_dir(),
        ];
        for dir in dirs {
            fs::create_dir_all(&dir).map_err(|source| LayoutError::InitFailed { path: dir, source })?;
        }

        let config = layout.config_path();
        if !config.exists() {
            fs::write(&config, CONFIG_TEMPLATE)
                .map_err(|source| LayoutError::InitFailed { path: config, source })?;
        }
        Ok(layout)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Opened from a `meta.json` profile.
    #[must_use]
    pub const fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// Whether `partition/dir` holds event-log files. Every non-reserved
    /// directory does, except in a legacy repository.
    #[must_use]
    pub fn is_log_dir(&self, partition: Partition, dir: &str) -> bool {
        if partition == Partition::Artifact && RESERVED_ARTIFACT_DIRS.contains(&dir) {
            return false;
        }
        !self.legacy || LEGACY_DIRS.contains(&(partition, dir))
    }

    #[must_use]
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.meta_dir().join("config.toml")
    }

    #[must_use]
    pub fn sources_dir(&self) -> PathBuf {
        self.root.join(SOURCES_DIR)
    }

    #[must_use]
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIR)
    }

    #[must_use]
    pub fn partition_dir(&self, partition: Partition) -> PathBuf {
        self.root.join(partition.dir_name())
    }

    #[must_use]
    pub fn enhancements_dir(&self) -> PathBuf {
        self.artifacts_dir().join(ENHANCEMENTS_DIR)
    }

    #[must_use]
    pub fn indexes_dir(&self) -> PathBuf {
        self.artifacts_dir().join(INDEXES_DIR)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.indexes_dir().join("manifest.json")
    }

    #[must_use]
    pub fn by_date_dir(&self) -> PathBuf {
        self.indexes_dir().join("by_date")
    }

    #[must_use]
    pub fn by_platform_dir(&self) -> PathBuf {
        self.indexes_dir().join("by_platform")
    }

    /// `/`-separated path of `path` relative to the root, as stored in the
    /// manifest. Paths outside the root are returned as given.
    #[must_use]
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Inverse of [`relative`](Self::relative).
    #[must_use]
    pub fn resolve(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }
}

/// Whether `name` is safe to use as a single path segment.
#[must_use]
pub fn is_valid_segment(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
