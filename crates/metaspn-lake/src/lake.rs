//! Composition root: one open repository with every component wired up.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::activity::Activity;
use crate::config::{LakeConfig, load_lake_config};
use crate::enhancement::EnhancementStore;
use crate::event_log::{EventLog, LogLocation};
use crate::layout::RepoLayout;
use crate::loader::ActivityLoader;
use crate::manifest::{ManifestError, ManifestIndex, RebuildReport, UpdateReport};
use crate::platform::PlatformRegistry;
use crate::store::Store;

/// Result of [`Lake::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Where each input record landed, in input order.
    pub locations: Vec<LogLocation>,
    /// `None` when the manifest was not touched.
    pub indexed: Option<UpdateReport>,
}

#[derive(Debug)]
pub struct Lake {
    layout: RepoLayout,
    config: LakeConfig,
    log: EventLog,
    index: ManifestIndex,
    enhancements: EnhancementStore,
}

impl Lake {
    /// Open an initialized repository.
    ///
    /// A corrupt manifest is not fatal, and neither is one that no longer
    /// matches the event log: both are logged and queries fall back to full
    /// scans until the next rebuild.
    ///
    /// # Errors
    ///
    /// Fails if the layout is invalid, the config cannot be parsed or the
    /// manifest cannot be read.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let layout = RepoLayout::open(root)
            .with_context(|| format!("failed to open repository at {}", root.display()))?;
        let config = load_lake_config(layout.root())?;
        Self::with_config(layout, config)
    }

    /// Create the skeleton under `root` (idempotent) and open it.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn init(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let layout = RepoLayout::init(root)
            .with_context(|| format!("failed to initialize repository at {}", root.display()))?;
        info!(root = %root.display(), "initialized repository");
        let config = load_lake_config(layout.root())?;
        Self::with_config(layout, config)
    }

    /// Wire components from an already-validated layout.
    ///
    /// # Errors
    ///
    /// Fails if an existing manifest cannot be read from disk.
    pub fn with_config(layout: RepoLayout, config: LakeConfig) -> Result<Self> {
        let registry = PlatformRegistry::from_config(&config.platforms);
        let store = Store::new(config.store.durable);
        let log = EventLog::new(layout.clone(), registry, store);

        let mut index = match ManifestIndex::open(layout.clone(), store) {
            Ok(index) => index,
            Err(ManifestError::Corrupt { path, source }) => {
                warn!(path = %path.display(), error = %source, "manifest is corrupt, using full scans until rebuilt");
                ManifestIndex::new(layout.clone(), store)
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to open manifest in {}", layout.root().display()));
            }
        };
        index
            .verify(&log)
            .with_context(|| format!("failed to check manifest in {}", layout.root().display()))?;
        debug!(manifest = index.exists(), usable = index.is_usable(), "opened lake");

        let enhancements = EnhancementStore::new(layout.clone(), store, config.enhancements.clone());
        Ok(Self {
            layout,
            config,
            log,
            index,
            enhancements,
        })
    }

    #[must_use]
    pub const fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    #[must_use]
    pub const fn config(&self) -> &LakeConfig {
        &self.config
    }

    #[must_use]
    pub const fn log(&self) -> &EventLog {
        &self.log
    }

    #[must_use]
    pub const fn index(&self) -> &ManifestIndex {
        &self.index
    }

    pub const fn index_mut(&mut self) -> &mut ManifestIndex {
        &mut self.index
    }

    #[must_use]
    pub const fn enhancements(&self) -> &EnhancementStore {
        &self.enhancements
    }

    #[must_use]
    pub const fn loader(&self) -> ActivityLoader<'_> {
        ActivityLoader::new(&self.log, &self.index)
    }

    /// Append through the event log and keep a usable manifest current
    /// when `[manifest] auto_update` is on. Otherwise a loaded manifest is
    /// marked stale so reads stop trusting it.
    ///
    /// # Errors
    ///
    /// Fails if any record is rejected (nothing is written then) or a
    /// write fails.
    pub fn append(&mut self, activities: &[Activity]) -> Result<AppendOutcome> {
        let located = self.log.append_batch(activities).context("failed to append activities")?;
        let indexed = if self.index.is_usable() && self.config.manifest.auto_update {
            let report = self
                .index
                .update_incremental(&located)
                .context("appended, but failed to update the manifest")?;
            Some(report)
        } else {
            if !located.is_empty() {
                self.index.mark_stale();
            }
            None
        };
        Ok(AppendOutcome {
            locations: located.into_iter().map(|l| l.location).collect(),
            indexed,
        })
    }

    /// Rebuild the manifest from a full scan.
    ///
    /// # Errors
    ///
    /// Fails if the scan or any index write fails.
    pub fn rebuild_index(&mut self) -> Result<RebuildReport> {
        self.index.rebuild(&self.log).context("failed to rebuild manifest")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityType, parse_timestamp};
    use crate::filter::ActivityFilter;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Lake) {
        let tmp = TempDir::new().expect("tempdir");
        let lake = Lake::init(tmp.path()).expect("init");
        (tmp, lake)
    }

    fn post(ts: &str, title: &str) -> Activity {
        Activity::builder(parse_timestamp(ts).expect("ts"), "blog", ActivityType::Create)
            .title(title)
            .build()
    }

    #[test]
    fn open_requires_init() {
        let tmp = TempDir::new().expect("tempdir");
        assert!(Lake::open(tmp.path()).is_err());
        Lake::init(tmp.path()).expect("init");
        assert!(Lake::open(tmp.path()).is_ok());
    }

    #[test]
    fn append_without_manifest_leaves_index_alone() {
        let (_tmp, mut lake) = setup();
        let outcome = lake.append(&[post("2024-01-01", "a")]).expect("append");
        assert_eq!(outcome.locations.len(), 1);
        assert!(outcome.indexed.is_none());
        assert!(!lake.index().is_persisted());
    }

    #[test]
    fn append_keeps_manifest_current() {
        let (_tmp, mut lake) = setup();
        lake.append(&[post("2024-01-01", "a")]).expect("append");
        lake.rebuild_index().expect("rebuild");

        let outcome = lake.append(&[post("2024-02-01", "b")]).expect("append");
        assert_eq!(outcome.indexed.map(|r| r.added), Some(1));
        assert_eq!(lake.index().total(), Some(2));
        assert_eq!(lake.loader().count(&ActivityFilter::new()).expect("count"), 2);
    }

    #[test]
    fn auto_update_off_skips_manifest() {
        let (tmp, mut lake) = setup();
        lake.append(&[post("2024-01-01", "a")]).expect("append");
        lake.rebuild_index().expect("rebuild");
        fs::write(tmp.path().join(".metaspn/config.toml"), "[manifest]\nauto_update = false\n").expect("config");

        let mut lake = Lake::open(tmp.path()).expect("reopen");
        let outcome = lake.append(&[post("2024-02-01", "b")]).expect("append");
        assert!(outcome.indexed.is_none());
        assert_eq!(lake.index().total(), Some(1));
        assert!(lake.index().is_stale());
        assert_eq!(lake.loader().count(&ActivityFilter::new()).expect("count"), 2);
    }

    #[test]
    fn external_append_is_seen_after_reopen() {
        let (tmp, mut lake) = setup();
        lake.append(&[post("2024-01-01", "a")]).expect("append");
        lake.rebuild_index().expect("rebuild");
        lake.log().append(&post("2024-02-01", "b")).expect("unindexed append");

        let lake = Lake::open(tmp.path()).expect("reopen");
        assert!(lake.index().exists());
        assert!(!lake.index().is_usable());
        assert_eq!(lake.loader().count(&ActivityFilter::new()).expect("count"), 2);
    }

    #[test]
    fn configured_json_target_rejects_appends() {
        let (tmp, _lake) = setup();
        fs::write(
            tmp.path().join(".metaspn/config.toml"),
            "[[platforms]]\nname = \"blog\"\nartifact_file = \"posts.json\"\n",
        )
        .expect("config");

        let mut lake = Lake::open(tmp.path()).expect("reopen");
        let err = lake.append(&[post("2024-01-01", "a"), post("2024-01-02", "b")]).expect_err("rejected");
        assert!(format!("{err:#}").contains("not a .jsonl file"));
        assert!(!tmp.path().join("artifacts/blog/posts.json").exists());
        assert_eq!(lake.loader().count(&ActivityFilter::new()).expect("count"), 0);
    }

    #[test]
    fn corrupt_manifest_falls_back_to_scan() {
        let (tmp, mut lake) = setup();
        lake.append(&[post("2024-01-01", "a")]).expect("append");
        lake.rebuild_index().expect("rebuild");
        fs::write(tmp.path().join("artifacts/indexes/manifest.json"), "{ nope").expect("corrupt");

        let lake = Lake::open(tmp.path()).expect("reopen");
        assert!(!lake.index().exists());
        assert_eq!(lake.loader().count(&ActivityFilter::new()).expect("count"), 1);
    }
}
