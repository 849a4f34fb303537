//! Platform registry.
//!
//! Maps a platform name to where its records live on disk. The registry is
//! a plain value owned by whoever composes the lake; there is no global
//! instance, so two lakes in one process can disagree about platforms.

use std::collections::BTreeMap;

use crate::activity::ActivityType;
use crate::config::PlatformConfig;
use crate::layout::Partition;

/// Storage locations for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSpec {
    pub name: String,
    /// Directory under `sources/` for consume records.
    pub source_dir: Option<String>,
    pub source_file: Option<String>,
    /// Directory under `artifacts/` for create records.
    pub artifact_dir: Option<String>,
    pub artifact_file: Option<String>,
}

impl PlatformSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_dir: None,
            source_file: None,
            artifact_dir: None,
            artifact_file: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, dir: &str, file: &str) -> Self {
        self.source_dir = Some(dir.to_string());
        self.source_file = Some(file.to_string());
        self
    }

    #[must_use]
    pub fn with_artifact(mut self, dir: &str, file: &str) -> Self {
        self.artifact_dir = Some(dir.to_string());
        self.artifact_file = Some(file.to_string());
        self
    }

    fn dir(&self, partition: Partition) -> Option<&str> {
        match partition {
            Partition::Source => self.source_dir.as_deref(),
            Partition::Artifact => self.artifact_dir.as_deref(),
        }
    }

    fn file(&self, partition: Partition) -> Option<&str> {
        match partition {
            Partition::Source => self.source_file.as_deref(),
            Partition::Artifact => self.artifact_file.as_deref(),
        }
    }
}

/// Where an append for a platform/type pair lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendTarget {
    pub partition: Partition,
    /// Directory name under the partition root.
    pub dir: String,
    /// File name inside `dir`.
    pub file: String,
}

#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    platforms: BTreeMap<String, PlatformSpec>,
}

impl PlatformRegistry {
    /// Registry with no platforms; every append uses the fallback naming.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in platforms.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(
            PlatformSpec::new("podcast")
                .with_source("podcasts", "listening-events.jsonl")
                .with_artifact("podcast", "episodes.jsonl"),
        );
        registry.register(PlatformSpec::new("book").with_source("books", "reading-events.jsonl"));
        registry.register(
            PlatformSpec::new("blog")
                .with_source("blogs", "reading-events.jsonl")
                .with_artifact("blog", "posts.jsonl"),
        );
        registry.register(
            PlatformSpec::new("twitter")
                .with_source("twitter", "engagement-events.jsonl")
                .with_artifact("twitter", "tweets.jsonl"),
        );
        registry.register(PlatformSpec::new("youtube").with_artifact("youtube", "videos.jsonl"));
        registry
    }

    /// Defaults overlaid with `[[platforms]]` entries. A configured field
    /// replaces the default one; unset fields keep the default.
    #[must_use]
    pub fn from_config(entries: &[PlatformConfig]) -> Self {
        let mut registry = Self::with_defaults();
        for entry in entries {
            let mut spec = registry
                .get(&entry.name)
                .cloned()
                .unwrap_or_else(|| PlatformSpec::new(entry.name.clone()));
            if entry.source_dir.is_some() {
                spec.source_dir.clone_from(&entry.source_dir);
            }
            if entry.source_file.is_some() {
                spec.source_file.clone_from(&entry.source_file);
            }
            if entry.artifact_dir.is_some() {
                spec.artifact_dir.clone_from(&entry.artifact_dir);
            }
            if entry.artifact_file.is_some() {
                spec.artifact_file.clone_from(&entry.artifact_file);
            }
            registry.register(spec);
        }
        registry
    }

    /// Add or replace a platform, returning the previous spec.
    pub fn register(&mut self, spec: PlatformSpec) -> Option<PlatformSpec> {
        self.platforms.insert(spec.name.clone(), spec)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PlatformSpec> {
        self.platforms.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.platforms.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    /// Resolve the file an activity of `platform`/`activity_type` is
    /// appended to. Unregistered platforms use `{platform}/{platform}.jsonl`.
    #[must_use]
    pub fn append_target(&self, platform: &str, activity_type: ActivityType) -> AppendTarget {
        let partition = Partition::for_type(activity_type);
        let spec = self.get(platform);
        let dir = spec
            .and_then(|s| s.dir(partition))
            .unwrap_or(platform)
            .to_string();
        let file = spec
            .and_then(|s| s.file(partition))
            .map_or_else(|| format!("{platform}.jsonl"), str::to_string);
        AppendTarget {
            partition,
            dir,
            file,
        }
    }
}
