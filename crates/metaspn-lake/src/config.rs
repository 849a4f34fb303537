use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::enhancement::EnhancementKind;

/// Repository-level settings read from `.metaspn/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LakeConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub enhancements: EnhancementConfig,
    /// Extra or overriding platform registrations.
    #[serde(default)]
    pub platforms: Vec<PlatformConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `sync_data` after every append and before every atomic rename.
    #[serde(default)]
    pub durable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Keep an existing manifest current on append.
    #[serde(default = "default_true")]
    pub auto_update: bool,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            auto_update: default_true(),
        }
    }
}

/// Current algorithm version per enhancement kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancementConfig {
    #[serde(default = "default_algorithm_version")]
    pub quality_scores: String,
    #[serde(default = "default_algorithm_version")]
    pub game_signatures: String,
    #[serde(default = "default_algorithm_version")]
    pub embeddings: String,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            quality_scores: default_algorithm_version(),
            game_signatures: default_algorithm_version(),
            embeddings: default_algorithm_version(),
        }
    }
}

impl EnhancementConfig {
    /// Version a fresh computation of `kind` must stamp.
    #[must_use]
    pub fn version_for(&self, kind: EnhancementKind) -> &str {
        match kind {
            EnhancementKind::QualityScores => &self.quality_scores,
            EnhancementKind::GameSignatures => &self.game_signatures,
            EnhancementKind::Embeddings => &self.embeddings,
        }
    }

    /// Override the version for one kind.
    pub fn set_version(&mut self, kind: EnhancementKind, version: impl Into<String>) {
        let slot = match kind {
            EnhancementKind::QualityScores => &mut self.quality_scores,
            EnhancementKind::GameSignatures => &mut self.game_signatures,
            EnhancementKind::Embeddings => &mut self.embeddings,
        };
        *slot = version.into();
    }
}

/// One `[[platforms]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub name: String,
    #[serde(default)]
    pub source_dir: Option<String>,
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub artifact_dir: Option<String>,
    #[serde(default)]
    pub artifact_file: Option<String>,
}

/// Per-user settings read from `{config_dir}/metaspn/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    /// Repository used when no `--repo` is given.
    #[serde(default)]
    pub default_repo: Option<PathBuf>,
}

/// Template written by `RepoLayout::init`.
pub const CONFIG_TEMPLATE: &str = "[store]\n\
    durable = false\n\
    \n\
    [manifest]\n\
    auto_update = true\n\
    \n\
    [enhancements]\n\
    quality_scores = \"1.0\"\n\
    game_signatures = \"1.0\"\n\
    embeddings = \"1.0\"\n";

/// Load `.metaspn/config.toml` under `root`, falling back to defaults when
/// the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_lake_config(root: &Path) -> Result<LakeConfig> {
    let path = root.join(".metaspn/config.toml");
    if !path.exists() {
        return Ok(LakeConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str::<LakeConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load the per-user config, or defaults when there is none.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };
    load_user_config_from(&config_dir.join("metaspn/config.toml"))
}

fn load_user_config_from(path: &Path) -> Result<UserConfig> {
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

const fn default_true() -> bool {
    true
}

fn default_algorithm_version() -> String {
    "1.0".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_uses_defaults() {
        let tmp = TempDir::new().expect("tempdir");
        let cfg = load_lake_config(tmp.path()).expect("load should succeed");
        assert!(!cfg.store.durable);
        assert!(cfg.manifest.auto_update);
        assert_eq!(cfg.enhancements.version_for(EnhancementKind::Embeddings), "1.0");
        assert!(cfg.platforms.is_empty());
    }

    #[test]
    fn template_parses_to_defaults() {
        let cfg: LakeConfig = toml::from_str(CONFIG_TEMPLATE).expect("parse template");
        assert!(cfg.manifest.auto_update);
        assert_eq!(cfg.enhancements.quality_scores, "1.0");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join(".metaspn")).expect("mkdir");
        std::fs::write(
            tmp.path().join(".metaspn/config.toml"),
            "[enhancements]\nquality_scores = \"1.1\"\n\n[[platforms]]\nname = \"mastodon\"\nartifact_dir = \"mastodon\"\nartifact_file = \"toots.jsonl\"\n",
        )
        .expect("write config");

        let cfg = load_lake_config(tmp.path()).expect("load");
        assert_eq!(cfg.enhancements.version_for(EnhancementKind::QualityScores), "1.1");
        assert_eq!(cfg.enhancements.version_for(EnhancementKind::GameSignatures), "1.0");
        assert_eq!(cfg.platforms.len(), 1);
        assert_eq!(cfg.platforms[0].artifact_file.as_deref(), Some("toots.jsonl"));
        assert_eq!(cfg.platforms[0].source_dir, None);
    }

    #[test]
    fn broken_config_is_an_error() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join(".metaspn")).expect("mkdir");
        std::fs::write(tmp.path().join(".metaspn/config.toml"), "[store\n").expect("write");
        let err = load_lake_config(tmp.path()).expect_err("should fail");
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn set_version_overrides_one_kind() {
        let mut cfg = EnhancementConfig::default();
        cfg.set_version(EnhancementKind::GameSignatures, "2.0");
        assert_eq!(cfg.version_for(EnhancementKind::GameSignatures), "2.0");
        assert_eq!(cfg.version_for(EnhancementKind::QualityScores), "1.0");
    }

    #[test]
    fn user_config_parses_default_repo() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "output = \"json\"\ndefault_repo = \"/home/me/lake\"\n")
            .expect("write");
        let cfg = load_user_config_from(&path).expect("load");
        assert_eq!(cfg.output.as_deref(), Some("json"));
        assert_eq!(cfg.default_repo, Some(PathBuf::from("/home/me/lake")));
    }
}
