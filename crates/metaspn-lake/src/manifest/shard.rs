//! Companion shard files: `by_date/{YYYY-MM}.json` and
//! `by_platform/{name}.json`, each `{key, activity_ids}`.
//!
//! Shards are write-only from the index's point of view. They exist for
//! external readers that want one platform or month without parsing the
//! master manifest.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ManifestError;
use crate::layout::is_valid_segment;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub key: String,
    pub activity_ids: Vec<String>,
}

/// Whether `key` can be used as a shard file stem.
pub(crate) fn is_writable_key(key: &str) -> bool {
    is_valid_segment(key) && !key.starts_with('.')
}

pub(crate) fn write(store: &Store, dir: &Path, key: &str, ids: &BTreeSet<String>) -> Result<(), ManifestError> {
    let shard = Shard {
        key: key.to_string(),
        activity_ids: ids.iter().cloned().collect(),
    };
    store.write_document(&dir.join(format!("{key}.json")), &shard)?;
    Ok(())
}

/// Read one shard. `Ok(None)` when the file does not exist.
pub(crate) fn read(path: &Path) -> Result<Option<Shard>, ManifestError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ManifestError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| ManifestError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Remove every `*.json` shard in `dir`. A missing directory is created.
pub(crate) fn clear_dir(dir: &Path) -> Result<(), ManifestError> {
    let io_err = |source| ManifestError::Io {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(io_err)?;
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            fs::remove_file(&path).map_err(|source| ManifestError::Io { path, source })?;
        }
    }
    Ok(())
}
