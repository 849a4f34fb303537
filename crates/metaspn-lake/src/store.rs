//! Durable write primitive shared by every writer in the lake.
//!
//! Two modes:
//!
//! - **Append**: open with `O_APPEND`, `write_all` one buffer, `flush`,
//!   optionally `sync_data`. Used for event-log growth and incremental
//!   enhancement writes.
//! - **Atomic replace**: write a sibling `<name>.tmp`, then `rename` it over
//!   the destination. Used for the manifest and enhancement "latest" files.
//!
//! # Invariants
//!
//! - Records are serialized before any file is opened, so a serialization
//!   failure never touches disk.
//! - An append never leaves two records on one line: if the file ends in a
//!   torn partial line, a newline is written first.
//! - A failed atomic replace removes its temp file and leaves the
//!   destination byte-for-byte unchanged.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write as IoWrite};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::ErrorCode;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("atomic replace of {} failed: {source}", .path.display())]
    AtomicReplace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize record for {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } => ErrorCode::EventFileWriteFailed,
            Self::AtomicReplace { .. } => ErrorCode::AtomicWriteFailed,
            Self::Serialize { .. } => ErrorCode::InternalUnexpected,
        }
    }

    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct Store {
    durable: bool,
}

impl Store {
    /// `durable` adds `sync_data` after appends and before renames.
    #[must_use]
    pub const fn new(durable: bool) -> Self {
        Self { durable }
    }

    #[must_use]
    pub const fn is_durable(&self) -> bool {
        self.durable
    }

    /// Append one record as a JSON line.
    ///
    /// # Errors
    ///
    /// [`StoreError::Serialize`] if the record cannot be encoded (nothing is
    /// written), or [`StoreError::Io`] on any filesystem failure.
    pub fn append_line<T: Serialize + ?Sized>(&self, path: &Path, record: &T) -> Result<(), StoreError> {
        self.append_lines(path, std::slice::from_ref(&record))
            .map(|_| ())
    }

    /// Append several records with a single write. Returns the number of
    /// records written.
    ///
    /// # Errors
    ///
    /// Same as [`append_line`](Self::append_line).
    pub fn append_lines<T: Serialize>(&self, path: &Path, records: &[T]) -> Result<usize, StoreError> {
        let mut body = encode_lines(path, records)?;
        if records.is_empty() {
            return Ok(0);
        }
        ensure_parent(path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(StoreError::io(path))?;

        if ends_with_partial_line(&mut file).map_err(StoreError::io(path))? {
            tracing::warn!(path = %path.display(), "terminating torn trailing line before append");
            body.insert(0, b'\n');
        }

        file.write_all(&body).map_err(StoreError::io(path))?;
        file.flush().map_err(StoreError::io(path))?;
        if self.durable {
            file.sync_data().map_err(StoreError::io(path))?;
        }
        Ok(records.len())
    }

    /// Atomically replace `path` with one JSON line per record: temp file
    /// plus rename, so readers see the old or the new file, never a mix.
    /// Returns the number of records written.
    ///
    /// # Errors
    ///
    /// [`StoreError::Serialize`] before anything is written, or
    /// [`StoreError::AtomicReplace`] if the temp write or rename fails (the
    /// destination is untouched).
    pub fn write_all<T: Serialize>(&self, path: &Path, records: &[T]) -> Result<usize, StoreError> {
        let body = encode_lines(path, records)?;
        self.replace_atomically(path, &body)?;
        Ok(records.len())
    }

    /// Atomically replace `path` with a pretty-printed JSON document.
    ///
    /// # Errors
    ///
    /// Same as [`write_all`](Self::write_all).
    pub fn write_document<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let mut body = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
        body.push(b'\n');
        self.replace_atomically(path, &body)
    }

    fn replace_atomically(&self, path: &Path, body: &[u8]) -> Result<(), StoreError> {
        ensure_parent(path)?;
        let tmp = temp_path(path);

        let result = (|| -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(body)?;
            file.flush()?;
            if self.durable {
                file.sync_data()?;
            }
            drop(file);
            fs::rename(&tmp, path)
        })();

        if let Err(source) = result {
            if tmp.exists() {
                let _ = fs::remove_file(&tmp);
            }
            tracing::warn!(path = %path.display(), error = %source, "atomic replace failed; destination left untouched");
            return Err(StoreError::AtomicReplace {
                path: path.to_path_buf(),
                source,
            });
        }
        Ok(())
    }
}

/// Sibling temp file used by atomic replacement: `<name>.tmp`.
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "store".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!("{name}.tmp"))
}

fn encode_lines<T: Serialize>(path: &Path, records: &[T]) -> Result<Vec<u8>, StoreError> {
    let mut body = Vec::new();
    for record in records {
        serde_json::to_writer(&mut body, record).map_err(|source| StoreError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
        body.push(b'\n');
    }
    Ok(body)
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(StoreError::io(parent))
        }
        _ => Ok(()),
    }
}

fn ends_with_partial_line(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0_u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Store) {
        (TempDir::new().expect("tempdir"), Store::new(false))
    }

    fn lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .expect("read")
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Append
    // -----------------------------------------------------------------------

    #[test]
    fn append_creates_parents_and_file() {
        let (tmp, store) = setup();
        let path = tmp.path().join("a/b/events.jsonl");
        store.append_line(&path, &json!({"n": 1})).expect("append");
        store.append_line(&path, &json!({"n": 2})).expect("append");
        assert_eq!(lines(&path), vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[test]
    fn append_terminates_torn_line() {
        let (tmp, store) = setup();
        let path = tmp.path().join("events.jsonl");
        fs::write(&path, "{\"n\":1}\n{\"n\":").expect("seed");
        store.append_line(&path, &json!({"n": 2})).expect("append");
        let content = fs::read_to_string(&path).expect("read");
        assert_eq!(content, "{\"n\":1}\n{\"n\":\n{\"n\":2}\n");
    }

    #[test]
    fn append_lines_counts_and_skips_empty_batches() {
        let (tmp, store) = setup();
        let path = tmp.path().join("events.jsonl");
        let written = store
            .append_lines(&path, &[json!(1), json!(2), json!(3)])
            .expect("append");
        assert_eq!(written, 3);
        assert_eq!(store.append_lines::<Value>(&path, &[]).expect("empty"), 0);
        assert_eq!(lines(&path).len(), 3);
    }

    #[test]
    fn unserializable_record_writes_nothing() {
        let (tmp, store) = setup();
        let path = tmp.path().join("events.jsonl");
        let mut bad = BTreeMap::new();
        bad.insert((1_u8, 2_u8), 3_u8);
        let err = store.append_line(&path, &bad).expect_err("should fail");
        assert!(matches!(err, StoreError::Serialize { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn durable_append_succeeds() {
        let tmp = TempDir::new().expect("tempdir");
        let store = Store::new(true);
        let path = tmp.path().join("events.jsonl");
        store.append_line(&path, &json!({"n": 1})).expect("append");
        assert!(store.is_durable());
        assert_eq!(lines(&path).len(), 1);
    }

    // -----------------------------------------------------------------------
    // write_all
    // -----------------------------------------------------------------------

    #[test]
    fn atomic_write_replaces_content() {
        let (tmp, store) = setup();
        let path = tmp.path().join("latest.jsonl");
        store
            .write_all(&path, &[json!({"v": 1}), json!({"v": 2})])
            .expect("first");
        store
            .write_all(&path, &[json!({"v": 3})])
            .expect("second");
        assert_eq!(lines(&path), vec![json!({"v": 3})]);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn failed_atomic_write_leaves_destination_untouched() {
        let (tmp, store) = setup();
        let path = tmp.path().join("latest.jsonl");
        fs::write(&path, "{\"old\":true}\n").expect("seed");

        // A directory squatting on the temp path makes the temp write fail.
        fs::create_dir_all(temp_path(&path)).expect("block temp");
        let err = store
            .write_all(&path, &[json!({"new": true})])
            .expect_err("should fail");
        assert!(matches!(err, StoreError::AtomicReplace { .. }));
        assert_eq!(err.code(), ErrorCode::AtomicWriteFailed);
        assert_eq!(fs::read_to_string(&path).expect("read"), "{\"old\":true}\n");
    }

    #[test]
    fn failed_rename_removes_temp_file() {
        let (tmp, store) = setup();
        // Renaming a file over a non-empty directory fails on every platform.
        let path = tmp.path().join("occupied");
        fs::create_dir_all(path.join("child")).expect("mkdir");
        let err = store
            .write_all(&path, &[json!(1)])
            .expect_err("should fail");
        assert!(matches!(err, StoreError::AtomicReplace { .. }));
        assert!(!temp_path(&path).exists());
        assert!(path.join("child").is_dir());
    }

    #[test]
    fn serialization_failure_skips_temp_file() {
        let (tmp, store) = setup();
        let path = tmp.path().join("latest.jsonl");
        let mut bad = BTreeMap::new();
        bad.insert((1_u8, 2_u8), 3_u8);
        let err = store
            .write_all(&path, &[bad])
            .expect_err("should fail");
        assert!(matches!(err, StoreError::Serialize { .. }));
        assert!(!temp_path(&path).exists());
        assert!(!path.exists());
    }

    #[test]
    fn write_document_is_pretty_json() {
        let (tmp, store) = setup();
        let path = tmp.path().join("indexes/manifest.json");
        store
            .write_document(&path, &json!({"version": "2.0"}))
            .expect("write");
        let content = fs::read_to_string(&path).expect("read");
        assert!(content.contains("\n  \"version\""));
        let value: Value = serde_json::from_str(&content).expect("json");
        assert_eq!(value["version"], "2.0");
    }

    #[test]
    fn temp_path_is_sibling() {
        let path = PathBuf::from("/repo/artifacts/enhancements/q/latest.jsonl");
        assert_eq!(
            temp_path(&path),
            PathBuf::from("/repo/artifacts/enhancements/q/latest.jsonl.tmp")
        );
    }
}
