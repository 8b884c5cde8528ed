//! Backends holding ordered record sequences under string keys.

use crate::error::{StoreError, StoreResult};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;
use tracing::debug;

/// Key/value storage of record sequences.
///
/// Implementations see only what they are given: encrypted records when used
/// through [`SecureRecords`](crate::SecureRecords), plaintext for backups of
/// legacy data.
pub trait RecordStore: Send + Sync {
    /// Reads the sequence stored under `key`, if any.
    fn load(&self, key: &str) -> StoreResult<Option<Vec<Value>>>;

    /// Replaces the sequence stored under `key`.
    fn save(&self, key: &str, records: &[Value]) -> StoreResult<()>;

    /// All keys currently stored, sorted.
    fn keys(&self) -> StoreResult<Vec<String>>;
}

/// Storage keys are restricted to `[A-Za-z0-9_-]` so they map safely onto
/// file names.
pub(crate) fn validate_key(key: &str) -> StoreResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// In-process store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<Value>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn load(&self, key: &str) -> StoreResult<Option<Vec<Value>>> {
        validate_key(key)?;
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, records: &[Value]) -> StoreResult<()> {
        validate_key(key)?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), records.to_vec());
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Directory-backed store: one `<key>.json` file per key.
///
/// Writes go to a temporary file that is then renamed over the target, so a
/// crash mid-write leaves the previous sequence intact.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl RecordStore for FileStore {
    fn load(&self, key: &str) -> StoreResult<Option<Vec<Value>>> {
        let path = self.path_for(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<Value> = serde_json::from_slice(&bytes)?;
        Ok(Some(records))
    }

    fn save(&self, key: &str, records: &[Value]) -> StoreResult<()> {
        let path = self.path_for(key)?;
        let bytes = serde_json::to_vec(records)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!("wrote {} records ({} bytes) to {}", records.len(), bytes.len(), path.display());
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_key(stem).is_ok() {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
