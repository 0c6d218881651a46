//! File-backed key/value store
//!
//! Keeps every entry in a single JSON document on disk.

use super::{BackendError, BackendErrorKind, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Current on-disk format version
const FORMAT_VERSION: u32 = 1;

/// Serializable document holding all entries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    /// Version of the file format (for future migration support)
    version: u32,
    /// Raw key/value entries
    entries: BTreeMap<String, String>,
}

/// A [`KeyValueStore`] persisted to a JSON file
///
/// Entries are cached in memory; every mutation rewrites the whole file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`
    ///
    /// A missing file is treated as an empty store and is created on the
    /// first write.
    ///
    /// # Returns
    /// * `Ok(FileStore)` if the file is absent or holds a valid document
    /// * `Err(BackendError)` if the file cannot be read or parsed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BackendError> {
        let path = path.as_ref().to_path_buf();
        let entries = Self::load(&path)?;
        debug!(path = %path.display(), entries = entries.len(), "Opened file store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<BTreeMap<String, String>, BackendError> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let json = fs::read_to_string(path)
            .map_err(|e| BackendError::new(BackendErrorKind::Io, e.to_string()))?;

        let data: StoreData = serde_json::from_str(&json)
            .map_err(|e| BackendError::new(BackendErrorKind::Other, e.to_string()))?;

        if data.version != FORMAT_VERSION {
            return Err(BackendError::new(
                BackendErrorKind::Other,
                format!("Unsupported store version: {}", data.version),
            ));
        }

        Ok(data.entries)
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), BackendError> {
        let data = StoreData {
            version: FORMAT_VERSION,
            entries: entries.clone(),
        };
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| BackendError::new(BackendErrorKind::Other, e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| BackendError::new(BackendErrorKind::Io, e.to_string()))?;
            }
        }

        fs::write(&self.path, json)
            .map_err(|e| BackendError::new(BackendErrorKind::Io, e.to_string()))
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut entries = self.entries();
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&entries) {
            // Keep the cache in step with what is on disk
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        let mut entries = self.entries();
        if let Some(old) = entries.remove(key) {
            if let Err(e) = self.flush(&entries) {
                entries.insert(key.to_string(), old);
                return Err(e);
            }
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.entries().keys().cloned().collect())
    }
}
