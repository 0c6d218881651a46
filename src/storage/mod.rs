//! Namespaced key/value storage
//!
//! [`StorageService`] prefixes every key with [`PREFIX`] so chat data never
//! collides with other users of the same backing store, and translates raw
//! backend failures into [`StorageError`].
//!
//! The backing store is any [`KeyValueStore`]: [`MemoryStore`] for tests and
//! throwaway sessions, [`FileStore`] for data that should survive a restart.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Prefix applied to every key written through [`StorageService`]
pub const PREFIX: &str = "chat_";

/// Category of a raw backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The store has no room left for the write
    QuotaExceeded,
    /// The underlying medium could not be read or written
    Io,
    /// Anything else
    Other,
}

/// Failure reported by a [`KeyValueStore`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    /// What went wrong
    pub kind: BackendErrorKind,
    /// Backend-specific detail
    pub message: String,
}

impl BackendError {
    /// Create a backend error
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A flat string-to-string store
///
/// Implementations must be usable from shared references; they handle
/// their own interior mutability.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), BackendError>;

    /// Snapshot of every key currently stored
    fn keys(&self) -> Result<Vec<String>, BackendError>;
}

/// Storage failures as seen by the rest of the application
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backing store is full
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A read, write or remove failed
    #[error("{0}")]
    Storage(String),

    /// Unclassified failure
    #[error("Unknown storage error: {0}")]
    Unknown(String),
}

impl StorageError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            StorageError::Storage(_) => "STORAGE_ERROR",
            StorageError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }
}

/// Key/value access confined to the chat namespace
#[derive(Clone)]
pub struct StorageService {
    backend: Arc<dyn KeyValueStore>,
}

impl StorageService {
    /// Wrap a backing store
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Storage service over a fresh [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Namespaced form of `name`
    pub fn key(name: &str) -> String {
        format!("{}{}", PREFIX, name)
    }

    /// Write `value` under `key`
    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.backend
            .set(&Self::key(key), value)
            .map_err(|e| match e.kind {
                BackendErrorKind::QuotaExceeded => StorageError::QuotaExceeded(e.message),
                BackendErrorKind::Io => StorageError::Storage(e.message),
                BackendErrorKind::Other => StorageError::Unknown(e.message),
            })
    }

    /// Read the value under `key`
    pub fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.backend.get(&Self::key(key)).map_err(|e| {
            StorageError::Storage(format!("Failed to read from storage: {}", e.message))
        })
    }

    /// Remove `key`
    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(&Self::key(key)).map_err(|e| {
            StorageError::Storage(format!("Failed to remove from storage: {}", e.message))
        })
    }

    /// Remove every key in the chat namespace, leaving other keys alone
    ///
    /// Works from a snapshot of the key list so removals cannot disturb the
    /// enumeration.
    pub fn clear_all(&self) -> Result<(), StorageError> {
        let to_clear = |e: BackendError| {
            StorageError::Storage(format!("Failed to clear storage: {}", e.message))
        };

        let keys: Vec<String> = self
            .backend
            .keys()
            .map_err(to_clear)?
            .into_iter()
            .filter(|k| k.starts_with(PREFIX))
            .collect();

        for key in &keys {
            self.backend.remove(key).map_err(to_clear)?;
        }

        debug!(removed = keys.len(), "Cleared chat storage namespace");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend whose every operation fails with a fixed error kind
    struct BrokenStore(BackendErrorKind);

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, BackendError> {
            Err(BackendError::new(self.0, "disk on fire"))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), BackendError> {
            Err(BackendError::new(self.0, "disk on fire"))
        }
        fn remove(&self, _key: &str) -> Result<(), BackendError> {
            Err(BackendError::new(self.0, "disk on fire"))
        }
        fn keys(&self) -> Result<Vec<String>, BackendError> {
            Err(BackendError::new(self.0, "disk on fire"))
        }
    }

    fn broken(kind: BackendErrorKind) -> StorageService {
        StorageService::new(Arc::new(BrokenStore(kind)))
    }

    #[test]
    fn test_keys_are_namespaced() {
        let backend = Arc::new(MemoryStore::new());
        let storage = StorageService::new(backend.clone());

        storage.set("history", "[]").unwrap();

        assert_eq!(backend.get("chat_history").unwrap(), Some("[]".to_string()));
        assert_eq!(backend.get("history").unwrap(), None);
        assert_eq!(storage.get("history").unwrap(), Some("[]".to_string()));
    }

    #[test]
    fn test_get_missing_and_remove_missing() {
        let storage = StorageService::in_memory();
        assert_eq!(storage.get("nothing").unwrap(), None);
        assert!(storage.remove("nothing").is_ok());
    }

    #[test]
    fn test_clear_all_only_touches_namespace() {
        let backend = Arc::new(MemoryStore::new());
        backend.set("theme", "dark").unwrap();
        backend.set("chatty", "keep me").unwrap();
        let storage = StorageService::new(backend.clone());
        for i in 0..10 {
            storage.set(&format!("k{}", i), "v").unwrap();
        }

        storage.clear_all().unwrap();

        let mut remaining = backend.keys().unwrap();
        remaining.sort();
        assert_eq!(remaining, vec!["chatty".to_string(), "theme".to_string()]);
    }

    #[test]
    fn test_set_error_translation() {
        let err = broken(BackendErrorKind::QuotaExceeded)
            .set("a", "b")
            .unwrap_err();
        assert_eq!(err.code(), "QUOTA_EXCEEDED");

        let err = broken(BackendErrorKind::Io).set("a", "b").unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");

        let err = broken(BackendErrorKind::Other).set("a", "b").unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_ERROR");
    }

    #[test]
    fn test_read_remove_clear_errors_are_storage_errors() {
        let storage = broken(BackendErrorKind::Other);

        let err = storage.get("a").unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
        assert!(err.to_string().starts_with("Failed to read from storage"));

        let err = storage.remove("a").unwrap_err();
        assert!(err.to_string().starts_with("Failed to remove from storage"));

        let err = storage.clear_all().unwrap_err();
        assert!(err.to_string().starts_with("Failed to clear storage"));
    }

    #[test]
    fn test_quota_exceeded_from_memory_store() {
        let storage = StorageService::new(Arc::new(MemoryStore::with_quota(16)));
        storage.set("a", "small").unwrap();

        let err = storage.set("b", &"x".repeat(64)).unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded(_)));
    }
}
