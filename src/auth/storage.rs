//! Durable storage for auth keys.
//!
//! The broker only persists key material; everything else it holds is
//! rebuilt on reconnect.
//!
//! | Type | Durability |
//! |------|------------|
//! | [`MemoryKeyStorage`] | Process lifetime |
//! | [`FileKeyStorage`] | One JSON file per endpoint, atomic replace |

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::EndpointId;

use super::AuthKey;

// ============================================================================
// KeyStorage
// ============================================================================

/// Persists auth keys across process restarts.
///
/// `load` runs once on the broker's processor at startup. `save` and
/// `invalidate` run on blocking workers, one at a time in the order the
/// processor issued them, so implementations must be `Send + Sync` but are
/// never called concurrently.
pub trait KeyStorage: Send + Sync + 'static {
    /// Loads the key stored for an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backing store cannot be read.
    fn load(&self, endpoint: &EndpointId) -> Result<Option<AuthKey>>;

    /// Stores a key, replacing any previous one.
    ///
    /// Must be durable when it returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the key could not be made durable.
    fn save(&self, endpoint: &EndpointId, key: &AuthKey) -> Result<()>;

    /// Removes the key stored for an endpoint. Removing a missing key is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backing store cannot be modified.
    fn invalidate(&self, endpoint: &EndpointId) -> Result<()>;
}

// ============================================================================
// MemoryKeyStorage
// ============================================================================

/// In-memory key storage.
#[derive(Debug, Default)]
pub struct MemoryKeyStorage {
    keys: Mutex<FxHashMap<EndpointId, AuthKey>>,
}

impl MemoryKeyStorage {
    /// Creates an empty storage.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// Returns `true` if no key is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl KeyStorage for MemoryKeyStorage {
    fn load(&self, endpoint: &EndpointId) -> Result<Option<AuthKey>> {
        Ok(self.keys.lock().get(endpoint).cloned())
    }

    fn save(&self, endpoint: &EndpointId, key: &AuthKey) -> Result<()> {
        self.keys.lock().insert(endpoint.clone(), key.clone());
        Ok(())
    }

    fn invalidate(&self, endpoint: &EndpointId) -> Result<()> {
        self.keys.lock().remove(endpoint);
        Ok(())
    }
}

// ============================================================================
// FileKeyStorage
// ============================================================================

/// Key storage backed by a directory of JSON files.
///
/// Writes go to a temporary file in the same directory, are synced, then
/// renamed over the previous file, so a crash never leaves a torn key.
#[derive(Debug, Clone)]
pub struct FileKeyStorage {
    dir: PathBuf,
}

impl FileKeyStorage {
    /// Opens (and creates if needed) a storage directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::storage(format!("cannot create key directory {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    /// Returns the storage directory.
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, endpoint: &EndpointId) -> PathBuf {
        self.dir.join(format!("{}.key.json", endpoint.file_stem()))
    }
}

impl KeyStorage for FileKeyStorage {
    fn load(&self, endpoint: &EndpointId) -> Result<Option<AuthKey>> {
        let path = self.path_for(endpoint);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::storage(format!("cannot read {}: {e}", path.display())));
            }
        };

        let key: AuthKey = serde_json::from_slice(&contents)
            .map_err(|e| Error::storage(format!("corrupt key file {}: {e}", path.display())))?;

        if key.endpoint() != endpoint {
            warn!(
                path = %path.display(),
                stored = %key.endpoint(),
                expected = %endpoint,
                "Key file belongs to another endpoint, ignoring"
            );
            return Ok(None);
        }

        Ok(Some(key))
    }

    fn save(&self, endpoint: &EndpointId, key: &AuthKey) -> Result<()> {
        let path = self.path_for(endpoint);
        let json = serde_json::to_vec_pretty(key)?;

        let mut file = NamedTempFile::new_in(&self.dir)
            .map_err(|e| Error::storage(format!("cannot create temp key file: {e}")))?;
        file.write_all(&json)
            .and_then(|()| file.as_file().sync_all())
            .map_err(|e| Error::storage(format!("cannot write key file: {e}")))?;
        file.persist(&path)
            .map_err(|e| Error::storage(format!("cannot replace {}: {e}", path.display())))?;

        debug!(endpoint = %endpoint, path = %path.display(), "Auth key persisted");
        Ok(())
    }

    fn invalidate(&self, endpoint: &EndpointId) -> Result<()> {
        let path = self.path_for(endpoint);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(endpoint = %endpoint, "Auth key file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!("cannot remove {}: {e}", path.display()))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> EndpointId {
        EndpointId::new("ws://front.example/")
    }

    #[test]
    fn test_memory_storage_lifecycle() {
        let storage = MemoryKeyStorage::new();
        let key = AuthKey::new(endpoint(), vec![1; 16]);

        assert!(storage.load(&endpoint()).expect("load").is_none());
        storage.save(&endpoint(), &key).expect("save");
        assert_eq!(storage.load(&endpoint()).expect("load"), Some(key));
        storage.invalidate(&endpoint()).expect("invalidate");
        assert!(storage.is_empty());
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key = AuthKey::new(endpoint(), vec![7; 32]);

        FileKeyStorage::open(dir.path())
            .expect("open")
            .save(&endpoint(), &key)
            .expect("save");

        let reopened = FileKeyStorage::open(dir.path()).expect("reopen");
        assert_eq!(reopened.load(&endpoint()).expect("load"), Some(key));
    }

    #[test]
    fn test_file_storage_replaces_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileKeyStorage::open(dir.path()).expect("open");
        let old = AuthKey::new(endpoint(), vec![1; 32]);
        let new = AuthKey::new(endpoint(), vec![2; 32]);

        storage.save(&endpoint(), &old).expect("save old");
        storage.save(&endpoint(), &new).expect("save new");
        assert_eq!(storage.load(&endpoint()).expect("load"), Some(new));

        let files = fs::read_dir(dir.path()).expect("read dir").count();
        assert_eq!(files, 1);
    }

    #[test]
    fn test_file_storage_invalidate_missing_is_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileKeyStorage::open(dir.path()).expect("open");
        storage.invalidate(&endpoint()).expect("invalidate");
    }

    #[test]
    fn test_file_storage_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileKeyStorage::open(dir.path()).expect("open");
        fs::write(storage.path_for(&endpoint()), b"{ nope").expect("write");

        let err = storage.load(&endpoint()).unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
    }
}
