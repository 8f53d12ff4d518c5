use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::storage::error::StorageSystemError;
use crate::storage::provider::{validate_key, SecretStore, StoreResult};

/// Secret store keeping one file per key under a base directory.
///
/// Writes go through a temp file in the target directory and an atomic
/// rename, so readers never observe partial values. Files are created with
/// mode 0600 on unix.
#[derive(Debug, Clone)]
pub struct LocalSecretStore {
    base_path: PathBuf,
}

impl LocalSecretStore {
    /// Create a new local secret store with the given base path
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a validated key against the base path
    fn resolve_path(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    fn stage(&self, full_path: &Path, value: &[u8]) -> StoreResult<NamedTempFile> {
        let parent = full_path.parent().unwrap_or(self.base_path.as_path());
        fs::create_dir_all(parent)
            .map_err(|e| StorageSystemError::io(e, "create_dir_all", parent.to_path_buf()))?;

        let mut temp_file = NamedTempFile::new_in(parent)
            .map_err(|e| StorageSystemError::io(e, "create_temp_file", parent.to_path_buf()))?;
        temp_file
            .write_all(value)
            .and_then(|_| temp_file.as_file().sync_all())
            .map_err(|e| StorageSystemError::io(e, "write_temp_file", temp_file.path().to_path_buf()))?;
        Ok(temp_file)
    }
}

impl SecretStore for LocalSecretStore {
    fn name(&self) -> &str {
        "local"
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let full_path = self.resolve_path(key)?;
        match fs::read(&full_path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageSystemError::io(e, "read", full_path)),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let full_path = self.resolve_path(key)?;
        let temp_file = self.stage(&full_path, value)?;
        temp_file
            .persist(&full_path)
            .map_err(|e| StorageSystemError::io(e.error, "persist", full_path.clone()))?;
        log::debug!("Stored secret '{}' in {}", key, self.base_path.display());
        Ok(())
    }

    fn put_if_absent(&self, key: &str, value: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let full_path = self.resolve_path(key)?;
        if let Some(existing) = self.get(key)? {
            return Ok(Some(existing));
        }
        let temp_file = self.stage(&full_path, value)?;
        match temp_file.persist_noclobber(&full_path) {
            Ok(_) => {
                log::debug!("Stored secret '{}' in {}", key, self.base_path.display());
                Ok(None)
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => self.get(key),
            Err(e) => Err(StorageSystemError::io(e.error, "persist_noclobber", full_path)),
        }
    }
}
