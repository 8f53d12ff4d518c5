use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::kernel::constants::LOCK_FILE_NAME;
use crate::storage::error::StorageSystemError;

/// Process-level guard against concurrent runs over the same state directory.
///
/// The lock file is created with create-new semantics and removed on drop.
/// A crashed run leaves it behind; the error names the file to remove.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(state_dir: &Path) -> Result<Self, StorageSystemError> {
        fs::create_dir_all(state_dir)
            .map_err(|e| StorageSystemError::io(e, "create_dir_all", state_dir.to_path_buf()))?;
        let path = state_dir.join(LOCK_FILE_NAME);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageSystemError::Locked {
                    path: state_dir.to_path_buf(),
                    lock: path,
                });
            }
            Err(e) => return Err(StorageSystemError::io(e, "create_lock", path)),
        };
        writeln!(file, "{}", std::process::id())
            .map_err(|e| StorageSystemError::io(e, "write_lock", path.clone()))?;

        log::debug!("Acquired run lock {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to remove run lock {}: {}", self.path.display(), e);
        }
    }
}
