use std::fmt::Debug;

use crate::storage::error::StorageSystemError;

pub type StoreResult<T> = std::result::Result<T, StorageSystemError>;

/// Scoped key/value store for key material and orchestrator state.
///
/// At-rest encryption is the host environment's concern. Implementations
/// keep critical sections short and never hold a lock across I/O.
pub trait SecretStore: Send + Sync + Debug {
    /// Get the name of this store
    fn name(&self) -> &str;

    /// Read a value; `None` when the key was never written
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write a value, replacing any existing one
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Write a value only if the key is unset.
    ///
    /// Returns the existing value when another writer got there first.
    fn put_if_absent(&self, key: &str, value: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Read a UTF-8 value
    fn get_string(&self, key: &str) -> StoreResult<Option<String>> {
        match self.get(key)? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
                StorageSystemError::DeserializationError {
                    format: "utf-8".to_string(),
                    source: Box::new(e),
                }
            }),
            None => Ok(None),
        }
    }
}

/// Keys are relative slash-separated paths: `[A-Za-z0-9._-]` segments, no
/// empty or `..` segments.
pub fn validate_key(key: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StorageSystemError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    for segment in key.split('/') {
        if segment.is_empty() {
            return Err(invalid("empty path segment"));
        }
        if segment == "." || segment == ".." {
            return Err(invalid("relative path segment"));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(invalid("allowed characters are A-Z a-z 0-9 . _ - /"));
        }
    }
    Ok(())
}

/// Turn an arbitrary label (host:port, repository names) into a key segment
pub fn key_segment(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}
