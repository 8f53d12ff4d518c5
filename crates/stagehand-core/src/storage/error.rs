//! # Stagehand Storage System Errors
//!
//! [`StorageSystemError`] covers the secret store (key validation, file I/O,
//! record encoding), the run lock and configuration loading.
use std::path::PathBuf;
use thiserror::Error;

use crate::adapter::error::AdapterError;

#[derive(Debug, Error)]
pub enum StorageSystemError {
    #[error("I/O error during operation '{operation}' on path '{path}': {source}")]
    Io {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid secret key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Secret store '{0}' lock poisoned")]
    LockPoisoned(String),

    #[error("Serialization to '{format}' failed: {source}")]
    SerializationError {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Deserialization from '{format}' failed: {source}")]
    DeserializationError {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Unsupported configuration format: {0}")]
    UnsupportedConfigFormat(String),

    #[error("Configuration not found at path: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("State directory '{path}' is locked by another run (remove '{lock}' if stale)")]
    Locked { path: PathBuf, lock: PathBuf },
}

// Helper for creating Io errors, ensuring path is always included.
impl StorageSystemError {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        StorageSystemError::Io {
            source,
            operation: operation.into(),
            path,
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        StorageSystemError::InvalidConfig { reason: reason.into() }
    }

    /// Secret store failures inside a stage need an operator; never retried
    pub fn into_adapter_error(self) -> AdapterError {
        AdapterError::fatal("secret-store", self.to_string())
    }
}
