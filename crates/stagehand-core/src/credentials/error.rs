use thiserror::Error;

use crate::poller::PollError;
use crate::storage::error::StorageSystemError;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Secret store error: {0}")]
    Store(#[from] StorageSystemError),

    /// A stored key pair no longer matches its recorded fingerprint
    #[error("Stored key pair '{name}' is corrupt: {reason}")]
    CorruptRecord { name: String, reason: String },

    #[error("Unsupported key algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("Deploy key registration failed: {0}")]
    Registration(#[from] PollError),
}

impl CredentialError {
    pub fn corrupt(name: &str, reason: impl Into<String>) -> Self {
        CredentialError::CorruptRecord {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
