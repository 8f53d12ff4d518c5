//! # Stagehand Kernel Errors
//!
//! Defines the crate-wide error type.
//!
//! [`Error`] aggregates the typed errors of every subsystem (stage graph,
//! storage, adapters, poller, seeder, credentials) so that orchestrator-level
//! code can use `?` across module boundaries without losing the original
//! classification.
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::adapter::error::AdapterError;
use crate::credentials::error::CredentialError;
use crate::poller::error::PollError;
use crate::seeder::error::SeedError;
use crate::stage_manager::error::StageSystemError;
use crate::storage::error::StorageSystemError;

/// Crate-wide error type
#[derive(Debug, ThisError)]
pub enum Error {
    /// Stage graph construction or scheduling error
    #[error("Stage system error: {0}")]
    StageSystem(#[from] StageSystemError),

    /// Secret store or configuration error
    #[error("Storage system error: {0}")]
    StorageSystem(#[from] StorageSystemError),

    /// Classified external system failure
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Readiness poller gave up
    #[error("Poll error: {0}")]
    Poll(#[from] PollError),

    /// Repository seeding error
    #[error("Seed error: {0}")]
    Seed(#[from] SeedError),

    /// Key material error
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Error occurring during a specific orchestrator lifecycle phase.
    #[error("Orchestrator lifecycle error during {phase}: {message}")]
    Lifecycle {
        phase: LifecyclePhase,
        message: String,
    },

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Represents a specific phase in the orchestrator's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum LifecyclePhase {
    #[error("Configure")]
    Configure,
    #[error("Wire")]
    Wire,
    #[error("Plan")]
    Plan,
    #[error("Run")]
    Run,
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl Error {
    /// Helper to create an I/O error with context, wrapped as a storage error
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        Error::StorageSystem(StorageSystemError::io(source, operation, path))
    }

    /// Helper for lifecycle errors
    pub fn lifecycle(phase: LifecyclePhase, message: impl Into<String>) -> Self {
        Error::Lifecycle {
            phase,
            message: message.into(),
        }
    }
}
