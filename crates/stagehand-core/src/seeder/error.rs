use std::path::PathBuf;

use thiserror::Error;

use crate::poller::PollError;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("I/O error during '{operation}' on '{path}': {source}")]
    Io {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Template for '{destination}' references undefined variable '{name}'")]
    MissingVariable { name: String, destination: PathBuf },

    #[error("Invalid destination '{destination}': {reason}")]
    InvalidDestination { destination: PathBuf, reason: String },

    #[error("Template '{path}' is not valid UTF-8")]
    NonUtf8Template { path: PathBuf },

    #[error("Working tree synthesis aborted: {0}")]
    Synthesis(String),

    #[error("Push failed: {0}")]
    Push(#[from] PollError),
}

impl SeedError {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        SeedError::Io {
            path,
            operation: operation.into(),
            source,
        }
    }
}
