use thiserror::Error;

use crate::adapter::error::AdapterError;

/// Why a poll ended without observing readiness
#[derive(Debug, Clone, Error)]
pub enum PollError {
    /// The retry policy was exhausted
    #[error("'{what}' not ready after {attempts} attempt(s){}", observed_suffix(.last_observed))]
    DeadlineExceeded {
        what: String,
        attempts: u32,
        /// Last transient error or "not ready" observation
        last_observed: Option<String>,
    },

    /// The external system reported a failure that retrying cannot fix
    #[error("'{what}' failed after {attempts} attempt(s): {source}")]
    Fatal {
        what: String,
        attempts: u32,
        #[source]
        source: AdapterError,
    },

    #[error("'{what}' cancelled after {attempts} attempt(s)")]
    Cancelled { what: String, attempts: u32 },
}

impl PollError {
    pub fn fatal(what: impl Into<String>, attempts: u32, source: AdapterError) -> Self {
        PollError::Fatal {
            what: what.into(),
            attempts,
            source,
        }
    }

    /// Attempts spent before the poll ended
    pub fn attempts(&self) -> u32 {
        match self {
            PollError::DeadlineExceeded { attempts, .. }
            | PollError::Fatal { attempts, .. }
            | PollError::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// What was being polled
    pub fn what(&self) -> &str {
        match self {
            PollError::DeadlineExceeded { what, .. }
            | PollError::Fatal { what, .. }
            | PollError::Cancelled { what, .. } => what,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PollError::Cancelled { .. })
    }
}

fn observed_suffix(last_observed: &Option<String>) -> String {
    match last_observed {
        Some(observed) => format!(", last observed: {}", observed),
        None => String::new(),
    }
}
