//! # Stagehand Core
//!
//! Staged bootstrap orchestrator for local GitOps environments: a dependency
//! graph of provisioning stages, each converged against an external system
//! (cluster, git host, key registry) through classified, retryable adapters.
pub mod adapter;
pub mod credentials;
pub mod kernel;
pub mod poller;
pub mod seeder;
pub mod stage_manager;
pub mod step;
pub mod storage;
pub mod utils;

// Re-export key public types/traits for easier use by the binary
pub use kernel::Orchestrator;
pub use kernel::error::{Error, Result};
pub use poller::{CancelHandle, CancelSignal, RetryPolicy};
pub use stage_manager::{Report, Scheduler, Stage, StageGraph};
pub use storage::SecretStore;

#[cfg(test)]
mod tests;
