//! # Stagehand Kernel
//!
//! The [`Orchestrator`] that wires configuration, adapters and the stage
//! graph together, plus the crate-wide error type and constants.
pub mod bootstrap;
pub mod constants;
pub mod error;

pub use bootstrap::{Orchestrator, Plan, PlannedStage};
pub use error::{Error, Result};
