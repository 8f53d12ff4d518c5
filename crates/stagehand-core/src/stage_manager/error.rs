//! # Stagehand Stage Manager Errors
//!
//! Errors raised while declaring the stage graph or running the scheduler.
//! Individual stage failures are not errors at this level: they are recorded
//! in the run report.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageSystemError {
    #[error("Stage '{stage_id}' not found")]
    StageNotFound { stage_id: String },

    #[error("Stage '{stage_id}' is declared twice")]
    StageAlreadyExists { stage_id: String },

    #[error("Stage '{stage_id}' depends on unknown stage '{dependency_id}'")]
    UnknownDependency { stage_id: String, dependency_id: String },

    #[error("Stage '{stage_id}' depends on itself")]
    SelfDependency { stage_id: String },

    #[error("Dependency cycle detected. Path: {}", cycle_path.join(" -> "))]
    DependencyCycleDetected { cycle_path: Vec<String> },

    #[error("Invalid concurrency limit {0}; at least one worker is required")]
    InvalidConcurrency(usize),

    #[error("Internal Stage Manager error: {0}")]
    InternalError(String),
}
