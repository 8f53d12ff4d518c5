//! # Stagehand Stage Manager
//!
//! The stage graph and its scheduler. A [`Stage`] pairs an idempotent action
//! with a convergence predicate; the [`Scheduler`] runs every stage of a
//! [`StageGraph`] once its dependencies converged, records one
//! [`StageRun`] per stage and returns the [`Report`].
pub mod bootstrap_stages;
pub mod context;
pub mod dependency;
pub mod error;
pub mod graph;
pub mod report;
pub mod run;
pub mod scheduler;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adapter::error::AdapterResult;
use crate::kernel::error::Result;
use crate::step::StepOutcome;

/// Core trait that all stages must implement
#[async_trait]
pub trait Stage: Send + Sync {
    /// The unique identifier of the stage
    fn id(&self) -> &str;

    /// The human-readable name of the stage
    fn name(&self) -> &str {
        self.id()
    }

    /// The description of what this stage does
    fn description(&self) -> &str {
        ""
    }

    /// Run the stage's action. Must be safe when the target already
    /// satisfies [`Stage::is_converged`].
    async fn execute(&self, context: &StageContext) -> Result<StageOutcome>;

    /// One convergence check; the scheduler polls it after `execute`
    async fn is_converged(&self, context: &StageContext) -> AdapterResult<bool>;

    /// What the stage would do, without touching any external system
    fn dry_run_description(&self) -> String {
        format!("Would converge stage: {}", self.name())
    }
}

/// What a stage's action did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Target existed; no side effects
    AlreadyPresent,
    Created,
    /// Manifests (re)applied
    Applied,
    Seeded { fingerprint: String, pushed: bool },
    /// Nothing to do but wait for readiness
    Waited,
}

impl StageOutcome {
    /// Whether the target already satisfied the stage before this run
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            StageOutcome::AlreadyPresent | StageOutcome::Seeded { pushed: false, .. }
        )
    }
}

impl From<StepOutcome> for StageOutcome {
    fn from(outcome: StepOutcome) -> Self {
        match outcome {
            StepOutcome::AlreadyPresent => StageOutcome::AlreadyPresent,
            StepOutcome::Created => StageOutcome::Created,
        }
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::AlreadyPresent => write!(f, "already present"),
            StageOutcome::Created => write!(f, "created"),
            StageOutcome::Applied => write!(f, "applied"),
            StageOutcome::Seeded { fingerprint, pushed } => {
                let short = fingerprint.get(..12).unwrap_or(fingerprint);
                if *pushed {
                    write!(f, "pushed {}", short)
                } else {
                    write!(f, "unchanged {}", short)
                }
            }
            StageOutcome::Waited => write!(f, "ready"),
        }
    }
}

// Re-export important types
pub use context::StageContext;
pub use dependency::DependencyGraph;
pub use error::StageSystemError;
pub use graph::StageGraph;
pub use report::Report;
pub use run::{FailureKind, RunOutcome, StageFailure, StageRun, StageState};
pub use scheduler::Scheduler;
