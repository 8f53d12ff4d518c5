use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stage_manager::run::{FailureKind, RunOutcome, StageRun, StageState};

/// Every StageRun of one orchestrator invocation, in declaration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub runs: Vec<StageRun>,
    /// Whether cancellation was observed during the run
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl Report {
    pub fn new(runs: Vec<StageRun>, cancelled: bool, elapsed: Duration) -> Self {
        Self {
            runs,
            cancelled,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// All stages converged and nothing was cancelled
    pub fn success(&self) -> bool {
        !self.cancelled && self.runs.iter().all(|run| run.state == StageState::Converged)
    }

    pub fn run(&self, stage_id: &str) -> Option<&StageRun> {
        self.runs.iter().find(|run| run.stage_id == stage_id)
    }

    pub fn count(&self, outcome: RunOutcome) -> usize {
        self.runs
            .iter()
            .filter(|run| run.run_outcome() == Some(outcome))
            .count()
    }

    /// Converged stages, including skipped ones
    pub fn converged_count(&self) -> usize {
        self.runs
            .iter()
            .filter(|run| run.state == StageState::Converged)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.count(RunOutcome::Failed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &StageRun> {
        self.runs.iter().filter(|run| run.state == StageState::Failed)
    }

    /// Failed stages whose own action or predicate failed, excluding those
    /// failed only through propagation
    pub fn root_failures(&self) -> impl Iterator<Item = &StageRun> {
        self.failed().filter(|run| {
            run.failure
                .as_ref()
                .is_some_and(|failure| failure.kind != FailureKind::DependencyFailed)
        })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}
