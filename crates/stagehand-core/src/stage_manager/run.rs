//! Per-stage execution records and the table the scheduler keeps them in.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::credentials::CredentialError;
use crate::kernel::error::Error;
use crate::poller::PollError;
use crate::seeder::SeedError;
use crate::stage_manager::StageOutcome;

/// `Pending -> Running -> {Converged, Failed}`; unstarted stages may also
/// go straight from `Pending` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Converged,
    Failed,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageState::Converged | StageState::Failed)
    }
}

/// Why a stage failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Needs operator intervention
    Fatal,
    /// Retry budget exhausted while the target was not ready
    DeadlineExceeded,
    /// A dependency failed, so the stage never started
    DependencyFailed,
    /// Cancelled before or while running
    Cancelled,
}

impl FailureKind {
    /// Classify a stage error without looking at its message
    pub fn of(err: &Error) -> Self {
        let poll = match err {
            Error::Poll(poll) => Some(poll),
            Error::Seed(SeedError::Push(poll)) => Some(poll),
            Error::Credential(CredentialError::Registration(poll)) => Some(poll),
            _ => None,
        };
        match poll {
            Some(PollError::DeadlineExceeded { .. }) => FailureKind::DeadlineExceeded,
            Some(PollError::Cancelled { .. }) => FailureKind::Cancelled,
            Some(PollError::Fatal { .. }) | None => FailureKind::Fatal,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Fatal => "fatal",
            FailureKind::DeadlineExceeded => "deadline exceeded",
            FailureKind::DependencyFailed => "dependency failed",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    /// Last raw error message
    pub message: String,
}

impl StageFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self::new(FailureKind::of(err), err.to_string())
    }
}

/// Outcome of a StageRun as rendered in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Converged,
    /// Converged; the target was already satisfied
    Skipped,
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Converged => write!(f, "Converged"),
            RunOutcome::Skipped => write!(f, "Skipped"),
            RunOutcome::Failed => write!(f, "Failed"),
        }
    }
}

/// Execution record of one stage in one orchestrator invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRun {
    pub stage_id: String,
    pub state: StageState,
    pub outcome: Option<StageOutcome>,
    /// Attempts made by the stage's poller (action and convergence checks)
    pub attempts: u32,
    /// Unix epoch milliseconds
    pub started_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub failure: Option<StageFailure>,
}

impl StageRun {
    fn pending(stage_id: &str) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            state: StageState::Pending,
            outcome: None,
            attempts: 0,
            started_at_ms: None,
            finished_at_ms: None,
            duration_ms: None,
            failure: None,
        }
    }

    /// `None` while the run is not terminal
    pub fn run_outcome(&self) -> Option<RunOutcome> {
        match self.state {
            StageState::Pending | StageState::Running => None,
            StageState::Failed => Some(RunOutcome::Failed),
            StageState::Converged => Some(match &self.outcome {
                Some(outcome) if outcome.is_skip() => RunOutcome::Skipped,
                _ => RunOutcome::Converged,
            }),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The scheduler's StageRun table. Transitions are short critical sections
/// with no I/O under the lock.
#[derive(Debug)]
pub(crate) struct RunTable {
    index: HashMap<String, usize>,
    runs: Mutex<Vec<StageRun>>,
}

impl RunTable {
    pub(crate) fn new<'a>(stage_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let runs: Vec<StageRun> = stage_ids.into_iter().map(StageRun::pending).collect();
        let index = runs
            .iter()
            .enumerate()
            .map(|(i, run)| (run.stage_id.clone(), i))
            .collect();
        Self {
            index,
            runs: Mutex::new(runs),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StageRun>> {
        // A panicking stage task never holds this lock
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `update` to the stage's record if it is in `from`
    fn transition(&self, stage_id: &str, from: StageState, update: impl FnOnce(&mut StageRun)) -> bool {
        let Some(&i) = self.index.get(stage_id) else {
            return false;
        };
        let mut runs = self.lock();
        let run = &mut runs[i];
        if run.state != from {
            log::debug!(
                "Ignoring transition of stage '{}' from {:?}: stage is {:?}",
                stage_id,
                from,
                run.state
            );
            return false;
        }
        update(run);
        true
    }

    pub(crate) fn state(&self, stage_id: &str) -> Option<StageState> {
        let i = *self.index.get(stage_id)?;
        Some(self.lock()[i].state)
    }

    pub(crate) fn mark_running(&self, stage_id: &str) -> bool {
        self.transition(stage_id, StageState::Pending, |run| {
            run.state = StageState::Running;
            run.started_at_ms = Some(now_ms());
        })
    }

    pub(crate) fn mark_converged(&self, stage_id: &str, outcome: StageOutcome, attempts: u32, elapsed: Duration) -> bool {
        self.transition(stage_id, StageState::Running, |run| {
            run.state = StageState::Converged;
            run.outcome = Some(outcome);
            run.attempts = attempts;
            run.finished_at_ms = Some(now_ms());
            run.duration_ms = Some(elapsed.as_millis() as u64);
        })
    }

    pub(crate) fn mark_failed(&self, stage_id: &str, failure: StageFailure, attempts: u32, elapsed: Duration) -> bool {
        self.transition(stage_id, StageState::Running, |run| {
            run.state = StageState::Failed;
            run.failure = Some(failure);
            run.attempts = attempts;
            run.finished_at_ms = Some(now_ms());
            run.duration_ms = Some(elapsed.as_millis() as u64);
        })
    }

    /// Fail a stage that never started
    pub(crate) fn fail_pending(&self, stage_id: &str, failure: StageFailure) -> bool {
        self.transition(stage_id, StageState::Pending, |run| {
            run.state = StageState::Failed;
            run.failure = Some(failure);
        })
    }

    pub(crate) fn pending(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|run| run.state == StageState::Pending)
            .map(|run| run.stage_id.clone())
            .collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<StageRun> {
        self.lock().clone()
    }
}
