//! # Stagehand Scheduler
//!
//! Runs a [`StageGraph`] with a bounded worker pool. One task per stage; a
//! stage starts only when every dependency is `Converged`. A failed stage
//! fails all of its unstarted transitive dependents at once, while stages
//! on independent branches keep running. After cancellation no new stage
//! starts and in-flight stages stop at their next poll boundary.
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::kernel::error::Error;
use crate::poller::{CancelSignal, Poller};
use crate::stage_manager::error::StageSystemError;
use crate::stage_manager::graph::StageGraph;
use crate::stage_manager::report::Report;
use crate::stage_manager::run::{FailureKind, RunTable, StageFailure, StageState};
use crate::stage_manager::{Stage, StageContext, StageOutcome};
use crate::storage::SecretStore;

/// What a finished stage task hands back
struct TaskResult {
    stage_id: String,
    result: Result<StageOutcome, StageFailure>,
    attempts: u32,
    elapsed: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler {
    concurrency: Option<usize>,
}

impl Scheduler {
    /// Scheduler sized by the graph: one worker per root stage
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(concurrency: usize) -> Result<Self, StageSystemError> {
        if concurrency == 0 {
            return Err(StageSystemError::InvalidConcurrency(concurrency));
        }
        Ok(Self {
            concurrency: Some(concurrency),
        })
    }

    pub fn concurrency_for(&self, graph: &StageGraph) -> usize {
        self.concurrency.unwrap_or_else(|| graph.default_concurrency())
    }

    /// Run every stage of `graph` and report one StageRun per stage.
    ///
    /// Only graph errors are returned as `Err`; stage failures are part of
    /// the report.
    pub async fn run(
        &self,
        graph: &StageGraph,
        secrets: Arc<dyn SecretStore>,
        cancel: CancelSignal,
    ) -> Result<Report, StageSystemError> {
        graph.validate()?;
        let limit = self.concurrency_for(graph);
        let started = Instant::now();
        let table = RunTable::new(graph.stage_ids());
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();

        log::info!("Running {} stage(s) with {} worker(s)", graph.len(), limit);

        loop {
            if !cancel.is_cancelled() {
                for stage_id in table.pending() {
                    if tasks.len() >= limit {
                        break;
                    }
                    let Some(node) = graph.node(&stage_id) else {
                        continue;
                    };
                    let ready = node
                        .depends_on
                        .iter()
                        .all(|dep| table.state(dep) == Some(StageState::Converged));
                    if !ready || !table.mark_running(&stage_id) {
                        continue;
                    }

                    let poller = Poller::new(node.policy, cancel.clone());
                    let context = StageContext::new(&stage_id, poller, secrets.clone());
                    tasks.spawn(supervise(stage_id, node.stage.clone(), context));
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let finished = joined
                .map_err(|e| StageSystemError::InternalError(format!("stage supervisor failed: {}", e)))?;

            match finished.result {
                Ok(outcome) => {
                    log::info!("Stage '{}' converged ({})", finished.stage_id, outcome);
                    table.mark_converged(&finished.stage_id, outcome, finished.attempts, finished.elapsed);
                }
                Err(failure) => {
                    log::error!(
                        "Stage '{}' failed ({}): {}",
                        finished.stage_id,
                        failure.kind,
                        failure.message
                    );
                    table.mark_failed(&finished.stage_id, failure, finished.attempts, finished.elapsed);
                    for dependent in graph.transitive_dependents(&finished.stage_id) {
                        if table.fail_pending(
                            &dependent,
                            StageFailure::new(
                                FailureKind::DependencyFailed,
                                format!("dependency '{}' failed", finished.stage_id),
                            ),
                        ) {
                            log::warn!("Stage '{}' will not run: '{}' failed", dependent, finished.stage_id);
                        }
                    }
                }
            }
        }

        // Only cancellation leaves stages pending once the pool drains
        let cancelled = cancel.is_cancelled();
        for stage_id in table.pending() {
            let failure = if cancelled {
                StageFailure::new(FailureKind::Cancelled, "run cancelled before the stage started")
            } else {
                StageFailure::new(FailureKind::DependencyFailed, "dependencies did not converge")
            };
            table.fail_pending(&stage_id, failure);
        }

        let report = Report::new(table.snapshot(), cancelled, started.elapsed());
        log::info!(
            "Run finished: {} converged, {} failed{}",
            report.converged_count(),
            report.failed_count(),
            if cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }
}

/// Run a stage in its own task so a panic is recorded as a stage failure
async fn supervise(stage_id: String, stage: Arc<dyn Stage>, context: StageContext) -> TaskResult {
    let started = Instant::now();
    match tokio::spawn(run_stage(stage, context)).await {
        Ok(finished) => finished,
        Err(join_error) => {
            log::error!("Stage '{}' task aborted: {}", stage_id, join_error);
            TaskResult {
                stage_id,
                result: Err(StageFailure::new(
                    FailureKind::Fatal,
                    format!("stage task aborted: {}", join_error),
                )),
                attempts: 0,
                elapsed: started.elapsed(),
            }
        }
    }
}

/// Execute a stage's action, then poll its convergence predicate
async fn run_stage(stage: Arc<dyn Stage>, context: StageContext) -> TaskResult {
    let started = Instant::now();
    let stage_id = context.stage_id().to_string();
    log::info!("Stage '{}' started", stage_id);

    let result = converge(stage.as_ref(), &context).await.map_err(|err| StageFailure::from_error(&err));
    TaskResult {
        stage_id,
        result,
        attempts: context.poller().attempts(),
        elapsed: started.elapsed(),
    }
}

async fn converge(stage: &dyn Stage, context: &StageContext) -> Result<StageOutcome, Error> {
    let outcome = stage.execute(context).await?;
    log::debug!("Stage '{}' action done ({}), checking convergence", stage.id(), outcome);
    context
        .poller()
        .await_ready(&format!("stage '{}' convergence", stage.id()), move || stage.is_converged(context))
        .await?;
    Ok(outcome)
}
