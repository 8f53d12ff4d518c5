#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use crate::poller::{CancelHandle, CancelSignal, RetryPolicy};
use crate::stage_manager::{FailureKind, RunOutcome, Scheduler, StageGraph, StageState, StageSystemError};
use crate::storage::{MemorySecretStore, SecretStore};

use super::common::{Journal, Script, ScriptedStage};

fn store() -> Arc<dyn SecretStore> {
    Arc::new(MemorySecretStore::new())
}

fn graph() -> StageGraph {
    StageGraph::with_default_policy(RetryPolicy::immediate(5))
}

#[tokio::test]
async fn test_dependent_starts_only_after_dependency_converged() {
    let journal = Journal::new();
    let mut graph = graph();
    graph
        .add_stage(ScriptedStage::new("a", &journal).ready_after(3).arc(), &[])
        .unwrap();
    graph.add_stage(ScriptedStage::new("b", &journal).arc(), &["a"]).unwrap();

    let report = Scheduler::new().run(&graph, store(), CancelSignal::never()).await.unwrap();

    assert!(report.success());
    assert!(journal.position("converged:a") < journal.position("start:b"));
    // three not-ready checks, then ready
    assert_eq!(report.run("a").unwrap().attempts, 4);
}

#[tokio::test]
async fn test_dependent_never_runs_when_dependency_never_converges() {
    let journal = Journal::new();
    let mut graph = graph();
    graph
        .add_stage_with_policy(
            ScriptedStage::new("a", &journal).script(Script::NeverConverge).arc(),
            &[],
            RetryPolicy::immediate(3),
        )
        .unwrap();
    graph.add_stage(ScriptedStage::new("b", &journal).arc(), &["a"]).unwrap();

    let report = Scheduler::new().run(&graph, store(), CancelSignal::never()).await.unwrap();

    let a = report.run("a").unwrap();
    assert_eq!(a.state, StageState::Failed);
    assert_eq!(a.failure.as_ref().unwrap().kind, FailureKind::DeadlineExceeded);
    assert!(a.failure.as_ref().unwrap().message.contains("stage 'a' convergence"));

    let b = report.run("b").unwrap();
    assert_eq!(b.failure.as_ref().unwrap().kind, FailureKind::DependencyFailed);
    assert!(b.started_at_ms.is_none());
    assert!(!journal.happened("start:b"));
}

#[tokio::test]
async fn test_failure_is_isolated_to_its_branch() {
    let journal = Journal::new();
    let mut graph = graph();
    graph
        .add_stage(ScriptedStage::new("a", &journal).script(Script::FailFatal).arc(), &[])
        .unwrap();
    graph.add_stage(ScriptedStage::new("b", &journal).arc(), &["a"]).unwrap();
    graph.add_stage(ScriptedStage::new("c", &journal).arc(), &["b"]).unwrap();
    graph.add_stage(ScriptedStage::new("x", &journal).arc(), &[]).unwrap();
    graph.add_stage(ScriptedStage::new("y", &journal).arc(), &["x"]).unwrap();

    let report = Scheduler::new().run(&graph, store(), CancelSignal::never()).await.unwrap();

    assert!(!report.success());
    let a = report.run("a").unwrap();
    assert_eq!(a.failure.as_ref().unwrap().kind, FailureKind::Fatal);
    assert_eq!(a.attempts, 0, "fatal action errors are not retried through the poller");
    for id in ["b", "c"] {
        let run = report.run(id).unwrap();
        assert_eq!(run.run_outcome(), Some(RunOutcome::Failed));
        assert_eq!(run.failure.as_ref().unwrap().kind, FailureKind::DependencyFailed);
        assert!(run.failure.as_ref().unwrap().message.contains("'a'"));
    }
    assert_eq!(report.run("x").unwrap().state, StageState::Converged);
    assert_eq!(report.run("y").unwrap().state, StageState::Converged);

    let roots: Vec<&str> = report.root_failures().map(|run| run.stage_id.as_str()).collect();
    assert_eq!(roots, vec!["a"]);
    assert_eq!(report.failed_count(), 3);
    assert_eq!(report.converged_count(), 2);
}

#[tokio::test]
async fn test_diamond_waits_for_both_branches() {
    let journal = Journal::new();
    let mut graph = graph();
    graph.add_stage(ScriptedStage::new("root", &journal).arc(), &[]).unwrap();
    graph
        .add_stage(ScriptedStage::new("left", &journal).ready_after(2).arc(), &["root"])
        .unwrap();
    graph.add_stage(ScriptedStage::new("right", &journal).arc(), &["root"]).unwrap();
    graph
        .add_stage(ScriptedStage::new("join", &journal).arc(), &["left", "right"])
        .unwrap();

    let report = Scheduler::with_concurrency(2)
        .unwrap()
        .run(&graph, store(), CancelSignal::never())
        .await
        .unwrap();

    assert!(report.success());
    let join = journal.position("start:join");
    assert!(journal.position("converged:left") < join);
    assert!(journal.position("converged:right") < join);
    assert_eq!(report.runs.len(), 4);
    assert_eq!(report.runs[3].stage_id, "join", "report keeps declaration order");
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_bounds_running_stages() {
    let journal = Journal::new();
    let mut graph = graph();
    for id in ["s1", "s2", "s3", "s4", "s5"] {
        graph
            .add_stage(
                ScriptedStage::new(id, &journal).working_for(Duration::from_secs(1)).arc(),
                &[],
            )
            .unwrap();
    }

    let report = Scheduler::with_concurrency(2)
        .unwrap()
        .run(&graph, store(), CancelSignal::never())
        .await
        .unwrap();

    assert!(report.success());
    assert_eq!(journal.peak(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_default_concurrency_is_root_count() {
    let journal = Journal::new();
    let mut graph = graph();
    for id in ["s1", "s2", "s3"] {
        graph
            .add_stage(
                ScriptedStage::new(id, &journal).working_for(Duration::from_secs(1)).arc(),
                &[],
            )
            .unwrap();
    }
    graph.add_stage(ScriptedStage::new("after", &journal).arc(), &["s1"]).unwrap();

    assert_eq!(Scheduler::new().concurrency_for(&graph), 3);
    let report = Scheduler::new().run(&graph, store(), CancelSignal::never()).await.unwrap();

    assert!(report.success());
    assert_eq!(journal.peak(), 3);
}

#[test]
fn test_zero_concurrency_rejected() {
    assert!(matches!(
        Scheduler::with_concurrency(0),
        Err(StageSystemError::InvalidConcurrency(0))
    ));
}

#[tokio::test]
async fn test_invalid_graph_fails_before_running() {
    let journal = Journal::new();
    let mut graph = graph();
    graph.add_stage(ScriptedStage::new("a", &journal).arc(), &["missing"]).unwrap();

    let err = Scheduler::new()
        .run(&graph, store(), CancelSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(err, StageSystemError::UnknownDependency { .. }));
    assert!(journal.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_polling_and_new_starts() {
    let journal = Journal::new();
    let slow = RetryPolicy::new(1_000, Duration::from_secs(1), 1.0, Duration::from_secs(1));
    let mut graph = graph();
    graph
        .add_stage_with_policy(
            ScriptedStage::new("hang", &journal).script(Script::NeverConverge).arc(),
            &[],
            slow,
        )
        .unwrap();
    graph.add_stage(ScriptedStage::new("later", &journal).arc(), &[]).unwrap();
    graph.add_stage(ScriptedStage::new("child", &journal).arc(), &["hang"]).unwrap();

    let handle = CancelHandle::new();
    let signal = handle.signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.cancel();
    });

    let report = Scheduler::with_concurrency(1)
        .unwrap()
        .run(&graph, store(), signal)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.success());

    let hang = report.run("hang").unwrap();
    assert_eq!(hang.failure.as_ref().unwrap().kind, FailureKind::Cancelled);
    assert!(hang.attempts < 1_000);

    let later = report.run("later").unwrap();
    assert_eq!(later.failure.as_ref().unwrap().kind, FailureKind::Cancelled);
    assert!(!journal.happened("start:later"));

    let child = report.run("child").unwrap();
    assert_eq!(child.state, StageState::Failed);
}

#[tokio::test]
async fn test_already_cancelled_run_starts_nothing() {
    let journal = Journal::new();
    let mut graph = graph();
    graph.add_stage(ScriptedStage::new("a", &journal).arc(), &[]).unwrap();

    let handle = CancelHandle::new();
    handle.cancel();
    let report = Scheduler::new().run(&graph, store(), handle.signal()).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.run("a").unwrap().failure.as_ref().unwrap().kind, FailureKind::Cancelled);
    assert!(journal.events().is_empty());
}

#[tokio::test]
async fn test_panicking_stage_is_recorded_as_fatal() {
    let journal = Journal::new();
    let mut graph = graph();
    graph
        .add_stage(ScriptedStage::new("boom", &journal).script(Script::Panic).arc(), &[])
        .unwrap();
    graph.add_stage(ScriptedStage::new("after", &journal).arc(), &["boom"]).unwrap();
    graph.add_stage(ScriptedStage::new("other", &journal).arc(), &[]).unwrap();

    let report = Scheduler::new().run(&graph, store(), CancelSignal::never()).await.unwrap();

    let boom = report.run("boom").unwrap();
    assert_eq!(boom.state, StageState::Failed);
    let failure = boom.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Fatal);
    assert!(failure.message.contains("panicked"), "{}", failure.message);
    assert_eq!(
        report.run("after").unwrap().failure.as_ref().unwrap().kind,
        FailureKind::DependencyFailed
    );
    assert_eq!(report.run("other").unwrap().state, StageState::Converged);
}

#[tokio::test]
async fn test_report_serializes_outcomes() {
    let journal = Journal::new();
    let mut graph = graph();
    graph.add_stage(ScriptedStage::new("a", &journal).arc(), &[]).unwrap();

    let report = Scheduler::new().run(&graph, store(), CancelSignal::never()).await.unwrap();
    let value = serde_json::to_value(&report).unwrap();

    assert_eq!(value["cancelled"], false);
    assert_eq!(value["runs"][0]["stage_id"], "a");
    assert_eq!(value["runs"][0]["state"], "converged");
    assert_eq!(value["runs"][0]["outcome"]["outcome"], "created");
}
