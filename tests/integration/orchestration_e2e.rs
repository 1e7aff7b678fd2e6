//! End-to-end orchestration tests.
//!
//! These tests run complete reviews through the `Orchestrator`, from
//! change set to aggregated report.

use std::sync::Arc;
use std::time::Duration;

use reviewflow::analyzers::DiffHeuristicAnalyzer;
use reviewflow::capability::{AnalysisWorker, ChangeSetProvider, NoopSink, WorkerFactory};
use reviewflow::changeset::JsonChangeSet;
use reviewflow::core::{RunMetadata, WorkDescriptor};
use reviewflow::orchestration::FailureKind;
use reviewflow::{Error, OrchestrationState, Orchestrator, Result, RunId};

use crate::fixtures::{
    chain_items, fast_config, independent_items, scripted_factory, Behaviour, OfflineProvider, RecordingSink, Script,
};

/// Test: partial failure tolerance
/// Given 10 independent tasks where the fifth raises
/// When the run executes
/// Then 9 are analyzed, 1 failed, and the run still completes
#[tokio::test]
async fn test_partial_failure_completes() {
    let script = Arc::new(Script::new().on("f4.py", Behaviour::Fail));
    let orchestrator = Orchestrator::new(&fast_config(2, 4, 4), scripted_factory(Arc::clone(&script))).unwrap();
    let sink = RecordingSink::new();

    let report = orchestrator
        .run(RunId::from("partial"), &independent_items(10), &RunMetadata::default(), sink.clone())
        .await
        .unwrap();

    assert_eq!(report.state, OrchestrationState::Completed);
    assert_eq!(report.total_tasks, 10);
    assert_eq!(report.total_tasks_analyzed, 9);
    assert_eq!(report.total_tasks_failed, 1);
    assert_eq!(report.batches_completed, report.total_batches);
    assert_eq!(report.summary.worker_errors, 1);
    assert_eq!(report.summary.total_issues_found, 9);

    let failed: Vec<_> = report.failures().map(|r| r.target_key.as_str()).collect();
    assert_eq!(failed, vec!["f4.py"]);
    assert_eq!(script.calls(), 10);

    let last = sink.updates().last().cloned().unwrap();
    assert_eq!(last.completed_tasks, 9);
    assert_eq!(last.failed_tasks, 1);
}

/// Test: a failed worker does not starve later batches
/// Given one worker that may grow to four, one task per batch, and a
/// first task that raises
/// When the run executes
/// Then a fresh worker takes the remaining tasks and only the first fails
#[tokio::test]
async fn test_errored_worker_is_replaced_for_later_batches() {
    let script = Arc::new(Script::new().on("f0.py", Behaviour::Fail));
    let orchestrator = Orchestrator::new(&fast_config(1, 4, 1), scripted_factory(Arc::clone(&script))).unwrap();

    let report = orchestrator
        .run(RunId::from("replace-errored"), &independent_items(3), &RunMetadata::default(), Arc::new(NoopSink))
        .await
        .unwrap();

    assert_eq!(report.state, OrchestrationState::Completed);
    assert_eq!(report.total_batches, 3);
    assert_eq!(report.total_tasks_analyzed, 2);
    assert_eq!(report.total_tasks_failed, 1);
    assert_eq!(report.summary.timeouts, 0);
    let f0 = report.result_for("f0.py").unwrap();
    assert_eq!(f0.outcome.failure_kind(), Some(FailureKind::WorkerError));
    assert!(report.result_for("f1.py").unwrap().is_success());
    assert!(report.result_for("f2.py").unwrap().is_success());
    assert_eq!(script.calls(), 3);
    assert!(report.result_for("f1.py").unwrap().worker_id != f0.worker_id);
}

/// Test: a task that never got a worker is not started after its batch
/// Given a single fixed worker, a critical slow task and a second task
/// queued behind it, and a third task depending on the second
/// When the slow task holds the worker past the queued task's deadline
/// Then the queued task times out without running and the next batch
/// starts only once the worker is free
#[tokio::test]
async fn test_queued_task_expires_before_next_batch() {
    let mut config = fast_config(1, 1, 2);
    config.pool.auto_scale = false;
    config.orchestrator.safety_margin = Duration::from_millis(100);
    let script = Arc::new(Script::new().on("main.py", Behaviour::Sleep(Duration::from_secs(2))));
    let orchestrator = Orchestrator::new(&config, scripted_factory(Arc::clone(&script))).unwrap();

    let items = vec![
        WorkDescriptor::new("main.py"),
        WorkDescriptor::new("f1.py"),
        WorkDescriptor::new("g.py").with_dependency("f1.py"),
    ];
    let report = orchestrator
        .run(RunId::from("expiry"), &items, &RunMetadata::default(), Arc::new(NoopSink))
        .await
        .unwrap();

    assert_eq!(report.total_batches, 2);
    let main = report.result_for("main.py").unwrap();
    let queued = report.result_for("f1.py").unwrap();
    let next = report.result_for("g.py").unwrap();
    assert_eq!(main.batch_index, 0);
    assert_eq!(queued.batch_index, 0);
    assert_eq!(next.batch_index, 1);

    assert_eq!(main.outcome.failure_kind(), Some(FailureKind::Timeout));
    assert_eq!(queued.outcome.failure_kind(), Some(FailureKind::Timeout));
    assert!(queued.worker_id.is_none(), "the queued task never reached a worker");
    assert!(next.is_success());
    assert_eq!(script.calls(), 2);
    assert_eq!(report.summary.timeouts, 2);
}

/// Test: a provider that cannot list its items fails the run
/// Given a provider whose listing raises
/// When a run is started from it
/// Then the run moves from Planning to Error and the error is returned
#[tokio::test]
async fn test_provider_failure_is_a_planning_error() {
    let orchestrator = Orchestrator::new(&fast_config(1, 2, 4), scripted_factory(Arc::new(Script::new()))).unwrap();
    let sink = RecordingSink::new();

    let result = orchestrator
        .start_from_provider(RunId::from("offline"), Arc::new(OfflineProvider), sink.clone())
        .unwrap()
        .wait()
        .await;

    assert!(matches!(result, Err(Error::Provider(_))));
    assert_eq!(
        sink.states(),
        vec![
            OrchestrationState::Initializing,
            OrchestrationState::Planning,
            OrchestrationState::Error,
        ]
    );
    let last = sink.updates().last().cloned().unwrap();
    assert!(last.current_operation.starts_with("planning failed"));

    let stats = orchestrator.statistics();
    assert_eq!(stats.failed_runs, 1);
    assert_eq!(stats.active_runs, 0);
    assert_eq!(stats.success_rate, 0.0);
}

/// Test: progress passes through every phase in order
#[tokio::test]
async fn test_progress_states_in_order() {
    let orchestrator = Orchestrator::new(&fast_config(1, 2, 4), scripted_factory(Arc::new(Script::new()))).unwrap();
    let sink = RecordingSink::new();

    orchestrator
        .run(RunId::from("phases"), &chain_items(&["a.py", "b.py"]), &RunMetadata::default(), sink.clone())
        .await
        .unwrap();

    assert_eq!(
        sink.states(),
        vec![
            OrchestrationState::Initializing,
            OrchestrationState::Planning,
            OrchestrationState::Executing,
            OrchestrationState::Aggregating,
            OrchestrationState::Completed,
        ]
    );
    let batch_indexes: Vec<usize> = sink.updates().iter().map(|p| p.current_batch_index).collect();
    assert!(batch_indexes.contains(&1));
}

/// Test: a task exceeding its deadline is reported as a timeout
/// Given an estimate of 50ms, a 100ms margin and a 2s worker
/// When the run executes
/// Then the slow task times out and the others succeed
#[tokio::test]
async fn test_slow_task_times_out() {
    let mut config = fast_config(2, 2, 4);
    config.orchestrator.safety_margin = Duration::from_millis(100);
    let script = Script::new().on("slow.py", Behaviour::Sleep(Duration::from_secs(2)));
    let orchestrator = Orchestrator::new(&config, scripted_factory(Arc::new(script))).unwrap();

    let items = vec![WorkDescriptor::new("f0.py"), WorkDescriptor::new("slow.py")];

    let report = orchestrator
        .run(RunId::from("timeouts"), &items, &RunMetadata::default(), Arc::new(NoopSink))
        .await
        .unwrap();

    assert_eq!(report.state, OrchestrationState::Completed);
    assert_eq!(report.summary.timeouts, 1);
    let slow = report.result_for("slow.py").unwrap();
    assert_eq!(slow.outcome.failure_kind(), Some(FailureKind::Timeout));
    assert!(report.result_for("f0.py").unwrap().is_success());
}

/// Test: background start, statistics and duplicate ids
#[tokio::test]
async fn test_background_run_and_statistics() {
    let script = Script::new().with_delay(Duration::from_millis(50));
    let orchestrator = Orchestrator::new(&fast_config(2, 4, 4), scripted_factory(Arc::new(script))).unwrap();
    let id = RunId::from("background");

    let handle = orchestrator
        .start(id.clone(), independent_items(3), RunMetadata::default(), Arc::new(NoopSink))
        .unwrap();
    assert_eq!(orchestrator.active_runs(), vec![id.clone()]);
    assert!(orchestrator.progress(&id).is_some());

    let duplicate = orchestrator.start(id.clone(), independent_items(1), RunMetadata::default(), Arc::new(NoopSink));
    assert!(matches!(duplicate, Err(Error::RunExists(_))));

    let report = handle.wait().await.unwrap();
    assert_eq!(report.total_tasks_analyzed, 3);
    assert!(orchestrator.active_runs().is_empty());

    let stats = orchestrator.statistics();
    assert_eq!(stats.successful_runs, 1);
    assert_eq!(stats.active_runs, 0);
    assert!((stats.success_rate - 1.0).abs() < 1e-9);
    assert_eq!(stats.resources.tasks_completed, 3);
}

/// Test: full pipeline over a JSON change set with the heuristic analyzer
/// Given a change set where b.py imports a.py
/// When started from the provider
/// Then the files run in dependency order and findings are counted
#[tokio::test]
async fn test_change_set_with_heuristic_analyzer() {
    let json = r#"{
        "title": "Add greeting",
        "changes": [
            {"new_path": "pkg/b.py", "diff": "@@ -0,0 +1,2 @@\n+from pkg.a import greet\n+print(greet())\n"},
            {"new_path": "pkg/a.py", "diff": "@@ -0,0 +1,2 @@\n+# TODO localize\n+def greet(): return 'hi'\n"},
            {"new_path": "README.md", "diff": "+Docs only\n"}
        ]
    }"#;
    let provider = Arc::new(JsonChangeSet::from_json(json).unwrap());
    let shared: Arc<dyn ChangeSetProvider> = provider.clone();
    let factory: Arc<dyn WorkerFactory> = Arc::new(move || -> Result<Arc<dyn AnalysisWorker>> {
        Ok(Arc::new(DiffHeuristicAnalyzer::with_provider(Arc::clone(&shared))))
    });
    let orchestrator = Orchestrator::new(&fast_config(1, 2, 4), factory).unwrap();

    let report = orchestrator
        .start_from_provider(RunId::from("heuristic"), provider, Arc::new(NoopSink))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.state, OrchestrationState::Completed);
    assert_eq!(report.total_tasks_analyzed, 3);
    assert_eq!(report.total_batches, 2);
    let a = report.result_for("pkg/a.py").unwrap();
    let b = report.result_for("pkg/b.py").unwrap();
    assert!(a.batch_index < b.batch_index);
    assert_eq!(a.outcome.result().unwrap().issues_found, 1);
    assert_eq!(b.outcome.result().unwrap().issues_found, 1);
    assert_eq!(report.summary.total_issues_found, 2);
}
