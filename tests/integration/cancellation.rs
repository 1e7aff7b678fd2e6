//! Cancellation tests.
//!
//! Cancellation is cooperative: it takes effect between batches, and a
//! cancelled run still reports what it finished.

use std::sync::Arc;
use std::time::Duration;

use reviewflow::capability::NoopSink;
use reviewflow::core::RunMetadata;
use reviewflow::run::OrchestrationProgress;
use reviewflow::{OrchestrationState, Orchestrator, RunId};

use crate::fixtures::{chain_items, fast_config, scripted_factory, Script};

/// Test: cancel after the first of three batches
/// Given a three step chain and a sink that cancels once batch 1 is done
/// When the run executes
/// Then only batch 1 results are reported and the state is Cancelled
#[tokio::test]
async fn test_cancel_after_first_batch() {
    let script = Arc::new(Script::new());
    let orchestrator = Orchestrator::new(&fast_config(1, 2, 4), scripted_factory(Arc::clone(&script))).unwrap();
    let run_id = RunId::from("cancel-mid");

    let controller = orchestrator.clone();
    let target = run_id.clone();
    let sink = move |p: &OrchestrationProgress| {
        if p.state == OrchestrationState::Executing && p.processed_tasks() == 1 {
            controller.cancel(&target);
        }
    };

    let report = orchestrator
        .run(
            run_id.clone(),
            &chain_items(&["a.py", "b.py", "c.py"]),
            &RunMetadata::default(),
            Arc::new(sink),
        )
        .await
        .unwrap();

    assert_eq!(report.state, OrchestrationState::Cancelled);
    assert_eq!(report.total_batches, 3);
    assert_eq!(report.batches_completed, 1);
    assert_eq!(report.task_results.len(), 1);
    assert_eq!(report.task_results[0].target_key, "a.py");
    assert_eq!(report.total_tasks_analyzed, 1);
    assert_eq!(script.calls(), 1);

    let stats = orchestrator.statistics();
    assert_eq!(stats.cancelled_runs, 1);
    assert_eq!(stats.successful_runs, 0);
}

/// Test: in-flight tasks finish before cancellation takes effect
/// Given a single batch of slow tasks
/// When cancelled while the batch runs
/// Then the batch results are kept and the run ends Cancelled
#[tokio::test]
async fn test_cancel_waits_for_running_batch() {
    let script = Arc::new(Script::new().with_delay(Duration::from_millis(150)));
    let orchestrator = Orchestrator::new(&fast_config(2, 2, 4), scripted_factory(Arc::clone(&script))).unwrap();
    let run_id = RunId::from("cancel-inflight");

    let handle = orchestrator
        .start(
            run_id.clone(),
            chain_items(&["a.py", "b.py"]),
            RunMetadata::default(),
            Arc::new(NoopSink),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orchestrator.cancel(&run_id));

    let report = handle.wait().await.unwrap();
    assert_eq!(report.state, OrchestrationState::Cancelled);
    assert_eq!(report.batches_completed, 1);
    assert!(report.task_results[0].is_success());
    assert!(!orchestrator.cancel(&run_id), "finished runs cannot be cancelled");
}

/// Test: cancelling through the handle before the run starts
#[tokio::test]
async fn test_cancel_before_start() {
    let orchestrator = Orchestrator::new(&fast_config(1, 1, 4), scripted_factory(Arc::new(Script::new()))).unwrap();
    let handle = orchestrator
        .start(
            RunId::from("cancel-early"),
            chain_items(&["a.py"]),
            RunMetadata::default(),
            Arc::new(NoopSink),
        )
        .unwrap();
    handle.cancel();

    let report = handle.wait().await.unwrap();
    assert_eq!(report.state, OrchestrationState::Cancelled);
    assert!(report.task_results.is_empty());
    assert_eq!(report.batches_completed, 0);
}

/// Test: shutdown cancels active runs
#[tokio::test]
async fn test_shutdown_cancels_runs() {
    let script = Arc::new(Script::new().with_delay(Duration::from_millis(100)));
    let orchestrator = Orchestrator::new(&fast_config(1, 1, 4), scripted_factory(script)).unwrap();
    let handle = orchestrator
        .start(
            RunId::from("shutdown"),
            chain_items(&["a.py", "b.py"]),
            RunMetadata::default(),
            Arc::new(NoopSink),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    orchestrator.shutdown();

    let report = handle.wait().await.unwrap();
    assert_eq!(report.state, OrchestrationState::Cancelled);
    assert!(orchestrator.resources().is_shut_down());
}
