//! Worker pool tests.
//!
//! These tests verify that the pool stays within its bounds under load
//! and that assignment favours the most reliable idle worker.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use reviewflow::core::{Task, TaskId, TaskPayload};
use reviewflow::orchestration::{Assignment, FailureKind, PoolEvent, ResourceManager, WorkerStatus};

use crate::fixtures::{fast_config, scripted_factory, Behaviour, Script};

fn task(key: &str) -> Task {
    let mut task = Task::new(TaskId::derive("pool-test", key), key, TaskPayload::default());
    task.estimated_duration = Duration::from_millis(50);
    task
}

fn manager(min: usize, max: usize, script: Script) -> (ResourceManager, Arc<Script>) {
    let script = Arc::new(script);
    let config = fast_config(min, max, 4).pool;
    let manager = ResourceManager::new(config, scripted_factory(Arc::clone(&script))).unwrap();
    (manager, script)
}

/// Test: pool bounds under load
/// Given a pool of 1..=3 workers and 12 tasks submitted at once
/// When every task settles and idle workers are reclaimed
/// Then the pool never exceeds 3 workers and shrinks back to 1
#[tokio::test]
async fn test_pool_bounds_under_load() {
    let (manager, script) = manager(1, 3, Script::new().with_delay(Duration::from_millis(20)));
    let mut events = manager.subscribe();

    let handles: Vec<_> = (0..12)
        .map(|i| manager.assign_task(task(&format!("load{}.py", i))).into_handle())
        .collect();
    assert!(manager.pool_size() <= 3);
    assert!(manager.queue_depth() > 0);

    let executions = join_all(handles.into_iter().map(|h| h.wait(Duration::from_secs(5)))).await;
    assert!(executions.iter().all(|e| e.outcome.is_success()));
    assert_eq!(script.calls(), 12);
    assert_eq!(manager.pool_size(), 3);

    let mut created = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PoolEvent::WorkerCreated { .. }) {
            created += 1;
        }
    }
    assert_eq!(created, 2, "only two workers beyond the initial one");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let reclaimed = manager.reclaim_idle();
    assert_eq!(reclaimed.len(), 2);
    assert_eq!(manager.pool_size(), 1);
    assert_eq!(manager.metrics().tasks_completed, 12);
}

/// Test: best-fit assignment
/// Given two idle workers, one with a failure on record
/// When a task is assigned
/// Then it goes to the worker without failures
#[tokio::test]
async fn test_best_fit_prefers_reliable_worker() {
    let (manager, _) = manager(2, 2, Script::new().on("bad.py", Behaviour::Fail));

    let Assignment::Dispatched { worker_id: flaky, handle } = manager.assign_task(task("bad.py")) else {
        panic!("an idle worker was available");
    };
    let execution = handle.wait(Duration::from_secs(5)).await;
    assert_eq!(execution.outcome.failure_kind(), Some(FailureKind::WorkerError));
    assert_eq!(manager.worker(&flaky).unwrap().status, WorkerStatus::Error);

    manager.reset_worker(&flaky).unwrap();
    let flaky_info = manager.worker(&flaky).unwrap();
    assert_eq!(flaky_info.status, WorkerStatus::Idle);
    assert!(flaky_info.performance_score < 1.0);

    for key in ["good1.py", "good2.py"] {
        let Assignment::Dispatched { worker_id, handle } = manager.assign_task(task(key)) else {
            panic!("an idle worker was available");
        };
        assert_ne!(worker_id, flaky, "{} should go to the reliable worker", key);
        assert!(handle.wait(Duration::from_secs(5)).await.outcome.is_success());
    }
}

/// Test: a worker that errors is skipped until reset
/// Given a pool capped at one worker that has failed
/// When another task arrives
/// Then the task waits in the queue and runs after the reset
#[tokio::test]
async fn test_errored_worker_blocks_until_reset() {
    let (manager, _) = manager(1, 1, Script::new().on("bad.py", Behaviour::Fail));

    let first = manager.assign_task(task("bad.py")).into_handle();
    let worker_id = first.wait(Duration::from_secs(5)).await.worker_id.unwrap();

    let queued = manager.assign_task(task("next.py"));
    assert!(queued.is_queued());
    assert_eq!(manager.metrics().error_workers, 1);

    manager.reset_worker(&worker_id).unwrap();
    let execution = queued.into_handle().wait(Duration::from_secs(5)).await;
    assert!(execution.outcome.is_success());
    assert_eq!(execution.worker_id, Some(worker_id));
}

/// Test: shutdown abandons waiting tasks
/// Given a saturated single-worker pool with a queued task
/// When the pool shuts down
/// Then the queued task resolves as abandoned and new tasks are rejected
#[tokio::test]
async fn test_shutdown_abandons_and_rejects() {
    let (manager, _) = manager(
        1,
        1,
        Script::new().on("slow.py", Behaviour::Sleep(Duration::from_millis(200))),
    );
    let _running = manager.assign_task(task("slow.py"));
    let queued = manager.assign_task(task("waiting.py"));
    assert!(queued.is_queued());

    manager.shutdown();
    let execution = queued.into_handle().wait(Duration::from_secs(1)).await;
    assert_eq!(execution.outcome.failure_kind(), Some(FailureKind::Abandoned));
    assert!(matches!(manager.assign_task(task("late.py")), Assignment::Rejected { .. }));
}
