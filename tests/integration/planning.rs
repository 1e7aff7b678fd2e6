//! Planning tests.
//!
//! These tests verify dependency ordering, batch packing and replanning
//! over change sets with real diffs.

use std::collections::HashMap;

use reviewflow::core::{ExecutionPlan, RunMetadata, WorkDescriptor};
use reviewflow::{RunId, TaskScheduler};

use crate::fixtures::{chain_items, fast_config, independent_items};

fn scheduler(max_parallel: usize) -> TaskScheduler {
    TaskScheduler::new(fast_config(1, 4, max_parallel).scheduler).unwrap()
}

fn plan(scheduler: &TaskScheduler, items: &[WorkDescriptor]) -> ExecutionPlan {
    scheduler
        .create_plan(&RunId::from("plan-test"), items, &RunMetadata::default())
        .unwrap()
}

fn batch_of(plan: &ExecutionPlan) -> HashMap<String, usize> {
    plan.batches
        .iter()
        .enumerate()
        .flat_map(|(i, b)| b.tasks.iter().map(move |t| (t.target_key.clone(), i)))
        .collect()
}

/// Test: explicit dependency splits two files into two batches
/// Given b.py depends on a.py and room for 4 tasks per batch
/// When planned
/// Then a.py runs in batch 0 and b.py in batch 1
#[test]
fn test_declared_dependency_orders_batches() {
    let items = chain_items(&["a.py", "b.py"]);
    let plan = plan(&scheduler(4), &items);

    assert_eq!(plan.total_batches(), 2);
    assert_eq!(plan.batches[0].target_keys(), vec!["a.py"]);
    assert_eq!(plan.batches[1].target_keys(), vec!["b.py"]);
}

/// Test: imports found in diffs become dependencies
/// Given a module importing two changed packages
/// When planned
/// Then the importer is scheduled after both
#[test]
fn test_imports_in_diff_create_dependencies() {
    let items = vec![
        WorkDescriptor::new("app/handlers.py")
            .with_diff("@@ -1,2 +1,3 @@\n+from app.models import User\n+import app.db\n x = 1\n"),
        WorkDescriptor::new("app/models.py").with_diff("+class User: pass\n"),
        WorkDescriptor::new("app/db.py").with_diff("+conn = None\n"),
        WorkDescriptor::new("web/index.ts").with_diff("+import { h } from './util'\n"),
        WorkDescriptor::new("web/util.ts").with_diff("+export const h = 1\n"),
    ];
    let plan = plan(&scheduler(4), &items);
    let batches = batch_of(&plan);

    assert!(batches["app/models.py"] < batches["app/handlers.py"]);
    assert!(batches["app/db.py"] < batches["app/handlers.py"]);
    assert!(batches["web/util.ts"] < batches["web/index.ts"]);
    assert!(plan.diagnostics.is_empty());
}

/// Test: Python relative imports become dependencies
/// Given a package module importing a sibling with `from .utils import`
/// When planned
/// Then the sibling is scheduled first
#[test]
fn test_relative_python_import_orders_batches() {
    let items = vec![
        WorkDescriptor::new("pkg/views.py").with_diff("+from .utils import slugify\n+print(slugify('x'))\n"),
        WorkDescriptor::new("pkg/utils.py").with_diff("+def slugify(s): return s\n"),
    ];
    let plan = plan(&scheduler(4), &items);
    let batches = batch_of(&plan);

    assert_eq!(plan.total_batches(), 2);
    assert!(batches["pkg/utils.py"] < batches["pkg/views.py"]);
}

/// Test: dependency safety across a longer chain
/// Given a five step chain and a wide batch limit
/// When planned
/// Then every dependency sits in an earlier batch
#[test]
fn test_dependency_safety() {
    let items = chain_items(&["s0.py", "s1.py", "s2.py", "s3.py", "s4.py"]);
    let plan = plan(&scheduler(8), &items);
    let batches = batch_of(&plan);

    for task in plan.tasks() {
        for dep in &task.dependencies {
            let dep_batch = plan.batch_index_of(dep).unwrap();
            assert!(dep_batch < batches[&task.target_key], "{} must follow its dependency", task.target_key);
        }
    }
    assert_eq!(plan.total_batches(), 5);
}

/// Test: batch capacity
/// Given 10 independent files and a limit of 3
/// When planned
/// Then no batch exceeds 3 tasks and nothing is lost
#[test]
fn test_batch_capacity() {
    let plan = plan(&scheduler(3), &independent_items(10));

    assert_eq!(plan.total_tasks(), 10);
    assert_eq!(plan.total_batches(), 4);
    for batch in &plan.batches {
        assert!(batch.len() <= 3);
        for task in &batch.tasks {
            for other in &batch.tasks {
                assert!(!task.depends_on(&other.id));
            }
        }
    }
}

/// Test: cyclic references do not deadlock planning
/// Given two files importing each other
/// When planned
/// Then both are scheduled and a diagnostic is recorded
#[test]
fn test_cycle_is_forced_with_diagnostic() {
    let items = vec![
        WorkDescriptor::new("x.py").with_diff("+import y\n"),
        WorkDescriptor::new("y.py").with_diff("+import x\n"),
    ];
    let plan = plan(&scheduler(4), &items);

    assert_eq!(plan.total_tasks(), 2);
    assert!(!plan.diagnostics.is_empty());
}

/// Test: idempotent replanning
/// Given the same input and run id twice
/// When planned
/// Then task ids are identical
#[test]
fn test_replanning_is_idempotent() {
    let scheduler = scheduler(2);
    let items = chain_items(&["a.py", "b.py", "c.py"]);
    let first: Vec<_> = plan(&scheduler, &items).tasks().map(|t| t.id.clone()).collect();
    let second: Vec<_> = plan(&scheduler, &items).tasks().map(|t| t.id.clone()).collect();
    assert_eq!(first, second);

    let other_run = scheduler
        .create_plan(&RunId::from("another"), &items, &RunMetadata::default())
        .unwrap();
    assert_ne!(first[0], other_run.tasks().next().unwrap().id);
}
