//! Integration test suite for reviewflow.
//!
//! These tests drive the public API end to end with scripted workers:
//! planning over realistic change sets, the elastic pool, full runs and
//! cancellation.
//!
//! # Test Categories
//!
//! - `planning`: dependency ordering and batch packing
//! - `resource_pool`: pool bounds and best-fit assignment
//! - `orchestration_e2e`: complete runs, partial failure, timeouts
//! - `cancellation`: cooperative cancellation between batches
//!
//! Workers are in-process fakes, so the suite needs no network access.

mod fixtures;

mod cancellation;
mod orchestration_e2e;
mod planning;
mod resource_pool;
