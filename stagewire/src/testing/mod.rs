//! Testing utilities for stagewire pipelines.
//!
//! This module provides:
//! - Mock handlers that record calls, fail, sleep or measure concurrency
//! - Assertions over run results

mod assertions;
mod mocks;

pub use assertions::{assert_run_failed_at, assert_run_ok, assert_run_suppressed, assert_run_timed_out};
pub use mocks::{ConcurrencyProbe, FailingStage, RecordingStage, SlowStage};
