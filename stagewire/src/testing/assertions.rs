//! Test assertions for run results.

use crate::errors::FlowError;
use std::fmt::Debug;

/// Asserts that a run succeeded with the expected value.
pub fn assert_run_ok<O: Debug + PartialEq>(result: &Result<O, FlowError>, expected: &O) {
    match result {
        Ok(actual) => assert_eq!(actual, expected, "Run produced an unexpected value"),
        Err(e) => panic!("Expected success with {expected:?}, got error: {e}"),
    }
}

/// Asserts that a run failed in the named stage.
pub fn assert_run_failed_at<O: Debug>(result: &Result<O, FlowError>, stage: &str) {
    match result {
        Err(FlowError::StageFailed { stage: actual, .. } | FlowError::Panicked { stage: actual, .. }) => {
            assert_eq!(actual, stage, "Run failed in an unexpected stage");
        }
        other => panic!("Expected failure in stage '{stage}', got {other:?}"),
    }
}

/// Asserts that a run was suppressed by the admission gate.
pub fn assert_run_suppressed<O: Debug>(result: &Result<O, FlowError>) {
    assert!(
        matches!(result, Err(FlowError::Suppressed { .. })),
        "Expected suppressed run, got {result:?}"
    );
}

/// Asserts that a run hit its deadline.
pub fn assert_run_timed_out<O: Debug>(result: &Result<O, FlowError>) {
    assert!(
        matches!(result, Err(FlowError::DeadlineExceeded { .. })),
        "Expected deadline to be exceeded, got {result:?}"
    );
}
