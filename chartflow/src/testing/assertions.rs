//! Test assertions for run outcomes.

use crate::core::{Step, StepStatus};
use crate::events::ProgressEvent;
use crate::pipeline::{PipelineFailure, PipelineReport, RunOutcome};
use crate::results::IntermediateResultBag;

/// Asserts that the run completed and returns its report.
pub fn assert_completed(outcome: &RunOutcome) -> &PipelineReport {
    match outcome {
        RunOutcome::Completed(report) => report,
        RunOutcome::Failed(failure) => panic!("Expected completion, got failure: {}", failure.error),
    }
}

/// Asserts that the run failed at `step` and returns the failure.
pub fn assert_failed_at(outcome: &RunOutcome, step: Step) -> &PipelineFailure {
    match outcome {
        RunOutcome::Failed(failure) => {
            assert_eq!(
                failure.error.failed_step, step,
                "Expected failure at '{}', got '{}'",
                step, failure.error.failed_step
            );
            failure
        }
        RunOutcome::Completed(_) => panic!("Expected failure at '{step}', got completion"),
    }
}

/// Asserts that the bag holds exactly `steps`.
pub fn assert_results_exactly(results: &IntermediateResultBag, steps: &[Step]) {
    let actual: Vec<Step> = results.steps().collect();
    let mut expected = steps.to_vec();
    expected.sort();
    assert_eq!(actual, expected, "Unexpected result bag contents");
}

/// Asserts that `step` ended with `status`.
pub fn assert_step_status(outcome: &RunOutcome, step: Step, status: StepStatus) {
    let actual = outcome.statuses().get(&step);
    assert_eq!(
        actual,
        Some(&status),
        "Expected '{step}' to be {status}, got {actual:?}"
    );
}

/// Asserts that progress never decreases and stays within 0 to 100.
pub fn assert_progress_monotonic(events: &[ProgressEvent]) {
    let mut last = 0.0_f64;
    for event in events {
        assert!(
            (0.0..=100.0).contains(&event.progress_percent),
            "Progress {} out of range at '{}'",
            event.progress_percent,
            event.current_step
        );
        assert!(
            event.progress_percent >= last,
            "Progress went from {last} to {} at '{}'",
            event.progress_percent,
            event.current_step
        );
        last = event.progress_percent;
    }
}
