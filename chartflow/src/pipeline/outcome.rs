//! Run outcomes and run metadata.

use super::HydrationSnapshot;
use crate::core::{RunStatus, Step, StepStatus};
use crate::errors::PipelineError;
use crate::results::{FinalReport, IntermediateResultBag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Timing and bookkeeping for one run.
///
/// Observability only; never read for control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    /// Run identifier.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Time spent in each executed step, retries included.
    pub step_durations_ms: BTreeMap<Step, u64>,
    /// Attempts made for each executed step.
    pub step_attempts: BTreeMap<Step, u32>,
    /// Wall-clock duration of the run.
    pub total_duration_ms: u64,
    /// Resume point, when the run continued hydrated results.
    pub resumed_from: Option<Step>,
    /// Steps seeded from hydration instead of executed.
    pub reused_steps: Vec<Step>,
    /// Fingerprint of the input as executed, after defaults were applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<String>,
}

impl PipelineMetadata {
    /// Creates metadata for a run starting now.
    #[must_use]
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            step_durations_ms: BTreeMap::new(),
            step_attempts: BTreeMap::new(),
            total_duration_ms: 0,
            resumed_from: None,
            reused_steps: Vec::new(),
            input_fingerprint: None,
        }
    }

    /// Sum of the recorded step durations.
    #[must_use]
    pub fn summed_step_ms(&self) -> u64 {
        self.step_durations_ms.values().sum()
    }
}

/// A successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Every step's output.
    pub results: IntermediateResultBag,
    /// The completion step's report.
    pub report: FinalReport,
    /// Final per-step statuses.
    pub statuses: BTreeMap<Step, StepStatus>,
    /// Timing and bookkeeping.
    pub metadata: PipelineMetadata,
}

impl PipelineReport {
    /// Snapshot of all results, bound to the input this run executed.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload cannot be serialized.
    pub fn snapshot(&self) -> Result<HydrationSnapshot, serde_json::Error> {
        HydrationSnapshot::from_results(self.metadata.input_fingerprint.clone(), &self.results)
    }
}

/// A failed run with everything it produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineFailure {
    /// The normalized error of the first failing step.
    pub error: PipelineError,
    /// Results produced before the failure, frozen.
    pub results: IntermediateResultBag,
    /// Final per-step statuses.
    pub statuses: BTreeMap<Step, StepStatus>,
    /// Timing and bookkeeping.
    pub metadata: PipelineMetadata,
    /// Errors of other fan-out members that failed in the same phase.
    pub sibling_errors: Vec<PipelineError>,
}

impl PipelineFailure {
    /// The step a resumed run should start from.
    #[must_use]
    pub const fn resume_point(&self) -> Step {
        self.error.failed_step
    }

    /// Snapshot of the results for a later resume.
    ///
    /// The snapshot carries the fingerprint of the input as executed, so
    /// resuming with the caller's original input is accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload cannot be serialized.
    pub fn snapshot(&self) -> Result<HydrationSnapshot, serde_json::Error> {
        HydrationSnapshot::from_results(self.metadata.input_fingerprint.clone(), &self.results)
    }
}

/// The result of `execute` or `execute_from_step`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every step completed.
    Completed(PipelineReport),
    /// A step failed after its retries.
    Failed(PipelineFailure),
}

impl RunOutcome {
    /// Returns true if the run completed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Terminal run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        match self {
            Self::Completed(_) => RunStatus::Completed,
            Self::Failed(_) => RunStatus::Failed,
        }
    }

    /// Results produced by the run.
    #[must_use]
    pub const fn results(&self) -> &IntermediateResultBag {
        match self {
            Self::Completed(report) => &report.results,
            Self::Failed(failure) => &failure.results,
        }
    }

    /// Final per-step statuses.
    #[must_use]
    pub const fn statuses(&self) -> &BTreeMap<Step, StepStatus> {
        match self {
            Self::Completed(report) => &report.statuses,
            Self::Failed(failure) => &failure.statuses,
        }
    }

    /// Run metadata.
    #[must_use]
    pub const fn metadata(&self) -> &PipelineMetadata {
        match self {
            Self::Completed(report) => &report.metadata,
            Self::Failed(failure) => &failure.metadata,
        }
    }

    /// The report, for completed runs.
    #[must_use]
    pub const fn report(&self) -> Option<&PipelineReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Failed(_) => None,
        }
    }

    /// The failure, for failed runs.
    #[must_use]
    pub const fn failure(&self) -> Option<&PipelineFailure> {
        match self {
            Self::Completed(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }

    /// Converts into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the failure for failed runs.
    pub fn into_result(self) -> Result<PipelineReport, PipelineFailure> {
        match self {
            Self::Completed(report) => Ok(report),
            Self::Failed(failure) => Err(failure),
        }
    }
}
