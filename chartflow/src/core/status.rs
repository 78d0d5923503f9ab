//! Step and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of one step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// Executor is in flight.
    Running,
    /// Result is in the bag.
    Completed,
    /// Executor failed after exhausting its retries.
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StepStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The status of a pipeline run as a whole.
///
/// `Failed` is terminal: no further steps execute once a run reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, nothing executed.
    #[default]
    Pending,
    /// Steps are executing.
    Running,
    /// Every step completed.
    Completed,
    /// A step failed; the run stopped.
    Failed,
}

impl RunStatus {
    /// Returns true if the run can no longer advance.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Moves the run to `next`, ignoring transitions out of a terminal state.
    pub fn advance(&mut self, next: Self) {
        if !self.is_terminal() {
            *self = next;
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
