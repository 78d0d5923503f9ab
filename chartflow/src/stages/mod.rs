//! Stage executor trait and implementations.
//!
//! Each step is run by exactly one executor. The built-in set covers the
//! standard pipeline; callers may override individual steps.

mod context;
mod executors;
pub mod ports;

pub use context::StageContext;
pub use executors::{
    build_visualization, derive_chart, expand_hidden_stems, hidden_stems_of,
    ChartDerivationExecutor, CompletionExecutor, ExecutorSet, HiddenStemExecutor,
    PersistenceExecutor, ScoringExecutor, SectionExecutor, VisualizationExecutor,
    VISIBLE_STEM_WEIGHT,
};
pub use ports::{AnalysisBackend, AnalysisRecord, AnalysisStore, GenerationRequest};

use crate::core::Step;
use crate::errors::StageError;
use crate::results::StepPayload;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for step executors.
///
/// An executor reads its prerequisites from the context and returns the
/// payload for its step. It must not write to the result bag itself.
#[async_trait]
pub trait StageExecutor: Send + Sync + Debug {
    /// The step this executor runs.
    fn step(&self) -> Step;

    /// Executes one attempt.
    ///
    /// # Errors
    ///
    /// Returns a `StageError` describing why the attempt failed.
    async fn execute(&self, ctx: &StageContext) -> Result<StepPayload, StageError>;
}

/// A function-based executor.
pub struct FnExecutor<F>
where
    F: Fn(&StageContext) -> Result<StepPayload, StageError> + Send + Sync,
{
    step: Step,
    func: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&StageContext) -> Result<StepPayload, StageError> + Send + Sync,
{
    /// Creates a new function-based executor.
    pub fn new(step: Step, func: F) -> Self {
        Self { step, func }
    }
}

impl<F> Debug for FnExecutor<F>
where
    F: Fn(&StageContext) -> Result<StepPayload, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor")
            .field("step", &self.step)
            .finish()
    }
}

#[async_trait]
impl<F> StageExecutor for FnExecutor<F>
where
    F: Fn(&StageContext) -> Result<StepPayload, StageError> + Send + Sync,
{
    fn step(&self) -> Step {
        self.step
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StepPayload, StageError> {
        (self.func)(ctx)
    }
}
