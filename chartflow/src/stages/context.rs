//! Per-attempt execution context.

use crate::core::Step;
use crate::errors::StageError;
use crate::input::PipelineInput;
use crate::results::{
    AnalysisSection, ChartDerivation, HiddenStemTable, IntermediateResultBag, PersistenceAck,
    ScoreCard, VisualizationData,
};
use std::sync::Arc;
use uuid::Uuid;

/// What an executor sees when it runs.
///
/// `results` holds only the step's declared prerequisites, so fan-out
/// siblings never observe each other.
#[derive(Debug, Clone)]
pub struct StageContext {
    run_id: Uuid,
    step: Step,
    attempt: u32,
    input: Arc<PipelineInput>,
    results: IntermediateResultBag,
}

impl StageContext {
    /// Creates a context for the first attempt of `step`.
    #[must_use]
    pub fn new(
        run_id: Uuid,
        step: Step,
        input: Arc<PipelineInput>,
        results: IntermediateResultBag,
    ) -> Self {
        Self {
            run_id,
            step,
            attempt: 1,
            input,
            results,
        }
    }

    /// Sets the attempt number.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Run identifier.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The step being executed.
    #[must_use]
    pub const fn step(&self) -> Step {
        self.step
    }

    /// Attempt number, starting at 1.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The run input.
    #[must_use]
    pub fn input(&self) -> &PipelineInput {
        &self.input
    }

    /// Prerequisite results.
    #[must_use]
    pub const fn results(&self) -> &IntermediateResultBag {
        &self.results
    }

    /// Chart derivation output.
    ///
    /// # Errors
    ///
    /// Returns `MissingPrerequisite` if it is not available.
    pub fn chart(&self) -> Result<&ChartDerivation, StageError> {
        self.results
            .chart()
            .ok_or(StageError::MissingPrerequisite(Step::ChartDerivation))
    }

    /// Hidden stem output.
    ///
    /// # Errors
    ///
    /// Returns `MissingPrerequisite` if it is not available.
    pub fn hidden_stems(&self) -> Result<&HiddenStemTable, StageError> {
        self.results
            .hidden_stems()
            .ok_or(StageError::MissingPrerequisite(Step::HiddenStemExtraction))
    }

    /// The section produced by `step`.
    ///
    /// # Errors
    ///
    /// Returns `MissingPrerequisite` if it is not available.
    pub fn section(&self, step: Step) -> Result<&AnalysisSection, StageError> {
        self.results
            .section(step)
            .ok_or(StageError::MissingPrerequisite(step))
    }

    /// Scoring output.
    ///
    /// # Errors
    ///
    /// Returns `MissingPrerequisite` if it is not available.
    pub fn scores(&self) -> Result<&ScoreCard, StageError> {
        self.results
            .scores()
            .ok_or(StageError::MissingPrerequisite(Step::Scoring))
    }

    /// Visualization output.
    ///
    /// # Errors
    ///
    /// Returns `MissingPrerequisite` if it is not available.
    pub fn visualization(&self) -> Result<&VisualizationData, StageError> {
        self.results
            .visualization()
            .ok_or(StageError::MissingPrerequisite(Step::Visualization))
    }

    /// Persistence acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns `MissingPrerequisite` if it is not available.
    pub fn persistence(&self) -> Result<&PersistenceAck, StageError> {
        self.results
            .persistence()
            .ok_or(StageError::MissingPrerequisite(Step::Persistence))
    }
}
