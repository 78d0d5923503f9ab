//! The append-only intermediate result bag.

use super::{
    AnalysisSection, ChartDerivation, FinalReport, HiddenStemTable, PersistenceAck, ScoreCard,
    StepPayload, VisualizationData,
};
use crate::core::Step;
use crate::errors::ResultBagError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-run store of step outputs.
///
/// Entries are keyed by step and kept in canonical order. Once written, an
/// entry can never be replaced or removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntermediateResultBag {
    entries: BTreeMap<Step, StepPayload>,
}

impl IntermediateResultBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a step's output.
    ///
    /// # Errors
    ///
    /// Returns `ResultBagError::Conflict` if the step already has an entry,
    /// or `SchemaMismatch` if the payload kind belongs to another step.
    pub fn insert(&mut self, step: Step, payload: StepPayload) -> Result<(), ResultBagError> {
        if !payload.belongs_to(step) {
            return Err(ResultBagError::SchemaMismatch {
                step,
                kind: payload.kind(),
            });
        }
        if self.entries.contains_key(&step) {
            return Err(ResultBagError::Conflict(step));
        }
        self.entries.insert(step, payload);
        Ok(())
    }

    /// Gets a step's output.
    #[must_use]
    pub fn get(&self, step: Step) -> Option<&StepPayload> {
        self.entries.get(&step)
    }

    /// Checks if a step has an output.
    #[must_use]
    pub fn contains(&self, step: Step) -> bool {
        self.entries.contains_key(&step)
    }

    /// Steps with an output, in canonical order.
    pub fn steps(&self) -> impl Iterator<Item = Step> + '_ {
        self.entries.keys().copied()
    }

    /// Iterates entries in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Step, &StepPayload)> {
        self.entries.iter().map(|(step, payload)| (*step, payload))
    }

    /// A copy holding only the entries for `steps`.
    #[must_use]
    pub fn project(&self, steps: &[Step]) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|(step, _)| steps.contains(step))
            .map(|(step, payload)| (*step, payload.clone()))
            .collect();
        Self { entries }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Chart derivation output.
    #[must_use]
    pub fn chart(&self) -> Option<&ChartDerivation> {
        match self.get(Step::ChartDerivation)? {
            StepPayload::Chart(chart) => Some(chart),
            _ => None,
        }
    }

    /// Hidden stem output.
    #[must_use]
    pub fn hidden_stems(&self) -> Option<&HiddenStemTable> {
        match self.get(Step::HiddenStemExtraction)? {
            StepPayload::HiddenStems(table) => Some(table),
            _ => None,
        }
    }

    /// A narrative section produced by `step`.
    #[must_use]
    pub fn section(&self, step: Step) -> Option<&AnalysisSection> {
        match self.get(step)? {
            StepPayload::Section(section) => Some(section),
            _ => None,
        }
    }

    /// Scoring output.
    #[must_use]
    pub fn scores(&self) -> Option<&ScoreCard> {
        match self.get(Step::Scoring)? {
            StepPayload::Scores(scores) => Some(scores),
            _ => None,
        }
    }

    /// Visualization output.
    #[must_use]
    pub fn visualization(&self) -> Option<&VisualizationData> {
        match self.get(Step::Visualization)? {
            StepPayload::Visualization(data) => Some(data),
            _ => None,
        }
    }

    /// Persistence acknowledgment.
    #[must_use]
    pub fn persistence(&self) -> Option<&PersistenceAck> {
        match self.get(Step::Persistence)? {
            StepPayload::Persistence(ack) => Some(ack),
            _ => None,
        }
    }

    /// The final report.
    #[must_use]
    pub fn report(&self) -> Option<&FinalReport> {
        match self.get(Step::Completion)? {
            StepPayload::Report(report) => Some(report.as_ref()),
            _ => None,
        }
    }
}
