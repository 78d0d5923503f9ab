//! Weighted progress and remaining-time estimates.

use crate::core::Step;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Expected duration of each step in milliseconds.
///
/// Generative steps dominate the table, so the percentage tracks wall-clock
/// time rather than step count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepWeights {
    weights: BTreeMap<Step, u64>,
}

impl Default for StepWeights {
    fn default() -> Self {
        let weights = Step::ALL
            .iter()
            .map(|step| (*step, Self::default_weight(*step)))
            .collect();
        Self { weights }
    }
}

impl StepWeights {
    /// Built-in expected duration for a step.
    #[must_use]
    pub const fn default_weight(step: Step) -> u64 {
        match step {
            Step::ChartDerivation | Step::HiddenStemExtraction | Step::Completion => 500,
            Step::BaselineAnalysis | Step::Scoring => 8_000,
            Step::Personality | Step::Aptitude | Step::FortuneOutlook => 10_000,
            Step::Visualization | Step::Persistence => 1_000,
        }
    }

    /// Applies overrides on top of the defaults.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &BTreeMap<Step, u64>) -> Self {
        self.weights.extend(overrides.iter().map(|(s, w)| (*s, *w)));
        self
    }

    /// Expected duration of a step.
    #[must_use]
    pub fn weight(&self, step: Step) -> u64 {
        self.weights
            .get(&step)
            .copied()
            .unwrap_or_else(|| Self::default_weight(step))
    }

    /// Sum over all steps.
    #[must_use]
    pub fn total(&self) -> u64 {
        Step::ALL.iter().map(|step| self.weight(*step)).sum()
    }
}

/// A progress update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The step that triggered the update.
    pub current_step: Step,
    /// Share of expected work done, 0 to 100.
    pub progress_percent: f64,
    /// Estimated time left in milliseconds.
    pub estimated_remaining_ms: u64,
}

/// Tracks weighted progress for one run.
///
/// The percentage counts every step's weight. Remaining time follows the
/// phase plan: members of a phase run together, so a phase costs as much
/// as its slowest member.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    weights: StepWeights,
    total: u64,
    phases: Vec<Vec<Step>>,
    done: BTreeSet<Step>,
    done_weight: u64,
    executed: BTreeMap<Step, u64>,
    observed_expected: u64,
    observed_actual: u64,
    last_percent: f64,
}

impl ProgressTracker {
    /// Creates a tracker with nothing done, running steps one at a time.
    #[must_use]
    pub fn new(weights: StepWeights) -> Self {
        let total = weights.total();
        Self {
            weights,
            total,
            phases: Step::ALL.iter().map(|step| vec![*step]).collect(),
            done: BTreeSet::new(),
            done_weight: 0,
            executed: BTreeMap::new(),
            observed_expected: 0,
            observed_actual: 0,
            last_percent: 0.0,
        }
    }

    /// Replaces the phase plan used for remaining-time estimates.
    ///
    /// Steps missing from `phases` are planned on their own.
    #[must_use]
    pub fn with_phases<I, P>(mut self, phases: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[Step]>,
    {
        let mut plan: Vec<Vec<Step>> = phases
            .into_iter()
            .map(|phase| phase.as_ref().to_vec())
            .filter(|phase| !phase.is_empty())
            .collect();
        let planned: BTreeSet<Step> = plan.iter().flatten().copied().collect();
        plan.extend(
            Step::ALL
                .iter()
                .filter(|step| !planned.contains(step))
                .map(|step| vec![*step]),
        );
        self.phases = plan;
        self
    }

    /// Counts a step reused from hydration as done.
    ///
    /// Reused steps move the percentage but not the speed estimate.
    pub fn mark_reused(&mut self, step: Step) {
        if self.done.insert(step) {
            self.done_weight += self.weights.weight(step);
        }
    }

    /// Update for a step about to run.
    pub fn started(&mut self, step: Step) -> ProgressEvent {
        self.event(step)
    }

    /// Update for a step that finished in `elapsed_ms`.
    pub fn completed(&mut self, step: Step, elapsed_ms: u64) -> ProgressEvent {
        if self.done.insert(step) {
            self.done_weight += self.weights.weight(step);
            self.executed.insert(step, elapsed_ms);
            self.observe_phase_of(step);
        }
        self.event(step)
    }

    /// Current percentage.
    #[must_use]
    pub const fn percent(&self) -> f64 {
        self.last_percent
    }

    /// Remaining expected time scaled by the speed observed so far.
    #[must_use]
    pub fn estimated_remaining_ms(&self) -> u64 {
        let remaining: u64 = self
            .phases
            .iter()
            .map(|phase| {
                phase
                    .iter()
                    .filter(|step| !self.done.contains(step))
                    .map(|step| self.weights.weight(*step))
                    .max()
                    .unwrap_or(0)
            })
            .sum();
        if self.observed_expected == 0 {
            return remaining;
        }
        let scaled = u128::from(remaining) * u128::from(self.observed_actual)
            / u128::from(self.observed_expected);
        u64::try_from(scaled).unwrap_or(u64::MAX)
    }

    /// Folds a finished phase into the speed estimate.
    fn observe_phase_of(&mut self, step: Step) {
        let Some(phase) = self.phases.iter().find(|phase| phase.contains(&step)) else {
            return;
        };
        if !phase.iter().all(|member| self.done.contains(member)) {
            return;
        }

        let ran = phase
            .iter()
            .filter_map(|member| self.executed.get(member).map(|ms| (*member, *ms)));
        let (expected, actual) = ran.fold((0, 0), |(expected, actual), (member, ms)| {
            (expected.max(self.weights.weight(member)), actual.max(ms))
        });
        self.observed_expected += expected;
        self.observed_actual += actual;
    }

    #[allow(clippy::cast_precision_loss)]
    fn event(&mut self, step: Step) -> ProgressEvent {
        let raw = if self.total == 0 {
            100.0
        } else {
            (self.done_weight as f64 / self.total as f64 * 100.0).min(100.0)
        };
        self.last_percent = self.last_percent.max(raw);

        ProgressEvent {
            current_step: step,
            progress_percent: self.last_percent,
            estimated_remaining_ms: self.estimated_remaining_ms(),
        }
    }
}
