//! The fixed catalogue of pipeline steps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One stage of the analysis pipeline.
///
/// Variants are declared in canonical execution order, so the derived
/// `Ord` matches the order the scheduler walks them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    /// Derive pillar summaries and the five-element balance.
    ChartDerivation,
    /// Expand each earthly branch into its hidden stems.
    HiddenStemExtraction,
    /// Generative overview of the chart.
    BaselineAnalysis,
    /// Generative personality section.
    Personality,
    /// Generative aptitude and career section.
    Aptitude,
    /// Generative outlook over the decade periods.
    FortuneOutlook,
    /// Generative scoring across the analytical sections.
    Scoring,
    /// Chart data for rendering.
    Visualization,
    /// Store the finished analysis.
    Persistence,
    /// Synthesize the final report.
    Completion,
}

impl Step {
    /// Every step, in canonical order.
    pub const ALL: [Self; 10] = [
        Self::ChartDerivation,
        Self::HiddenStemExtraction,
        Self::BaselineAnalysis,
        Self::Personality,
        Self::Aptitude,
        Self::FortuneOutlook,
        Self::Scoring,
        Self::Visualization,
        Self::Persistence,
        Self::Completion,
    ];

    /// The first step of every run.
    pub const FIRST: Self = Self::ChartDerivation;

    /// Position of the step in canonical order.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Stable key used in serialized payloads and log fields.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::ChartDerivation => "chart-derivation",
            Self::HiddenStemExtraction => "hidden-stem-extraction",
            Self::BaselineAnalysis => "baseline-analysis",
            Self::Personality => "personality",
            Self::Aptitude => "aptitude",
            Self::FortuneOutlook => "fortune-outlook",
            Self::Scoring => "scoring",
            Self::Visualization => "visualization",
            Self::Persistence => "persistence",
            Self::Completion => "completion",
        }
    }

    /// Steps strictly before this one.
    #[must_use]
    pub fn predecessors(self) -> &'static [Self] {
        &Self::ALL[..self.index()]
    }

    /// Whether the step calls the generative backend.
    #[must_use]
    pub const fn is_generative(self) -> bool {
        matches!(
            self,
            Self::BaselineAnalysis
                | Self::Personality
                | Self::Aptitude
                | Self::FortuneOutlook
                | Self::Scoring
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Error returned when parsing an unknown step key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown step: '{0}'")]
pub struct UnknownStepError(pub String);

impl FromStr for Step {
    type Err = UnknownStepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|step| step.key() == s)
            .ok_or_else(|| UnknownStepError(s.to_string()))
    }
}
