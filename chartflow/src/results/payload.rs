//! Typed per-step payloads.

use crate::core::Step;
use crate::input::{Branch, DaewunPeriod, Element, PillarPosition, Polarity, Stem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary of one pillar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PillarSummary {
    /// Which pillar.
    pub position: PillarPosition,
    /// Heavenly stem.
    pub stem: Stem,
    /// Earthly branch.
    pub branch: Branch,
    /// Characters, e.g. `甲子`.
    pub hanja: String,
    /// Element of the stem.
    pub stem_element: Element,
    /// Element of the branch.
    pub branch_element: Element,
    /// Polarity of the stem.
    pub polarity: Polarity,
}

/// Output of the chart-derivation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartDerivation {
    /// Populated pillars in year, month, day, hour order.
    pub pillars: Vec<PillarSummary>,
    /// The day stem.
    pub day_master: Stem,
    /// Element of the day stem.
    pub day_master_element: Element,
    /// Visible stems and branches counted per element.
    pub element_balance: BTreeMap<Element, u32>,
    /// Number of yang stems and branches.
    pub yang_count: u32,
    /// Number of yin stems and branches.
    pub yin_count: u32,
    /// Element with the highest count (earliest in cycle order on ties).
    pub dominant_element: Element,
    /// Elements with a zero count.
    pub missing_elements: Vec<Element>,
    /// Decade periods copied from the input.
    #[serde(default)]
    pub daewun: Vec<DaewunPeriod>,
}

/// One hidden stem inside a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenStem {
    /// The hidden stem.
    pub stem: Stem,
    /// Its element.
    pub element: Element,
    /// Share of the branch's thirty days.
    pub weight: u32,
}

/// Hidden stems of one pillar's branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PillarHiddenStems {
    /// Which pillar.
    pub position: PillarPosition,
    /// The branch that was expanded.
    pub branch: Branch,
    /// Its hidden stems, residual first, principal last.
    pub stems: Vec<HiddenStem>,
}

/// Output of the hidden-stem-extraction step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenStemTable {
    /// Per-pillar expansion.
    pub pillars: Vec<PillarHiddenStems>,
    /// Element weights: visible stems count thirty, branches contribute
    /// their hidden-stem weights.
    pub weighted_balance: BTreeMap<Element, u32>,
}

/// A generated narrative section.
///
/// Shared by baseline-analysis, personality, aptitude and fortune-outlook,
/// and used for the synthesized chart summary in the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSection {
    /// Section title.
    pub title: String,
    /// Main text.
    pub summary: String,
    /// Short bullet points.
    #[serde(default)]
    pub highlights: Vec<String>,
    /// Actionable advice.
    #[serde(default)]
    pub advice: Vec<String>,
}

impl AnalysisSection {
    /// Checks that the required text fields are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.title.trim().is_empty() && !self.summary.trim().is_empty()
    }
}

/// Output of the scoring step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCard {
    /// Overall score, 0 to 100.
    pub overall: u8,
    /// Per-category scores, 0 to 100.
    #[serde(default)]
    pub categories: BTreeMap<String, u8>,
    /// Narrative explaining the scores.
    #[serde(default)]
    pub commentary: String,
}

impl ScoreCard {
    /// Highest score accepted.
    pub const MAX_SCORE: u8 = 100;

    /// Returns the first out-of-range score, if any.
    #[must_use]
    pub fn out_of_range(&self) -> Option<(&str, u8)> {
        if self.overall > Self::MAX_SCORE {
            return Some(("overall", self.overall));
        }
        self.categories
            .iter()
            .find(|(_, score)| **score > Self::MAX_SCORE)
            .map(|(name, score)| (name.as_str(), *score))
    }
}

/// A labelled value for charts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPoint {
    /// Axis label.
    pub label: String,
    /// Value.
    pub value: u32,
}

impl ChartPoint {
    /// Creates a new chart point.
    #[must_use]
    pub fn new(label: impl Into<String>, value: u32) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Output of the visualization step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationData {
    /// Weighted element balance as percentages.
    pub element_chart: Vec<ChartPoint>,
    /// Overall and category scores.
    pub score_chart: Vec<ChartPoint>,
}

/// Output of the persistence step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceAck {
    /// Identifier assigned by the store.
    pub analysis_id: String,
    /// When the store accepted the record.
    pub stored_at: DateTime<Utc>,
}

/// Output of the completion step: the finished report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    /// Synthesized from the chart and hidden stems.
    pub chart_summary: AnalysisSection,
    /// Baseline analysis.
    pub baseline: AnalysisSection,
    /// Personality.
    pub personality: AnalysisSection,
    /// Aptitude.
    pub aptitude: AnalysisSection,
    /// Fortune outlook.
    pub fortune_outlook: AnalysisSection,
    /// Scores.
    pub scoring: ScoreCard,
    /// Chart data.
    pub visualization: VisualizationData,
    /// Storage acknowledgment.
    pub persistence: PersistenceAck,
    /// Language the report was generated in.
    pub language: String,
    /// When the report was synthesized.
    pub generated_at: DateTime<Utc>,
}

impl FinalReport {
    /// Number of analytical sections (scores included).
    pub const ANALYTICAL_SECTIONS: usize = 6;

    /// Titles of the narrative sections in report order.
    #[must_use]
    pub fn section_titles(&self) -> Vec<&str> {
        [
            &self.chart_summary,
            &self.baseline,
            &self.personality,
            &self.aptitude,
            &self.fortune_outlook,
        ]
        .iter()
        .map(|section| section.title.as_str())
        .collect()
    }
}

/// A step's typed output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StepPayload {
    /// chart-derivation
    Chart(ChartDerivation),
    /// hidden-stem-extraction
    HiddenStems(HiddenStemTable),
    /// baseline-analysis, personality, aptitude, fortune-outlook
    Section(AnalysisSection),
    /// scoring
    Scores(ScoreCard),
    /// visualization
    Visualization(VisualizationData),
    /// persistence
    Persistence(PersistenceAck),
    /// completion
    Report(Box<FinalReport>),
}

impl StepPayload {
    /// Payload kind name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Chart(_) => "chart",
            Self::HiddenStems(_) => "hidden_stems",
            Self::Section(_) => "section",
            Self::Scores(_) => "scores",
            Self::Visualization(_) => "visualization",
            Self::Persistence(_) => "persistence",
            Self::Report(_) => "report",
        }
    }

    /// Whether this payload kind belongs to `step`.
    #[must_use]
    pub const fn belongs_to(&self, step: Step) -> bool {
        matches!(
            (self, step),
            (Self::Chart(_), Step::ChartDerivation)
                | (Self::HiddenStems(_), Step::HiddenStemExtraction)
                | (
                    Self::Section(_),
                    Step::BaselineAnalysis
                        | Step::Personality
                        | Step::Aptitude
                        | Step::FortuneOutlook
                )
                | (Self::Scores(_), Step::Scoring)
                | (Self::Visualization(_), Step::Visualization)
                | (Self::Persistence(_), Step::Persistence)
                | (Self::Report(_), Step::Completion)
        )
    }

    /// Decodes a serialized payload and checks it against `step`'s schema.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the value does not decode
    /// or decodes to another step's payload kind.
    pub fn decode(step: Step, value: serde_json::Value) -> Result<Self, String> {
        let payload: Self = serde_json::from_value(value).map_err(|e| e.to_string())?;
        if !payload.belongs_to(step) {
            return Err(format!("payload kind '{}' does not belong here", payload.kind()));
        }
        if let Self::Section(ref section) = payload {
            if !section.is_complete() {
                return Err("section title and summary must not be empty".to_string());
            }
        }
        if let Self::Scores(ref scores) = payload {
            if let Some((name, score)) = scores.out_of_range() {
                return Err(format!("score '{name}' = {score} is out of range"));
            }
        }
        Ok(payload)
    }

    /// Serializes the payload for a hydration snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
