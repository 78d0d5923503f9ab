//! Built-in executors for the ten standard steps.

use super::ports::{AnalysisBackend, AnalysisRecord, AnalysisStore, GenerationRequest};
use super::{StageContext, StageExecutor};
use crate::core::Step;
use crate::errors::StageError;
use crate::input::{Branch, Element, PipelineInput, Polarity, Stem};
use crate::results::{
    AnalysisSection, ChartDerivation, ChartPoint, FinalReport, HiddenStem, HiddenStemTable,
    PersistenceAck, PillarHiddenStems, PillarSummary, ScoreCard, StepPayload, VisualizationData,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Weight of a visible stem in the weighted element balance.
pub const VISIBLE_STEM_WEIGHT: u32 = 30;

/// Hidden stems of a branch with their day allocations, residual first.
#[must_use]
pub const fn hidden_stems_of(branch: Branch) -> &'static [(Stem, u32)] {
    match branch {
        Branch::Ja => &[(Stem::Im, 10), (Stem::Gye, 20)],
        Branch::Chuk => &[(Stem::Gye, 9), (Stem::Sin, 3), (Stem::Gi, 18)],
        Branch::In => &[(Stem::Mu, 7), (Stem::Byeong, 7), (Stem::Gap, 16)],
        Branch::Myo => &[(Stem::Gap, 10), (Stem::Eul, 20)],
        Branch::Jin => &[(Stem::Eul, 9), (Stem::Gye, 3), (Stem::Mu, 18)],
        Branch::Sa => &[(Stem::Mu, 7), (Stem::Gyeong, 7), (Stem::Byeong, 16)],
        Branch::O => &[(Stem::Byeong, 10), (Stem::Gi, 9), (Stem::Jeong, 11)],
        Branch::Mi => &[(Stem::Jeong, 9), (Stem::Eul, 3), (Stem::Gi, 18)],
        Branch::Shin => &[(Stem::Mu, 7), (Stem::Im, 7), (Stem::Gyeong, 16)],
        Branch::Yu => &[(Stem::Gyeong, 10), (Stem::Sin, 20)],
        Branch::Sul => &[(Stem::Sin, 9), (Stem::Jeong, 3), (Stem::Mu, 18)],
        Branch::Hae => &[(Stem::Mu, 7), (Stem::Gap, 7), (Stem::Im, 16)],
    }
}

fn empty_balance() -> BTreeMap<Element, u32> {
    Element::ALL.iter().map(|element| (*element, 0)).collect()
}

/// Pillar summaries, day master and visible element balance for an input.
#[must_use]
pub fn derive_chart(input: &PipelineInput) -> ChartDerivation {
    let mut balance = empty_balance();
    let mut yang_count = 0;
    let mut yin_count = 0;
    let mut pillars = Vec::new();

    for (position, pillar) in input.pillars.iter() {
        let stem_element = pillar.stem.element();
        let branch_element = pillar.branch.element();
        *balance.entry(stem_element).or_default() += 1;
        *balance.entry(branch_element).or_default() += 1;

        for polarity in [pillar.stem.polarity(), pillar.branch.polarity()] {
            match polarity {
                Polarity::Yang => yang_count += 1,
                Polarity::Yin => yin_count += 1,
            }
        }

        pillars.push(PillarSummary {
            position,
            stem: pillar.stem,
            branch: pillar.branch,
            hanja: pillar.hanja(),
            stem_element,
            branch_element,
            polarity: pillar.stem.polarity(),
        });
    }

    let dominant_element = Element::ALL.iter().copied().fold(Element::Wood, |best, element| {
        if balance[&element] > balance[&best] {
            element
        } else {
            best
        }
    });
    let missing_elements = Element::ALL
        .iter()
        .copied()
        .filter(|element| balance[element] == 0)
        .collect();
    let day_master = input.pillars.day_master();

    ChartDerivation {
        pillars,
        day_master,
        day_master_element: day_master.element(),
        element_balance: balance,
        yang_count,
        yin_count,
        dominant_element,
        missing_elements,
        daewun: input.daewun.clone().unwrap_or_default(),
    }
}

/// Expands every pillar's branch and weighs the elements.
///
/// Visible stems count [`VISIBLE_STEM_WEIGHT`]; each branch contributes the
/// day allocations of its hidden stems.
#[must_use]
pub fn expand_hidden_stems(chart: &ChartDerivation) -> HiddenStemTable {
    let mut weighted_balance = empty_balance();
    let mut pillars = Vec::with_capacity(chart.pillars.len());

    for summary in &chart.pillars {
        *weighted_balance.entry(summary.stem_element).or_default() += VISIBLE_STEM_WEIGHT;

        let stems = hidden_stems_of(summary.branch)
            .iter()
            .map(|&(stem, weight)| {
                *weighted_balance.entry(stem.element()).or_default() += weight;
                HiddenStem {
                    stem,
                    element: stem.element(),
                    weight,
                }
            })
            .collect();

        pillars.push(PillarHiddenStems {
            position: summary.position,
            branch: summary.branch,
            stems,
        });
    }

    HiddenStemTable {
        pillars,
        weighted_balance,
    }
}

/// Element percentages and score bars.
#[must_use]
pub fn build_visualization(hidden: &HiddenStemTable, scores: &ScoreCard) -> VisualizationData {
    let total: u32 = hidden.weighted_balance.values().sum();
    let element_chart = Element::ALL
        .iter()
        .map(|element| {
            let weight = hidden.weighted_balance.get(element).copied().unwrap_or(0);
            let percent = if total == 0 { 0 } else { weight * 100 / total };
            ChartPoint::new(element.as_str(), percent)
        })
        .collect();

    let score_chart = std::iter::once(ChartPoint::new("overall", u32::from(scores.overall)))
        .chain(
            scores
                .categories
                .iter()
                .map(|(name, score)| ChartPoint::new(name.clone(), u32::from(*score))),
        )
        .collect();

    VisualizationData {
        element_chart,
        score_chart,
    }
}

/// Derives pillar summaries and the visible element balance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChartDerivationExecutor;

#[async_trait]
impl StageExecutor for ChartDerivationExecutor {
    fn step(&self) -> Step {
        Step::ChartDerivation
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StepPayload, StageError> {
        Ok(StepPayload::Chart(derive_chart(ctx.input())))
    }
}

/// Expands each branch into its hidden stems.
#[derive(Debug, Clone, Copy, Default)]
pub struct HiddenStemExecutor;

#[async_trait]
impl StageExecutor for HiddenStemExecutor {
    fn step(&self) -> Step {
        Step::HiddenStemExtraction
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StepPayload, StageError> {
        Ok(StepPayload::HiddenStems(expand_hidden_stems(ctx.chart()?)))
    }
}

fn generation_request(
    ctx: &StageContext,
    prior: &[Step],
) -> Result<GenerationRequest, StageError> {
    let input = ctx.input();
    let mut prior_sections = BTreeMap::new();
    for step in prior {
        prior_sections.insert(*step, ctx.section(*step)?.clone());
    }

    Ok(GenerationRequest {
        step: ctx.step(),
        language: input.language.clone(),
        focus: input.focus.unwrap_or_default(),
        question: input.question.clone(),
        chart: ctx.chart()?.clone(),
        hidden_stems: ctx.hidden_stems()?.clone(),
        daewun: input.daewun.clone().unwrap_or_default(),
        prior_sections,
    })
}

/// Writes one narrative section through the backend.
///
/// Used for baseline-analysis and the three fan-out steps.
#[derive(Clone)]
pub struct SectionExecutor {
    step: Step,
    backend: Arc<dyn AnalysisBackend>,
}

impl SectionExecutor {
    /// Creates a section executor for `step`.
    #[must_use]
    pub fn new(step: Step, backend: Arc<dyn AnalysisBackend>) -> Self {
        Self { step, backend }
    }

    fn prior_steps(&self) -> &'static [Step] {
        match self.step {
            Step::Personality | Step::Aptitude | Step::FortuneOutlook => {
                &[Step::BaselineAnalysis]
            }
            _ => &[],
        }
    }
}

impl fmt::Debug for SectionExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionExecutor")
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StageExecutor for SectionExecutor {
    fn step(&self) -> Step {
        self.step
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StepPayload, StageError> {
        let request = generation_request(ctx, self.prior_steps())?;
        debug!(step = %self.step, attempt = ctx.attempt(), "Requesting section");

        let body = self.backend.generate(&request).await?;
        let section: AnalysisSection = serde_json::from_value(body)
            .map_err(|e| StageError::malformed(self.step, e.to_string()))?;
        if !section.is_complete() {
            return Err(StageError::malformed(
                self.step,
                "title and summary must not be empty",
            ));
        }

        Ok(StepPayload::Section(section))
    }
}

/// Scores the chart across the analytical sections.
#[derive(Clone)]
pub struct ScoringExecutor {
    backend: Arc<dyn AnalysisBackend>,
}

impl ScoringExecutor {
    /// Sections the scores are based on.
    pub const SCORED_SECTIONS: [Step; 4] = [
        Step::BaselineAnalysis,
        Step::Personality,
        Step::Aptitude,
        Step::FortuneOutlook,
    ];

    /// Creates a scoring executor.
    #[must_use]
    pub fn new(backend: Arc<dyn AnalysisBackend>) -> Self {
        Self { backend }
    }
}

impl fmt::Debug for ScoringExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoringExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl StageExecutor for ScoringExecutor {
    fn step(&self) -> Step {
        Step::Scoring
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StepPayload, StageError> {
        let request = generation_request(ctx, &Self::SCORED_SECTIONS)?;
        let body = self.backend.generate(&request).await?;

        let scores: ScoreCard = serde_json::from_value(body)
            .map_err(|e| StageError::malformed(Step::Scoring, e.to_string()))?;
        if let Some((name, score)) = scores.out_of_range() {
            return Err(StageError::malformed(
                Step::Scoring,
                format!("score '{name}' = {score} exceeds {}", ScoreCard::MAX_SCORE),
            ));
        }

        Ok(StepPayload::Scores(scores))
    }
}

/// Builds chart data for rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisualizationExecutor;

#[async_trait]
impl StageExecutor for VisualizationExecutor {
    fn step(&self) -> Step {
        Step::Visualization
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StepPayload, StageError> {
        Ok(StepPayload::Visualization(build_visualization(
            ctx.hidden_stems()?,
            ctx.scores()?,
        )))
    }
}

/// Hands the finished analysis to the store.
#[derive(Clone)]
pub struct PersistenceExecutor {
    store: Arc<dyn AnalysisStore>,
}

impl PersistenceExecutor {
    /// Creates a persistence executor.
    #[must_use]
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self { store }
    }
}

impl fmt::Debug for PersistenceExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl StageExecutor for PersistenceExecutor {
    fn step(&self) -> Step {
        Step::Persistence
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StepPayload, StageError> {
        ctx.visualization()?;

        let input = ctx.input();
        let record = AnalysisRecord {
            run_id: ctx.run_id(),
            input_fingerprint: input.fingerprint(),
            language: input.language.clone(),
            results: ctx.results().clone(),
            created_at: Utc::now(),
        };

        let analysis_id = self.store.save_analysis(&record).await?;
        if analysis_id.trim().is_empty() {
            return Err(StageError::Store(
                "store returned an empty analysis id".to_string(),
            ));
        }

        Ok(StepPayload::Persistence(PersistenceAck {
            analysis_id,
            stored_at: Utc::now(),
        }))
    }
}

/// Synthesizes the final report.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionExecutor;

impl CompletionExecutor {
    /// The synthesized chart summary section.
    #[must_use]
    pub fn chart_summary(chart: &ChartDerivation, hidden: &HiddenStemTable) -> AnalysisSection {
        let missing = if chart.missing_elements.is_empty() {
            "none".to_string()
        } else {
            chart
                .missing_elements
                .iter()
                .map(|element| element.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let highlights = chart
            .pillars
            .iter()
            .map(|pillar| format!("{} pillar: {}", pillar.position.as_str(), pillar.hanja))
            .collect();

        let strongest = hidden
            .weighted_balance
            .iter()
            .fold(None::<(Element, u32)>, |best, (element, weight)| match best {
                Some((_, top)) if top >= *weight => best,
                _ => Some((*element, *weight)),
            })
            .map_or(chart.dominant_element, |(element, _)| element);

        AnalysisSection {
            title: "Chart summary".to_string(),
            summary: format!(
                "Day master {} ({}). Dominant element {}, strongest with hidden stems {}, missing {}. Yang {} / Yin {}.",
                chart.day_master.hanja(),
                chart.day_master_element,
                chart.dominant_element,
                strongest,
                missing,
                chart.yang_count,
                chart.yin_count,
            ),
            highlights,
            advice: Vec::new(),
        }
    }
}

#[async_trait]
impl StageExecutor for CompletionExecutor {
    fn step(&self) -> Step {
        Step::Completion
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StepPayload, StageError> {
        let chart = ctx.chart()?;
        let hidden = ctx.hidden_stems()?;

        let report = FinalReport {
            chart_summary: Self::chart_summary(chart, hidden),
            baseline: ctx.section(Step::BaselineAnalysis)?.clone(),
            personality: ctx.section(Step::Personality)?.clone(),
            aptitude: ctx.section(Step::Aptitude)?.clone(),
            fortune_outlook: ctx.section(Step::FortuneOutlook)?.clone(),
            scoring: ctx.scores()?.clone(),
            visualization: ctx.visualization()?.clone(),
            persistence: ctx.persistence()?.clone(),
            language: ctx.input().language.clone(),
            generated_at: Utc::now(),
        };

        Ok(StepPayload::Report(Box::new(report)))
    }
}

/// The executor chosen for each step.
#[derive(Clone, Default)]
pub struct ExecutorSet {
    executors: BTreeMap<Step, Arc<dyn StageExecutor>>,
}

impl ExecutorSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in executors wired to the given ports.
    #[must_use]
    pub fn standard(backend: Arc<dyn AnalysisBackend>, store: Arc<dyn AnalysisStore>) -> Self {
        Self::deterministic().with_backend(backend).with_store(store)
    }

    /// The built-in executors that need no port.
    #[must_use]
    pub fn deterministic() -> Self {
        Self::new()
            .with_executor(Arc::new(ChartDerivationExecutor))
            .with_executor(Arc::new(HiddenStemExecutor))
            .with_executor(Arc::new(VisualizationExecutor))
            .with_executor(Arc::new(CompletionExecutor))
    }

    /// Adds the generative executors.
    #[must_use]
    pub fn with_backend(self, backend: Arc<dyn AnalysisBackend>) -> Self {
        let sections = [
            Step::BaselineAnalysis,
            Step::Personality,
            Step::Aptitude,
            Step::FortuneOutlook,
        ];
        sections
            .into_iter()
            .fold(self, |set, step| {
                set.with_executor(Arc::new(SectionExecutor::new(step, backend.clone())))
            })
            .with_executor(Arc::new(ScoringExecutor::new(backend)))
    }

    /// Adds the persistence executor.
    #[must_use]
    pub fn with_store(self, store: Arc<dyn AnalysisStore>) -> Self {
        self.with_executor(Arc::new(PersistenceExecutor::new(store)))
    }

    /// Replaces the executor for the step it reports.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.executors.insert(executor.step(), executor);
        self
    }

    /// The executor for `step`.
    #[must_use]
    pub fn get(&self, step: Step) -> Option<&Arc<dyn StageExecutor>> {
        self.executors.get(&step)
    }

    /// Steps without an executor.
    #[must_use]
    pub fn missing(&self) -> Vec<Step> {
        Step::ALL
            .iter()
            .copied()
            .filter(|step| !self.executors.contains_key(step))
            .collect()
    }
}

impl fmt::Debug for ExecutorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.executors.iter().map(|(step, e)| (step, e.as_ref())))
            .finish()
    }
}
