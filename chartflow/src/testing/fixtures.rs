//! Sample inputs and results.

use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;

use crate::core::Step;
use crate::input::{Branch, DaewunPeriod, FocusArea, Pillar, Pillars, PipelineInput, Stem};
use crate::results::{
    AnalysisSection, FinalReport, IntermediateResultBag, PersistenceAck, ScoreCard, StepPayload,
};
use crate::stages::{build_visualization, derive_chart, expand_hidden_stems, CompletionExecutor};

/// Analysis id returned by the sample store.
pub const SAMPLE_ANALYSIS_ID: &str = "analysis-1";

/// A valid input with all four pillars and three decade periods.
///
/// 甲子 year, 丙寅 month, 戊辰 day, 庚午 hour.
#[must_use]
pub fn sample_input() -> PipelineInput {
    let pillars = Pillars {
        year: Pillar::new(Stem::Gap, Branch::Ja),
        month: Pillar::new(Stem::Byeong, Branch::In),
        day: Pillar::new(Stem::Mu, Branch::Jin),
        hour: Some(Pillar::new(Stem::Gyeong, Branch::O)),
    };

    PipelineInput::new(pillars, "ko")
        .with_daewun(vec![
            DaewunPeriod::new(3, Stem::Jeong, Branch::Myo),
            DaewunPeriod::new(13, Stem::Mu, Branch::Jin),
            DaewunPeriod::new(23, Stem::Gi, Branch::Sa),
        ])
        .with_focus(FocusArea::Career)
}

/// The narrative section the scripted backend writes for `step`.
#[must_use]
pub fn sample_section(step: Step, language: &str) -> AnalysisSection {
    AnalysisSection {
        title: format!("{step} [{language}]"),
        summary: format!("Sample {step} analysis."),
        highlights: vec![format!("{step} highlight")],
        advice: vec![format!("{step} advice")],
    }
}

/// JSON body of [`sample_section`].
#[must_use]
pub fn sample_section_json(step: Step, language: &str) -> serde_json::Value {
    let section = sample_section(step, language);
    json!({
        "title": section.title,
        "summary": section.summary,
        "highlights": section.highlights,
        "advice": section.advice,
    })
}

/// The score card the scripted backend returns.
#[must_use]
pub fn sample_scores() -> ScoreCard {
    let categories: BTreeMap<String, u8> = [("career", 72), ("health", 64), ("relationships", 81)]
        .into_iter()
        .map(|(name, score)| (name.to_string(), score))
        .collect();

    ScoreCard {
        overall: 74,
        categories,
        commentary: "Balanced chart with a strong earth element.".to_string(),
    }
}

/// A complete result bag for `input`, as a successful run would leave it.
#[must_use]
pub fn sample_results(input: &PipelineInput) -> IntermediateResultBag {
    let chart = derive_chart(input);
    let hidden = expand_hidden_stems(&chart);
    let scores = sample_scores();
    let visualization = build_visualization(&hidden, &scores);
    let persistence = PersistenceAck {
        analysis_id: SAMPLE_ANALYSIS_ID.to_string(),
        stored_at: Utc::now(),
    };
    let section = |step: Step| sample_section(step, &input.language);

    let report = FinalReport {
        chart_summary: CompletionExecutor::chart_summary(&chart, &hidden),
        baseline: section(Step::BaselineAnalysis),
        personality: section(Step::Personality),
        aptitude: section(Step::Aptitude),
        fortune_outlook: section(Step::FortuneOutlook),
        scoring: scores.clone(),
        visualization: visualization.clone(),
        persistence: persistence.clone(),
        language: input.language.clone(),
        generated_at: Utc::now(),
    };

    let payloads = [
        (Step::ChartDerivation, StepPayload::Chart(chart)),
        (Step::HiddenStemExtraction, StepPayload::HiddenStems(hidden)),
        (
            Step::BaselineAnalysis,
            StepPayload::Section(section(Step::BaselineAnalysis)),
        ),
        (Step::Personality, StepPayload::Section(section(Step::Personality))),
        (Step::Aptitude, StepPayload::Section(section(Step::Aptitude))),
        (
            Step::FortuneOutlook,
            StepPayload::Section(section(Step::FortuneOutlook)),
        ),
        (Step::Scoring, StepPayload::Scores(scores)),
        (Step::Visualization, StepPayload::Visualization(visualization)),
        (Step::Persistence, StepPayload::Persistence(persistence)),
        (Step::Completion, StepPayload::Report(Box::new(report))),
    ];

    let mut bag = IntermediateResultBag::new();
    for (step, payload) in payloads {
        // Payload kinds above always match their steps.
        let _ = bag.insert(step, payload);
    }
    bag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_results_cover_every_step() {
        let bag = sample_results(&sample_input());
        assert_eq!(bag.steps().collect::<Vec<_>>(), Step::ALL.to_vec());
        assert_eq!(bag.report().unwrap().persistence.analysis_id, SAMPLE_ANALYSIS_ID);
    }

    #[test]
    fn test_sample_section_json_decodes() {
        let json = sample_section_json(Step::Aptitude, "en");
        let section: AnalysisSection = serde_json::from_value(json).unwrap();
        assert_eq!(section, sample_section(Step::Aptitude, "en"));
        assert!(section.is_complete());
    }
}
