//! Cross-process resume state.

use super::StepRegistry;
use crate::core::Step;
use crate::errors::HydrationError;
use crate::input::PipelineInput;
use crate::results::{IntermediateResultBag, StepPayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Snapshot format written by this engine.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable results of an earlier run.
///
/// Entries are keyed by step key and hold encoded `StepPayload`s, so a
/// snapshot survives any transport that preserves JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydrationSnapshot {
    /// Format version.
    pub version: u32,
    /// Fingerprint of the input the results were produced from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<String>,
    /// Encoded payloads keyed by step key.
    #[serde(default)]
    pub entries: BTreeMap<String, serde_json::Value>,
}

impl HydrationSnapshot {
    /// Captures `results` for `input`.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload cannot be serialized.
    pub fn capture(
        input: &PipelineInput,
        results: &IntermediateResultBag,
    ) -> Result<Self, serde_json::Error> {
        Self::from_results(Some(input.fingerprint()), results)
    }

    /// Captures `results` under an already computed input fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload cannot be serialized.
    pub fn from_results(
        input_fingerprint: Option<String>,
        results: &IntermediateResultBag,
    ) -> Result<Self, serde_json::Error> {
        let entries = results
            .iter()
            .map(|(step, payload)| Ok((step.key().to_string(), payload.encode()?)))
            .collect::<Result<_, serde_json::Error>>()?;

        Ok(Self {
            version: SNAPSHOT_VERSION,
            input_fingerprint,
            entries,
        })
    }
}

/// Validated state waiting for `execute_from_step`.
#[derive(Debug, Clone)]
pub struct HydratedState {
    resume_from: Step,
    input_fingerprint: Option<String>,
    results: IntermediateResultBag,
}

impl HydratedState {
    /// Resume point this state was validated for.
    #[must_use]
    pub const fn resume_from(&self) -> Step {
        self.resume_from
    }

    /// Results that will seed the run.
    #[must_use]
    pub const fn results(&self) -> &IntermediateResultBag {
        &self.results
    }

    /// Checks that `input` is the input the snapshot was taken from.
    ///
    /// # Errors
    ///
    /// Returns `InputMismatch` when the fingerprints differ.
    pub fn verify_input(&self, input: &PipelineInput) -> Result<(), HydrationError> {
        match self.input_fingerprint {
            Some(ref expected) if *expected != input.fingerprint() => {
                Err(HydrationError::InputMismatch)
            }
            _ => Ok(()),
        }
    }

    /// Consumes the state, yielding the seed results.
    #[must_use]
    pub fn into_results(self) -> IntermediateResultBag {
        self.results
    }
}

/// Validates a snapshot for resuming at `resume_from`.
///
/// Every step strictly before `resume_from` must have a valid entry.
/// Entries of `resume_from` itself and of later steps are dropped, except
/// completed fan-out siblings of `resume_from`, which are kept so they are
/// not executed again.
///
/// # Errors
///
/// Returns a `HydrationError` describing the first problem found.
pub fn restore(
    snapshot: HydrationSnapshot,
    resume_from: Step,
    registry: &StepRegistry,
) -> Result<HydratedState, HydrationError> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(HydrationError::UnsupportedVersion {
            found: snapshot.version,
            expected: SNAPSHOT_VERSION,
        });
    }

    let siblings = registry.fan_out_group(resume_from).unwrap_or(&[]);
    let mut results = IntermediateResultBag::new();

    for (key, value) in snapshot.entries {
        let step: Step = key
            .parse()
            .map_err(|_| HydrationError::UnknownStep(key.clone()))?;

        let payload = StepPayload::decode(step, value)
            .map_err(|reason| HydrationError::InvalidEntry { step, reason })?;

        let keep = step < resume_from || (step != resume_from && siblings.contains(&step));
        if !keep {
            debug!(step = %step, resume_from = %resume_from, "Dropping snapshot entry");
            continue;
        }

        results
            .insert(step, payload)
            .map_err(|e| HydrationError::InvalidEntry {
                step,
                reason: e.to_string(),
            })?;
    }

    if let Some(missing) = resume_from
        .predecessors()
        .iter()
        .find(|step| !results.contains(**step))
    {
        warn!(step = %missing, resume_from = %resume_from, "Snapshot is incomplete");
        return Err(HydrationError::MissingEntry(*missing));
    }

    Ok(HydratedState {
        resume_from,
        input_fingerprint: snapshot.input_fingerprint,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::AnalysisSection;
    use crate::testing::{sample_input, sample_results};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn snapshot_through(last: Step) -> HydrationSnapshot {
        let input = sample_input();
        let results = sample_results(&input).project(&Step::ALL[..=last.index()]);
        HydrationSnapshot::capture(&input, &results).unwrap()
    }

    #[test]
    fn test_capture_uses_step_keys() {
        let snapshot = snapshot_through(Step::HiddenStemExtraction);
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(
            snapshot.entries.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["chart-derivation", "hidden-stem-extraction"]
        );
    }

    #[test]
    fn test_restore_keeps_prefix() {
        let registry = StepRegistry::standard();
        let snapshot = snapshot_through(Step::Scoring);

        let state = restore(snapshot, Step::Scoring, &registry).unwrap();
        assert_eq!(state.resume_from(), Step::Scoring);
        assert_eq!(
            state.results().steps().collect::<Vec<_>>(),
            Step::Scoring.predecessors().to_vec()
        );
    }

    #[test]
    fn test_restore_keeps_fan_out_siblings() {
        let registry = StepRegistry::standard();
        let snapshot = snapshot_through(Step::FortuneOutlook);

        let state = restore(snapshot, Step::Personality, &registry).unwrap();
        assert!(state.results().contains(Step::Aptitude));
        assert!(state.results().contains(Step::FortuneOutlook));
        assert!(!state.results().contains(Step::Personality));
    }

    #[test]
    fn test_restore_rejects_missing_prefix() {
        let registry = StepRegistry::standard();
        let mut snapshot = snapshot_through(Step::Scoring);
        snapshot.entries.remove("baseline-analysis");

        let err = restore(snapshot, Step::Scoring, &registry).unwrap_err();
        assert_eq!(err, HydrationError::MissingEntry(Step::BaselineAnalysis));
    }

    #[test]
    fn test_restore_rejects_unknown_step() {
        let registry = StepRegistry::standard();
        let mut snapshot = snapshot_through(Step::ChartDerivation);
        snapshot.entries.insert("horoscope".to_string(), json!({}));

        let err = restore(snapshot, Step::HiddenStemExtraction, &registry).unwrap_err();
        assert_eq!(err, HydrationError::UnknownStep("horoscope".to_string()));
    }

    #[test]
    fn test_restore_rejects_schema_mismatch() {
        let registry = StepRegistry::standard();
        let mut snapshot = snapshot_through(Step::ChartDerivation);
        let section = StepPayload::Section(AnalysisSection {
            title: "t".to_string(),
            summary: "s".to_string(),
            highlights: vec![],
            advice: vec![],
        });
        snapshot
            .entries
            .insert("chart-derivation".to_string(), section.encode().unwrap());

        let err = restore(snapshot, Step::HiddenStemExtraction, &registry).unwrap_err();
        assert!(matches!(
            err,
            HydrationError::InvalidEntry {
                step: Step::ChartDerivation,
                ..
            }
        ));
    }

    #[test]
    fn test_restore_rejects_unsupported_version() {
        let registry = StepRegistry::standard();
        let mut snapshot = snapshot_through(Step::ChartDerivation);
        snapshot.version = 99;

        let err = restore(snapshot, Step::HiddenStemExtraction, &registry).unwrap_err();
        assert!(matches!(err, HydrationError::UnsupportedVersion { found: 99, .. }));
    }

    #[test]
    fn test_verify_input() {
        let registry = StepRegistry::standard();
        let state = restore(
            snapshot_through(Step::ChartDerivation),
            Step::HiddenStemExtraction,
            &registry,
        )
        .unwrap();

        assert!(state.verify_input(&sample_input()).is_ok());
        let other = sample_input().with_question("Different?");
        assert_eq!(
            state.verify_input(&other).unwrap_err(),
            HydrationError::InputMismatch
        );
    }

    #[test]
    fn test_from_results_keeps_given_fingerprint() {
        let input = sample_input();
        let results = sample_results(&input).project(&[Step::ChartDerivation]);

        let snapshot =
            HydrationSnapshot::from_results(Some("abc".to_string()), &results).unwrap();
        assert_eq!(snapshot.input_fingerprint.as_deref(), Some("abc"));
        assert_eq!(snapshot.entries.len(), 1);

        let unbound = HydrationSnapshot::from_results(None, &results).unwrap();
        let state = restore(unbound, Step::HiddenStemExtraction, &StepRegistry::standard())
            .unwrap();
        assert!(state.verify_input(&input.with_question("Anything?")).is_ok());
    }

    #[test]
    fn test_snapshot_json_round_trip_restores() {
        let registry = StepRegistry::standard();
        let json = serde_json::to_string(&snapshot_through(Step::Visualization)).unwrap();
        let snapshot: HydrationSnapshot = serde_json::from_str(&json).unwrap();

        let state = restore(snapshot, Step::Persistence, &registry).unwrap();
        assert_eq!(state.into_results().len(), Step::Persistence.index());
    }
}
