//! End-to-end tests for pipeline execution and resume.

use crate::config::{EngineConfig, RunOptions};
use crate::core::{Step, StepStatus};
use crate::errors::{BackendError, EngineError, ErrorCode, HydrationError, StageError};
use crate::events::{CallbackObserver, CollectingObserver, PipelineEvent};
use crate::pipeline::{
    AnalysisPipeline, AnalysisPipelineBuilder, HydrationSnapshot, JitterStrategy, RetryPolicy,
    RunOutcome,
};
use crate::results::{FinalReport, StepPayload};
use crate::stages::{build_visualization, FnExecutor, VisualizationExecutor};
use crate::testing::{
    assert_completed, assert_failed_at, assert_progress_monotonic, assert_results_exactly,
    assert_step_status, sample_input, CountingExecutor, InMemoryStore, ScriptedBackend,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    backend: Arc<ScriptedBackend>,
    store: Arc<InMemoryStore>,
    events: Arc<CollectingObserver>,
}

impl Harness {
    fn new(backend: ScriptedBackend) -> Self {
        Self {
            backend: Arc::new(backend),
            store: Arc::new(InMemoryStore::new()),
            events: Arc::new(CollectingObserver::new()),
        }
    }

    fn builder(&self) -> AnalysisPipelineBuilder {
        AnalysisPipeline::builder()
            .with_backend(self.backend.clone())
            .with_store(self.store.clone())
            .with_observer(self.events.clone())
    }

    fn pipeline(&self) -> AnalysisPipeline {
        self.builder().build().unwrap()
    }
}

fn timed_backend() -> ScriptedBackend {
    ScriptedBackend::new()
        .with_delay(Step::BaselineAnalysis, Duration::from_millis(100))
        .with_delay(Step::Personality, Duration::from_millis(300))
        .with_delay(Step::Aptitude, Duration::from_millis(200))
        .with_delay(Step::FortuneOutlook, Duration::from_millis(250))
        .with_delay(Step::Scoring, Duration::from_millis(100))
}

fn retrying(max_retries: u32) -> RunOptions {
    RunOptions::default().with_retry(
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None),
    )
}

async fn failed_at_scoring() -> (RunOutcome, HydrationSnapshot) {
    let harness = Harness::new(
        ScriptedBackend::new()
            .with_persistent_failure(Step::Scoring, BackendError::Unavailable("down".to_string())),
    );
    let outcome = harness
        .pipeline()
        .execute(&sample_input(), &RunOptions::default())
        .await
        .unwrap();
    let snapshot = outcome.failure().unwrap().snapshot().unwrap();
    (outcome, snapshot)
}

#[tokio::test]
async fn test_full_run_completes_every_step() {
    let harness = Harness::new(ScriptedBackend::new());
    let outcome = harness
        .pipeline()
        .execute(&sample_input(), &RunOptions::default())
        .await
        .unwrap();

    let report = assert_completed(&outcome);
    assert_results_exactly(&report.results, &Step::ALL);
    for step in Step::ALL {
        assert_step_status(&outcome, step, StepStatus::Completed);
    }

    assert_eq!(report.report.section_titles().len() + 1, FinalReport::ANALYTICAL_SECTIONS);
    assert_eq!(report.report.persistence.analysis_id, "analysis-1");
    assert_eq!(harness.store.len(), 1);
    assert_eq!(harness.backend.total_calls(), 5);
    assert!(report.metadata.reused_steps.is_empty());
    assert_eq!(report.metadata.resumed_from, None);
}

#[tokio::test]
async fn test_run_events_bracket_the_run() {
    let harness = Harness::new(ScriptedBackend::new());
    harness
        .pipeline()
        .execute(&sample_input(), &RunOptions::default())
        .await
        .unwrap();

    let events = harness.events.events();
    assert!(matches!(events.first(), Some(PipelineEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::RunFinished { error: None, .. })
    ));

    let mut completed = harness.events.completed_steps();
    completed.sort();
    assert_eq!(completed, Step::ALL.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic_and_reaches_hundred() {
    let harness = Harness::new(timed_backend());
    harness
        .pipeline()
        .execute(&sample_input(), &RunOptions::default())
        .await
        .unwrap();

    let progress = harness.events.progress();
    assert_progress_monotonic(&progress);
    let last = progress.last().unwrap();
    assert!((last.progress_percent - 100.0).abs() < f64::EPSILON);
    assert_eq!(last.estimated_remaining_ms, 0);
}

#[tokio::test]
async fn test_initial_estimate_follows_the_phase_plan() {
    let parallel = Harness::new(ScriptedBackend::new());
    parallel
        .pipeline()
        .execute(&sample_input(), &RunOptions::default())
        .await
        .unwrap();
    let sequential = Harness::new(ScriptedBackend::new());
    sequential
        .pipeline()
        .execute(&sample_input(), &RunOptions::default().with_parallel(false))
        .await
        .unwrap();

    // The fan-out costs one sibling's weight instead of three.
    assert_eq!(parallel.events.progress()[0].estimated_remaining_ms, 29_500);
    assert_eq!(sequential.events.progress()[0].estimated_remaining_ms, 49_500);
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_overlaps_sibling_steps() {
    let harness = Harness::new(timed_backend());
    let outcome = harness
        .pipeline()
        .execute(&sample_input(), &RunOptions::default())
        .await
        .unwrap();

    // baseline 100 + slowest sibling 300 + scoring 100
    let total = outcome.metadata().total_duration_ms;
    assert!((500..700).contains(&total), "total = {total}");
    assert!(outcome.metadata().step_durations_ms[&Step::Personality] >= 300);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_mode_runs_in_canonical_order() {
    let harness = Harness::new(timed_backend());
    let outcome = harness
        .pipeline()
        .execute(&sample_input(), &RunOptions::default().with_parallel(false))
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(harness.events.started_steps(), Step::ALL.to_vec());

    // 100 + 300 + 200 + 250 + 100
    let total = outcome.metadata().total_duration_ms;
    assert!(total >= 950, "total = {total}");
}

#[tokio::test]
async fn test_failure_returns_only_earlier_results() {
    let errors = Arc::new(AtomicUsize::new(0));
    let seen = errors.clone();
    let callbacks = CallbackObserver::new().on_error(move |step, error| {
        assert_eq!(step, Step::Scoring);
        assert_eq!(error.code, ErrorCode::Unknown);
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let harness = Harness::new(
        ScriptedBackend::new()
            .with_persistent_failure(Step::Scoring, BackendError::Unavailable("down".to_string())),
    );
    let outcome = harness
        .builder()
        .with_observer(Arc::new(callbacks))
        .build()
        .unwrap()
        .execute(&sample_input(), &RunOptions::default())
        .await
        .unwrap();

    let failure = assert_failed_at(&outcome, Step::Scoring);
    assert!(failure.error.retryable);
    assert!(failure.sibling_errors.is_empty());
    assert_results_exactly(&failure.results, Step::Scoring.predecessors());

    assert_step_status(&outcome, Step::Scoring, StepStatus::Failed);
    for step in [Step::Visualization, Step::Persistence, Step::Completion] {
        assert_step_status(&outcome, step, StepStatus::Pending);
    }
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_resume_skips_hydrated_steps() {
    let (_, snapshot) = failed_at_scoring().await;

    let harness = Harness::new(ScriptedBackend::new());
    let mut pipeline = harness.pipeline();
    pipeline.hydrate(snapshot, Step::Scoring).unwrap();
    assert_eq!(pipeline.hydrated_resume_point(), Some(Step::Scoring));

    let outcome = pipeline
        .execute_from_step(&sample_input(), Step::Scoring)
        .await
        .unwrap();

    let report = assert_completed(&outcome);
    assert_eq!(harness.backend.total_calls(), 1);
    assert_eq!(harness.backend.calls(Step::Scoring), 1);
    assert_eq!(report.metadata.resumed_from, Some(Step::Scoring));
    assert_eq!(report.metadata.reused_steps, Step::Scoring.predecessors().to_vec());
    assert_eq!(
        harness.events.started_steps(),
        vec![
            Step::Scoring,
            Step::Visualization,
            Step::Persistence,
            Step::Completion
        ]
    );
    assert!(pipeline.hydrated_resume_point().is_none());
}

#[tokio::test]
async fn test_resume_progress_starts_from_reused_work() {
    let (_, snapshot) = failed_at_scoring().await;

    let harness = Harness::new(ScriptedBackend::new());
    let mut pipeline = harness.pipeline();
    pipeline.hydrate(snapshot, Step::Scoring).unwrap();
    pipeline
        .execute_from_step(&sample_input(), Step::Scoring)
        .await
        .unwrap();

    let progress = harness.events.progress();
    assert_progress_monotonic(&progress);
    assert!(progress[0].progress_percent > 50.0);
}

#[tokio::test]
async fn test_hydration_is_idempotent() {
    let (_, snapshot) = failed_at_scoring().await;

    let harness = Harness::new(ScriptedBackend::new());
    let mut pipeline = harness.pipeline();
    pipeline.hydrate(snapshot.clone(), Step::Scoring).unwrap();
    pipeline.hydrate(snapshot, Step::Scoring).unwrap();

    let outcome = pipeline
        .execute_from_step(&sample_input(), Step::Scoring)
        .await
        .unwrap();
    assert!(outcome.is_completed());
    assert_eq!(harness.backend.calls(Step::Scoring), 1);
}

#[tokio::test]
async fn test_resume_rejects_mismatches() {
    let (_, snapshot) = failed_at_scoring().await;

    let harness = Harness::new(ScriptedBackend::new());
    let mut pipeline = harness.pipeline();
    pipeline.hydrate(snapshot, Step::Scoring).unwrap();

    let err = pipeline
        .execute_from_step(&sample_input(), Step::Visualization)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Hydration(HydrationError::ResumePointMismatch {
            hydrated: Step::Scoring,
            requested: Step::Visualization,
        })
    ));

    let other = sample_input().with_question("Something else?");
    let err = pipeline
        .execute_from_step(&other, Step::Scoring)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Hydration(HydrationError::InputMismatch)
    ));

    assert_eq!(pipeline.hydrated_resume_point(), Some(Step::Scoring));
    assert_eq!(harness.backend.total_calls(), 0);
}

#[tokio::test]
async fn test_resume_with_defaulted_language_accepts_original_input() {
    let mut input = sample_input();
    input.language = String::new();

    let failing = Harness::new(
        ScriptedBackend::new()
            .with_persistent_failure(Step::Scoring, BackendError::Unavailable("down".to_string())),
    );
    let outcome = failing
        .pipeline()
        .execute(&input, &RunOptions::default())
        .await
        .unwrap();
    let failure = assert_failed_at(&outcome, Step::Scoring);
    let snapshot = failure.snapshot().unwrap();
    assert_eq!(
        snapshot.input_fingerprint,
        failure.metadata.input_fingerprint
    );

    let harness = Harness::new(ScriptedBackend::new());
    let mut pipeline = harness.pipeline();
    pipeline.hydrate(snapshot, Step::Scoring).unwrap();
    let outcome = pipeline
        .execute_from_step(&input, Step::Scoring)
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(harness.backend.calls(Step::Scoring), 1);
    assert_eq!(harness.backend.calls(Step::BaselineAnalysis), 0);
}

#[tokio::test]
async fn test_hand_captured_snapshot_accepts_raw_input() {
    let (outcome, _) = failed_at_scoring().await;
    let mut input = sample_input();
    input.language = String::new();
    let snapshot = HydrationSnapshot::capture(&input, outcome.results()).unwrap();

    let harness = Harness::new(ScriptedBackend::new());
    let mut pipeline = harness.pipeline();
    pipeline.hydrate(snapshot, Step::Scoring).unwrap();
    let outcome = pipeline
        .execute_from_step(&input, Step::Scoring)
        .await
        .unwrap();
    assert!(outcome.is_completed());
}

#[tokio::test]
async fn test_hydrate_rejects_incomplete_snapshot() {
    let (_, mut snapshot) = failed_at_scoring().await;
    snapshot.entries.remove("aptitude");

    let mut pipeline = Harness::new(ScriptedBackend::new()).pipeline();
    let err = pipeline.hydrate(snapshot, Step::Scoring).unwrap_err();
    assert_eq!(err, HydrationError::MissingEntry(Step::Aptitude));
    assert!(pipeline.hydrated_resume_point().is_none());
}

#[tokio::test]
async fn test_fan_out_failure_keeps_completed_siblings() {
    let harness = Harness::new(
        ScriptedBackend::new()
            .with_persistent_failure(Step::Aptitude, BackendError::Timeout("slow".to_string())),
    );
    let outcome = harness
        .pipeline()
        .execute(&sample_input(), &RunOptions::default())
        .await
        .unwrap();

    let failure = assert_failed_at(&outcome, Step::Aptitude);
    assert_eq!(failure.error.code, ErrorCode::UpstreamTimeout);
    assert_results_exactly(
        &failure.results,
        &[
            Step::ChartDerivation,
            Step::HiddenStemExtraction,
            Step::BaselineAnalysis,
            Step::Personality,
            Step::FortuneOutlook,
        ],
    );
    assert_step_status(&outcome, Step::Personality, StepStatus::Completed);
    assert_step_status(&outcome, Step::Scoring, StepStatus::Pending);

    // Resuming runs only the failed sibling.
    let snapshot = failure.snapshot().unwrap();
    let resumed = Harness::new(ScriptedBackend::new());
    let mut pipeline = resumed.pipeline();
    pipeline.hydrate(snapshot, Step::Aptitude).unwrap();
    let outcome = pipeline
        .execute_from_step(&sample_input(), Step::Aptitude)
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(resumed.backend.calls(Step::Aptitude), 1);
    assert_eq!(resumed.backend.calls(Step::Personality), 0);
    assert_eq!(resumed.backend.calls(Step::FortuneOutlook), 0);
}

#[tokio::test]
async fn test_multiple_sibling_failures_report_the_earliest() {
    let harness = Harness::new(
        ScriptedBackend::new()
            .with_persistent_failure(
                Step::FortuneOutlook,
                BackendError::RateLimited {
                    message: "429".to_string(),
                    retry_after_ms: None,
                },
            )
            .with_persistent_failure(Step::Aptitude, BackendError::Timeout("slow".to_string())),
    );
    let outcome = harness
        .pipeline()
        .execute(&sample_input(), &RunOptions::default())
        .await
        .unwrap();

    let failure = assert_failed_at(&outcome, Step::Aptitude);
    assert_eq!(failure.sibling_errors.len(), 1);
    assert_eq!(failure.sibling_errors[0].failed_step, Step::FortuneOutlook);
    assert_eq!(failure.sibling_errors[0].code, ErrorCode::RateLimited);
    assert!(failure.results.contains(Step::Personality));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_step_is_retried_after_hint() {
    let harness = Harness::new(ScriptedBackend::new().with_failures(
        Step::BaselineAnalysis,
        vec![BackendError::RateLimited {
            message: "slow down".to_string(),
            retry_after_ms: Some(1_000),
        }],
    ));
    let outcome = harness
        .pipeline()
        .execute(&sample_input(), &retrying(1))
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(harness.backend.calls(Step::BaselineAnalysis), 2);
    assert_eq!(outcome.metadata().step_attempts[&Step::BaselineAnalysis], 2);
    assert!(outcome.metadata().step_durations_ms[&Step::BaselineAnalysis] >= 1_000);

    let retries: Vec<_> = harness
        .events
        .events_of_type("step.failed")
        .into_iter()
        .filter(|event| matches!(event, PipelineEvent::StepFailed { will_retry: true, .. }))
        .collect();
    assert_eq!(retries.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_is_bounded() {
    let harness = Harness::new(
        ScriptedBackend::new()
            .with_persistent_failure(Step::Scoring, BackendError::Timeout("slow".to_string())),
    );
    let outcome = harness
        .pipeline()
        .execute(&sample_input(), &retrying(10))
        .await
        .unwrap();

    let failure = assert_failed_at(&outcome, Step::Scoring);
    assert_eq!(failure.error.code, ErrorCode::UpstreamTimeout);
    assert_eq!(harness.backend.calls(Step::Scoring), 3);
    assert_eq!(failure.metadata.step_attempts[&Step::Scoring], 3);
}

#[tokio::test]
async fn test_invalid_input_is_never_retried() {
    let harness = Harness::new(ScriptedBackend::new().with_failures(
        Step::BaselineAnalysis,
        vec![BackendError::InvalidRequest("bad chart".to_string())],
    ));
    let outcome = harness
        .pipeline()
        .execute(&sample_input(), &retrying(2))
        .await
        .unwrap();

    let failure = assert_failed_at(&outcome, Step::BaselineAnalysis);
    assert_eq!(failure.error.code, ErrorCode::InvalidInput);
    assert!(!failure.error.retryable);
    assert_eq!(harness.backend.calls(Step::BaselineAnalysis), 1);
}

#[tokio::test]
async fn test_callbacks_receive_progress_and_outputs() {
    let progress = Arc::new(AtomicUsize::new(0));
    let outputs = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(AtomicUsize::new(0));

    let callbacks = {
        let progress = progress.clone();
        let outputs = outputs.clone();
        let errors = errors.clone();
        CallbackObserver::new()
            .on_progress(move |_, percent, _| {
                assert!((0.0..=100.0).contains(&percent));
                progress.fetch_add(1, Ordering::SeqCst);
            })
            .on_step_complete(move |step, payload| {
                assert!(payload.belongs_to(step));
                outputs.lock().push(step);
            })
            .on_error(move |_, _| {
                errors.fetch_add(1, Ordering::SeqCst);
            })
    };

    let harness = Harness::new(ScriptedBackend::new());
    harness
        .builder()
        .with_observer(Arc::new(callbacks))
        .build()
        .unwrap()
        .execute(&sample_input(), &RunOptions::default())
        .await
        .unwrap();

    // One update when each step starts and one when it completes.
    assert_eq!(progress.load(Ordering::SeqCst), Step::ALL.len() * 2);
    assert_eq!(outputs.lock().len(), Step::ALL.len());
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_executor_sees_only_its_prerequisites() {
    let visualization = FnExecutor::new(Step::Visualization, |ctx| {
        let visible: Vec<Step> = ctx.results().steps().collect();
        if visible != [Step::HiddenStemExtraction, Step::Scoring] {
            return Err(StageError::InvalidInput(format!("saw {visible:?}")));
        }
        Ok(StepPayload::Visualization(build_visualization(
            ctx.hidden_stems()?,
            ctx.scores()?,
        )))
    });

    let harness = Harness::new(ScriptedBackend::new());
    let outcome = harness
        .builder()
        .with_executor(Arc::new(visualization))
        .build()
        .unwrap()
        .execute(&sample_input(), &RunOptions::default())
        .await
        .unwrap();

    assert_completed(&outcome);
}

#[tokio::test]
async fn test_resume_at_completion_reuses_persistence() {
    let input = sample_input();
    let harness = Harness::new(ScriptedBackend::new().with_persistent_failure(
        Step::Scoring,
        BackendError::Other("unused".to_string()),
    ));
    let counting = Arc::new(CountingExecutor::new(Arc::new(VisualizationExecutor)));
    let full = AnalysisPipeline::builder()
        .with_backend(Arc::new(ScriptedBackend::new()))
        .with_store(harness.store.clone())
        .with_executor(counting.clone())
        .build()
        .unwrap()
        .execute(&input, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(counting.calls(), 1);

    let mut snapshot = assert_completed(&full).snapshot().unwrap();
    snapshot.entries.remove("completion");

    let mut pipeline = harness.builder().with_executor(counting.clone()).build().unwrap();
    pipeline.hydrate(snapshot, Step::Completion).unwrap();
    let outcome = pipeline
        .execute_from_step(&input, Step::Completion)
        .await
        .unwrap();

    let report = assert_completed(&outcome);
    assert_eq!(counting.calls(), 1);
    assert_eq!(harness.store.len(), 1);
    assert_eq!(harness.backend.total_calls(), 0);
    assert_eq!(report.metadata.reused_steps.len(), Step::ALL.len() - 1);
}

#[tokio::test(start_paused = true)]
async fn test_config_disables_fan_out_for_resume() {
    let (_, snapshot) = failed_at_scoring().await;

    let harness = Harness::new(timed_backend());
    let mut pipeline = harness
        .builder()
        .with_config(EngineConfig::default().with_parallel(false))
        .build()
        .unwrap();
    assert!(!pipeline.config().run_options().enable_parallel);

    pipeline.hydrate(snapshot, Step::Scoring).unwrap();
    let outcome = pipeline
        .execute_from_step(&sample_input(), Step::Scoring)
        .await
        .unwrap();
    assert!(outcome.is_completed());
    assert!(outcome.metadata().total_duration_ms >= 100);
}
