//! The analysis pipeline and its scheduler.
//!
//! Steps run in canonical order. With fan-out enabled, the members of a
//! fan-out group are polled together on the calling task and the phase
//! waits for every member before deciding whether the run continues.

use super::hydration::{self, HydratedState, HydrationSnapshot};
use super::outcome::{PipelineFailure, PipelineMetadata, PipelineReport, RunOutcome};
use super::retry::{RetryDecision, RetryPolicy, RetryState};
use super::{Phase, StepRegistry};
use crate::config::{EngineConfig, RunOptions};
use crate::core::{RunStatus, Step, StepStatus};
use crate::errors::{EngineError, ErrorCode, HydrationError, PipelineError, StageError};
use crate::events::{EventEmitter, PipelineEvent, PipelineObserver, ProgressTracker, StepWeights};
use crate::input::PipelineInput;
use crate::results::{IntermediateResultBag, StepPayload};
use crate::stages::{AnalysisBackend, AnalysisStore, ExecutorSet, StageContext, StageExecutor};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Builder for an `AnalysisPipeline`.
#[derive(Default)]
pub struct AnalysisPipelineBuilder {
    backend: Option<Arc<dyn AnalysisBackend>>,
    store: Option<Arc<dyn AnalysisStore>>,
    observers: Vec<Arc<dyn PipelineObserver>>,
    overrides: Vec<Arc<dyn StageExecutor>>,
    registry: Option<StepRegistry>,
    config: EngineConfig,
}

impl AnalysisPipelineBuilder {
    /// Sets the generative backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn AnalysisBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the analysis store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn AnalysisStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Registers an observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Replaces the built-in executor for the step `executor` reports.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.overrides.push(executor);
        self
    }

    /// Uses a custom registry instead of the standard one.
    #[must_use]
    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration` if any step is left without an
    /// executor.
    pub fn build(self) -> Result<AnalysisPipeline, EngineError> {
        let mut executors = ExecutorSet::deterministic();
        if let Some(backend) = self.backend {
            executors = executors.with_backend(backend);
        }
        if let Some(store) = self.store {
            executors = executors.with_store(store);
        }
        for executor in self.overrides {
            executors = executors.with_executor(executor);
        }

        let missing = executors.missing();
        if !missing.is_empty() {
            let keys: Vec<_> = missing.iter().map(|step| step.key()).collect();
            return Err(EngineError::Configuration(format!(
                "No executor for steps: {}",
                keys.join(", ")
            )));
        }

        let weights = StepWeights::default().with_overrides(&self.config.step_weights);

        Ok(AnalysisPipeline {
            registry: self.registry.unwrap_or_default(),
            executors,
            emitter: EventEmitter::new(self.observers),
            weights,
            config: self.config,
            hydrated: None,
        })
    }
}

/// Outcome of one step within a phase.
struct StepRun {
    step: Step,
    result: Result<StepPayload, StageError>,
    duration_ms: u64,
    attempts: u32,
}

/// Runs the analysis steps for one input at a time.
///
/// Holds no per-run state apart from an optional hydrated state installed
/// by [`hydrate`](Self::hydrate) and consumed by the next
/// [`execute_from_step`](Self::execute_from_step).
#[derive(Debug)]
pub struct AnalysisPipeline {
    registry: StepRegistry,
    executors: ExecutorSet,
    emitter: EventEmitter,
    weights: StepWeights,
    config: EngineConfig,
    hydrated: Option<HydratedState>,
}

impl AnalysisPipeline {
    /// Creates a pipeline builder.
    #[must_use]
    pub fn builder() -> AnalysisPipelineBuilder {
        AnalysisPipelineBuilder::default()
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The step registry.
    #[must_use]
    pub const fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Resume point of the pending hydrated state, if any.
    #[must_use]
    pub fn hydrated_resume_point(&self) -> Option<Step> {
        self.hydrated.as_ref().map(HydratedState::resume_from)
    }

    /// Runs every step from the beginning.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidInput` if the input fails validation.
    /// Stage failures are reported as `RunOutcome::Failed`.
    pub async fn execute(
        &self,
        input: &PipelineInput,
        options: &RunOptions,
    ) -> Result<RunOutcome, EngineError> {
        let input = self.prepare_input(input)?;
        Ok(self
            .run(input, options, None, IntermediateResultBag::new())
            .await)
    }

    /// Validates a snapshot and installs it for the next resume.
    ///
    /// Replaces any state installed earlier.
    ///
    /// # Errors
    ///
    /// Returns a `HydrationError` if the snapshot is unusable for
    /// `resume_from`.
    pub fn hydrate(
        &mut self,
        snapshot: HydrationSnapshot,
        resume_from: Step,
    ) -> Result<(), HydrationError> {
        let state = hydration::restore(snapshot, resume_from, &self.registry)?;
        info!(
            resume_from = %resume_from,
            seeded = state.results().len(),
            "Hydrated pipeline state"
        );
        self.hydrated = Some(state);
        Ok(())
    }

    /// Continues a run from `resume_from` with the configured run options.
    ///
    /// # Errors
    ///
    /// See [`execute_from_step_with`](Self::execute_from_step_with).
    pub async fn execute_from_step(
        &mut self,
        input: &PipelineInput,
        resume_from: Step,
    ) -> Result<RunOutcome, EngineError> {
        let options = self.config.run_options();
        self.execute_from_step_with(input, resume_from, &options)
            .await
    }

    /// Continues a run from `resume_from`.
    ///
    /// Consumes the hydrated state. Seeded steps are marked completed and
    /// their executors are not invoked. Resuming from the first step needs
    /// no hydration.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidInput` for invalid input, or
    /// `EngineError::Hydration` when no matching hydrated state exists or
    /// it was produced for a different input.
    pub async fn execute_from_step_with(
        &mut self,
        input: &PipelineInput,
        resume_from: Step,
        options: &RunOptions,
    ) -> Result<RunOutcome, EngineError> {
        let prepared = self.prepare_input(input)?;

        if let Some(ref state) = self.hydrated {
            if state.resume_from() != resume_from {
                return Err(HydrationError::ResumePointMismatch {
                    hydrated: state.resume_from(),
                    requested: resume_from,
                }
                .into());
            }
            // Snapshots captured by hand fingerprint the caller's input as given.
            state
                .verify_input(&prepared)
                .or_else(|_| state.verify_input(input))?;
        } else if resume_from != Step::FIRST {
            return Err(HydrationError::NotHydrated(resume_from).into());
        }

        let seed = self
            .hydrated
            .take()
            .map(HydratedState::into_results)
            .unwrap_or_default();

        Ok(self.run(prepared, options, Some(resume_from), seed).await)
    }

    fn prepare_input(&self, input: &PipelineInput) -> Result<PipelineInput, EngineError> {
        let mut input = input.clone();
        if input.language.trim().is_empty() {
            input.language.clone_from(&self.config.language_default);
        }
        input.validate()?;
        Ok(input)
    }

    async fn run(
        &self,
        input: PipelineInput,
        options: &RunOptions,
        resumed_from: Option<Step>,
        seed: IntermediateResultBag,
    ) -> RunOutcome {
        let run_id = Uuid::now_v7();
        let span = info_span!(
            "pipeline.run",
            run_id = %run_id,
            resumed_from = ?resumed_from,
            parallel = options.enable_parallel
        );

        self.drive(run_id, Arc::new(input), options, resumed_from, seed)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        run_id: Uuid,
        input: Arc<PipelineInput>,
        options: &RunOptions,
        resumed_from: Option<Step>,
        seed: IntermediateResultBag,
    ) -> RunOutcome {
        let started = Instant::now();
        let mut metadata = PipelineMetadata::new(run_id);
        metadata.resumed_from = resumed_from;
        metadata.input_fingerprint = Some(input.fingerprint());
        let plan = self.registry.phases(options.enable_parallel);
        let mut progress =
            ProgressTracker::new(self.weights.clone()).with_phases(plan.iter().map(Phase::steps));
        let mut statuses: BTreeMap<Step, StepStatus> = Step::ALL
            .iter()
            .map(|step| (*step, StepStatus::Pending))
            .collect();

        for step in seed.steps() {
            statuses.insert(step, StepStatus::Completed);
            progress.mark_reused(step);
            metadata.reused_steps.push(step);
        }
        let mut bag = seed;
        let mut status = RunStatus::Pending;
        status.advance(RunStatus::Running);

        self.emitter.emit(&PipelineEvent::RunStarted {
            run_id,
            resumed_from,
        });

        let start_at = resumed_from.unwrap_or(Step::FIRST);
        for phase in self.registry.phases_from(start_at, options.enable_parallel) {
            let pending: Vec<Step> = phase
                .steps()
                .iter()
                .copied()
                .filter(|step| !bag.contains(*step))
                .collect();
            if pending.is_empty() {
                continue;
            }
            debug!(steps = ?pending, "Launching phase");

            let mut in_flight = FuturesUnordered::new();
            for step in &pending {
                statuses.insert(*step, StepStatus::Running);
                self.emitter
                    .emit(&PipelineEvent::Progress(progress.started(*step)));

                let prerequisites = bag.project(self.registry.prerequisites(*step));
                let ctx = StageContext::new(run_id, *step, input.clone(), prerequisites);
                in_flight.push(self.run_step(ctx, &options.retry));
            }

            let mut failures = Vec::new();
            while let Some(run) = in_flight.next().await {
                let StepRun {
                    step,
                    result,
                    duration_ms,
                    attempts,
                } = run;
                metadata.step_durations_ms.insert(step, duration_ms);
                metadata.step_attempts.insert(step, attempts);

                let recorded = result.and_then(|payload| {
                    bag.insert(step, payload.clone())
                        .map_err(|e| StageError::Unexpected(e.into()))?;
                    Ok(payload)
                });

                match recorded {
                    Ok(payload) => {
                        statuses.insert(step, StepStatus::Completed);
                        self.emitter.emit(&PipelineEvent::StepCompleted {
                            step,
                            payload,
                            duration_ms,
                        });
                        self.emitter.emit(&PipelineEvent::Progress(
                            progress.completed(step, duration_ms),
                        ));
                    }
                    Err(err) => {
                        let error = PipelineError::from_stage(step, &err);
                        statuses.insert(step, StepStatus::Failed);
                        warn!(
                            step = %step,
                            code = %error.code,
                            attempts,
                            error = %err,
                            "Step failed"
                        );
                        self.emitter.emit(&PipelineEvent::StepFailed {
                            step,
                            error: error.clone(),
                            will_retry: false,
                        });
                        failures.push(error);
                    }
                }
            }

            if !failures.is_empty() {
                failures.sort_by_key(|error| error.failed_step);
                let error = failures.remove(0);
                return self.fail(status, error, failures, bag, statuses, metadata, started);
            }
        }

        let Some(report) = bag.report().cloned() else {
            let error = PipelineError {
                failed_step: Step::Completion,
                message: "Completion produced no report".to_string(),
                code: ErrorCode::Unknown,
                retryable: ErrorCode::Unknown.is_retryable(),
            };
            return self.fail(status, error, Vec::new(), bag, statuses, metadata, started);
        };

        status.advance(RunStatus::Completed);
        metadata.total_duration_ms = elapsed_ms(started);
        info!(
            total_duration_ms = metadata.total_duration_ms,
            reused = metadata.reused_steps.len(),
            "Pipeline run completed"
        );
        self.emitter.emit(&PipelineEvent::RunFinished {
            run_id,
            status,
            error: None,
            total_duration_ms: metadata.total_duration_ms,
        });

        RunOutcome::Completed(PipelineReport {
            run_id,
            results: bag,
            report,
            statuses,
            metadata,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn fail(
        &self,
        mut status: RunStatus,
        error: PipelineError,
        sibling_errors: Vec<PipelineError>,
        results: IntermediateResultBag,
        statuses: BTreeMap<Step, StepStatus>,
        mut metadata: PipelineMetadata,
        started: Instant,
    ) -> RunOutcome {
        status.advance(RunStatus::Failed);
        metadata.total_duration_ms = elapsed_ms(started);
        info!(
            failed_step = %error.failed_step,
            code = %error.code,
            siblings_failed = sibling_errors.len(),
            total_duration_ms = metadata.total_duration_ms,
            "Pipeline run failed"
        );
        self.emitter.emit(&PipelineEvent::RunFinished {
            run_id: metadata.run_id,
            status,
            error: Some(error.clone()),
            total_duration_ms: metadata.total_duration_ms,
        });

        RunOutcome::Failed(PipelineFailure {
            error,
            results,
            statuses,
            metadata,
            sibling_errors,
        })
    }

    async fn run_step(&self, ctx: StageContext, policy: &RetryPolicy) -> StepRun {
        let step = ctx.step();
        let started = Instant::now();

        let Some(executor) = self.executors.get(step) else {
            return StepRun {
                step,
                result: Err(StageError::Unexpected(anyhow::anyhow!(
                    "no executor registered for step '{step}'"
                ))),
                duration_ms: 0,
                attempts: 0,
            };
        };

        let mut retry = RetryState::new();
        let mut attempt = 1;
        loop {
            self.emitter
                .emit(&PipelineEvent::StepStarted { step, attempt });
            let attempt_ctx = ctx.clone().with_attempt(attempt);

            match executor.execute(&attempt_ctx).await {
                Ok(payload) => {
                    return StepRun {
                        step,
                        result: Ok(payload),
                        duration_ms: elapsed_ms(started),
                        attempts: attempt,
                    };
                }
                Err(err) => match retry.decide(policy, &err) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            step = %step,
                            attempt,
                            code = %err.code(),
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %err,
                            "Retrying step"
                        );
                        self.emitter.emit(&PipelineEvent::StepFailed {
                            step,
                            error: PipelineError::from_stage(step, &err),
                            will_retry: true,
                        });
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                        return StepRun {
                            step,
                            result: Err(err),
                            duration_ms: elapsed_ms(started),
                            attempts: attempt,
                        };
                    }
                },
            }
        }
    }
}
