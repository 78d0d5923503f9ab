//! Scripted ports and executors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::fixtures::{sample_scores, sample_section_json};
use crate::core::Step;
use crate::errors::{BackendError, ErrorCode, StageError, StoreError};
use crate::results::StepPayload;
use crate::stages::{
    AnalysisBackend, AnalysisRecord, AnalysisStore, GenerationRequest, StageContext,
    StageExecutor,
};

#[derive(Debug, Default)]
struct Script {
    failures: VecDeque<BackendError>,
    persistent: Option<BackendError>,
    delay: Option<Duration>,
}

/// A backend that answers with sample content and can be scripted to fail.
///
/// Scripted failures are consumed in order before the step succeeds; a
/// persistent failure is returned on every call. Delays use `tokio::time`,
/// so tests with paused time stay deterministic.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<Step, Script>>,
    calls: Mutex<HashMap<Step, usize>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    /// Creates a backend that always succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next calls for `step` with `errors`, in order.
    #[must_use]
    pub fn with_failures(self, step: Step, errors: Vec<BackendError>) -> Self {
        self.scripts
            .lock()
            .entry(step)
            .or_default()
            .failures
            .extend(errors);
        self
    }

    /// Fails every call for `step` with `error`.
    #[must_use]
    pub fn with_persistent_failure(self, step: Step, error: BackendError) -> Self {
        self.scripts.lock().entry(step).or_default().persistent = Some(error);
        self
    }

    /// Delays every call for `step`.
    #[must_use]
    pub fn with_delay(self, step: Step, delay: Duration) -> Self {
        self.scripts.lock().entry(step).or_default().delay = Some(delay);
        self
    }

    /// Number of calls made for `step`.
    #[must_use]
    pub fn calls(&self, step: Step) -> usize {
        self.calls.lock().get(&step).copied().unwrap_or(0)
    }

    /// Number of calls across all steps.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    /// Requests received, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    fn next_outcome(&self, step: Step) -> (Option<Duration>, Option<BackendError>) {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(&step) {
            Some(script) => {
                let failure = script
                    .failures
                    .pop_front()
                    .or_else(|| script.persistent.clone());
                (script.delay, failure)
            }
            None => (None, None),
        }
    }
}

#[async_trait]
impl AnalysisBackend for ScriptedBackend {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<serde_json::Value, BackendError> {
        let step = request.step;
        *self.calls.lock().entry(step).or_default() += 1;
        self.requests.lock().push(request.clone());

        let (delay, failure) = self.next_outcome(step);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        match step {
            Step::BaselineAnalysis | Step::Personality | Step::Aptitude | Step::FortuneOutlook => {
                Ok(sample_section_json(step, &request.language))
            }
            Step::Scoring => serde_json::to_value(sample_scores())
                .map_err(|e| BackendError::Other(e.to_string())),
            _ => Err(BackendError::InvalidRequest(format!(
                "step '{step}' is not generative"
            ))),
        }
    }
}

/// A store that keeps records in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<AnalysisRecord>>,
    failures: Mutex<VecDeque<StoreError>>,
    delay: Option<Duration>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next saves with `errors`, in order.
    #[must_use]
    pub fn with_failures(self, errors: Vec<StoreError>) -> Self {
        self.failures.lock().extend(errors);
        self
    }

    /// Delays every save.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Stored records, in save order.
    #[must_use]
    pub fn records(&self) -> Vec<AnalysisRecord> {
        self.records.lock().clone()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AnalysisStore for InMemoryStore {
    async fn save_analysis(&self, record: &AnalysisRecord) -> Result<String, StoreError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let mut records = self.records.lock();
        records.push(record.clone());
        Ok(format!("analysis-{}", records.len()))
    }
}

/// An executor that fails with a given error code.
///
/// Fails on every attempt unless [`recovering_with`](Self::recovering_with)
/// sets a number of failures after which it returns a payload.
#[derive(Debug)]
pub struct FailingExecutor {
    step: Step,
    code: ErrorCode,
    recovery: Option<(u32, StepPayload)>,
    calls: AtomicU32,
}

impl FailingExecutor {
    /// Creates an executor that always fails with `code`.
    #[must_use]
    pub fn new(step: Step, code: ErrorCode) -> Self {
        Self {
            step,
            code,
            recovery: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Fails `failures` times, then returns `payload`.
    #[must_use]
    pub fn recovering_with(mut self, failures: u32, payload: StepPayload) -> Self {
        self.recovery = Some((failures, payload));
        self
    }

    /// Number of attempts made.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn error(&self) -> StageError {
        let message = format!("injected failure in '{}'", self.step);
        match self.code {
            ErrorCode::InvalidInput => StageError::InvalidInput(message),
            ErrorCode::RateLimited => StageError::RateLimited {
                message,
                retry_after_ms: None,
            },
            ErrorCode::UpstreamTimeout => StageError::Timeout(message),
            ErrorCode::Unknown => StageError::Backend(message),
        }
    }
}

#[async_trait]
impl StageExecutor for FailingExecutor {
    fn step(&self) -> Step {
        self.step
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StepPayload, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.recovery {
            Some((failures, ref payload)) if call > failures => Ok(payload.clone()),
            _ => Err(self.error()),
        }
    }
}

/// Wraps an executor and counts its invocations.
pub struct CountingExecutor {
    inner: Arc<dyn StageExecutor>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl CountingExecutor {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn StageExecutor>) -> Self {
        Self {
            inner,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleeps before delegating.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CountingExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingExecutor")
            .field("step", &self.inner.step())
            .field("calls", &self.calls())
            .finish()
    }
}

#[async_trait]
impl StageExecutor for CountingExecutor {
    fn step(&self) -> Step {
        self.inner.step()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StepPayload, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::IntermediateResultBag;
    use crate::stages::ChartDerivationExecutor;
    use crate::testing::{sample_input, sample_results};
    use tokio_test::{assert_err, assert_ok, block_on};
    use uuid::Uuid;

    fn context(step: Step) -> StageContext {
        StageContext::new(
            Uuid::nil(),
            step,
            Arc::new(sample_input()),
            IntermediateResultBag::new(),
        )
    }

    fn request(step: Step) -> GenerationRequest {
        let input = sample_input();
        let results = sample_results(&input);
        GenerationRequest {
            step,
            language: input.language.clone(),
            focus: input.focus.unwrap_or_default(),
            question: None,
            chart: results.chart().unwrap().clone(),
            hidden_stems: results.hidden_stems().unwrap().clone(),
            daewun: Vec::new(),
            prior_sections: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_scripted_backend_consumes_failures() {
        let backend = ScriptedBackend::new().with_failures(
            Step::Scoring,
            vec![BackendError::Timeout("slow".to_string())],
        );

        assert!(backend.generate(&request(Step::Scoring)).await.is_err());
        let body = backend.generate(&request(Step::Scoring)).await.unwrap();
        assert_eq!(body["overall"], 74);
        assert_eq!(backend.calls(Step::Scoring), 2);
        assert_eq!(backend.total_calls(), 2);
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_backend_persistent_failure() {
        let backend = ScriptedBackend::new()
            .with_persistent_failure(Step::Aptitude, BackendError::Other("down".to_string()));

        for _ in 0..3 {
            assert!(backend.generate(&request(Step::Aptitude)).await.is_err());
        }
        assert!(backend.generate(&request(Step::Personality)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_backend_delay() {
        let backend =
            ScriptedBackend::new().with_delay(Step::Personality, Duration::from_millis(250));

        let start = tokio::time::Instant::now();
        backend.generate(&request(Step::Personality)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[test]
    fn test_in_memory_store() {
        let store =
            InMemoryStore::new().with_failures(vec![StoreError::Other("disk full".to_string())]);
        let input = sample_input();
        let record = AnalysisRecord {
            run_id: Uuid::nil(),
            input_fingerprint: input.fingerprint(),
            language: input.language.clone(),
            results: IntermediateResultBag::new(),
            created_at: chrono::Utc::now(),
        };

        assert_err!(block_on(store.save_analysis(&record)));
        assert!(store.is_empty());
        let id = assert_ok!(block_on(store.save_analysis(&record)));
        assert_eq!(id, "analysis-1");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_executor_recovers() {
        let payload = sample_results(&sample_input())
            .get(Step::Scoring)
            .unwrap()
            .clone();
        let executor =
            FailingExecutor::new(Step::Scoring, ErrorCode::RateLimited).recovering_with(1, payload);
        let ctx = context(Step::Scoring);

        let err = executor.execute(&ctx).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RateLimited);
        assert!(executor.execute(&ctx).await.is_ok());
        assert_eq!(executor.calls(), 2);
    }

    #[tokio::test]
    async fn test_failing_executor_codes() {
        for code in ErrorCode::ALL {
            let executor = FailingExecutor::new(Step::Visualization, code);
            let err = executor.execute(&context(Step::Visualization)).await.unwrap_err();
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_counting_executor() {
        let executor = CountingExecutor::new(Arc::new(ChartDerivationExecutor));
        assert_eq!(executor.step(), Step::ChartDerivation);

        let ctx = context(Step::ChartDerivation);
        assert_ok!(block_on(executor.execute(&ctx)));
        assert_ok!(block_on(executor.execute(&ctx)));
        assert_eq!(executor.calls(), 2);
    }
}
