//! Observer trait, pipeline events and built-in observers.

use super::ProgressEvent;
use crate::core::{RunStatus, Step};
use crate::errors::PipelineError;
use crate::results::StepPayload;
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn, Level};
use uuid::Uuid;

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The run began.
    RunStarted {
        /// Run identifier.
        run_id: Uuid,
        /// Resume point, when continuing a hydrated run.
        resumed_from: Option<Step>,
    },
    /// Progress changed.
    Progress(ProgressEvent),
    /// A step attempt is about to run.
    StepStarted {
        /// The step.
        step: Step,
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// A step produced its output.
    StepCompleted {
        /// The step.
        step: Step,
        /// The output.
        payload: StepPayload,
        /// Time spent in the step, retries included.
        duration_ms: u64,
    },
    /// A step attempt failed.
    StepFailed {
        /// The step.
        step: Step,
        /// Normalized error.
        error: PipelineError,
        /// Whether the scheduler will retry.
        will_retry: bool,
    },
    /// The run reached a terminal status.
    RunFinished {
        /// Run identifier.
        run_id: Uuid,
        /// Final status.
        status: RunStatus,
        /// The packaged error for failed runs.
        error: Option<PipelineError>,
        /// Wall-clock duration of the run.
        total_duration_ms: u64,
    },
}

impl PipelineEvent {
    /// Dotted event name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::Progress(_) => "run.progress",
            Self::StepStarted { .. } => "step.started",
            Self::StepCompleted { .. } => "step.completed",
            Self::StepFailed { .. } => "step.failed",
            Self::RunFinished { .. } => "run.finished",
        }
    }
}

/// Receives pipeline events.
///
/// Called synchronously on the run's task. A panicking observer is logged
/// and skipped; it never affects the run.
pub trait PipelineObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &PipelineEvent);
}

/// Fans events out to registered observers.
#[derive(Clone, Default)]
pub struct EventEmitter {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl EventEmitter {
    /// Creates an emitter.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Returns true if no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Delivers an event to every observer.
    pub fn emit(&self, event: &PipelineEvent) {
        for (index, observer) in self.observers.iter().enumerate() {
            let delivered = catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
            if delivered.is_err() {
                warn!(
                    observer = index,
                    event_type = event.name(),
                    "Observer panicked; event skipped"
                );
            }
        }
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("observers", &self.observers.len())
            .finish()
    }
}

type ProgressFn = Box<dyn Fn(Step, f64, u64) + Send + Sync>;
type StepCompleteFn = Box<dyn Fn(Step, &StepPayload) + Send + Sync>;
type ErrorFn = Box<dyn Fn(Step, &PipelineError) + Send + Sync>;

/// Adapts plain callbacks to the observer interface.
///
/// `on_error` fires once per failed run, with the packaged error.
#[derive(Default)]
pub struct CallbackObserver {
    on_progress: Option<ProgressFn>,
    on_step_complete: Option<StepCompleteFn>,
    on_error: Option<ErrorFn>,
}

impl CallbackObserver {
    /// Creates an observer with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with `(step, percent, estimated_remaining_ms)`.
    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(Step, f64, u64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Called when a step produces its output.
    #[must_use]
    pub fn on_step_complete(
        mut self,
        f: impl Fn(Step, &StepPayload) + Send + Sync + 'static,
    ) -> Self {
        self.on_step_complete = Some(Box::new(f));
        self
    }

    /// Called when a run fails.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(Step, &PipelineError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for CallbackObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackObserver")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_step_complete", &self.on_step_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl PipelineObserver for CallbackObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Progress(progress) => {
                if let Some(ref f) = self.on_progress {
                    f(
                        progress.current_step,
                        progress.progress_percent,
                        progress.estimated_remaining_ms,
                    );
                }
            }
            PipelineEvent::StepCompleted { step, payload, .. } => {
                if let Some(ref f) = self.on_step_complete {
                    f(*step, payload);
                }
            }
            PipelineEvent::RunFinished {
                error: Some(error), ..
            } => {
                if let Some(ref f) = self.on_error {
                    f(error.failed_step, error);
                }
            }
            _ => {}
        }
    }
}

/// Writes every event through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    level: Level,
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingObserver {
    /// Creates a logging observer with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging observer.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl PipelineObserver for LoggingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        let event_type = event.name();
        match event {
            PipelineEvent::StepFailed {
                step,
                error,
                will_retry,
            } => {
                warn!(event_type, step = %step, code = %error.code, will_retry, "{}", error.message);
            }
            PipelineEvent::Progress(progress) if self.level == Level::DEBUG => {
                debug!(
                    event_type,
                    step = %progress.current_step,
                    percent = progress.progress_percent,
                    eta_ms = progress.estimated_remaining_ms,
                    "Event: {event_type}"
                );
            }
            PipelineEvent::Progress(_) => {}
            PipelineEvent::StepCompleted {
                step, duration_ms, ..
            } => {
                if self.level == Level::DEBUG {
                    debug!(event_type, step = %step, duration_ms, "Event: {event_type}");
                } else {
                    info!(event_type, step = %step, duration_ms, "Event: {event_type}");
                }
            }
            _ => {
                if self.level == Level::DEBUG {
                    debug!(event_type, event_data = ?event, "Event: {event_type}");
                } else {
                    info!(event_type, event_data = ?event, "Event: {event_type}");
                }
            }
        }
    }
}

/// Records events for assertions.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: parking_lot::RwLock<Vec<PipelineEvent>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Collected progress updates, in order.
    #[must_use]
    pub fn progress(&self) -> Vec<ProgressEvent> {
        self.events
            .read()
            .iter()
            .filter_map(|event| match event {
                PipelineEvent::Progress(progress) => Some(progress.clone()),
                _ => None,
            })
            .collect()
    }

    /// Steps that started, in order (one entry per attempt).
    #[must_use]
    pub fn started_steps(&self) -> Vec<Step> {
        self.events
            .read()
            .iter()
            .filter_map(|event| match event {
                PipelineEvent::StepStarted { step, .. } => Some(*step),
                _ => None,
            })
            .collect()
    }

    /// Steps that completed, in order.
    #[must_use]
    pub fn completed_steps(&self) -> Vec<Step> {
        self.events
            .read()
            .iter()
            .filter_map(|event| match event {
                PipelineEvent::StepCompleted { step, .. } => Some(*step),
                _ => None,
            })
            .collect()
    }

    /// Events whose name starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|event| event.name().starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl PipelineObserver for CollectingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use parking_lot::Mutex;

    struct PanickingObserver;

    impl PipelineObserver for PanickingObserver {
        fn on_event(&self, _event: &PipelineEvent) {
            panic!("observer bug");
        }
    }

    fn failure() -> PipelineError {
        PipelineError {
            failed_step: Step::Scoring,
            message: "boom".to_string(),
            code: ErrorCode::Unknown,
            retryable: true,
        }
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let collector = Arc::new(CollectingObserver::new());
        let emitter = EventEmitter::new(vec![
            Arc::new(PanickingObserver),
            collector.clone(),
        ]);

        emitter.emit(&PipelineEvent::StepStarted {
            step: Step::ChartDerivation,
            attempt: 1,
        });

        assert_eq!(collector.len(), 1);
        assert_eq!(collector.started_steps(), vec![Step::ChartDerivation]);
    }

    #[test]
    fn test_callback_observer_routes_events() {
        let progress = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let observer = {
            let progress = progress.clone();
            let errors = errors.clone();
            CallbackObserver::new()
                .on_progress(move |step, percent, _| progress.lock().push((step, percent)))
                .on_error(move |step, _| errors.lock().push(step))
        };

        observer.on_event(&PipelineEvent::Progress(ProgressEvent {
            current_step: Step::Aptitude,
            progress_percent: 40.0,
            estimated_remaining_ms: 1_000,
        }));
        observer.on_event(&PipelineEvent::StepFailed {
            step: Step::Scoring,
            error: failure(),
            will_retry: false,
        });
        observer.on_event(&PipelineEvent::RunFinished {
            run_id: Uuid::nil(),
            status: RunStatus::Failed,
            error: Some(failure()),
            total_duration_ms: 5,
        });

        assert_eq!(progress.lock().as_slice(), &[(Step::Aptitude, 40.0)]);
        assert_eq!(errors.lock().as_slice(), &[Step::Scoring]);
    }

    #[test]
    fn test_logging_observer_handles_every_event() {
        let observer = LoggingObserver::debug();
        observer.on_event(&PipelineEvent::RunStarted {
            run_id: Uuid::nil(),
            resumed_from: None,
        });
        observer.on_event(&PipelineEvent::StepFailed {
            step: Step::Scoring,
            error: failure(),
            will_retry: true,
        });
        // Should not panic
    }

    #[test]
    fn test_collecting_observer_filter() {
        let collector = CollectingObserver::new();
        collector.on_event(&PipelineEvent::StepStarted {
            step: Step::Scoring,
            attempt: 1,
        });
        collector.on_event(&PipelineEvent::RunStarted {
            run_id: Uuid::nil(),
            resumed_from: None,
        });

        assert_eq!(collector.events_of_type("step.").len(), 1);
        collector.clear();
        assert!(collector.is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::StepStarted {
            step: Step::FortuneOutlook,
            attempt: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_started");
        assert_eq!(json["step"], "fortune-outlook");
    }
}
