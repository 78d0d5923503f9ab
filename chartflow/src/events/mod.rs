//! Progress and observability events.
//!
//! Observers are registered when the pipeline is built and receive typed
//! events synchronously as the run advances. There is no global sink.

mod observer;
mod progress;

pub use observer::{
    CallbackObserver, CollectingObserver, EventEmitter, LoggingObserver, PipelineEvent,
    PipelineObserver,
};
pub use progress::{ProgressEvent, ProgressTracker, StepWeights};
