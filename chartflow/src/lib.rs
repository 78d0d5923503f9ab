//! # Chartflow
//!
//! A multi-step analysis pipeline engine for birth-chart reports.
//!
//! Chartflow turns one structured input into a finished report by running a
//! fixed sequence of steps, with support for:
//!
//! - **Fan-out execution**: independent generative steps run concurrently
//! - **Partial results**: a failed run returns everything it produced
//! - **Resumable runs**: failures can be snapshotted, hydrated and resumed
//! - **Weighted progress**: observers receive percentages and time estimates
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chartflow::prelude::*;
//! use std::sync::Arc;
//!
//! let pipeline = AnalysisPipeline::builder()
//!     .with_backend(Arc::new(my_backend))
//!     .with_store(Arc::new(my_store))
//!     .with_observer(Arc::new(LoggingObserver::debug()))
//!     .build()?;
//!
//! match pipeline.execute(&input, &RunOptions::default()).await? {
//!     RunOutcome::Completed(report) => println!("{}", report.report.baseline.summary),
//!     RunOutcome::Failed(failure) => {
//!         let snapshot = failure.snapshot()?;
//!         // later, possibly in another process:
//!         let mut pipeline = build_pipeline()?;
//!         pipeline.hydrate(snapshot, failure.resume_point())?;
//!         pipeline.execute_from_step(&input, failure.resume_point()).await?;
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod input;
pub mod observability;
pub mod pipeline;
pub mod results;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EngineConfig, RunOptions};
    pub use crate::core::{RunStatus, Step, StepStatus};
    pub use crate::errors::{
        BackendError, EngineError, ErrorCode, HydrationError, PipelineError, StageError,
        StoreError,
    };
    pub use crate::events::{
        CallbackObserver, CollectingObserver, LoggingObserver, PipelineEvent, PipelineObserver,
        ProgressEvent,
    };
    pub use crate::input::{Branch, DaewunPeriod, FocusArea, Pillar, Pillars, PipelineInput, Stem};
    pub use crate::pipeline::{
        AnalysisPipeline, HydrationSnapshot, PipelineFailure, PipelineReport, RetryPolicy,
        RunOutcome,
    };
    pub use crate::results::{FinalReport, IntermediateResultBag, StepPayload};
    pub use crate::stages::{
        AnalysisBackend, AnalysisRecord, AnalysisStore, GenerationRequest, StageContext,
        StageExecutor,
    };
}
