//! Pipeline scheduling and execution.
//!
//! This module provides:
//! - The step registry and its fan-out groups
//! - Per-error-code retry policies
//! - Hydration snapshots for cross-process resume
//! - The `AnalysisPipeline` scheduler and its run outcomes

mod hydration;
mod outcome;
mod registry;
mod retry;
mod scheduler;

#[cfg(test)]
mod integration_tests;

pub use hydration::{restore, HydratedState, HydrationSnapshot, SNAPSHOT_VERSION};
pub use outcome::{PipelineFailure, PipelineMetadata, PipelineReport, RunOutcome};
pub use registry::{Phase, StepRegistry, StepRegistryBuilder};
pub use retry::{
    BackoffStrategy, JitterStrategy, RetryDecision, RetryPolicy, RetryState, MAX_RETRY_COUNT,
};
pub use scheduler::{AnalysisPipeline, AnalysisPipelineBuilder};
