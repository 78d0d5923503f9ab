//! Testing utilities for analysis pipelines.
//!
//! This module provides:
//! - Sample inputs and complete result bags
//! - A scripted backend and an in-memory store
//! - Failing and counting executors
//! - Assertions for run outcomes

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_completed, assert_failed_at, assert_progress_monotonic, assert_results_exactly,
    assert_step_status,
};
pub use fixtures::{
    sample_input, sample_results, sample_scores, sample_section, sample_section_json,
    SAMPLE_ANALYSIS_ID,
};
pub use mocks::{CountingExecutor, FailingExecutor, InMemoryStore, ScriptedBackend};
