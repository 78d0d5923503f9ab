//! Step results.
//!
//! This module provides:
//! - Typed payloads for every step
//! - The append-only `IntermediateResultBag`

mod bag;
mod payload;

pub use bag::IntermediateResultBag;
pub use payload::{
    AnalysisSection, ChartDerivation, ChartPoint, FinalReport, HiddenStem, HiddenStemTable,
    PersistenceAck, PillarHiddenStems, PillarSummary, ScoreCard, StepPayload, VisualizationData,
};
