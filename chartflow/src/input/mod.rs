//! Pipeline input model.
//!
//! This module provides:
//! - Chart primitives (stems, branches, elements, pillars)
//! - The immutable `PipelineInput` and its validation

mod chart;
mod request;

pub use chart::{Branch, Element, Pillar, PillarPosition, Pillars, Polarity, Stem};
pub use request::{
    DaewunPeriod, FocusArea, PipelineInput, MAX_DAEWUN_PERIODS, MAX_QUESTION_CHARS,
};
