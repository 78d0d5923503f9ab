//! Core step types.
//!
//! This module provides:
//! - The fixed `Step` enumeration
//! - Per-step and per-run status enums

mod status;
mod step;

pub use status::{RunStatus, StepStatus};
pub use step::{Step, UnknownStepError};
