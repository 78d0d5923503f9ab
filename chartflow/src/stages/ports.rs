//! Ports to the external collaborators.
//!
//! The engine never implements these for real. Generative steps call the
//! backend once per attempt; only the persistence step calls the store.

use crate::core::Step;
use crate::errors::{BackendError, StoreError};
use crate::input::{DaewunPeriod, FocusArea};
use crate::results::{AnalysisSection, ChartDerivation, HiddenStemTable, IntermediateResultBag};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Everything the backend needs to write one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The step asking.
    pub step: Step,
    /// Language to answer in.
    pub language: String,
    /// Requested emphasis.
    pub focus: FocusArea,
    /// Free-text question from the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Derived chart.
    pub chart: ChartDerivation,
    /// Hidden stem expansion.
    pub hidden_stems: HiddenStemTable,
    /// Decade periods.
    #[serde(default)]
    pub daewun: Vec<DaewunPeriod>,
    /// Sections this step builds on.
    #[serde(default)]
    pub prior_sections: BTreeMap<Step, AnalysisSection>,
}

/// The record handed to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Run that produced the analysis.
    pub run_id: Uuid,
    /// Fingerprint of the input.
    pub input_fingerprint: String,
    /// Report language.
    pub language: String,
    /// Every result produced before persistence.
    pub results: IntermediateResultBag,
    /// When the record was built.
    pub created_at: DateTime<Utc>,
}

/// The generative-analysis backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Generates the JSON body for one step.
    async fn generate(&self, request: &GenerationRequest)
        -> Result<serde_json::Value, BackendError>;
}

/// The persistence layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Stores a finished analysis and returns its identifier.
    async fn save_analysis(&self, record: &AnalysisRecord) -> Result<String, StoreError>;
}
