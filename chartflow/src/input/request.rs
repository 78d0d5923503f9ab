//! The immutable pipeline input.

use super::{Branch, Pillar, Pillars, Stem};
use crate::errors::InputValidationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Maximum characters accepted in the free-text question.
pub const MAX_QUESTION_CHARS: usize = 500;

/// Maximum number of decade periods accepted.
pub const MAX_DAEWUN_PERIODS: usize = 12;

/// One decade period ("daewun").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaewunPeriod {
    /// Age at which the period begins.
    pub start_age: u8,
    /// Heavenly stem governing the period.
    pub stem: Stem,
    /// Earthly branch governing the period.
    pub branch: Branch,
}

impl DaewunPeriod {
    /// Creates a new decade period.
    #[must_use]
    pub const fn new(start_age: u8, stem: Stem, branch: Branch) -> Self {
        Self {
            start_age,
            stem,
            branch,
        }
    }
}

/// Area the caller wants the analysis to emphasise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusArea {
    /// No particular emphasis.
    #[default]
    Overall,
    /// Work and career.
    Career,
    /// Relationships and marriage.
    Relationships,
    /// Money.
    Wealth,
    /// Health.
    Health,
    /// Study and exams.
    Study,
}

/// Everything a run needs.
///
/// Never mutated once a run starts; a resumed run must be given the same
/// input, which `fingerprint` verifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInput {
    /// The four pillars.
    pub pillars: Pillars,
    /// Decade periods in ascending age order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daewun: Option<Vec<DaewunPeriod>>,
    /// Requested emphasis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<FocusArea>,
    /// Free-text question from the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// BCP 47 language tag for generated content.
    pub language: String,
}

impl PipelineInput {
    /// Creates an input with only the required fields.
    #[must_use]
    pub fn new(pillars: Pillars, language: impl Into<String>) -> Self {
        Self {
            pillars,
            daewun: None,
            focus: None,
            question: None,
            language: language.into(),
        }
    }

    /// Sets the decade periods.
    #[must_use]
    pub fn with_daewun(mut self, periods: Vec<DaewunPeriod>) -> Self {
        self.daewun = Some(periods);
        self
    }

    /// Sets the focus area.
    #[must_use]
    pub fn with_focus(mut self, focus: FocusArea) -> Self {
        self.focus = Some(focus);
        self
    }

    /// Sets the free-text question.
    #[must_use]
    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    /// Validates the input.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), InputValidationError> {
        for (position, pillar) in self.pillars.iter() {
            validate_pillar(position.as_str(), pillar)?;
        }

        if let Some(ref periods) = self.daewun {
            validate_daewun(periods)?;
        }

        if let Some(ref question) = self.question {
            if question.trim().is_empty() {
                return Err(InputValidationError::new("question", "must not be blank"));
            }
            if question.chars().count() > MAX_QUESTION_CHARS {
                return Err(InputValidationError::new(
                    "question",
                    format!("must be at most {MAX_QUESTION_CHARS} characters"),
                ));
            }
        }

        if !language_pattern().is_some_and(|pattern| pattern.is_match(&self.language)) {
            return Err(InputValidationError::new(
                "language",
                format!("'{}' is not a language tag", self.language),
            ));
        }

        Ok(())
    }

    /// SHA-256 hex digest of the canonical JSON encoding.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

fn language_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z]{2,3}(-[A-Za-z0-9]{2,8})*$").ok())
        .as_ref()
}

fn validate_pillar(position: &str, pillar: &Pillar) -> Result<(), InputValidationError> {
    if let Some(declared) = pillar.stem_element {
        if declared != pillar.stem.element() {
            return Err(InputValidationError::new(
                format!("pillars.{position}.stem_element"),
                format!(
                    "declared {declared} but stem {} is {}",
                    pillar.stem.hanja(),
                    pillar.stem.element()
                ),
            ));
        }
    }
    if let Some(declared) = pillar.branch_element {
        if declared != pillar.branch.element() {
            return Err(InputValidationError::new(
                format!("pillars.{position}.branch_element"),
                format!(
                    "declared {declared} but branch {} is {}",
                    pillar.branch.hanja(),
                    pillar.branch.element()
                ),
            ));
        }
    }
    Ok(())
}

fn validate_daewun(periods: &[DaewunPeriod]) -> Result<(), InputValidationError> {
    if periods.is_empty() {
        return Err(InputValidationError::new(
            "daewun",
            "must contain at least one period when present",
        ));
    }
    if periods.len() > MAX_DAEWUN_PERIODS {
        return Err(InputValidationError::new(
            "daewun",
            format!("must contain at most {MAX_DAEWUN_PERIODS} periods"),
        ));
    }
    for (i, pair) in periods.windows(2).enumerate() {
        if pair[1].start_age <= pair[0].start_age {
            return Err(InputValidationError::new(
                format!("daewun[{}].start_age", i + 1),
                "periods must be in strictly ascending age order",
            ));
        }
    }
    Ok(())
}
