//! Error types for the chartflow engine.
//!
//! Errors fall into three groups:
//!
//! - caller errors (`EngineError`), rejected before any step runs;
//! - stage errors (`StageError`), normalized into the fixed `ErrorCode`
//!   vocabulary and surfaced inside a `PipelineFailure`;
//! - port errors (`BackendError`, `StoreError`) raised by the external
//!   collaborators and converted into stage errors.

use crate::core::Step;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// The main error type for engine operations.
///
/// A returned `EngineError` always means nothing was executed; stage
/// failures are reported through `RunOutcome::Failed` instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The pipeline input failed validation.
    #[error("{0}")]
    InvalidInput(#[from] InputValidationError),

    /// The hydration state was missing, stale or malformed.
    #[error("{0}")]
    Hydration(#[from] HydrationError),

    /// The step registry declaration is invalid.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// The engine was assembled with missing or invalid parts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The normalized error vocabulary reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// The request itself is wrong; retrying cannot help.
    InvalidInput,
    /// The backend throttled the request.
    RateLimited,
    /// The backend did not answer in time.
    UpstreamTimeout,
    /// Anything else.
    Unknown,
}

impl ErrorCode {
    /// All codes.
    pub const ALL: [Self; 4] = [
        Self::InvalidInput,
        Self::RateLimited,
        Self::UpstreamTimeout,
        Self::Unknown,
    ];

    /// Whether a caller may reasonably retry a failure with this code.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::InvalidInput)
    }

    /// Stable key used in logs and serialized errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid-input",
            Self::RateLimited => "rate-limited",
            Self::UpstreamTimeout => "upstream-timeout",
            Self::Unknown => "unknown",
        }
    }

    /// Classifies a free-form error message.
    ///
    /// Used for errors that arrive without a typed variant. Patterns are
    /// checked in order, so a message matching both rate limiting and
    /// timeout classifies as rate limited.
    #[must_use]
    pub fn classify_message(message: &str) -> Self {
        static PATTERNS: OnceLock<Option<[(Regex, ErrorCode); 3]>> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(|| {
            Some([
                (
                    Regex::new(r"(?i)\b429\b|rate[ _-]?limit|too many requests|quota exceeded").ok()?,
                    ErrorCode::RateLimited,
                ),
                (
                    Regex::new(r"(?i)timed? ?out|timeout|deadline exceeded|\b504\b").ok()?,
                    ErrorCode::UpstreamTimeout,
                ),
                (
                    Regex::new(r"(?i)invalid (input|request|argument)|\b400\b|\b422\b").ok()?,
                    ErrorCode::InvalidInput,
                ),
            ])
        });

        patterns
            .iter()
            .flatten()
            .find(|(pattern, _)| pattern.is_match(message))
            .map_or(Self::Unknown, |(_, code)| *code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized error reported for a failed run.
///
/// Produced exactly once per failing run. `retryable` is a hint to the
/// caller; the engine never acts on it after the run returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("Step '{failed_step}' failed ({code}): {message}")]
pub struct PipelineError {
    /// The step whose executor failed.
    pub failed_step: Step,
    /// Human-readable message from the executor.
    pub message: String,
    /// Normalized error code.
    pub code: ErrorCode,
    /// Whether the caller may retry.
    pub retryable: bool,
}

impl PipelineError {
    /// Builds the normalized error for a stage failure.
    #[must_use]
    pub fn from_stage(step: Step, error: &StageError) -> Self {
        let code = error.code();
        Self {
            failed_step: step,
            message: error.to_string(),
            code,
            retryable: code.is_retryable(),
        }
    }
}

/// Error raised by a stage executor.
#[derive(Debug, Error)]
pub enum StageError {
    /// The executor rejected its inputs.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The backend throttled the request.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Backend message.
        message: String,
        /// Suggested wait before retrying, when the backend provided one.
        retry_after_ms: Option<u64>,
    },

    /// The backend did not answer in time.
    #[error("Upstream timeout: {0}")]
    Timeout(String),

    /// A prerequisite result was not in the bag.
    #[error("Missing prerequisite result for step '{0}'")]
    MissingPrerequisite(Step),

    /// The backend answered with content that does not match the step schema.
    #[error("Malformed output for step '{step}': {reason}")]
    MalformedOutput {
        /// The step that received the output.
        step: Step,
        /// What was wrong with it.
        reason: String,
    },

    /// The backend failed for another reason.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The analysis store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// An untyped error from a custom executor.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl StageError {
    /// Creates a malformed output error.
    #[must_use]
    pub fn malformed(step: Step, reason: impl Into<String>) -> Self {
        Self::MalformedOutput {
            step,
            reason: reason.into(),
        }
    }

    /// Maps the error onto the fixed code vocabulary.
    ///
    /// Typed variants map directly; only `Backend`, `Store` and `Unexpected`
    /// fall back to message classification.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::Timeout(_) => ErrorCode::UpstreamTimeout,
            Self::MissingPrerequisite(_) | Self::MalformedOutput { .. } => ErrorCode::Unknown,
            Self::Backend(message) | Self::Store(message) => ErrorCode::classify_message(message),
            Self::Unexpected(err) => ErrorCode::classify_message(&format!("{err:#}")),
        }
    }

    /// Backend-suggested wait before retrying.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

/// Error raised by the generative backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Throttled.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Backend message.
        message: String,
        /// Suggested wait before retrying.
        retry_after_ms: Option<u64>,
    },

    /// No answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The backend rejected the request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The backend is down.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl From<BackendError> for StageError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::RateLimited {
                message,
                retry_after_ms,
            } => Self::RateLimited {
                message,
                retry_after_ms,
            },
            BackendError::Timeout(message) => Self::Timeout(message),
            BackendError::InvalidRequest(message) => Self::InvalidInput(message),
            BackendError::Unavailable(message) | BackendError::Other(message) => {
                Self::Backend(message)
            }
        }
    }
}

/// Error raised by the analysis store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store rejected the record.
    #[error("record rejected: {0}")]
    Rejected(String),

    /// The store did not answer in time.
    #[error("store timed out: {0}")]
    Timeout(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl From<StoreError> for StageError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(message) => Self::InvalidInput(message),
            StoreError::Timeout(message) => Self::Timeout(message),
            StoreError::Other(message) => Self::Store(message),
        }
    }
}

/// Error raised when the pipeline input is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid input field '{field}': {message}")]
pub struct InputValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl InputValidationError {
    /// Creates a new input validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error raised when a hydration snapshot cannot be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HydrationError {
    /// The snapshot was written by an incompatible engine version.
    #[error("Unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version in the snapshot.
        found: u32,
        /// Version this engine writes.
        expected: u32,
    },

    /// The snapshot names a step this engine does not know.
    #[error("Snapshot contains unknown step '{0}'")]
    UnknownStep(String),

    /// A step before the resume point has no entry.
    #[error("Snapshot is missing a result for step '{0}'")]
    MissingEntry(Step),

    /// An entry does not match its step's schema.
    #[error("Snapshot entry for step '{step}' is invalid: {reason}")]
    InvalidEntry {
        /// The offending step.
        step: Step,
        /// Why it was rejected.
        reason: String,
    },

    /// The snapshot was produced for a different input.
    #[error("Snapshot was produced for a different input")]
    InputMismatch,

    /// `execute_from_step` was called without a prior `hydrate`.
    #[error("No hydrated state for resuming at step '{0}'")]
    NotHydrated(Step),

    /// `execute_from_step` was called with a different resume point.
    #[error("Hydrated for step '{hydrated}' but asked to resume at '{requested}'")]
    ResumePointMismatch {
        /// Resume point given to `hydrate`.
        hydrated: Step,
        /// Resume point given to `execute_from_step`.
        requested: Step,
    },
}

/// Error raised when writing to the intermediate result bag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultBagError {
    /// The step already has a result; the bag is append-only.
    #[error("Result conflict: step '{0}' already has a result")]
    Conflict(Step),

    /// The payload kind does not belong to the step.
    #[error("Payload of kind '{kind}' does not belong to step '{step}'")]
    SchemaMismatch {
        /// The target step.
        step: Step,
        /// The payload kind that was offered.
        kind: &'static str,
    },
}

/// Error raised when building a step registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A dependency cycle was declared.
    #[error("Cycle detected in step registry: {}", format_path(.0))]
    Cycle(Vec<Step>),

    /// A step depends on a step that runs after it.
    #[error("Step '{step}' depends on later step '{prerequisite}'")]
    ForwardDependency {
        /// The dependent step.
        step: Step,
        /// The prerequisite that runs later.
        prerequisite: Step,
    },

    /// A step depends on itself.
    #[error("Step '{0}' cannot depend on itself")]
    SelfDependency(Step),
}

fn format_path(path: &[Step]) -> String {
    path.iter()
        .map(|step| step.key())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_retryable() {
        assert!(!ErrorCode::InvalidInput.is_retryable());
        assert!(ErrorCode::RateLimited.is_retryable());
        assert!(ErrorCode::UpstreamTimeout.is_retryable());
        assert!(ErrorCode::Unknown.is_retryable());
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(
            ErrorCode::classify_message("HTTP 429 Too Many Requests"),
            ErrorCode::RateLimited
        );
        assert_eq!(
            ErrorCode::classify_message("rate limit exceeded, request timed out"),
            ErrorCode::RateLimited
        );
        assert_eq!(
            ErrorCode::classify_message("request timed out after 30s"),
            ErrorCode::UpstreamTimeout
        );
        assert_eq!(
            ErrorCode::classify_message("invalid request: missing field"),
            ErrorCode::InvalidInput
        );
        assert_eq!(ErrorCode::classify_message("disk on fire"), ErrorCode::Unknown);
    }

    #[test]
    fn test_backend_rate_limit_maps_to_rate_limited() {
        let err: StageError = BackendError::RateLimited {
            message: "slow down".to_string(),
            retry_after_ms: Some(250),
        }
        .into();

        assert_eq!(err.code(), ErrorCode::RateLimited);
        assert_eq!(err.retry_after_ms(), Some(250));

        let pipeline_err = PipelineError::from_stage(Step::Personality, &err);
        assert_eq!(pipeline_err.code, ErrorCode::RateLimited);
        assert!(pipeline_err.retryable);
    }

    #[test]
    fn test_unexpected_error_is_classified_by_message() {
        let err = StageError::from(anyhow::anyhow!("upstream said: rate limited"));
        assert_eq!(err.code(), ErrorCode::RateLimited);

        let err = StageError::from(anyhow::anyhow!("boom"));
        assert_eq!(err.code(), ErrorCode::Unknown);
    }

    #[test]
    fn test_invalid_input_is_not_retryable() {
        let err: StageError = BackendError::InvalidRequest("bad chart".to_string()).into();
        let pipeline_err = PipelineError::from_stage(Step::BaselineAnalysis, &err);
        assert_eq!(pipeline_err.code, ErrorCode::InvalidInput);
        assert!(!pipeline_err.retryable);
    }

    #[test]
    fn test_store_errors() {
        let err: StageError = StoreError::Timeout("db".to_string()).into();
        assert_eq!(err.code(), ErrorCode::UpstreamTimeout);

        let err: StageError = StoreError::Other("connection reset".to_string()).into();
        assert_eq!(err.code(), ErrorCode::Unknown);
    }

    #[test]
    fn test_registry_cycle_message() {
        let err = RegistryError::Cycle(vec![Step::Scoring, Step::Personality, Step::Scoring]);
        assert!(err.to_string().contains("scoring -> personality -> scoring"));
    }

    #[test]
    fn test_pipeline_error_serialization() {
        let err = PipelineError {
            failed_step: Step::Scoring,
            message: "boom".to_string(),
            code: ErrorCode::UpstreamTimeout,
            retryable: true,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["failed_step"], "scoring");
        assert_eq!(json["code"], "upstream-timeout");
    }
}
