//! Engine configuration.
//!
//! Loaded from JSON with per-field defaults, then optionally overridden by
//! `CHARTFLOW_*` environment variables.

use crate::core::Step;
use crate::pipeline::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable toggling fan-out.
pub const ENV_ENABLE_PARALLEL: &str = "CHARTFLOW_ENABLE_PARALLEL";
/// Environment variable setting the default retry budget.
pub const ENV_RETRY_COUNT: &str = "CHARTFLOW_RETRY_COUNT";
/// Environment variable setting the base retry delay.
pub const ENV_RETRY_BASE_DELAY_MS: &str = "CHARTFLOW_RETRY_BASE_DELAY_MS";

/// Error raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// The file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The JSON could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment variable held an unusable value.
    #[error("Invalid value '{value}' for {name}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Per-run options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Launch fan-out groups concurrently.
    #[serde(default = "default_enable_parallel")]
    pub enable_parallel: bool,
    /// In-run retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            enable_parallel: default_enable_parallel(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RunOptions {
    /// Creates default run options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables fan-out.
    #[must_use]
    pub fn with_parallel(mut self, enabled: bool) -> Self {
        self.enable_parallel = enabled;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default for `RunOptions::enable_parallel`.
    #[serde(default = "default_enable_parallel")]
    pub enable_parallel: bool,
    /// Default retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Expected step durations overriding the built-in table.
    #[serde(default)]
    pub step_weights: BTreeMap<Step, u64>,
    /// Language used when an input leaves its tag empty.
    #[serde(default = "default_language")]
    pub language_default: String,
}

fn default_enable_parallel() -> bool {
    true
}

fn default_language() -> String {
    "ko".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_parallel: default_enable_parallel(),
            retry: RetryPolicy::default(),
            step_weights: BTreeMap::new(),
            language_default: default_language(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` on malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, or
    /// `ConfigError::Parse` on malformed JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Applies `CHARTFLOW_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnv` if a variable cannot be parsed.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnv` if a variable cannot be parsed.
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_ENABLE_PARALLEL) {
            self.enable_parallel = parse_bool(&value).ok_or(ConfigError::InvalidEnv {
                name: ENV_ENABLE_PARALLEL,
                value,
            })?;
        }

        if let Some(value) = lookup(ENV_RETRY_COUNT) {
            let count = value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_RETRY_COUNT,
                value: value.clone(),
            })?;
            self.retry = self.retry.with_max_retries(count);
        }

        if let Some(value) = lookup(ENV_RETRY_BASE_DELAY_MS) {
            let delay = value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_RETRY_BASE_DELAY_MS,
                value: value.clone(),
            })?;
            self.retry = self.retry.with_base_delay_ms(delay);
        }

        Ok(self)
    }

    /// Sets the fan-out default.
    #[must_use]
    pub fn with_parallel(mut self, enabled: bool) -> Self {
        self.enable_parallel = enabled;
        self
    }

    /// Sets the default retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the expected duration of one step.
    #[must_use]
    pub fn with_step_weight(mut self, step: Step, expected_ms: u64) -> Self {
        self.step_weights.insert(step, expected_ms);
        self
    }

    /// The run options used when a caller supplies none.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            enable_parallel: self.enable_parallel,
            retry: self.retry.clone(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
