//! In-run retry policy with per-code budgets, backoff and jitter.

use crate::errors::{ErrorCode, StageError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Hard ceiling on retries for any single step.
pub const MAX_RETRY_COUNT: u32 = 2;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// How often, and how patiently, a failing step is retried within a run.
///
/// `max_retries` is the default budget for every retryable code;
/// `per_code` overrides it for individual codes. Every budget is clamped to
/// [`MAX_RETRY_COUNT`], and `invalid-input` is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Default retry budget for retryable codes.
    pub max_retries: u32,
    /// Per-code budget overrides.
    pub per_code: BTreeMap<ErrorCode, u32>,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            per_code: BTreeMap::new(),
            base_delay_ms: 500,
            max_delay_ms: 5000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets the default budget, clamped to [`MAX_RETRY_COUNT`].
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.min(MAX_RETRY_COUNT);
        self
    }

    /// Overrides the budget for one code.
    #[must_use]
    pub fn with_code_budget(mut self, code: ErrorCode, retries: u32) -> Self {
        self.per_code.insert(code, retries.min(MAX_RETRY_COUNT));
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Effective retry budget for a code.
    #[must_use]
    pub fn budget(&self, code: ErrorCode) -> u32 {
        if !code.is_retryable() {
            return 0;
        }
        self.per_code
            .get(&code)
            .copied()
            .unwrap_or(self.max_retries)
            .min(MAX_RETRY_COUNT)
    }

    fn backoff_delay(&self, retry: u32) -> u64 {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;
        match self.backoff {
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(retry)).min(max)
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry) + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// The budget for this code is spent.
    GiveUp,
    /// The code is never retried.
    NotRetryable,
}

/// Retry bookkeeping for one step within one run.
#[derive(Debug, Default)]
pub struct RetryState {
    retries: u32,
    previous_delay: Option<u64>,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries performed so far.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    /// Decides whether the failed attempt should be retried.
    ///
    /// A backend-supplied `retry_after_ms` raises the delay, still capped at
    /// `max_delay_ms`.
    pub fn decide(&mut self, policy: &RetryPolicy, error: &StageError) -> RetryDecision {
        let code = error.code();
        if !code.is_retryable() {
            return RetryDecision::NotRetryable;
        }
        if self.retries >= policy.budget(code) {
            return RetryDecision::GiveUp;
        }

        let mut delay = self.calculate_delay(policy);
        if let Some(hint) = error.retry_after_ms() {
            delay = delay.max(Duration::from_millis(hint.min(policy.max_delay_ms)));
        }
        self.retries += 1;
        RetryDecision::Retry(delay)
    }

    /// Calculates the delay before the next retry.
    #[must_use]
    pub fn calculate_delay(&mut self, policy: &RetryPolicy) -> Duration {
        let base = policy.base_delay_ms;
        let max = policy.max_delay_ms;
        let delay = policy.backoff_delay(self.retries);

        let jittered = match policy.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = self.previous_delay.unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                let next = if upper <= base {
                    base.min(max)
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                };
                self.previous_delay = Some(next);
                next
            }
        };

        Duration::from_millis(jittered)
    }
}
