use crate::error::ClassifiedError;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

/// Delay reported for errors that will not be retried.
pub const NON_RETRYABLE_DELAY: Duration = Duration::from_millis(100);

/// Backoff curve: `min(base * growth^attempt, max)` plus symmetric jitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub growth_factor: f64,
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn query() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 8_000,
            growth_factor: 2.0,
            jitter_ratio: 0.1,
        }
    }

    /// Gentler and shorter than [`RetryPolicy::query`] so writes settle fast.
    pub fn mutation() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            growth_factor: 1.5,
            jitter_ratio: 0.1,
        }
    }

    pub fn with_overrides(mut self, overrides: &RetryOverrides) -> Self {
        if let Some(max_attempts) = overrides.max_attempts {
            self.max_attempts = max_attempts;
        }
        if let Some(base_delay_ms) = overrides.base_delay_ms {
            self.base_delay_ms = base_delay_ms;
        }
        if let Some(max_delay_ms) = overrides.max_delay_ms {
            self.max_delay_ms = max_delay_ms;
        }
        if let Some(growth_factor) = overrides.growth_factor {
            self.growth_factor = growth_factor;
        }
        if let Some(jitter_ratio) = overrides.jitter_ratio {
            self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        }
        self
    }

    /// `attempt_number` counts failed attempts so far.
    pub fn should_retry(
        &self,
        error: &ClassifiedError,
        attempt_number: u32,
        max_attempts: u32,
    ) -> bool {
        if attempt_number >= max_attempts {
            return false;
        }
        error.retryable()
    }

    /// `attempt_number` is the zero-based index of the retry about to run.
    pub fn compute_delay(&self, attempt_number: u32, error: &ClassifiedError) -> Duration {
        let unit_jitter = rand::rng().random_range(-1.0..=1.0);
        self.delay_with_jitter(attempt_number, error, unit_jitter)
    }

    pub(crate) fn delay_with_jitter(
        &self,
        attempt_number: u32,
        error: &ClassifiedError,
        unit_jitter: f64,
    ) -> Duration {
        if !error.retryable() {
            return NON_RETRYABLE_DELAY;
        }
        let base = self.capped_delay_ms(attempt_number);
        let jitter = base * self.jitter_ratio * unit_jitter.clamp(-1.0, 1.0);
        Duration::from_millis((base + jitter).max(0.0).round() as u64)
    }

    fn capped_delay_ms(&self, attempt_number: u32) -> f64 {
        let exponent = i32::try_from(attempt_number).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.growth_factor.powi(exponent);
        raw.min(self.max_delay_ms as f64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::query()
    }
}

/// Partial retry settings read from configuration and layered over a preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub growth_factor: Option<f64>,
    pub jitter_ratio: Option<f64>,
}
