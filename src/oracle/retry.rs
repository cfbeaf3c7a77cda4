//! Retry policy for oracle calls.

use std::time::Duration;

use rand::{Rng, RngCore};

use super::OracleError;
use crate::config::RetryConfig;

/// Decides whether and when a failed oracle call is retried.
pub trait RetryPolicy: Send + Sync {
    /// Total attempts, including the first
    fn max_attempts(&self) -> u32;
    /// Whether this failure is worth another attempt
    fn is_retryable(&self, error: &OracleError) -> bool;
    /// Sleep before attempt `attempt + 1` (attempts count from 0)
    fn backoff(&self, attempt: u32, rng: &mut dyn RngCore) -> Duration;
}

/// Capped exponential backoff with multiplicative jitter.
///
/// `delay = min(max, base * factor^attempt) * uniform(jitter_low, jitter_high)`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    base_delay_secs: f64,
    backoff_factor: f64,
    max_delay_secs: f64,
    jitter_low: f64,
    jitter_high: f64,
    retryable_status_codes: Vec<u16>,
    retryable_substrings: Vec<String>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for ExponentialBackoff {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_secs: config.base_delay_secs,
            backoff_factor: config.backoff_factor,
            max_delay_secs: config.max_delay_secs,
            jitter_low: config.jitter_low,
            jitter_high: config.jitter_high,
            retryable_status_codes: config.retryable_status_codes.clone(),
            retryable_substrings: config
                .retryable_substrings
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }
}

impl ExponentialBackoff {
    /// Un-jittered delay in seconds for `attempt`.
    pub fn base_delay(&self, attempt: u32) -> f64 {
        let exp = self.base_delay_secs * self.backoff_factor.powi(attempt as i32);
        exp.min(self.max_delay_secs).max(0.0)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn is_retryable(&self, error: &OracleError) -> bool {
        match error {
            OracleError::Timeout | OracleError::Connection(_) | OracleError::Parse { .. } => true,
            OracleError::BadStatus { status, body } => {
                if self.retryable_status_codes.contains(status) {
                    return true;
                }
                let body = body.to_lowercase();
                self.retryable_substrings.iter().any(|s| body.contains(s.as_str()))
            }
        }
    }

    fn backoff(&self, attempt: u32, rng: &mut dyn RngCore) -> Duration {
        let jitter = if self.jitter_high > self.jitter_low {
            rng.gen_range(self.jitter_low..self.jitter_high)
        } else {
            self.jitter_low
        };
        Duration::from_secs_f64(self.base_delay(attempt) * jitter.max(0.0))
    }
}
