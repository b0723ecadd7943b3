//! Exponential-backoff retry.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for one logical operation.
///
/// The delay before retry `n` (n ≥ 1) is
/// `min(initial_delay * backoff_factor^(n-1), max_delay)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; the operation runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(with = "duration_ms", rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    /// Multiplier applied per retry.
    pub backoff_factor: f64,
    /// Ceiling on any single delay.
    #[serde(with = "duration_ms", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Randomize each delay within `[delay / 2, delay]`.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1_000),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(10_000),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Deterministic delay before retry `retry` (1-based). Zero for 0.
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        let ceiling = self.max_delay.as_nanos() as f64;
        if !scaled.is_finite() || scaled >= ceiling {
            self.max_delay
        } else {
            Duration::from_nanos(scaled.max(0.0).round() as u64)
        }
    }

    /// The full schedule of delays, one per retry.
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_retries).map(|n| self.delay_for_retry(n)).collect()
    }

    fn sleep_for(&self, retry: u32) -> Duration {
        let delay = self.delay_for_retry(retry);
        if self.jitter && !delay.is_zero() {
            rand::thread_rng().gen_range(delay / 2..=delay)
        } else {
            delay
        }
    }
}

/// Runs `operation` until it succeeds or the policy is exhausted.
///
/// Returns the last error unchanged when every attempt fails.
pub async fn with_retry<T, E, F, Fut>(operation: F, policy: &RetryPolicy) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    with_retry_if(operation, policy, |_| true).await
}

/// Like [`with_retry`], but stops as soon as `should_retry` rejects an error.
pub async fn with_retry_if<T, E, F, Fut, P>(
    mut operation: F,
    policy: &RetryPolicy,
    mut should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: fmt::Display,
{
    let mut retry = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if retry > 0 {
                    debug!("Operation succeeded after {} retries", retry);
                }
                return Ok(value);
            }
            Err(e) if retry >= policy.max_retries => {
                if policy.max_retries > 0 {
                    warn!("Operation failed after {} attempts: {}", retry + 1, e);
                }
                return Err(e);
            }
            Err(e) if !should_retry(&e) => {
                debug!("Not retrying non-retryable error: {}", e);
                return Err(e);
            }
            Err(e) => {
                retry += 1;
                let delay = policy.sleep_for(retry);
                debug!(
                    "Attempt {} failed: {}; retrying in {:?}",
                    retry, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
