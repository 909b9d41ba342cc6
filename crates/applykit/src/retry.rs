//! Retry logic with exponential backoff for client calls.

use crate::error::ActionError;
use crate::gate::RateGate;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Rate-limited responses tolerated in a row before the action fails
pub const MAX_RATE_LIMIT_WAITS: u32 = 10;

/// Bounded retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "millis")]
    pub base_delay: Duration,
    /// Multiplier applied per retry
    pub multiplier: f64,
    /// Upper bound for any single delay
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay.max(0.0))
    }
}

/// Callback for retry notifications.
pub trait RetryCallback {
    /// Called before sleeping ahead of another attempt.
    ///
    /// `attempt` is the 1-indexed attempt that just failed.
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ActionError, delay: Duration);
}

/// Result of a retried call plus the number of calls made.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ActionError>,
    pub attempts: u32,
}

/// Run `operation` under `policy`.
///
/// Waits on `gate` before every call. A rate-limited response closes the
/// gate and is retried without consuming the attempt budget, up to
/// [`MAX_RATE_LIMIT_WAITS`] in a row. Non-retryable errors return at once.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    gate: &RateGate,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Result<T, ActionError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    let mut calls = 0;
    let mut rate_waits = 0;

    loop {
        gate.wait();
        calls += 1;

        let error = match operation() {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: calls,
                };
            }
            Err(e) => e,
        };

        if let ActionError::RateLimited { retry_after } = &error {
            rate_waits += 1;
            if rate_waits > MAX_RATE_LIMIT_WAITS {
                return RetryOutcome {
                    result: Err(error),
                    attempts: calls,
                };
            }
            gate.close_for(*retry_after);
            continue;
        }
        rate_waits = 0;

        if !error.is_retryable() || attempt + 1 >= max_attempts {
            return RetryOutcome {
                result: Err(error),
                attempts: calls,
            };
        }

        let delay = policy.delay_for_attempt(attempt);
        if let Some(cb) = callback {
            cb.on_retry(attempt + 1, max_attempts, &error, delay);
        }
        thread::sleep(delay);
        attempt += 1;
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
