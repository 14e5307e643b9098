//! Bounded retry with exponential backoff for collaborator calls.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::io::collaborators::CollaboratorError;
use crate::io::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// The call never succeeded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{last} (after {attempts} attempt(s))")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last: CollaboratorError,
}

/// Call `op` until it succeeds, fails fatally, or runs out of attempts.
///
/// `op` receives the 1-based attempt number.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    mut op: impl FnMut(u32) -> Result<T, CollaboratorError>,
) -> Result<T, RetryExhausted> {
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    err = %err,
                    "transient collaborator error, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(last) => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last,
                });
            }
        }
    }
}
