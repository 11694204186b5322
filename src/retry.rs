//! Commit retry policy as an explicit state machine.
//!
//! ```text
//! Attempting(n) --ok--------------------------> Succeeded(n)
//! Attempting(n) --permanent error or n = max--> GaveUp(n, error)
//! Attempting(n) --transient error-------------> Waiting(n, delay) --wake--> Attempting(n + 1)
//! ```

use crate::config::{
    COMMIT_ATTEMPT_TIMEOUT_SECS, COMMIT_BASE_DELAY_MS, COMMIT_MAX_ATTEMPTS, COMMIT_MAX_DELAY_MS,
};
use crate::store::StoreError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: COMMIT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(COMMIT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(COMMIT_MAX_DELAY_MS),
            attempt_timeout: Duration::from_secs(COMMIT_ATTEMPT_TIMEOUT_SECS),
        }
    }
}

impl RetryPolicy {
    /// Backoff after failed attempt `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    Waiting { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    GaveUp { attempts: u32, error: StoreError },
}

#[derive(Debug)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Attempting { attempt: 1 },
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// Feeds the result of the current attempt. Ignored outside `Attempting`.
    pub fn record(&mut self, outcome: Result<(), StoreError>) {
        let RetryState::Attempting { attempt } = self.state else {
            return;
        };
        self.state = match outcome {
            Ok(()) => RetryState::Succeeded { attempts: attempt },
            Err(error) if !error.is_transient() || attempt >= self.policy.max_attempts.max(1) => {
                RetryState::GaveUp {
                    attempts: attempt,
                    error,
                }
            }
            Err(_) => RetryState::Waiting {
                attempt,
                delay: self.policy.delay_after(attempt),
            },
        };
    }

    /// Backoff elapsed. Ignored outside `Waiting`.
    pub fn wake(&mut self) {
        if let RetryState::Waiting { attempt, .. } = self.state {
            self.state = RetryState::Attempting {
                attempt: attempt + 1,
            };
        }
    }
}
