// src/ingest/retry.rs
//! Bounded exponential backoff as an explicit state machine.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// 1-based attempt number.
    Attempt(u32),
    Done,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_ceiling: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_ceiling,
            ..Self::default()
        }
    }

    /// Sleep after attempt `n` failed: `min(base * 2^n, ceiling)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(factor)
            .min(self.backoff_ceiling)
    }

    pub fn first(&self) -> RetryState {
        RetryState::Attempt(1)
    }

    /// Next state plus how long to wait before entering it.
    pub fn transition(&self, state: RetryState, outcome: AttemptOutcome) -> (RetryState, Option<Duration>) {
        match (state, outcome) {
            (RetryState::Attempt(_), AttemptOutcome::Success) => (RetryState::Done, None),
            (RetryState::Attempt(n), AttemptOutcome::Transient) if n < self.max_attempts => {
                (RetryState::Attempt(n + 1), Some(self.delay_for(n)))
            }
            (RetryState::Attempt(_), _) => (RetryState::Fatal, None),
            (terminal, _) => (terminal, None),
        }
    }
}
