//! Reconnection policy: bounded attempts with capped exponential backoff.
//!
//! The session driver owns the only retry timer; this type just answers
//! "may attempt N happen, and after how long".

use std::time::Duration;

use rand::Rng;

use crate::config::{DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY_MS, DEFAULT_RECONNECT_MAX_DELAY_MS};

pub const DEFAULT_RECONNECT_JITTER: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Automatic attempts after a network failure before giving up (0 disables retry).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub initial_delay: Duration,
    /// Ceiling for the doubled delay.
    pub max_delay: Duration,
    /// Fraction of the delay randomized in either direction, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
            jitter: DEFAULT_RECONNECT_JITTER,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never retries on its own.
    #[must_use]
    pub fn disabled() -> Self {
        Self { max_attempts: 0, ..Self::default() }
    }

    /// Whether retry number `attempt` (1-based) is within budget.
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }

    /// Un-jittered delay before retry `attempt`, or `None` once the budget is spent.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.allows(attempt) {
            return None;
        }
        let factor = 1_u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }

    /// Delay before retry `attempt` with jitter applied, capped at `max_delay`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        let base = self.base_delay(attempt)?;
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 {
            return Some(base);
        }
        let offset = rand::rng().random_range(-jitter..=jitter);
        Some(base.mul_f64(1.0 + offset).min(self.max_delay))
    }
}

#[cfg(test)]
#[path = "reconnect_test.rs"]
mod tests;
