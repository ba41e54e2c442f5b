//! Reconnect backoff policy.
//!
//! `delay = min(base * factor^(attempt-1), max) * (1 + U(-jitter, +jitter))`
//!
//! The attempt counter is owned by the supervisor: it increments on each
//! scheduled reconnect and resets to zero only upon a successful connect.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with multiplicative jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// First-attempt delay in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on the un-jittered delay in milliseconds.
    pub max_delay_ms: u64,
    /// Exponential growth factor.
    pub factor: f64,
    /// Jitter ratio; the final delay is scaled by `1 ± jitter`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            factor: 1.8,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let raw = (self.base_delay_ms as f64) * self.factor.powi(exp);
        let capped = raw.min(self.max_delay_ms as f64);

        let jittered = if self.jitter > 0.0 {
            let scale = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            capped * (1.0 + scale)
        } else {
            capped
        };

        Duration::from_millis(jittered.round().max(0.0) as u64)
    }
}
