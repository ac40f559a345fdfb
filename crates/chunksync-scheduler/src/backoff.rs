//! Poll delay backoff.
//!
//! Two independent ramps:
//!
//! - **Failure**: exponential. After `k` consecutive failures the delay is
//!   `min(base_delay_ms * multiplier^k, max_backoff_ms)`.
//! - **Empty poll**: additive. Each successful-but-empty poll adds
//!   `empty_step_ms` on top of the tier baseline, capped at
//!   `max_empty_backoff_ms`.
//!
//! A poll that brings new chunks resets both to the tier baseline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Base of the failure ramp (default 1000).
    pub base_delay_ms: u64,
    /// Failure multiplier per attempt (default 2.0).
    pub multiplier: f64,
    /// Failure ramp ceiling (default 30000).
    pub max_backoff_ms: u64,
    /// Added per empty poll (default 500).
    pub empty_step_ms: u64,
    /// Empty ramp ceiling (default 10000).
    pub max_empty_backoff_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
            empty_step_ms: 500,
            max_empty_backoff_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    delay_ms: u64,
    empty_delay_ms: u64,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let delay_ms = policy.base_delay_ms;
        Self {
            policy,
            delay_ms,
            empty_delay_ms: delay_ms,
            consecutive_failures: 0,
        }
    }

    /// New data arrived: back to the baseline.
    pub fn reset(&mut self, baseline_ms: u64) -> u64 {
        self.consecutive_failures = 0;
        self.empty_delay_ms = baseline_ms;
        self.delay_ms = baseline_ms;
        self.delay_ms
    }

    /// Successful poll with nothing new.
    pub fn record_empty(&mut self, baseline_ms: u64) -> u64 {
        self.consecutive_failures = 0;
        let ceiling = self.policy.max_empty_backoff_ms.max(baseline_ms);
        self.empty_delay_ms = self
            .empty_delay_ms
            .max(baseline_ms)
            .saturating_add(self.policy.empty_step_ms)
            .min(ceiling);
        self.delay_ms = self.empty_delay_ms;
        self.delay_ms
    }

    /// Failed fetch. Returns the delay before the retry.
    pub fn record_failure(&mut self) -> u64 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let exponent = i32::try_from(self.consecutive_failures).unwrap_or(i32::MAX);
        let raw = (self.policy.base_delay_ms as f64) * self.policy.multiplier.powi(exponent);
        self.delay_ms = (raw as u64).min(self.policy.max_backoff_ms);
        self.delay_ms
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Back to the constructed state.
    pub fn clear(&mut self) {
        *self = Self::new(self.policy.clone());
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_ramp_matches_closed_form() {
        let policy = BackoffPolicy::default();
        let mut backoff = Backoff::new(policy.clone());
        for k in 1..=10u32 {
            let delay = backoff.record_failure();
            let expected = (policy.base_delay_ms * 2u64.pow(k)).min(policy.max_backoff_ms);
            assert_eq!(delay, expected, "after {k} failures");
            assert_eq!(backoff.consecutive_failures(), k);
        }
    }

    #[test]
    fn failure_ramp_capped() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        for _ in 0..100 {
            backoff.record_failure();
        }
        assert_eq!(backoff.delay_ms(), 30_000);
    }

    #[test]
    fn reset_returns_to_baseline() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        backoff.record_failure();
        backoff.record_failure();
        assert_eq!(backoff.reset(500), 500);
        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.record_failure(), 2_000, "ramp restarts");
    }

    #[test]
    fn empty_polls_add_linearly() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        backoff.reset(1_000);
        assert_eq!(backoff.record_empty(1_000), 1_500);
        assert_eq!(backoff.record_empty(1_000), 2_000);
        assert_eq!(backoff.record_empty(1_000), 2_500);
    }

    #[test]
    fn empty_ramp_capped() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        for _ in 0..100 {
            backoff.record_empty(1_000);
        }
        assert_eq!(backoff.delay_ms(), 10_000);
    }

    #[test]
    fn empty_ramp_never_below_slow_baseline() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        // A baseline above the empty ceiling wins.
        assert_eq!(backoff.record_empty(12_000), 12_000);
    }

    #[test]
    fn empty_poll_clears_failure_streak() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        backoff.record_failure();
        backoff.record_failure();
        backoff.record_empty(1_000);
        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.record_failure(), 2_000);
    }

    #[test]
    fn clear_restores_construction() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        backoff.record_failure();
        backoff.clear();
        assert_eq!(backoff.delay_ms(), 1_000);
        assert_eq!(backoff.consecutive_failures(), 0);
    }
}
