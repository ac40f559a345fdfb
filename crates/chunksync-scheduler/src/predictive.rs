//! Arrival prediction: when is the next chunk likely, and how sure are we.
//!
//! Inter-arrival gaps feed an estimator. Confidence ramps up with the number
//! of gap samples and is penalized by recent misses, where a miss is an
//! empty poll at a time the estimator said a chunk should have arrived.
//!
//! Above `poll_threshold` the next poll is timed off the predicted arrival
//! instead of the tier table, which can move it earlier or later. Above `placeholder_threshold`, and only while
//! the render sink sits near the bottom, a short "content incoming"
//! placeholder is planned just before the predicted arrival. Neither affects
//! which chunks get applied.

use std::collections::VecDeque;

use chunksync_core::{Estimator, EstimatorConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictiveConfig {
    pub estimator: EstimatorConfig,
    /// Gap samples needed before any confidence (default 2).
    pub min_samples: u32,
    /// Samples at which the ramp reaches 1.0 (default 8).
    pub ramp_samples: u32,
    /// Confidence lost per recent miss (default 0.15).
    pub miss_penalty: f64,
    /// How many recent expectations are remembered (default 10).
    pub miss_window: usize,
    pub poll_threshold: f64,
    pub placeholder_threshold: f64,
    /// Added to the predicted gap when timing a poll (default 100).
    pub safety_margin_ms: u64,
    pub min_poll_ms: u64,
    pub max_poll_ms: u64,
    /// Placeholder appears this long before the predicted arrival (default 300).
    pub placeholder_lead_ms: u64,
    /// Placeholder is removed after this long regardless (default 2000).
    pub placeholder_timeout_ms: u64,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::arrival(),
            min_samples: 2,
            ramp_samples: 8,
            miss_penalty: 0.15,
            miss_window: 10,
            poll_threshold: 0.5,
            placeholder_threshold: 0.6,
            safety_margin_ms: 100,
            min_poll_ms: 250,
            max_poll_ms: 10_000,
            placeholder_lead_ms: 300,
            placeholder_timeout_ms: 2_000,
        }
    }
}

/// When to show and hide the incoming-content placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderPlan {
    pub show_at_ms: u64,
    pub hide_at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PredictiveScheduler {
    config: PredictiveConfig,
    arrival: Estimator,
    last_arrival_ms: Option<u64>,
    /// Server creation time of the newest chunk of the last arrival.
    last_created_ms: Option<u64>,
    samples: u32,
    /// `true` = miss, most recent last.
    recent: VecDeque<bool>,
}

impl PredictiveScheduler {
    pub fn new(config: PredictiveConfig) -> Self {
        Self {
            arrival: Estimator::new(config.estimator),
            config,
            last_arrival_ms: None,
            last_created_ms: None,
            samples: 0,
            recent: VecDeque::new(),
        }
    }

    /// New chunks arrived at `now_ms`.
    pub fn record_arrival(&mut self, now_ms: u64) {
        self.record_arrival_at(now_ms, None);
    }

    /// New chunks arrived at `now_ms`, the newest created at `created_ms`
    /// on the server. The gap is measured between creation times when both
    /// arrivals carry one, so the poll cadence does not feed back into the
    /// estimate.
    pub fn record_arrival_at(&mut self, now_ms: u64, created_ms: Option<u64>) {
        if let Some(last) = self.last_arrival_ms {
            let gap = match (self.last_created_ms, created_ms) {
                (Some(previous), Some(created)) if created > previous => created - previous,
                _ => now_ms.saturating_sub(last),
            };
            self.arrival.update(gap as f64);
            self.samples = self.samples.saturating_add(1);
            self.remember(false);
        }
        self.last_arrival_ms = Some(now_ms);
        self.last_created_ms = created_ms;
    }

    /// A poll at `now_ms` found nothing. Counts as a miss when a chunk was
    /// predicted by then. Returns whether it was a miss.
    pub fn record_empty_poll(&mut self, now_ms: u64) -> bool {
        let missed = self
            .predicted_next_arrival()
            .is_some_and(|predicted| now_ms >= predicted);
        if missed {
            self.remember(true);
        }
        missed
    }

    pub fn confidence(&self) -> f64 {
        if self.samples < self.config.min_samples.max(1) {
            return 0.0;
        }
        let ramp = f64::from(self.samples) / f64::from(self.config.ramp_samples.max(1));
        let misses = self.recent.iter().filter(|m| **m).count() as f64;
        (ramp.min(1.0) - misses * self.config.miss_penalty).clamp(0.0, 1.0)
    }

    /// Last arrival plus the estimated gap.
    pub fn predicted_next_arrival(&self) -> Option<u64> {
        let last = self.last_arrival_ms?;
        if !self.arrival.is_initialized() {
            return None;
        }
        Some(last.saturating_add(self.arrival.predict().round() as u64))
    }

    /// Poll delay derived from the predicted arrival, when confident enough.
    pub fn poll_delay_hint(&self, now_ms: u64) -> Option<u64> {
        if self.confidence() < self.config.poll_threshold {
            return None;
        }
        let predicted = self.predicted_next_arrival()?;
        let until = predicted.saturating_sub(now_ms);
        let delay = if until == 0 {
            self.config.min_poll_ms
        } else {
            until.saturating_add(self.config.safety_margin_ms)
        };
        Some(delay.clamp(self.config.min_poll_ms, self.config.max_poll_ms.max(self.config.min_poll_ms)))
    }

    /// Placeholder timing, when confident and the viewer is at the bottom.
    pub fn placeholder_plan(&self, now_ms: u64, near_bottom: bool) -> Option<PlaceholderPlan> {
        if !near_bottom || self.confidence() < self.config.placeholder_threshold {
            return None;
        }
        let predicted = self.predicted_next_arrival()?;
        if predicted <= now_ms {
            return None;
        }
        let show_at_ms = predicted
            .saturating_sub(self.config.placeholder_lead_ms)
            .max(now_ms);
        Some(PlaceholderPlan {
            show_at_ms,
            hide_at_ms: show_at_ms.saturating_add(self.config.placeholder_timeout_ms),
        })
    }

    pub fn sample_count(&self) -> u32 {
        self.samples
    }

    pub fn recent_misses(&self) -> usize {
        self.recent.iter().filter(|m| **m).count()
    }

    pub fn reset(&mut self) {
        self.arrival.reset();
        self.last_arrival_ms = None;
        self.last_created_ms = None;
        self.samples = 0;
        self.recent.clear();
    }

    fn remember(&mut self, miss: bool) {
        self.recent.push_back(miss);
        while self.recent.len() > self.config.miss_window {
            self.recent.pop_front();
        }
    }
}

impl Default for PredictiveScheduler {
    fn default() -> Self {
        Self::new(PredictiveConfig::default())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
