//! Auto-scroll smoothing for high-frequency transcript updates.
//!
//! While streaming, the raw bottom-of-content position jumps with every
//! rendered chunk. The target is smoothed through an estimator and the
//! render sink walks toward it one frame at a time. Large jumps, the first
//! target, and targets set while not streaming snap directly.
//!
//! The engine itself renders no pixels. Sinks that do take a configured
//! smoother from the runtime's `SyncConfig::scroll_smoother`.

use chunksync_core::{Estimator, EstimatorConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    pub estimator: EstimatorConfig,
    /// Target jumps larger than this snap (default 400 px).
    pub snap_threshold_px: f64,
    /// Fraction of the remaining distance covered per frame (default 0.25).
    pub interpolation: f64,
    /// Within this distance the position lands on the target (default 0.5 px).
    pub settle_px: f64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::scroll(),
            snap_threshold_px: 400.0,
            interpolation: 0.25,
            settle_px: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScrollPositionSmoother {
    config: ScrollConfig,
    estimator: Estimator,
    current: f64,
    target: f64,
    has_target: bool,
}

impl ScrollPositionSmoother {
    pub fn new(config: ScrollConfig) -> Self {
        Self {
            estimator: Estimator::new(config.estimator),
            config,
            current: 0.0,
            target: 0.0,
            has_target: false,
        }
    }

    /// Feed a raw target position. Returns the smoothed target.
    pub fn set_target(&mut self, raw: f64, streaming: bool) -> f64 {
        if !raw.is_finite() {
            return self.target;
        }
        let raw = raw.max(0.0);
        let jump = (raw - self.target).abs();

        if !streaming || !self.has_target || jump > self.config.snap_threshold_px {
            self.estimator.reset();
            self.estimator.update(raw);
            self.target = raw;
            self.current = raw;
            self.has_target = true;
            return self.target;
        }

        self.target = self.estimator.update(raw).estimate;
        self.target
    }

    /// Advance one frame toward the smoothed target. Returns the position to
    /// apply.
    pub fn step(&mut self) -> f64 {
        if !self.has_target {
            return self.current;
        }
        let remaining = self.target - self.current;
        if remaining.abs() <= self.config.settle_px {
            self.current = self.target;
        } else {
            self.current += remaining * self.config.interpolation.clamp(0.0, 1.0);
        }
        self.current
    }

    pub fn is_settled(&self) -> bool {
        (self.target - self.current).abs() <= self.config.settle_px
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Streaming ended: forget all smoothing state.
    pub fn stop_stream(&mut self) {
        self.estimator.reset();
        self.current = 0.0;
        self.target = 0.0;
        self.has_target = false;
    }
}

impl Default for ScrollPositionSmoother {
    fn default() -> Self {
        Self::new(ScrollConfig::default())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
