//! Scalar recursive estimator with outlier damping.
//!
//! Tracks a roughly constant, non-negative quantity (round-trip latency,
//! inter-chunk arrival gap, scroll target) from noisy measurements. Drift is
//! absorbed through the process noise; there is no explicit time update
//! between measurements, so `predict()` is just the current estimate.
//!
//! A measurement that deviates from the estimate by more than
//! `OUTLIER_RATIO` times the estimate's magnitude is applied with its
//! measurement noise inflated by `OUTLIER_NOISE_SCALE`, so a single slow round
//! trip barely moves the estimate while a sustained shift is still tracked.

use serde::{Deserialize, Serialize};

/// Deviation (relative to |estimate|) above which a measurement is an outlier.
pub const OUTLIER_RATIO: f64 = 10.0;
/// Measurement-noise multiplier applied to an outlier update.
pub const OUTLIER_NOISE_SCALE: f64 = 100.0;
/// Floor for the error covariance. Keeps the gain away from collapse.
pub const MIN_ERROR_COVARIANCE: f64 = 1e-6;

// ─── Config ─────────────────────────────────────────────────────────

/// Noise tuning for one estimator instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Process noise `q`: how fast the underlying quantity may drift.
    pub process_noise: f64,
    /// Measurement noise `r`: how noisy a single observation is.
    pub measurement_noise: f64,
}

impl EstimatorConfig {
    /// Fetch round-trip latency in milliseconds.
    pub fn latency() -> Self {
        Self {
            process_noise: 10.0,
            measurement_noise: 100.0,
        }
    }

    /// Gap between consecutive chunk arrivals in milliseconds.
    pub fn arrival() -> Self {
        Self {
            process_noise: 50.0,
            measurement_noise: 500.0,
        }
    }

    /// Scroll target position in pixels.
    pub fn scroll() -> Self {
        Self {
            process_noise: 4.0,
            measurement_noise: 16.0,
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self::latency()
    }
}

// ─── State ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorState {
    pub estimate: f64,
    pub error_covariance: f64,
    pub gain: f64,
    pub process_noise: f64,
    pub measurement_noise: f64,
    pub initialized: bool,
}

impl EstimatorState {
    fn from_config(config: EstimatorConfig) -> Self {
        Self {
            estimate: 0.0,
            error_covariance: config.measurement_noise.max(MIN_ERROR_COVARIANCE),
            gain: 0.0,
            process_noise: config.process_noise,
            measurement_noise: config.measurement_noise,
            initialized: false,
        }
    }
}

/// Result of a single `update`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorUpdate {
    pub estimate: f64,
    pub error: f64,
    pub gain: f64,
}

// ─── Estimator ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Estimator {
    config: EstimatorConfig,
    state: EstimatorState,
}

impl Estimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            state: EstimatorState::from_config(config),
        }
    }

    /// Fold one measurement into the estimate.
    ///
    /// Non-finite measurements are ignored and negative ones clamped to zero.
    pub fn update(&mut self, measurement: f64) -> EstimatorUpdate {
        if !measurement.is_finite() {
            return self.snapshot();
        }
        let measurement = measurement.max(0.0);
        let s = &mut self.state;

        if !s.initialized {
            s.estimate = measurement;
            s.error_covariance = s.measurement_noise.max(MIN_ERROR_COVARIANCE);
            s.gain = 1.0;
            s.initialized = true;
            return self.snapshot();
        }

        let deviation = (measurement - s.estimate).abs();
        let effective_noise = if deviation > OUTLIER_RATIO * s.estimate.abs() {
            s.measurement_noise * OUTLIER_NOISE_SCALE
        } else {
            s.measurement_noise
        };

        let predicted_error = s.error_covariance + s.process_noise;
        let gain = predicted_error / (predicted_error + effective_noise);
        s.estimate += gain * (measurement - s.estimate);
        s.error_covariance = ((1.0 - gain) * predicted_error).max(MIN_ERROR_COVARIANCE);
        s.gain = gain;

        self.snapshot()
    }

    /// Current estimate. Does not advance state.
    pub fn predict(&self) -> f64 {
        self.state.estimate
    }

    pub fn set_process_noise(&mut self, q: f64) {
        if q.is_finite() && q >= 0.0 {
            self.state.process_noise = q;
        }
    }

    /// Back to the constructed defaults, including the original process noise.
    pub fn reset(&mut self) {
        self.state = EstimatorState::from_config(self.config);
    }

    pub fn state(&self) -> &EstimatorState {
        &self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    fn snapshot(&self) -> EstimatorUpdate {
        EstimatorUpdate {
            estimate: self.state.estimate,
            error: self.state.error_covariance,
            gain: self.state.gain,
        }
    }
}

impl Default for Estimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_measurement_initializes_directly() {
        let mut est = Estimator::new(EstimatorConfig::latency());
        assert!(!est.is_initialized());

        let out = est.update(120.0);
        assert_eq!(out.estimate, 120.0);
        assert_eq!(out.error, 100.0);
        assert!(est.is_initialized());
    }

    #[test]
    fn non_finite_is_ignored() {
        let mut est = Estimator::new(EstimatorConfig::latency());
        est.update(50.0);
        let before = *est.state();

        let out = est.update(f64::NAN);
        assert_eq!(out.estimate, 50.0);
        est.update(f64::INFINITY);
        est.update(f64::NEG_INFINITY);
        assert_eq!(*est.state(), before);
    }

    #[test]
    fn non_finite_before_init_keeps_uninitialized() {
        let mut est = Estimator::new(EstimatorConfig::latency());
        est.update(f64::NAN);
        assert!(!est.is_initialized());
    }

    #[test]
    fn negative_measurement_clamped_to_zero() {
        let mut est = Estimator::new(EstimatorConfig::latency());
        let out = est.update(-40.0);
        assert_eq!(out.estimate, 0.0);
    }

    #[test]
    fn converges_to_constant_measurement() {
        let mut est = Estimator::new(EstimatorConfig::latency());
        est.update(100.0);
        for _ in 0..200 {
            est.update(500.0);
        }
        assert!((est.predict() - 500.0).abs() < 0.5, "got {}", est.predict());
    }

    #[test]
    fn converges_even_through_outlier_regime() {
        // Starting at zero every positive sample is an outlier at first.
        let mut est = Estimator::new(EstimatorConfig::arrival());
        est.update(0.0);
        for _ in 0..5_000 {
            est.update(800.0);
        }
        assert!((est.predict() - 800.0).abs() < 1.0, "got {}", est.predict());
    }

    #[test]
    fn single_outlier_is_damped() {
        let mut est = Estimator::new(EstimatorConfig::latency());
        for _ in 0..20 {
            est.update(100.0);
        }
        let before = est.predict();
        let spike = before * 50.0;

        est.update(spike);
        let moved = est.predict() - before;
        assert!(moved > 0.0);
        assert!(
            moved < 0.5 * (spike - before),
            "moved {moved} of gap {}",
            spike - before
        );
    }

    #[test]
    fn non_outlier_moves_further_than_outlier_would() {
        let mut est = Estimator::new(EstimatorConfig::latency());
        est.update(100.0);
        let gain = est.update(150.0).gain;
        assert!(gain > 0.1, "regular update gain {gain}");
    }

    #[test]
    fn error_covariance_never_collapses() {
        let mut est = Estimator::new(EstimatorConfig {
            process_noise: 0.0,
            measurement_noise: 1e-9,
        });
        for _ in 0..1_000 {
            est.update(10.0);
        }
        assert!(est.state().error_covariance >= MIN_ERROR_COVARIANCE);
    }

    #[test]
    fn predict_does_not_advance_state() {
        let mut est = Estimator::new(EstimatorConfig::scroll());
        est.update(300.0);
        est.update(310.0);
        let snapshot = *est.state();
        for _ in 0..10 {
            est.predict();
        }
        assert_eq!(*est.state(), snapshot);
    }

    #[test]
    fn reset_restores_constructed_defaults() {
        let config = EstimatorConfig::arrival();
        let mut est = Estimator::new(config);
        est.set_process_noise(999.0);
        est.update(10.0);
        est.update(20.0);

        est.reset();
        assert_eq!(*est.state(), *Estimator::new(config).state());
    }

    #[test]
    fn set_process_noise_rejects_invalid() {
        let mut est = Estimator::new(EstimatorConfig::latency());
        est.set_process_noise(-1.0);
        est.set_process_noise(f64::NAN);
        assert_eq!(est.state().process_noise, 10.0);

        est.set_process_noise(25.0);
        assert_eq!(est.state().process_noise, 25.0);
    }

    #[test]
    fn instances_are_independent() {
        let mut a = Estimator::new(EstimatorConfig::latency());
        let b = Estimator::new(EstimatorConfig::latency());
        a.update(42.0);
        assert!(!b.is_initialized());
    }
}
