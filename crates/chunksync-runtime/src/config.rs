//! Engine configuration: every tunable in one serde struct. Missing fields
//! fall back to defaults, so a config file only lists what it changes.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chunksync_link::NetworkTier;
use chunksync_scheduler::{
    BackoffPolicy, PredictiveConfig, ProbePolicy, ScrollConfig, ScrollPositionSmoother,
    TierIntervals,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub intervals: TierIntervals,
    pub backoff: BackoffPolicy,
    pub probe: ProbePolicy,
    pub predictive: PredictiveConfig,
    /// Handed to pixel-based render sinks through `scroll_smoother`.
    pub scroll: ScrollConfig,
    /// Tier assumed until enough round trips have been measured.
    pub initial_tier: NetworkTier,
    /// How far behind the committed cursor a recovery fetch starts.
    pub recovery_overlap_ms: u64,
    pub max_recovery_rewind_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            intervals: TierIntervals::default(),
            backoff: BackoffPolicy::default(),
            probe: ProbePolicy::default(),
            predictive: PredictiveConfig::default(),
            scroll: ScrollConfig::default(),
            initial_tier: NetworkTier::default(),
            recovery_overlap_ms: 5_000,
            max_recovery_rewind_ms: 600_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid sync config")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("in {}", path.display()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn scroll_smoother(&self) -> ScrollPositionSmoother {
        ScrollPositionSmoother::new(self.scroll.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        let cfg = SyncConfig::from_json("{}").expect("parse");
        assert_eq!(cfg, SyncConfig::default());
    }

    #[test]
    fn nested_partial_override() {
        let cfg = SyncConfig::from_json(
            r#"{
                "backoff": {"max_backoff_ms": 60000},
                "probe": {"probe_every": 5},
                "initial_tier": "poor",
                "recovery_overlap_ms": 2000
            }"#,
        )
        .expect("parse");
        assert_eq!(cfg.backoff.max_backoff_ms, 60_000);
        assert_eq!(cfg.backoff.base_delay_ms, 1_000);
        assert_eq!(cfg.probe.probe_every, 5);
        assert_eq!(cfg.probe.empty_probe_threshold, 3);
        assert_eq!(cfg.initial_tier, NetworkTier::Poor);
        assert_eq!(cfg.recovery_overlap_ms, 2_000);
        assert_eq!(cfg.max_recovery_rewind_ms, 600_000);
    }

    #[test]
    fn rejects_malformed() {
        let err = SyncConfig::from_json(r#"{"backoff": 3}"#).expect_err("should fail");
        assert!(err.to_string().contains("invalid sync config"));
    }

    #[test]
    fn load_missing_file_names_path() {
        let err = SyncConfig::load(Path::new("/nonexistent/chunksync.json")).expect_err("missing");
        assert!(format!("{err:#}").contains("/nonexistent/chunksync.json"));
    }

    #[test]
    fn scroll_section_configures_smoother() {
        let cfg = SyncConfig::from_json(r#"{"scroll": {"snap_threshold_px": 50.0}}"#)
            .expect("parse");
        assert_eq!(cfg.scroll.snap_threshold_px, 50.0);
        assert_eq!(cfg.scroll.interpolation, 0.25);

        let mut smoother = cfg.scroll_smoother();
        smoother.set_target(100.0, true);
        // 60 px exceeds the configured threshold and snaps while streaming.
        assert_eq!(smoother.set_target(160.0, true), 160.0);
        assert_eq!(smoother.current(), 160.0);
    }
}
