//! Network-quality classification from fetch round-trip samples.
//!
//! Rolling window p95 over recent round trips, bucketed into a discrete
//! tier. The trend compares each evaluation's tier with the previous one.
//! Failed fetches count as a sample at `failure_penalty_ms`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Tier & Trend ───────────────────────────────────────────────────

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NetworkTier {
    Excellent,
    #[default]
    Good,
    Fair,
    Poor,
    Bad,
}

impl NetworkTier {
    /// Best to worst.
    pub const ALL: [Self; 5] = [
        Self::Excellent,
        Self::Good,
        Self::Fair,
        Self::Poor,
        Self::Bad,
    ];

    /// One step towards faster polling. Saturates at `Excellent`.
    pub fn more_aggressive(self) -> Self {
        match self {
            Self::Excellent | Self::Good => Self::Excellent,
            Self::Fair => Self::Good,
            Self::Poor => Self::Fair,
            Self::Bad => Self::Poor,
        }
    }

    /// One step towards slower polling. Saturates at `Bad`.
    pub fn more_conservative(self) -> Self {
        match self {
            Self::Excellent => Self::Good,
            Self::Good => Self::Fair,
            Self::Fair => Self::Poor,
            Self::Poor | Self::Bad => Self::Bad,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Bad => "bad",
        }
    }
}

impl fmt::Display for NetworkTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NetworkTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown network tier: {s}"))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTrend {
    Improving,
    #[default]
    Stable,
    Degrading,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkQuality {
    pub tier: NetworkTier,
    pub trend: QualityTrend,
}

impl NetworkQuality {
    pub fn new(tier: NetworkTier, trend: QualityTrend) -> Self {
        Self { tier, trend }
    }

    /// Tier shifted by trend: improving polls one tier faster, degrading one
    /// tier slower.
    pub fn effective_tier(self) -> NetworkTier {
        match self.trend {
            QualityTrend::Improving => self.tier.more_aggressive(),
            QualityTrend::Stable => self.tier,
            QualityTrend::Degrading => self.tier.more_conservative(),
        }
    }
}

// ─── Internal ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct RttSample {
    rtt_ms: u64,
    timestamp_ms: u64,
}

// ─── NetworkQualityWindow ───────────────────────────────────────────

/// p95 upper bounds (inclusive) for Excellent, Good, Fair and Poor.
/// Anything slower is Bad.
pub const DEFAULT_TIER_BOUNDS_MS: [u64; 4] = [150, 400, 1_000, 2_500];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkQualityWindow {
    samples: Vec<RttSample>,
    window_ms: u64,
    min_samples: usize,
    tier_bounds_ms: [u64; 4],
    failure_penalty_ms: u64,
    initial_tier: NetworkTier,
    last: NetworkQuality,
}

impl NetworkQualityWindow {
    /// 60 s window, 5 samples minimum, failures weigh 5 s.
    pub fn new() -> Self {
        Self::with_config(60_000, 5, DEFAULT_TIER_BOUNDS_MS, 5_000)
    }

    pub fn with_config(
        window_ms: u64,
        min_samples: usize,
        tier_bounds_ms: [u64; 4],
        failure_penalty_ms: u64,
    ) -> Self {
        Self {
            samples: Vec::new(),
            window_ms,
            min_samples,
            tier_bounds_ms,
            failure_penalty_ms,
            initial_tier: NetworkTier::default(),
            last: NetworkQuality::default(),
        }
    }

    /// Tier reported until enough samples have been collected.
    #[must_use]
    pub fn with_initial_tier(mut self, tier: NetworkTier) -> Self {
        self.initial_tier = tier;
        self.last = NetworkQuality::new(tier, QualityTrend::Stable);
        self
    }

    pub fn record(&mut self, rtt_ms: u64, now_ms: u64) {
        self.samples.push(RttSample {
            rtt_ms,
            timestamp_ms: now_ms,
        });
    }

    pub fn record_failure(&mut self, now_ms: u64) {
        self.record(self.failure_penalty_ms, now_ms);
    }

    /// Prune, classify, and update the trend. With too few samples the last
    /// known quality is returned with a stable trend.
    pub fn evaluate(&mut self, now_ms: u64) -> NetworkQuality {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        self.samples.retain(|s| s.timestamp_ms >= cutoff);

        if self.samples.len() < self.min_samples.max(1) {
            self.last.trend = QualityTrend::Stable;
            return self.last;
        }

        let tier = self.classify(compute_p95(&self.samples));
        let trend = match tier.cmp(&self.last.tier) {
            std::cmp::Ordering::Less => QualityTrend::Improving,
            std::cmp::Ordering::Equal => QualityTrend::Stable,
            std::cmp::Ordering::Greater => QualityTrend::Degrading,
        };
        self.last = NetworkQuality { tier, trend };
        self.last
    }

    pub fn last(&self) -> NetworkQuality {
        self.last
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.last = NetworkQuality::new(self.initial_tier, QualityTrend::Stable);
    }

    fn classify(&self, p95_ms: u64) -> NetworkTier {
        NetworkTier::ALL
            .into_iter()
            .zip(self.tier_bounds_ms)
            .find(|(_, bound)| p95_ms <= *bound)
            .map_or(NetworkTier::Bad, |(tier, _)| tier)
    }
}

impl Default for NetworkQualityWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// P95 index = ceil(0.95 * count) - 1 (0-based). `samples` must be non-empty.
fn compute_p95(samples: &[RttSample]) -> u64 {
    let mut rtts: Vec<u64> = samples.iter().map(|s| s.rtt_ms).collect();
    rtts.sort_unstable();
    let p95_index = (95 * rtts.len()).div_ceil(100) - 1;
    rtts[p95_index]
}

// ─── Tests ──────────────────────────────────────────────────────────
