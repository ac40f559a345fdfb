//! Base polling interval per network tier.

use chunksync_link::{NetworkQuality, NetworkTier};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierIntervals {
    pub excellent_ms: u64,
    pub good_ms: u64,
    pub fair_ms: u64,
    pub poor_ms: u64,
    pub bad_ms: u64,
}

impl Default for TierIntervals {
    fn default() -> Self {
        Self {
            excellent_ms: 500,
            good_ms: 1_000,
            fair_ms: 2_000,
            poor_ms: 4_000,
            bad_ms: 8_000,
        }
    }
}

impl TierIntervals {
    pub fn interval_for(&self, tier: NetworkTier) -> u64 {
        match tier {
            NetworkTier::Excellent => self.excellent_ms,
            NetworkTier::Good => self.good_ms,
            NetworkTier::Fair => self.fair_ms,
            NetworkTier::Poor => self.poor_ms,
            NetworkTier::Bad => self.bad_ms,
        }
    }

    /// Tier-appropriate baseline after the trend shift.
    pub fn baseline(&self, quality: NetworkQuality) -> u64 {
        self.interval_for(quality.effective_tier())
    }
}
