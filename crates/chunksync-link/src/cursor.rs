//! Fetch cursor: a timestamp watermark with fetched/committed tracking and
//! bounded rewind for recovery fetches.
//!
//! The canonical cursor is the `created_at` of the newest chunk seen, in
//! epoch milliseconds. The per-session sequence high-water mark is derived
//! from the deduplicator and never used as a fetch cursor.

use std::fmt;

use chunksync_core::Chunk;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Cursor ─────────────────────────────────────────────────────────

/// "Only chunks created after this instant" watermark, epoch milliseconds.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cursor(pub u64);

impl Cursor {
    /// Start of history: everything is newer.
    pub const ORIGIN: Self = Self(0);

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Newest `created_at` in a batch, if any.
    pub fn newest_in(chunks: &[Chunk]) -> Option<Self> {
        chunks.iter().map(|c| Self(c.created_at_ms())).max()
    }

    pub fn saturating_sub_ms(self, ms: u64) -> Self {
        Self(self.0.saturating_sub(ms))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("non-monotonic cursor: current={current}, attempted={attempted}")]
    NonMonotonic { current: Cursor, attempted: Cursor },

    #[error("commit ahead of fetched: fetched={fetched}, attempted={attempted}")]
    CommitAheadOfFetched { fetched: Cursor, attempted: Cursor },

    #[error("rewind too far: max_ms={max_ms}, requested_ms={requested_ms}")]
    RewindTooFar { max_ms: u64, requested_ms: u64 },
}

// ─── Two-Watermark Tracking ─────────────────────────────────────────

/// `fetched` is how far fetch results have reached; `committed` is how far
/// chunks have actually been handed to the render sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorWatermarks {
    pub fetched: Cursor,
    pub committed: Cursor,
    /// Maximum distance a recovery rewind may move `fetched` back.
    pub max_rewind_ms: u64,
}

impl CursorWatermarks {
    /// Both watermarks at the origin, max rewind 10 minutes.
    pub fn new() -> Self {
        Self::with_max_rewind(600_000)
    }

    pub fn with_max_rewind(max_rewind_ms: u64) -> Self {
        Self {
            fetched: Cursor::ORIGIN,
            committed: Cursor::ORIGIN,
            max_rewind_ms,
        }
    }

    /// Move `fetched` forward. Moving backward is an error and leaves the
    /// watermark untouched.
    pub fn advance_fetched(&mut self, position: Cursor) -> Result<(), CursorError> {
        if position < self.fetched {
            return Err(CursorError::NonMonotonic {
                current: self.fetched,
                attempted: position,
            });
        }
        self.fetched = position;
        Ok(())
    }

    /// Mark everything up to `position` as rendered. Must not pass `fetched`
    /// or go backward.
    pub fn commit(&mut self, position: Cursor) -> Result<(), CursorError> {
        if position < self.committed {
            return Err(CursorError::NonMonotonic {
                current: self.committed,
                attempted: position,
            });
        }
        if position > self.fetched {
            return Err(CursorError::CommitAheadOfFetched {
                fetched: self.fetched,
                attempted: position,
            });
        }
        self.committed = position;
        Ok(())
    }

    pub fn uncommitted_gap_ms(&self) -> u64 {
        self.fetched.0.saturating_sub(self.committed.0)
    }

    pub fn is_caught_up(&self) -> bool {
        self.committed == self.fetched
    }

    /// Move `fetched` back to `target` so the next fetch re-reads an overlap
    /// window. Fails when the rewind exceeds `max_rewind_ms`.
    pub fn safe_rewind(&mut self, target: Cursor) -> Result<RewindResult, CursorError> {
        let rewound_ms = self.fetched.0.saturating_sub(target.0);
        if rewound_ms > self.max_rewind_ms {
            return Err(CursorError::RewindTooFar {
                max_ms: self.max_rewind_ms,
                requested_ms: rewound_ms,
            });
        }

        let previous_fetched = self.fetched;
        let new_fetched = target.min(self.fetched);
        self.fetched = new_fetched;
        if self.committed > new_fetched {
            self.committed = new_fetched;
        }

        Ok(RewindResult {
            previous_fetched,
            new_fetched,
            rewound_ms,
        })
    }

    /// Rewind to `overlap_ms` before the committed watermark, clamped to the
    /// maximum rewind distance.
    pub fn rewind_for_recovery(&mut self, overlap_ms: u64) -> RewindResult {
        let target = self.committed.saturating_sub_ms(overlap_ms);
        match self.safe_rewind(target) {
            Ok(result) => result,
            Err(_) => {
                let clamped = self.fetched.saturating_sub_ms(self.max_rewind_ms);
                // Within max_rewind_ms by construction.
                self.safe_rewind(clamped).unwrap_or(RewindResult {
                    previous_fetched: self.fetched,
                    new_fetched: self.fetched,
                    rewound_ms: 0,
                })
            }
        }
    }

    pub fn reset(&mut self) {
        self.fetched = Cursor::ORIGIN;
        self.committed = Cursor::ORIGIN;
    }
}

impl Default for CursorWatermarks {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewindResult {
    pub previous_fetched: Cursor,
    pub new_fetched: Cursor,
    pub rewound_ms: u64,
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use chunksync_core::ChunkPayload;

    fn c(ms: u64) -> Cursor {
        Cursor::from_millis(ms)
    }

    #[test]
    fn new_watermarks_start_at_origin() {
        let wm = CursorWatermarks::new();
        assert_eq!(wm.fetched, Cursor::ORIGIN);
        assert_eq!(wm.committed, Cursor::ORIGIN);
        assert_eq!(wm.max_rewind_ms, 600_000);
        assert!(wm.is_caught_up());
    }

    #[test]
    fn advance_fetched_monotonic() {
        let mut wm = CursorWatermarks::new();
        wm.advance_fetched(c(10)).expect("forward");
        wm.advance_fetched(c(10)).expect("same value");
        wm.advance_fetched(c(20)).expect("forward");

        let err = wm.advance_fetched(c(15)).expect_err("backward");
        assert_eq!(
            err,
            CursorError::NonMonotonic {
                current: c(20),
                attempted: c(15),
            }
        );
        assert_eq!(wm.fetched, c(20));
    }

    #[test]
    fn commit_beyond_fetched_fails() {
        let mut wm = CursorWatermarks::new();
        wm.advance_fetched(c(50)).expect("advance");

        let err = wm.commit(c(51)).expect_err("ahead");
        assert_eq!(
            err,
            CursorError::CommitAheadOfFetched {
                fetched: c(50),
                attempted: c(51),
            }
        );
        assert_eq!(wm.committed, Cursor::ORIGIN);
    }

    #[test]
    fn commit_backward_fails() {
        let mut wm = CursorWatermarks::new();
        wm.advance_fetched(c(100)).expect("advance");
        wm.commit(c(50)).expect("commit");
        assert!(wm.commit(c(30)).is_err());
        assert_eq!(wm.committed, c(50));
    }

    #[test]
    fn gap_and_caught_up() {
        let mut wm = CursorWatermarks::new();
        wm.advance_fetched(c(100)).expect("advance");
        wm.commit(c(60)).expect("commit");
        assert_eq!(wm.uncommitted_gap_ms(), 40);
        assert!(!wm.is_caught_up());

        wm.commit(c(100)).expect("commit");
        assert!(wm.is_caught_up());
    }

    #[test]
    fn safe_rewind_within_limit() {
        let mut wm = CursorWatermarks::with_max_rewind(1_000);
        wm.advance_fetched(c(5_000)).expect("advance");
        wm.commit(c(4_800)).expect("commit");

        let result = wm.safe_rewind(c(4_500)).expect("rewind");
        assert_eq!(result.previous_fetched, c(5_000));
        assert_eq!(result.new_fetched, c(4_500));
        assert_eq!(result.rewound_ms, 500);
        assert_eq!(wm.fetched, c(4_500));
        assert_eq!(wm.committed, c(4_500), "committed clamped to new fetched");
    }

    #[test]
    fn safe_rewind_too_far() {
        let mut wm = CursorWatermarks::with_max_rewind(1_000);
        wm.advance_fetched(c(5_000)).expect("advance");

        let err = wm.safe_rewind(c(3_000)).expect_err("too far");
        assert_eq!(
            err,
            CursorError::RewindTooFar {
                max_ms: 1_000,
                requested_ms: 2_000,
            }
        );
        assert_eq!(wm.fetched, c(5_000));
    }

    #[test]
    fn rewind_for_recovery_uses_committed_minus_overlap() {
        let mut wm = CursorWatermarks::new();
        wm.advance_fetched(c(20_000)).expect("advance");
        wm.commit(c(19_000)).expect("commit");

        let result = wm.rewind_for_recovery(5_000);
        assert_eq!(result.new_fetched, c(14_000));
        assert_eq!(wm.fetched, c(14_000));
    }

    #[test]
    fn rewind_for_recovery_clamps_to_max() {
        let mut wm = CursorWatermarks::with_max_rewind(2_000);
        wm.advance_fetched(c(20_000)).expect("advance");
        wm.commit(c(10_000)).expect("commit");

        let result = wm.rewind_for_recovery(1_000);
        assert_eq!(result.new_fetched, c(18_000));
        assert_eq!(result.rewound_ms, 2_000);
    }

    #[test]
    fn rewind_for_recovery_near_origin_saturates() {
        let mut wm = CursorWatermarks::new();
        wm.advance_fetched(c(1_000)).expect("advance");
        wm.commit(c(1_000)).expect("commit");
        assert_eq!(wm.rewind_for_recovery(5_000).new_fetched, Cursor::ORIGIN);
    }

    #[test]
    fn newest_in_batch() {
        let mk = |ms: i64| {
            Chunk::new(
                "s",
                Some(1),
                Utc.timestamp_millis_opt(ms).single().expect("ts"),
                ChunkPayload::TextDelta { text: String::new() },
            )
        };
        assert_eq!(Cursor::newest_in(&[]), None);
        assert_eq!(
            Cursor::newest_in(&[mk(300), mk(900), mk(500)]),
            Some(c(900))
        );
    }

    #[test]
    fn cursor_serializes_as_number() {
        assert_eq!(serde_json::to_string(&c(42)).expect("serialize"), "42");
    }
}
