//! Per-session record of applied chunk sequences.
//!
//! The single source of truth for "has this exact chunk already been shown".
//! Every delivery path (poll cycle, recovery fetch, initial history load)
//! must go through `should_apply` before a chunk reaches the render sink.

use std::collections::{BTreeSet, HashMap};

use crate::types::Chunk;

#[derive(Debug, Clone, Default)]
pub struct SequenceDeduplicator {
    applied: HashMap<String, BTreeSet<u64>>,
}

impl SequenceDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-set: returns `true` and records the sequence when it has not
    /// been applied yet for `session_id`.
    ///
    /// Unsequenced chunks cannot be deduplicated and always return `true`;
    /// rendering them must be idempotent on the caller's side.
    pub fn should_apply(&mut self, session_id: &str, sequence: Option<u64>) -> bool {
        let Some(seq) = sequence else {
            return true;
        };
        match self.applied.get_mut(session_id) {
            Some(set) => set.insert(seq),
            None => {
                self.applied
                    .insert(session_id.to_string(), BTreeSet::from([seq]));
                true
            }
        }
    }

    /// Keep only the chunks that were not applied before, in input order.
    /// Duplicates inside the batch itself are dropped too.
    pub fn filter_batch(&mut self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        chunks
            .into_iter()
            .filter(|c| self.should_apply(&c.session_id, c.sequence))
            .collect()
    }

    /// Read-only lookup.
    pub fn contains(&self, session_id: &str, sequence: u64) -> bool {
        self.applied
            .get(session_id)
            .is_some_and(|set| set.contains(&sequence))
    }

    /// Highest applied sequence for a session.
    pub fn high_water(&self, session_id: &str) -> Option<u64> {
        self.applied
            .get(session_id)
            .and_then(|set| set.last().copied())
    }

    pub fn applied_count(&self, session_id: &str) -> usize {
        self.applied.get(session_id).map_or(0, BTreeSet::len)
    }

    /// Drop everything recorded for a session. Only safe once the session is
    /// complete and no longer viewed.
    pub fn forget_session(&mut self, session_id: &str) -> bool {
        self.applied.remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.applied.len()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
