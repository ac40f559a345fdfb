//! Batch consolidation: merge and supersede related chunks before rendering.
//!
//! A poll can return several small, closely spaced fragments at once.
//! Rendering each as its own visual unit flickers, so a batch is reduced
//! first:
//!
//! - **System supersede**: a later `system` chunk with the same
//!   `(session, key)` replaces earlier ones in the batch.
//! - **Tool collapse**: a `tool_call` and a later `tool_result` with the same
//!   `(session, call_id)` become one `tool_exchange` at the call's position.
//! - **Text merge**: adjacent `text_delta` chunks of one session are
//!   concatenated in arrival order.
//!
//! Survivors keep the identity (`sequence`, `created_at`) of the chunk at
//! whose position they are emitted, so output order is input order.
//! Input must already be deduplicated.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Chunk, ChunkPayload};

// ─── Output ─────────────────────────────────────────────────────────

/// A chunk handed to the render sink, plus every original sequence folded
/// into it (its own included).
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedChunk {
    pub chunk: Chunk,
    pub subsumed: Vec<u64>,
}

impl ConsolidatedChunk {
    fn single(chunk: Chunk) -> Self {
        let subsumed = chunk.sequence.into_iter().collect();
        Self { chunk, subsumed }
    }

    fn absorb(&mut self, other: &ConsolidatedChunk) {
        self.subsumed.extend_from_slice(&other.subsumed);
        self.subsumed.sort_unstable();
    }
}

/// Diagnostic counters. Never used for correctness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationStats {
    pub text_merged: u64,
    pub tools_collapsed: u64,
    pub system_superseded: u64,
}

impl ConsolidationStats {
    pub fn accumulate(&mut self, other: &ConsolidationStats) {
        self.text_merged += other.text_merged;
        self.tools_collapsed += other.tools_collapsed;
        self.system_superseded += other.system_superseded;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Consolidation {
    pub chunks: Vec<ConsolidatedChunk>,
    pub stats: ConsolidationStats,
}

// ─── Consolidator ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ChunkConsolidator {
    totals: ConsolidationStats,
}

impl ChunkConsolidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reduce one ordered batch.
    pub fn consolidate(&mut self, batch: Vec<Chunk>) -> Consolidation {
        let mut stats = ConsolidationStats::default();
        let mut slots: Vec<Option<ConsolidatedChunk>> =
            batch.into_iter().map(|c| Some(ConsolidatedChunk::single(c))).collect();

        supersede_system(&mut slots, &mut stats);
        collapse_tools(&mut slots, &mut stats);
        let chunks = merge_text(slots.into_iter().flatten(), &mut stats);

        self.totals.accumulate(&stats);
        Consolidation { chunks, stats }
    }

    /// Cumulative counters across every batch seen.
    pub fn stats(&self) -> ConsolidationStats {
        self.totals
    }
}

/// Keep only the last `system` chunk per `(session, key)`.
fn supersede_system(slots: &mut [Option<ConsolidatedChunk>], stats: &mut ConsolidationStats) {
    let mut last: HashMap<(String, String), usize> = HashMap::new();
    for (idx, slot) in slots.iter().enumerate() {
        if let Some(ConsolidatedChunk { chunk, .. }) = slot {
            if let ChunkPayload::System { key, .. } = &chunk.payload {
                last.insert((chunk.session_id.clone(), key.clone()), idx);
            }
        }
    }

    for idx in 0..slots.len() {
        let target = match &slots[idx] {
            Some(ConsolidatedChunk { chunk, .. }) => match &chunk.payload {
                ChunkPayload::System { key, .. } => last
                    .get(&(chunk.session_id.clone(), key.clone()))
                    .copied()
                    .filter(|&winner| winner != idx),
                _ => None,
            },
            None => None,
        };
        if let Some(winner) = target {
            if let Some(earlier) = slots[idx].take() {
                if let Some(survivor) = slots[winner].as_mut() {
                    survivor.absorb(&earlier);
                }
                stats.system_superseded += 1;
            }
        }
    }
}

enum ToolRole {
    Call,
    Result,
}

/// Fold each `tool_result` into the earlier matching `tool_call`.
fn collapse_tools(slots: &mut [Option<ConsolidatedChunk>], stats: &mut ConsolidationStats) {
    let mut open_calls: HashMap<(String, String), usize> = HashMap::new();

    for idx in 0..slots.len() {
        let tagged = slots[idx].as_ref().and_then(|c| {
            let session = c.chunk.session_id.clone();
            match &c.chunk.payload {
                ChunkPayload::ToolCall { call_id, .. } => {
                    Some((ToolRole::Call, (session, call_id.clone())))
                }
                ChunkPayload::ToolResult { call_id, .. } => {
                    Some((ToolRole::Result, (session, call_id.clone())))
                }
                _ => None,
            }
        });

        match tagged {
            Some((ToolRole::Call, key)) => {
                open_calls.insert(key, idx);
            }
            Some((ToolRole::Result, key)) => {
                let Some(call_idx) = open_calls.remove(&key) else {
                    continue;
                };
                let Some(result) = slots[idx].take() else {
                    continue;
                };
                let Some(call) = slots[call_idx].as_mut() else {
                    continue;
                };
                let exchange = match (&call.chunk.payload, &result.chunk.payload) {
                    (
                        ChunkPayload::ToolCall {
                            call_id,
                            name,
                            input,
                        },
                        ChunkPayload::ToolResult {
                            output, is_error, ..
                        },
                    ) => Some(ChunkPayload::ToolExchange {
                        call_id: call_id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                        output: output.clone(),
                        is_error: *is_error,
                    }),
                    _ => None,
                };
                if let Some(payload) = exchange {
                    call.chunk.payload = payload;
                }
                call.absorb(&result);
                stats.tools_collapsed += 1;
            }
            None => {}
        }
    }
}

/// Concatenate runs of adjacent same-session `text_delta` chunks.
fn merge_text(
    survivors: impl Iterator<Item = ConsolidatedChunk>,
    stats: &mut ConsolidationStats,
) -> Vec<ConsolidatedChunk> {
    let mut out: Vec<ConsolidatedChunk> = Vec::new();
    for next in survivors {
        if let Some(prev) = out.last_mut() {
            if prev.chunk.session_id == next.chunk.session_id {
                if let (
                    ChunkPayload::TextDelta { text: acc },
                    ChunkPayload::TextDelta { text },
                ) = (&mut prev.chunk.payload, &next.chunk.payload)
                {
                    acc.push_str(text);
                    prev.absorb(&next);
                    stats.text_merged += 1;
                    continue;
                }
            }
        }
        out.push(next);
    }
    out
}

// ─── Tests ──────────────────────────────────────────────────────────
