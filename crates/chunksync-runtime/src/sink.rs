//! Render sinks: where consolidated chunks end up.
//!
//! The engine only calls these four methods; turning payloads into anything
//! visible is entirely the sink's business.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use chunksync_core::{ChunkPayload, ConsolidatedChunk};

/// Sink-assigned identifier of a rendered unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderedId(pub String);

pub trait RenderSink: Send {
    fn render(&mut self, item: &ConsolidatedChunk) -> Option<RenderedId>;

    /// Whether the viewer currently sits at the bottom of the transcript.
    fn is_near_bottom(&self) -> bool;

    fn show_placeholder(&mut self);

    fn clear_placeholder(&mut self);
}

// ─── TerminalSink ───────────────────────────────────────────────────

/// Writes the transcript to a terminal. Text deltas stream inline; every
/// other chunk kind gets its own line.
pub struct TerminalSink<W: Write + Send> {
    out: W,
    mid_line: bool,
    rendered: u64,
}

impl TerminalSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            mid_line: false,
            rendered: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) -> std::io::Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
            self.mid_line = false;
        }
        writeln!(self.out, "{text}")
    }

    fn write_chunk(&mut self, item: &ConsolidatedChunk) -> std::io::Result<()> {
        let stamp = item.chunk.created_at.format("%H:%M:%S");
        match &item.chunk.payload {
            ChunkPayload::TextDelta { text } => {
                write!(self.out, "{text}")?;
                self.mid_line = !text.ends_with('\n');
            }
            ChunkPayload::Thinking { text } => self.line(&format!("[thinking] {text}"))?,
            ChunkPayload::System { key, text } => self.line(&format!("[{stamp}] {key}: {text}"))?,
            ChunkPayload::ToolCall { name, .. } => {
                self.line(&format!("[{stamp}] tool {name} running"))?;
            }
            ChunkPayload::ToolResult {
                call_id, is_error, ..
            } => {
                let outcome = if *is_error { "failed" } else { "done" };
                self.line(&format!("[{stamp}] tool {call_id} {outcome}"))?;
            }
            ChunkPayload::ToolExchange { name, is_error, .. } => {
                let outcome = if *is_error { "failed" } else { "done" };
                self.line(&format!("[{stamp}] tool {name} {outcome}"))?;
            }
            ChunkPayload::Error { message } => self.line(&format!("error: {message}"))?,
        }
        self.out.flush()
    }
}

impl<W: Write + Send> RenderSink for TerminalSink<W> {
    fn render(&mut self, item: &ConsolidatedChunk) -> Option<RenderedId> {
        if let Err(e) = self.write_chunk(item) {
            tracing::warn!("terminal write failed: {e}");
            return None;
        }
        self.rendered += 1;
        Some(RenderedId(format!("t{}", self.rendered)))
    }

    /// A terminal always follows the tail.
    fn is_near_bottom(&self) -> bool {
        true
    }

    fn show_placeholder(&mut self) {}

    fn clear_placeholder(&mut self) {}
}

// ─── RecordingSink ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Render { sequence: Option<u64>, subsumed: Vec<u64> },
    ShowPlaceholder,
    ClearPlaceholder,
}

#[derive(Debug, Default)]
struct Recording {
    calls: Vec<SinkCall>,
    rendered: Vec<ConsolidatedChunk>,
    near_bottom: bool,
}

/// Records every call. Clones share one recording, so a test can keep a
/// clone while the engine owns the other.
#[derive(Debug, Clone)]
pub struct RecordingSink {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Recording {
                near_bottom: true,
                ..Recording::default()
            })),
        }
    }

    pub fn set_near_bottom(&self, near_bottom: bool) {
        self.with(|r| r.near_bottom = near_bottom);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.with(|r| r.calls.clone())
    }

    pub fn rendered(&self) -> Vec<ConsolidatedChunk> {
        self.with(|r| r.rendered.clone())
    }

    /// Sequences of rendered chunks, in render order.
    pub fn rendered_sequences(&self) -> Vec<u64> {
        self.with(|r| r.rendered.iter().filter_map(|c| c.chunk.sequence).collect())
    }

    fn with<R>(&self, f: impl FnOnce(&mut Recording) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSink for RecordingSink {
    fn render(&mut self, item: &ConsolidatedChunk) -> Option<RenderedId> {
        self.with(|r| {
            r.calls.push(SinkCall::Render {
                sequence: item.chunk.sequence,
                subsumed: item.subsumed.clone(),
            });
            r.rendered.push(item.clone());
            Some(RenderedId(format!("r{}", r.rendered.len())))
        })
    }

    fn is_near_bottom(&self) -> bool {
        self.with(|r| r.near_bottom)
    }

    fn show_placeholder(&mut self) {
        self.with(|r| r.calls.push(SinkCall::ShowPlaceholder));
    }

    fn clear_placeholder(&mut self) {
        self.with(|r| r.calls.push(SinkCall::ClearPlaceholder));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use chunksync_core::Chunk;

    fn item(seq: u64, payload: ChunkPayload) -> ConsolidatedChunk {
        let created_at = Utc.timestamp_millis_opt(1_000).single().expect("timestamp");
        let mut consolidated = chunksync_core::ChunkConsolidator::new()
            .consolidate(vec![Chunk::new("s", Some(seq), created_at, payload)])
            .chunks;
        consolidated.remove(0)
    }

    fn text(seq: u64, t: &str) -> ConsolidatedChunk {
        item(seq, ChunkPayload::TextDelta { text: t.into() })
    }

    #[test]
    fn terminal_streams_text_inline() {
        let mut sink = TerminalSink::new(Vec::new());
        sink.render(&text(1, "Hel"));
        sink.render(&text(2, "lo"));
        sink.render(&item(
            3,
            ChunkPayload::Error {
                message: "boom".into(),
            },
        ));
        let out = String::from_utf8(sink.into_inner()).expect("utf8");
        assert_eq!(out, "Hello\nerror: boom\n");
    }

    #[test]
    fn terminal_assigns_ids() {
        let mut sink = TerminalSink::new(Vec::new());
        assert_eq!(sink.render(&text(1, "a")), Some(RenderedId("t1".into())));
        assert_eq!(sink.render(&text(2, "b")), Some(RenderedId("t2".into())));
        assert!(sink.is_near_bottom());
    }

    #[test]
    fn recording_clones_share_state() {
        let sink = RecordingSink::new();
        let mut engine_side = sink.clone();
        engine_side.render(&text(4, "x"));
        engine_side.show_placeholder();
        assert_eq!(sink.rendered_sequences(), vec![4]);
        assert_eq!(sink.calls().last(), Some(&SinkCall::ShowPlaceholder));

        sink.set_near_bottom(false);
        assert!(!engine_side.is_near_bottom());
    }
}
