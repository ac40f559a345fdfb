//! Typed events emitted by the engine task.

use std::fmt;

/// Why polling ended on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// Session reported `complete`.
    Completed,
    /// Session reported `error`.
    Errored,
    /// Server answered 429. Polling is not resumed automatically.
    RateLimited { retry_after_ms: Option<u64> },
}

impl TerminalReason {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "session complete"),
            Self::Errored => write!(f, "session ended with an error"),
            Self::RateLimited {
                retry_after_ms: Some(ms),
            } => write!(f, "rate limited (retry after {ms}ms)"),
            Self::RateLimited {
                retry_after_ms: None,
            } => write!(f, "rate limited"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Polling began for a key.
    Started { session_id: String },
    /// New chunks reached the render sink.
    ChunksApplied {
        session_id: String,
        /// Chunks that survived deduplication.
        count: usize,
        /// Units handed to the sink after consolidation.
        rendered: usize,
        /// Highest sequence applied so far for the session.
        last_sequence: Option<u64>,
    },
    /// Informational only; the engine retries by itself.
    FetchFailed {
        attempt: u32,
        retry_in_ms: u64,
        error: String,
    },
    /// Emitted exactly once per polling run that ends on its own.
    Terminal {
        session_id: String,
        reason: TerminalReason,
    },
    /// Polling stopped on request (stop, key switch or shutdown).
    Stopped { session_id: String },
}
