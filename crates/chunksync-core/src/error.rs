//! Error types shared across the synchronization pipeline.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("server returned HTTP {status}")]
    Http { status: u16 },

    #[error("rate limited by server")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl SyncError {
    /// Transient errors are retried with backoff. Rate limiting ends the
    /// polling loop instead.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::RateLimited { .. })
    }
}
