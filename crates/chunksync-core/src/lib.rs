//! chunksync-core: chunk data model and the pure building blocks of the
//! synchronization pipeline (estimation, deduplication, consolidation).
//!
//! No IO, no async. Everything here is driven by the runtime crate.

pub mod consolidate;
pub mod dedup;
pub mod error;
pub mod estimator;
pub mod types;

pub use consolidate::{ChunkConsolidator, ConsolidatedChunk, Consolidation, ConsolidationStats};
pub use dedup::SequenceDeduplicator;
pub use error::SyncError;
pub use estimator::{Estimator, EstimatorConfig, EstimatorState, EstimatorUpdate};
pub use types::{Chunk, ChunkKind, ChunkPayload, SessionKey, SessionStatus};
