//! chunksync-link: everything about the link to the chunk server that is not
//! IO itself. The canonical fetch cursor with fetched/committed watermarks,
//! and the network-quality classifier that picks a polling tier.

pub mod cursor;
pub mod quality;

pub use cursor::{Cursor, CursorError, CursorWatermarks, RewindResult};
pub use quality::{NetworkQuality, NetworkQualityWindow, NetworkTier, QualityTrend};
