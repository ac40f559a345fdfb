//! ChunkTransport trait: how the engine talks to the chunk server.
//! Object-safe and mock-injectable; the engine never does IO itself.

use std::sync::Arc;

use async_trait::async_trait;
use chunksync_core::{Chunk, SessionKey, SessionStatus, SyncError};
use chunksync_link::Cursor;

#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Chunks of `key` created after `since`, in server order.
    async fn fetch_chunks_since(
        &self,
        key: &SessionKey,
        since: Cursor,
    ) -> Result<Vec<Chunk>, SyncError>;

    async fn fetch_session_status(&self, session_id: &str) -> Result<SessionStatus, SyncError>;
}

#[async_trait]
impl<T: ChunkTransport + ?Sized> ChunkTransport for Arc<T> {
    async fn fetch_chunks_since(
        &self,
        key: &SessionKey,
        since: Cursor,
    ) -> Result<Vec<Chunk>, SyncError> {
        (**self).fetch_chunks_since(key, since).await
    }

    async fn fetch_session_status(&self, session_id: &str) -> Result<SessionStatus, SyncError> {
        (**self).fetch_session_status(session_id).await
    }
}
