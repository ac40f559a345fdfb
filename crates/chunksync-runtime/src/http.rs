//! HTTP chunk transport (reqwest).
//!
//! - `GET {base}/api/conversations/{conversation}/chunks?session_id=..&since=<ms>`
//!   returns a JSON array of chunks.
//! - `GET {base}/api/sessions/{session}/status` returns `{"status": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use chunksync_core::{Chunk, SessionKey, SessionStatus, SyncError};
use chunksync_link::Cursor;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;

use crate::transport::ChunkTransport;

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::Transport(format!("invalid server URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Transport(format!(
                "server URL cannot carry a path: {base_url}"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SyncError::Transport(format!("bad base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_body(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, SyncError> {
        let response = request.send().await.map_err(|e| self.map_error(e))?;
        let response = check_status(response)?;
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;
        Ok(body.to_vec())
    }

    fn map_error(&self, e: reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::Timeout(self.timeout)
        } else if e.is_decode() {
            SyncError::InvalidResponse(e.to_string())
        } else {
            SyncError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl ChunkTransport for HttpTransport {
    async fn fetch_chunks_since(
        &self,
        key: &SessionKey,
        since: Cursor,
    ) -> Result<Vec<Chunk>, SyncError> {
        let url = self.endpoint(&["api", "conversations", &key.conversation_id, "chunks"])?;
        let since = since.as_millis().to_string();
        let request = self
            .client
            .get(url)
            .query(&[("session_id", key.session_id.as_str()), ("since", since.as_str())]);
        let body = self.get_body(request).await?;
        serde_json::from_slice(&body).map_err(|e| SyncError::InvalidResponse(e.to_string()))
    }

    async fn fetch_session_status(&self, session_id: &str) -> Result<SessionStatus, SyncError> {
        let url = self.endpoint(&["api", "sessions", session_id, "status"])?;
        let body = self.get_body(self.client.get(url)).await?;
        let parsed: StatusBody =
            serde_json::from_slice(&body).map_err(|e| SyncError::InvalidResponse(e.to_string()))?;
        parsed.status.parse()
    }
}

fn check_status(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SyncError::RateLimited {
            retry_after_ms: retry_after_ms(response.headers()),
        });
    }
    if !status.is_success() {
        return Err(SyncError::Http {
            status: status.as_u16(),
        });
    }
    Ok(response)
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let secs: u64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Some(secs.saturating_mul(1_000))
}
