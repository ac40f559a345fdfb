use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

// ─── Chunk ────────────────────────────────────────────────────────

/// One immutable, ordered fragment of an in-progress agent response.
///
/// Within a session `sequence` is the identity key: re-fetching an overlapping
/// cursor range may return a chunk that was already applied, so arrival order
/// never identifies a chunk. `None` marks a legacy unsequenced chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub session_id: String,
    #[serde(default)]
    pub sequence: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub payload: ChunkPayload,
}

impl Chunk {
    pub fn new(
        session_id: impl Into<String>,
        sequence: Option<u64>,
        created_at: DateTime<Utc>,
        payload: ChunkPayload,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            sequence,
            created_at,
            payload,
        }
    }

    pub fn kind(&self) -> ChunkKind {
        self.payload.kind()
    }

    /// Creation time as non-negative epoch milliseconds.
    pub fn created_at_ms(&self) -> u64 {
        u64::try_from(self.created_at.timestamp_millis()).unwrap_or(0)
    }
}

/// Tagged chunk payload. The engine only ever looks at the tag; contents
/// belong to the render sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkPayload {
    /// Incremental assistant text.
    TextDelta { text: String },
    Thinking { text: String },
    /// Status block. A later block with the same `key` replaces an earlier one.
    System { key: String, text: String },
    ToolCall {
        call_id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        #[serde(default)]
        output: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    /// A tool call folded together with its result. Only produced by
    /// consolidation.
    ToolExchange {
        call_id: String,
        name: String,
        input: serde_json::Value,
        output: serde_json::Value,
        is_error: bool,
    },
    Error { message: String },
}

impl ChunkPayload {
    pub fn kind(&self) -> ChunkKind {
        match self {
            Self::TextDelta { .. } => ChunkKind::TextDelta,
            Self::Thinking { .. } => ChunkKind::Thinking,
            Self::System { .. } => ChunkKind::System,
            Self::ToolCall { .. } => ChunkKind::ToolCall,
            Self::ToolResult { .. } => ChunkKind::ToolResult,
            Self::ToolExchange { .. } => ChunkKind::ToolExchange,
            Self::Error { .. } => ChunkKind::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    TextDelta,
    Thinking,
    System,
    ToolCall,
    ToolResult,
    ToolExchange,
    Error,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextDelta => "text_delta",
            Self::Thinking => "thinking",
            Self::System => "system",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::ToolExchange => "tool_exchange",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Session ──────────────────────────────────────────────────────

/// Polling key: the viewed conversation plus the agent session streaming
/// into it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub conversation_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(conversation_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.conversation_id, self.session_id)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Pending,
    Complete,
    Error,
}

impl SessionStatus {
    /// Nothing more will arrive for a session in a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" | "running" => Ok(Self::Active),
            "pending" | "queued" => Ok(Self::Pending),
            "complete" | "completed" | "done" => Ok(Self::Complete),
            "error" | "failed" => Ok(Self::Error),
            _ => Err(SyncError::InvalidResponse(format!(
                "unknown session status: {s}"
            ))),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn chunk_payload_uses_type_tag() {
        let json = r#"{
            "session_id": "s1",
            "sequence": 4,
            "created_at": "2026-01-01T00:00:00Z",
            "payload": {"type": "text_delta", "text": "hel"}
        }"#;
        let chunk: Chunk = serde_json::from_str(json).expect("parse");
        assert_eq!(chunk.sequence, Some(4));
        assert_eq!(chunk.kind(), ChunkKind::TextDelta);
        assert_eq!(
            chunk.payload,
            ChunkPayload::TextDelta {
                text: "hel".to_string()
            }
        );
    }

    #[test]
    fn missing_sequence_is_unsequenced() {
        let json = r#"{
            "session_id": "s1",
            "created_at": "2026-01-01T00:00:00Z",
            "payload": {"type": "error", "message": "boom"}
        }"#;
        let chunk: Chunk = serde_json::from_str(json).expect("parse");
        assert_eq!(chunk.sequence, None);
        assert_eq!(chunk.kind(), ChunkKind::Error);
    }

    #[test]
    fn tool_result_defaults() {
        let json = r#"{"type": "tool_result", "call_id": "c1"}"#;
        let payload: ChunkPayload = serde_json::from_str(json).expect("parse");
        assert_eq!(
            payload,
            ChunkPayload::ToolResult {
                call_id: "c1".to_string(),
                output: serde_json::Value::Null,
                is_error: false,
            }
        );
    }

    #[test]
    fn created_at_ms_clamps_pre_epoch() {
        let before = Utc.timestamp_millis_opt(-5_000).single().expect("ts");
        let chunk = Chunk::new("s", Some(1), before, ChunkPayload::Error {
            message: String::new(),
        });
        assert_eq!(chunk.created_at_ms(), 0);

        let after = Utc.timestamp_millis_opt(1_700_000_000_123).single().expect("ts");
        let chunk = Chunk::new("s", Some(1), after, ChunkPayload::Error {
            message: String::new(),
        });
        assert_eq!(chunk.created_at_ms(), 1_700_000_000_123);
    }

    #[test]
    fn session_status_terminal() {
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(SessionStatus::Complete.is_terminal());
        assert!(SessionStatus::Error.is_terminal());
    }

    #[test]
    fn session_status_from_str_aliases() {
        assert_eq!("COMPLETED".parse::<SessionStatus>().ok(), Some(SessionStatus::Complete));
        assert_eq!("failed".parse::<SessionStatus>().ok(), Some(SessionStatus::Error));
        assert_eq!("running".parse::<SessionStatus>().ok(), Some(SessionStatus::Active));
        assert!("weird".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn session_status_serde_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Complete).expect("serialize");
        assert_eq!(json, "\"complete\"");
    }

    #[test]
    fn session_key_display() {
        let key = SessionKey::new("conv-1", "sess-9");
        assert_eq!(key.to_string(), "conv-1/sess-9");
    }
}
