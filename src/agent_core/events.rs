//! Engine events streamed to the caller during a turn.
//!
//! Events serialize as `{"type": "<name>", ...}` and render to SSE frames
//! with [`EngineEvent::to_sse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::errors::AgentError;
use super::phase::Phase;
use super::session::SessionSnapshot;

/// Turn status carried by `metadata` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Started,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub status: TurnStatus,
    pub session_id: String,
    pub phase: Phase,
    /// RFC 3339.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count_estimated: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_calls: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// One fragment of the assistant's reply.
    Message { content: String },
    FunctionCall { name: String, arguments: String },
    FunctionResult { name: String, result: Value },
    /// `content` is the whole assembled document after the change.
    DocumentUpdate {
        content: String,
        section: String,
        action: String,
    },
    Metadata(TurnMetadata),
    Error {
        message: String,
        code: String,
        recoverable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggestion: Option<String>,
    },
    Done {
        response: String,
        state: SessionSnapshot,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Message { .. } => "message",
            EngineEvent::FunctionCall { .. } => "function_call",
            EngineEvent::FunctionResult { .. } => "function_result",
            EngineEvent::DocumentUpdate { .. } => "document_update",
            EngineEvent::Metadata(_) => "metadata",
            EngineEvent::Error { .. } => "error",
            EngineEvent::Done { .. } => "done",
        }
    }

    pub fn from_error(err: &AgentError) -> Self {
        EngineEvent::Error {
            message: err.to_string(),
            code: err.code().to_string(),
            recoverable: err.is_recoverable(),
            suggestion: err.suggestion().map(str::to_string),
        }
    }

    /// `event: <name>\ndata: <json>\n\n`
    pub fn to_sse(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"unserializable event: {e}","code":"INTERNAL_ERROR","recoverable":false}}"#)
        });
        format!("event: {}\ndata: {}\n\n", self.name(), data)
    }
}

/// Where a turn sends its events. A sink without a receiver drops them.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<EngineEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// Deliver one event, waiting for channel capacity. A closed receiver is
    /// not an error here; the turn notices through its cancellation token.
    pub async fn emit(&self, event: EngineEvent) {
        let Some(tx) = &self.tx else { return };
        tracing::trace!(event = event.name(), "emit");
        if tx.send(event).await.is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
