//! Shared types for the inference layer.
//!
//! These mirror the OpenAI Chat Completions API types, used for both
//! request building and response parsing.

use serde::{Deserialize, Serialize};

// ─── Messages ────────────────────────────────────────────────────────────────

/// A single message in the conversation.
///
/// `content` is serialized as `""` rather than `null` for assistant messages
/// that only carry tool calls; several OpenAI-compatible servers reject `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(serialize_with = "serialize_content")]
    pub content: Option<String>,
    /// Tool call results are sent back as `tool` role messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Assistant messages may contain tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
}

fn serialize_content<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(s) => serializer.serialize_str(s),
        None => serializer.serialize_str(""),
    }
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// Assistant message announcing the tool invocations of one loop iteration.
    ///
    /// Arguments are echoed back exactly as the model produced them.
    pub fn assistant_tool_calls(calls: &[(String, ToolInvocation)]) -> Self {
        let tool_calls = calls
            .iter()
            .map(|(id, call)| ToolCallResponse {
                id: id.clone(),
                r#type: "function".to_string(),
                function: FunctionCallResponse {
                    name: call.name.clone(),
                    arguments: call.raw_arguments.clone(),
                },
            })
            .collect();
        Self {
            role: Role::Assistant,
            content: None,
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }

    /// Tool result message.
    ///
    /// A string result is used as-is, anything else is JSON-encoded, so plain
    /// text never arrives double-quoted.
    pub fn tool_result(tool_call_id: impl Into<String>, result: &serde_json::Value) -> Self {
        let content = match result.as_str() {
            Some(s) => s.to_string(),
            None => result.to_string(),
        };
        Self {
            role: Role::Tool,
            content: Some(content),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }

    /// Whether this is an assistant message with natural-language content only.
    pub fn is_assistant_text(&self) -> bool {
        self.role == Role::Assistant && self.tool_calls.is_none()
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

// ─── Request Types ───────────────────────────────────────────────────────────

/// Tool definition sent in the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub function: FunctionDefinition,
}

/// Function definition within a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// A tool invocation issued by the model.
///
/// Arguments stay a raw string here. Turning them into a schema-conformant
/// object is the validator's job, not the transport's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Provider-assigned call id, when the provider sends one.
    pub id: Option<String>,
    pub name: String,
    pub raw_arguments: String,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, raw_arguments: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            raw_arguments: raw_arguments.into(),
        }
    }
}

/// Tool call as returned in the OpenAI response format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCallResponse,
}

/// Function call details in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResponse {
    pub name: String,
    pub arguments: String,
}

/// A single chunk from the streaming response.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    /// Incremental text token (if this chunk carries text).
    pub token: Option<String>,
    /// Tool invocations completed by this chunk.
    pub tool_calls: Option<Vec<ToolInvocation>>,
    /// Why the model stopped: `"stop"`, `"tool_calls"`, or `None` (still going).
    pub finish_reason: Option<String>,
}

/// Raw SSE chunk from the OpenAI API.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    pub choices: Vec<ChunkChoice>,
}

/// A single choice within a streaming chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// The delta (incremental update) within a chunk choice.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

/// A tool call fragment within a streaming delta.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkToolCall {
    pub index: Option<u32>,
    pub id: Option<String>,
    pub function: Option<ChunkFunction>,
}

/// A function call fragment within a streaming tool call.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkFunction {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
