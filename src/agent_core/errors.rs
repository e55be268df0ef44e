//! Engine error types.
//!
//! Every error a caller can see maps onto a stable code, a `recoverable`
//! flag and an optional suggestion; see [`AgentError::code`].

use thiserror::Error;

use crate::inference::errors::InferenceError;

/// Errors that abort a turn (or, for section failures, one section).
#[derive(Debug, Error)]
pub enum AgentError {
    /// The inbound message or session id was rejected.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The provider kept failing transiently until the retry budget ran out.
    #[error("model provider unavailable: {source}")]
    TransientProvider {
        #[source]
        source: InferenceError,
    },

    /// The provider rejected the request, or the reply could not be used.
    #[error("model provider error: {source}")]
    FatalProvider {
        #[source]
        source: InferenceError,
    },

    /// Tool arguments could not be brought into schema shape.
    #[error("arguments for '{tool}' are missing required fields: {}", missing_fields.join(", "))]
    UnrecoverableSchema {
        tool: String,
        missing_fields: Vec<String>,
    },

    /// The model named a tool that is not in the registry.
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    /// Too many tool-calling responses in one turn.
    #[error("tool loop exceeded {limit} iterations")]
    ToolLoopExceeded { limit: usize },

    /// The caller went away or cancelled the turn.
    #[error("turn cancelled")]
    Cancelled,

    /// One section could not be generated; the rest of the document continues.
    #[error("failed to generate section '{section}': {reason}")]
    SectionGeneration { section: String, reason: String },

    /// A phase edge outside the allowed set was requested.
    #[error("invalid phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },
}

impl AgentError {
    /// Stable machine-readable code carried on `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::InvalidInput { .. } => "VALIDATION_ERROR",
            AgentError::TransientProvider { .. } => "PROVIDER_UNAVAILABLE",
            AgentError::FatalProvider { .. } => "PROVIDER_ERROR",
            AgentError::UnrecoverableSchema { .. } => "SCHEMA_ERROR",
            AgentError::UnknownTool { .. } => "UNKNOWN_TOOL",
            AgentError::ToolLoopExceeded { .. } => "TOOL_LOOP_EXCEEDED",
            AgentError::Cancelled => "CANCELLED",
            AgentError::SectionGeneration { .. } => "SECTION_GENERATION_FAILED",
            AgentError::InvalidTransition { .. } | AgentError::SerializationError { .. } => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Whether the caller can reasonably retry the same turn.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AgentError::InvalidInput { .. }
                | AgentError::TransientProvider { .. }
                | AgentError::UnrecoverableSchema { .. }
                | AgentError::ToolLoopExceeded { .. }
                | AgentError::Cancelled
                | AgentError::SectionGeneration { .. }
        )
    }

    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            AgentError::InvalidInput { .. } => Some("Check your input and try again"),
            AgentError::TransientProvider { .. } => {
                Some("The model service is busy. Wait a moment and send the message again")
            }
            AgentError::UnrecoverableSchema { .. } => {
                Some("Try rephrasing your request with more specific details")
            }
            AgentError::ToolLoopExceeded { .. } => {
                Some("Try breaking the request into smaller steps")
            }
            AgentError::SectionGeneration { .. } => {
                Some("Ask to regenerate the missing section")
            }
            _ => None,
        }
    }
}

impl From<InferenceError> for AgentError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::Cancelled => AgentError::Cancelled,
            e if e.is_transient() => AgentError::TransientProvider { source: e },
            e => AgentError::FatalProvider { source: e },
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}
