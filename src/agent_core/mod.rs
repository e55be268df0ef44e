//! Agent Core: the conversation engine for LegalDraft.
//!
//! Submodules:
//! - `orchestrator`: Per-turn tool loop, phase advancement, event streaming
//! - `session` / `store`: Per-session state and the session registry
//! - `phase`: The intake → clarification → generation → revision machine
//! - `schema` / `validation`: Tool schemas and the argument repair pipeline
//! - `tools`: Tool handlers and the dispatcher
//! - `reflection`: Selective generate/critique loop for critical sections
//! - `sections`: Per-document-type section catalogues
//! - `prompts`: Layered system prompt composition
//! - `events`: Events streamed to callers
//! - `tokens`: Token estimation and safe truncation
//! - `errors`: Agent-level error types

pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod phase;
pub mod prompts;
pub mod reflection;
pub mod schema;
pub mod sections;
pub mod session;
pub mod store;
pub mod tokens;
pub mod tools;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use errors::AgentError;
pub use events::{EngineEvent, EventSink, TurnMetadata, TurnStatus};
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use phase::{Confirmation, Phase};
pub use prompts::{LayeredPromptComposer, PromptComposer, PromptContext};
pub use schema::ToolName;
pub use session::{DocumentType, Expertise, Session, SessionSnapshot};
pub use store::{SessionStore, DEFAULT_SESSION_ID};
pub use validation::{validate_and_parse, ValidatedArguments};
