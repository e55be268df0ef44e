//! Inference gateway: everything that talks to the model provider.
//!
//! - The [`LlmGateway`] trait the engine depends on
//! - An OpenAI-compatible HTTP client implementing it
//! - SSE stream parsing with tool-call fragment accumulation
//! - The retry policy applied to transient failures
//! - Configuration loading from `config/legaldraft.yaml`

pub mod client;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod retry;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::InferenceClient;
pub use config::{AppConfig, EngineSettings, ModelConfig};
pub use errors::InferenceError;
pub use gateway::{CompletionRequest, LlmGateway, LlmResponse, TextStream};
pub use retry::RetryPolicy;
pub use types::{ChatMessage, Role, ToolDefinition, ToolInvocation};
