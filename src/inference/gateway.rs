//! The capability the engine needs from a model provider.
//!
//! `LlmGateway::complete` takes the conversation so far plus an optional tool
//! schema and answers with either natural-language text or tool invocations.
//! Text always arrives as a stream of fragments: a non-streaming provider
//! simply yields one fragment.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::errors::InferenceError;
use super::types::{ChatMessage, ToolDefinition, ToolInvocation};

/// Lazy, finite, non-restartable sequence of text fragments.
///
/// The stream ends when the provider finishes the reply.
pub type TextStream = BoxStream<'static, Result<String, InferenceError>>;

/// Input to a single provider call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Full message history, system prompt first.
    pub messages: Vec<ChatMessage>,
    /// Tools the model may call. `None` means plain text generation.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Ask the provider to stream text fragments as they are produced.
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            tools: None,
            stream: false,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// What the model answered.
pub enum LlmResponse {
    /// Natural-language reply.
    Text(TextStream),
    /// One or more tool invocations, in the order the model issued them.
    ToolInvocation(Vec<ToolInvocation>),
}

impl LlmResponse {
    /// Wrap an already complete reply.
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        LlmResponse::Text(stream::once(async move { Ok(content) }).boxed())
    }
}

impl std::fmt::Debug for LlmResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmResponse::Text(_) => f.write_str("Text(<stream>)"),
            LlmResponse::ToolInvocation(calls) => {
                f.debug_tuple("ToolInvocation").field(calls).finish()
            }
        }
    }
}

/// A model provider.
///
/// Implementations own their retry policy and per-call timeout. They must not
/// touch engine state: the only side effect is the network call.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmResponse, InferenceError>;
}

/// Call the gateway, giving up as soon as `cancel` fires.
pub async fn complete_cancellable(
    gateway: &dyn LlmGateway,
    request: CompletionRequest,
    cancel: &CancellationToken,
) -> Result<LlmResponse, InferenceError> {
    if cancel.is_cancelled() {
        return Err(InferenceError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(InferenceError::Cancelled),
        result = gateway.complete(request) => result,
    }
}

/// Drain a text stream into one string, stopping early on cancellation.
pub async fn collect_text(
    mut text: TextStream,
    cancel: &CancellationToken,
) -> Result<String, InferenceError> {
    let mut out = String::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
            next = text.next() => next,
        };
        match next {
            Some(fragment) => out.push_str(&fragment?),
            None => return Ok(out),
        }
    }
}

/// Non-streaming text generation: tools are not offered, and a reply that
/// nevertheless comes back as a tool invocation is a provider error.
pub async fn complete_text(
    gateway: &dyn LlmGateway,
    messages: Vec<ChatMessage>,
    cancel: &CancellationToken,
) -> Result<String, InferenceError> {
    match complete_cancellable(gateway, CompletionRequest::new(messages), cancel).await? {
        LlmResponse::Text(text) => collect_text(text, cancel).await,
        LlmResponse::ToolInvocation(calls) => Err(InferenceError::ProviderError {
            status: None,
            reason: format!(
                "expected text but model invoked {}",
                calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
            ),
        }),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
