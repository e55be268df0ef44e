//! Scripted gateway for engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::FutureExt;

use crate::inference::errors::InferenceError;
use crate::inference::gateway::{CompletionRequest, LlmGateway, LlmResponse};
use crate::inference::types::ToolInvocation;

/// One canned gateway reply.
pub enum Scripted {
    Text(String),
    /// Text delivered as separate stream fragments.
    Fragments(Vec<String>),
    Tools(Vec<ToolInvocation>),
    Error(InferenceError),
    /// Never answers; only cancellation gets the caller out.
    Hang,
    /// Answer after a delay.
    Delayed(Duration, Box<Scripted>),
}

impl Scripted {
    pub fn text(s: &str) -> Self {
        Scripted::Text(s.to_string())
    }

    pub fn tool(name: &str, args: &str) -> Self {
        Scripted::Tools(vec![ToolInvocation::new(name, args)])
    }
}

type Fallback = Box<dyn Fn(usize) -> Scripted + Send + Sync>;
type Drafter = Box<dyn Fn(&CompletionRequest) -> Scripted + Send + Sync>;

/// Replays `Scripted` replies in order and records every request.
///
/// Once the script runs dry the fallback (if any) answers; without one the
/// gateway reports a provider error. With a drafter installed, requests that
/// offer no tools (section generation and critique) bypass the script.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Option<Fallback>,
    drafter: Option<Drafter>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: None,
            drafter: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer every call past the script with `f(call_index)`.
    pub fn with_fallback(mut self, f: impl Fn(usize) -> Scripted + Send + Sync + 'static) -> Self {
        self.fallback = Some(Box::new(f));
        self
    }

    /// Answer tool-less requests with `f(request)`.
    pub fn with_drafter(
        mut self,
        f: impl Fn(&CompletionRequest) -> Scripted + Send + Sync + 'static,
    ) -> Self {
        self.drafter = Some(Box::new(f));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests that offered tools (the orchestrator's turn-loop calls).
    pub fn tool_requests(&self) -> Vec<CompletionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.tools.is_some())
            .collect()
    }
}

/// Drafter that approves every critique and writes a placeholder for
/// every section.
pub fn approving_drafter(request: &CompletionRequest) -> Scripted {
    if is_critique(request) {
        Scripted::text("<OK>")
    } else {
        Scripted::text("Section text.")
    }
}

pub fn is_critique(request: &CompletionRequest) -> bool {
    request.messages.first().and_then(|m| m.content.as_deref())
        == Some(crate::agent_core::prompts::CRITIQUE_SYSTEM_PROMPT)
}

/// The quoted section title in a generation request, e.g. `Remedies`.
pub fn requested_section(request: &CompletionRequest) -> Option<String> {
    let prompt = request.messages.get(1)?.content.as_deref()?;
    let start = prompt.find('"')? + 1;
    let len = prompt[start..].find('"')?;
    Some(prompt[start..start + len].to_string())
}

fn respond(reply: Scripted) -> futures::future::BoxFuture<'static, Result<LlmResponse, InferenceError>> {
    async move {
        match reply {
            Scripted::Text(s) => Ok(LlmResponse::text(s)),
            Scripted::Fragments(parts) => Ok(LlmResponse::Text(
                stream::iter(parts.into_iter().map(Ok)).boxed(),
            )),
            Scripted::Tools(calls) => Ok(LlmResponse::ToolInvocation(calls)),
            Scripted::Error(e) => Err(e),
            Scripted::Hang => {
                futures::future::pending::<()>().await;
                Err(InferenceError::Cancelled)
            }
            Scripted::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                respond(*inner).await
            }
        }
    }
    .boxed()
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmResponse, InferenceError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let (None, Some(drafter)) = (&request.tools, &self.drafter) {
            return respond(drafter(&request)).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        let reply = match (next, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(f)) => f(index),
            (None, None) => Scripted::Error(InferenceError::ProviderError {
                status: None,
                reason: "script exhausted".into(),
            }),
        };
        respond(reply).await
    }
}
