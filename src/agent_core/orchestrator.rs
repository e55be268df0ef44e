//! Conversation orchestrator: the per-turn tool loop and phase machine.
//!
//! One turn:
//! 1. validate input, take the session lock (turns on one session serialize)
//! 2. work on a copy of the session; append the user message
//! 3. call the gateway with the composed system prompt, history and tools
//! 4. on tool invocations: validate, dispatch, append results, advance the
//!    phase, and loop; on text: stream it out and finish
//! 5. on success commit the copy; on any error drop it
//!
//! Entering `generation` drafts every missing section through the
//! reflection loop before the turn continues.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::errors::AgentError;
use super::events::{EngineEvent, EventSink, TurnMetadata, TurnStatus};
use super::phase::{next_phase, Confirmation, Phase};
use super::prompts::{LayeredPromptComposer, PromptComposer, PromptContext};
use super::reflection::{reflect_and_generate, SectionRequest};
use super::schema::all_tool_definitions;
use super::sections::{section_order, section_spec};
use super::session::{Session, SessionSnapshot};
use super::store::{validate_session_id, SessionStore};
use super::tokens::{estimate_history_tokens, preview};
use super::tools::{ToolCallRecord, ToolContext, ToolDispatcher};
use crate::inference::config::EngineSettings;
use crate::inference::gateway::{
    complete_cancellable, CompletionRequest, LlmGateway, LlmResponse, TextStream,
};
use crate::inference::types::{ChatMessage, ToolDefinition, ToolInvocation};

/// Result of a successful turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub session_id: String,
    pub response: String,
    pub state: SessionSnapshot,
    pub function_calls: usize,
    pub elapsed_ms: u64,
}

/// Per-turn counters.
#[derive(Debug, Default)]
struct TurnStats {
    tool_rounds: usize,
    function_calls: usize,
}

pub struct Orchestrator {
    gateway: Arc<dyn LlmGateway>,
    composer: Arc<dyn PromptComposer>,
    store: SessionStore,
    dispatcher: ToolDispatcher,
    tools: Vec<ToolDefinition>,
    settings: EngineSettings,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn LlmGateway>, settings: EngineSettings) -> Self {
        Self {
            gateway,
            composer: Arc::new(LayeredPromptComposer),
            store: SessionStore::new(settings.max_history_messages),
            dispatcher: ToolDispatcher,
            tools: all_tool_definitions(),
            settings,
        }
    }

    pub fn with_composer(mut self, composer: Arc<dyn PromptComposer>) -> Self {
        self.composer = composer;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    // ─── Session operations ─────────────────────────────────────────────

    /// Current snapshot; an unknown id gets a fresh session.
    pub async fn state(&self, session_id: &str) -> Result<SessionSnapshot, AgentError> {
        let session_id = validate_session_id(session_id)?;
        Ok(self.store.snapshot(&session_id).await)
    }

    /// Discard the session and return the id it continues under.
    pub async fn reset(
        &self,
        session_id: &str,
        suggested_id: Option<&str>,
    ) -> Result<String, AgentError> {
        let session_id = validate_session_id(session_id)?;
        self.store.reset(&session_id, suggested_id).await
    }

    fn validate_message(&self, message: &str) -> Result<String, AgentError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AgentError::InvalidInput {
                reason: "message is empty".into(),
            });
        }
        let len = message.chars().count();
        if len > self.settings.max_message_length {
            return Err(AgentError::InvalidInput {
                reason: format!(
                    "message is {len} characters, the limit is {}",
                    self.settings.max_message_length
                ),
            });
        }
        Ok(message.to_string())
    }

    // ─── Turns ──────────────────────────────────────────────────────────

    /// Run one turn, streaming events into `sink`.
    ///
    /// Errors are also emitted as an `error` event before being returned.
    pub async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Result<TurnOutcome, AgentError> {
        let start = Instant::now();
        let result = self.run_turn(session_id, message, cancel, sink, start).await;
        if let Err(e) = &result {
            tracing::error!(
                session_id = %session_id,
                code = e.code(),
                recoverable = e.is_recoverable(),
                error = %e,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "turn failed"
            );
            sink.emit(EngineEvent::from_error(e)).await;
        }
        result
    }

    /// Run one turn in the background and return its events as a stream.
    ///
    /// Dropping the stream cancels the turn.
    pub fn stream_message(
        self: &Arc<Self>,
        session_id: impl Into<String>,
        message: impl Into<String>,
    ) -> impl Stream<Item = EngineEvent> + Send + 'static {
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();

        let watch_tx = tx.clone();
        let watch_cancel = cancel.clone();
        let watch_finished = finished.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watch_tx.closed() => {
                    tracing::debug!("event stream dropped, cancelling turn");
                    watch_cancel.cancel();
                }
                _ = watch_finished.cancelled() => {}
            }
        });

        let this = Arc::clone(self);
        let session_id = session_id.into();
        let message = message.into();
        tokio::spawn(async move {
            let sink = EventSink::new(tx);
            let _ = this.send_message(&session_id, &message, &cancel, &sink).await;
            finished.cancel();
        });

        stream::unfold(rx, |mut rx| async move {
            let event = rx.recv().await?;
            Some((event, rx))
        })
    }

    async fn run_turn(
        &self,
        session_id: &str,
        message: &str,
        cancel: &CancellationToken,
        sink: &EventSink,
        start: Instant,
    ) -> Result<TurnOutcome, AgentError> {
        let session_id = validate_session_id(session_id)?;
        let message = self.validate_message(message)?;

        // A reset may re-key the session while we wait for the lock.
        let mut guard = loop {
            let handle = self.store.get_or_create(&session_id);
            let guard = handle.lock_owned().await;
            if guard.id() == session_id {
                break guard;
            }
        };
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        tracing::info!(
            session_id = %session_id,
            phase = %guard.phase(),
            message = %preview(&message, 120),
            "=== TURN START ==="
        );
        sink.emit(EngineEvent::Metadata(TurnMetadata {
            status: TurnStatus::Started,
            session_id: session_id.clone(),
            phase: guard.phase(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            token_count_estimated: None,
            char_count: None,
            function_calls: None,
            elapsed_time_ms: None,
        }))
        .await;

        let mut working = guard.clone();
        working.push_message(ChatMessage::user(message));
        let mut stats = TurnStats::default();
        let response = self.turn_loop(&mut working, cancel, sink, &mut stats).await?;

        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let snapshot = working.snapshot();
        let token_estimate = estimate_history_tokens(working.history());
        *guard = working;
        drop(guard);

        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            session_id = %session_id,
            phase = %snapshot.phase,
            function_calls = stats.function_calls,
            tool_rounds = stats.tool_rounds,
            elapsed_ms,
            "=== TURN COMPLETE ==="
        );

        sink.emit(EngineEvent::Metadata(TurnMetadata {
            status: TurnStatus::Completed,
            session_id: session_id.clone(),
            phase: snapshot.phase,
            timestamp: chrono::Utc::now().to_rfc3339(),
            token_count_estimated: Some(token_estimate),
            char_count: Some(response.chars().count()),
            function_calls: Some(stats.function_calls),
            elapsed_time_ms: Some(elapsed_ms),
        }))
        .await;
        sink.emit(EngineEvent::Done {
            response: response.clone(),
            state: snapshot.clone(),
        })
        .await;

        Ok(TurnOutcome {
            session_id,
            response,
            state: snapshot,
            function_calls: stats.function_calls,
            elapsed_ms,
        })
    }

    fn build_messages(&self, session: &Session) -> Vec<ChatMessage> {
        let system = self.composer.compose(&PromptContext::from_session(session));
        let mut messages = Vec::with_capacity(session.history().len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend(session.history().iter().cloned());
        messages
    }

    async fn turn_loop(
        &self,
        working: &mut Session,
        cancel: &CancellationToken,
        sink: &EventSink,
        stats: &mut TurnStats,
    ) -> Result<String, AgentError> {
        loop {
            let request = CompletionRequest::new(self.build_messages(working))
                .with_tools(self.tools.clone())
                .streaming(true);

            match complete_cancellable(self.gateway.as_ref(), request, cancel).await? {
                LlmResponse::Text(text) => {
                    let response = self.stream_text(text, cancel, sink).await?;
                    working.push_message(ChatMessage::assistant(response.clone()));
                    return Ok(response);
                }
                LlmResponse::ToolInvocation(calls) => {
                    if stats.tool_rounds >= self.settings.max_tool_iterations {
                        tracing::warn!(
                            session_id = %working.id(),
                            limit = self.settings.max_tool_iterations,
                            "tool loop ceiling reached"
                        );
                        return Err(AgentError::ToolLoopExceeded {
                            limit: self.settings.max_tool_iterations,
                        });
                    }
                    stats.tool_rounds += 1;
                    tracing::info!(
                        session_id = %working.id(),
                        round = stats.tool_rounds,
                        calls = calls.len(),
                        "tool round"
                    );
                    self.run_tool_round(working, calls, cancel, sink, stats).await?;
                }
            }
        }
    }

    /// Forward text fragments as `message` events, in order.
    async fn stream_text(
        &self,
        mut text: TextStream,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Result<String, AgentError> {
        let mut response = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                next = text.next() => next,
            };
            let Some(fragment) = next else { break };
            let fragment = fragment?;
            if fragment.is_empty() {
                continue;
            }
            response.push_str(&fragment);
            sink.emit(EngineEvent::Message { content: fragment }).await;
        }
        Ok(response)
    }

    async fn run_tool_round(
        &self,
        working: &mut Session,
        calls: Vec<ToolInvocation>,
        cancel: &CancellationToken,
        sink: &EventSink,
        stats: &mut TurnStats,
    ) -> Result<(), AgentError> {
        let calls: Vec<(String, ToolInvocation)> = calls
            .into_iter()
            .map(|call| {
                let id = call
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                (id, call)
            })
            .collect();
        working.push_message(ChatMessage::assistant_tool_calls(&calls));

        for (id, invocation) in &calls {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            sink.emit(EngineEvent::FunctionCall {
                name: invocation.name.clone(),
                arguments: invocation.raw_arguments.clone(),
            })
            .await;

            let mut record = ToolCallRecord::new(id.clone(), invocation);
            let ctx = ToolContext {
                gateway: self.gateway.as_ref(),
                cancel,
                settings: &self.settings,
            };
            let outcome = self.dispatcher.dispatch(working, &mut record, &ctx).await?;
            stats.function_calls += 1;

            sink.emit(EngineEvent::FunctionResult {
                name: record.name.clone(),
                result: outcome.result.clone(),
            })
            .await;
            working.push_message(ChatMessage::tool_result(id.clone(), &outcome.result));

            if let Some(change) = &outcome.document_change {
                change.apply(working);
                sink.emit(EngineEvent::DocumentUpdate {
                    content: working.assembled_document(),
                    section: change.section().to_string(),
                    action: record.name.clone(),
                })
                .await;
            }
            debug_assert!(working.check_invariant(), "missing_fields out of sync");

            if let Some(regenerate) = outcome.regenerate {
                let sections = working
                    .document_type()
                    .map(section_order)
                    .unwrap_or(&[]);
                self.generate_sections(working, sections, regenerate.use_reflection, cancel, sink)
                    .await?;
            }

            self.advance_phase(working, outcome.confirmation, cancel, sink).await?;
        }
        Ok(())
    }

    /// Take at most one phase edge; entering generation drafts the document.
    async fn advance_phase(
        &self,
        working: &mut Session,
        confirmation: Option<Confirmation>,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Result<(), AgentError> {
        let current = working.phase();
        let next = next_phase(current, working.phase_view(), confirmation);
        if next == current {
            return Ok(());
        }
        working.transition_to(next)?;

        if next == Phase::Generation {
            let missing = working.missing_sections();
            self.generate_sections(working, &missing, None, cancel, sink).await?;
            let after = next_phase(Phase::Generation, working.phase_view(), None);
            if after != Phase::Generation {
                working.transition_to(after)?;
            }
        }
        Ok(())
    }

    /// Draft `sections` in order. A failed section is reported and skipped;
    /// cancellation aborts.
    async fn generate_sections(
        &self,
        working: &mut Session,
        sections: &[&str],
        use_reflection: Option<bool>,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Result<(), AgentError> {
        let Some(document_type) = working.document_type() else {
            return Ok(());
        };
        tracing::info!(
            session_id = %working.id(),
            document_type = %document_type,
            sections = sections.len(),
            "generating document"
        );

        for &section in sections {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let spec = section_spec(document_type, section)
                .with_overrides(self.settings.reflection_enabled, use_reflection);
            let result = {
                let request = SectionRequest::for_session(working, document_type, section);
                reflect_and_generate(
                    self.gateway.as_ref(),
                    &request,
                    spec,
                    self.settings.reflection_history_window,
                    cancel,
                )
                .await
            };

            match result {
                Ok(outcome) => {
                    working.set_section(section, outcome.content);
                    sink.emit(EngineEvent::DocumentUpdate {
                        content: working.assembled_document(),
                        section: section.to_string(),
                        action: "generate_section".to_string(),
                    })
                    .await;
                }
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) => {
                    let err = AgentError::SectionGeneration {
                        section: section.to_string(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(
                        session_id = %working.id(),
                        section,
                        error = %e,
                        "section generation failed, continuing"
                    );
                    sink.emit(EngineEvent::from_error(&err)).await;
                }
            }
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
