//! Selective reflection for document sections.
//!
//! Critical sections go through a bounded generate → critique → regenerate
//! loop; everything else is a single generation call. Sections are
//! independent: a run only ever sees its own section's prompt and history.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use super::errors::AgentError;
use super::prompts::{section_prompt, CRITIQUE_SYSTEM_PROMPT, GENERATION_SYSTEM_PROMPT};
use super::sections::SectionSpec;
use super::session::{DocumentType, Expertise, Session};
use crate::inference::gateway::{complete_text, LlmGateway};
use crate::inference::types::ChatMessage;

/// The critic's approval token. Acceptance requires the whole trimmed
/// critique to equal it.
pub const APPROVAL_SENTINEL: &str = "<OK>";

/// Everything needed to generate one section.
#[derive(Debug, Clone)]
pub struct SectionRequest<'a> {
    pub document_type: DocumentType,
    pub section: &'a str,
    pub collected_data: &'a BTreeMap<String, String>,
    pub expertise: Option<Expertise>,
    pub draft: Option<&'a str>,
    pub notes: Option<&'a str>,
}

impl<'a> SectionRequest<'a> {
    /// A request with no draft or notes, built from the session's facts.
    pub fn for_session(session: &'a Session, document_type: DocumentType, section: &'a str) -> Self {
        Self {
            document_type,
            section,
            collected_data: session.collected_data(),
            expertise: session.expertise(),
            draft: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMethod {
    Direct,
    Reflection,
}

impl GenerationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMethod::Direct => "direct",
            GenerationMethod::Reflection => "reflection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionOutcome {
    pub content: String,
    pub method: GenerationMethod,
    /// Generation calls made.
    pub attempts: u32,
    /// The critic returned the sentinel.
    pub approved: bool,
}

/// Progress of one reflection run. Lives only for the duration of the call.
#[derive(Debug)]
struct ReflectionRun<'a> {
    section_name: &'a str,
    attempt_count: u32,
    last_output: String,
    last_critique: Option<String>,
}

/// Generation keeps its system prompt and the section prompt with the facts.
const GENERATION_PINNED: usize = 2;
/// Critique keeps its system prompt.
const CRITIQUE_PINNED: usize = 1;

/// Keep the first `pinned` messages plus the most recent ones, at most
/// `window` in total (never fewer than one unpinned message).
fn push_windowed(
    history: &mut Vec<ChatMessage>,
    message: ChatMessage,
    window: usize,
    pinned: usize,
) {
    history.push(message);
    let window = window.max(pinned + 1);
    if history.len() > window {
        let excess = history.len() - window;
        history.drain(pinned..pinned + excess);
    }
}

/// Generate one section, with reflection if `spec` asks for it.
///
/// With reflection the loop makes at most `max_reflection_steps` generation
/// calls and one fewer critique calls; when the budget runs out the last
/// candidate is returned unapproved. Provider failures and cancellation are
/// errors.
pub async fn reflect_and_generate(
    gateway: &dyn LlmGateway,
    request: &SectionRequest<'_>,
    spec: SectionSpec,
    history_window: usize,
    cancel: &CancellationToken,
) -> Result<SectionOutcome, AgentError> {
    let prompt = section_prompt(
        request.document_type,
        request.section,
        request.collected_data,
        request.expertise,
        request.draft,
        request.notes,
    );
    let mut generation_history = vec![
        ChatMessage::system(GENERATION_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ];

    if !spec.use_reflection {
        let content = complete_text(gateway, generation_history, cancel).await?;
        tracing::info!(section = request.section, method = "direct", "section generated");
        return Ok(SectionOutcome {
            content,
            method: GenerationMethod::Direct,
            attempts: 1,
            approved: false,
        });
    }

    let max_steps = spec.max_reflection_steps.max(1);
    let mut critique_history = vec![ChatMessage::system(CRITIQUE_SYSTEM_PROMPT)];
    let mut run = ReflectionRun {
        section_name: request.section,
        attempt_count: 0,
        last_output: String::new(),
        last_critique: None,
    };

    loop {
        run.attempt_count += 1;
        run.last_output = complete_text(gateway, generation_history.clone(), cancel).await?;
        tracing::debug!(
            section = run.section_name,
            attempt = run.attempt_count,
            chars = run.last_output.len(),
            "reflection candidate"
        );

        if run.attempt_count >= max_steps {
            tracing::warn!(
                section = run.section_name,
                attempts = run.attempt_count,
                last_critique = run.last_critique.as_deref().unwrap_or(""),
                "reflection budget exhausted, keeping last candidate"
            );
            return Ok(SectionOutcome {
                content: run.last_output,
                method: GenerationMethod::Reflection,
                attempts: run.attempt_count,
                approved: false,
            });
        }

        push_windowed(
            &mut generation_history,
            ChatMessage::assistant(run.last_output.clone()),
            history_window,
            GENERATION_PINNED,
        );
        push_windowed(
            &mut critique_history,
            ChatMessage::user(run.last_output.clone()),
            history_window,
            CRITIQUE_PINNED,
        );

        let critique = complete_text(gateway, critique_history.clone(), cancel).await?;
        if critique.trim() == APPROVAL_SENTINEL {
            tracing::info!(
                section = run.section_name,
                attempts = run.attempt_count,
                "section approved by critic"
            );
            return Ok(SectionOutcome {
                content: run.last_output,
                method: GenerationMethod::Reflection,
                attempts: run.attempt_count,
                approved: true,
            });
        }

        push_windowed(
            &mut critique_history,
            ChatMessage::assistant(critique.clone()),
            history_window,
            CRITIQUE_PINNED,
        );
        push_windowed(
            &mut generation_history,
            ChatMessage::user(critique.clone()),
            history_window,
            GENERATION_PINNED,
        );
        run.last_critique = Some(critique);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
