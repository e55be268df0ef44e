//! System prompt composition.
//!
//! The orchestrator only needs "the system prompt for this session right
//! now"; [`PromptComposer`] is that seam. The default composer stacks four
//! layers: base behaviour, legal domain, phase instructions, and for the
//! drafting phases a step-by-step reasoning block.

use std::collections::BTreeMap;
use std::fmt::Write;

use super::phase::Phase;
use super::session::{DocumentType, Expertise, Session};
use super::sections::section_title;

/// Everything a composer may look at.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub phase: Phase,
    pub document_type: Option<DocumentType>,
    pub expertise: Option<Expertise>,
    pub collected_data: &'a BTreeMap<String, String>,
    pub missing_fields: &'a [String],
}

impl<'a> PromptContext<'a> {
    pub fn from_session(session: &'a Session) -> Self {
        Self {
            phase: session.phase(),
            document_type: session.document_type(),
            expertise: session.expertise(),
            collected_data: session.collected_data(),
            missing_fields: session.missing_fields(),
        }
    }
}

/// Produces the system prompt. Must be pure.
pub trait PromptComposer: Send + Sync {
    fn compose(&self, ctx: &PromptContext<'_>) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LayeredPromptComposer;

const BASE_LAYER: &str = "\
You are LegalDraft, an assistant that helps people prepare legal documents.
You collect the facts a document needs, then draft it section by section.
Use the provided tools to record what you learn; never invent facts the user did not give.
Ask one focused question at a time. You are not a lawyer and do not give legal advice.";

fn legal_layer(document_type: Option<DocumentType>) -> String {
    match document_type {
        Some(dt) => format!(
            "## Document\nThe user is preparing a {} ({}). Use standard terminology for this kind of agreement \
             and keep defined terms consistent throughout.",
            dt.display_name(),
            dt.as_str()
        ),
        None => "## Document\nThe document type is not known yet. Supported types: NDA, EMPLOYMENT, \
                 SERVICE, LEASE. Call analyze_request to identify it."
            .to_string(),
    }
}

fn phase_layer(phase: Phase) -> &'static str {
    match phase {
        Phase::Intake => {
            "## Current task: intake\n\
             Understand what the user wants. Call analyze_request on new requests and \
             extract_structured_data whenever the user provides facts. Ask for missing information."
        }
        Phase::Clarification => {
            "## Current task: clarification\n\
             All required facts are collected. Summarize them, resolve contradictions, and call \
             validate_completeness once the user confirms."
        }
        Phase::Generation => {
            "## Current task: generation\n\
             Draft the document. Use generate_document_section for single sections or \
             generate_full_document for everything."
        }
        Phase::Revision => {
            "## Current task: revision\n\
             The draft exists. Apply the user's requested changes with apply_revision and explain what changed."
        }
    }
}

fn expertise_line(expertise: Option<Expertise>) -> &'static str {
    match expertise {
        Some(Expertise::Beginner) => "Explain legal terms in plain language.",
        Some(Expertise::Intermediate) => "Briefly explain uncommon legal terms.",
        Some(Expertise::Expert) => "Be concise; the user knows the terminology.",
        None => "Adapt your explanations to the user's apparent familiarity with legal terms.",
    }
}

const REASONING_LAYER: &str = "\
## Reason before drafting
Before writing, think through: who the parties are and their roles; what the agreement must cover;
the term and governing law; which standard clauses are required; and how the sections depend on each other.
Then draft.";

impl PromptComposer for LayeredPromptComposer {
    fn compose(&self, ctx: &PromptContext<'_>) -> String {
        let mut out = String::new();
        out.push_str(BASE_LAYER);
        out.push_str("\n\n");
        out.push_str(&legal_layer(ctx.document_type));
        out.push_str("\n\n");
        out.push_str(phase_layer(ctx.phase));
        out.push('\n');
        out.push_str(expertise_line(ctx.expertise));

        if !ctx.collected_data.is_empty() {
            out.push_str("\n\n## Collected information\n");
            for (field, value) in ctx.collected_data {
                let _ = writeln!(out, "- {field}: {value}");
            }
        }
        if !ctx.missing_fields.is_empty() {
            let _ = write!(
                out,
                "\n## Still missing\n{}\n",
                ctx.missing_fields.join(", ")
            );
        }

        if ctx.phase.allows_drafting() {
            out.push_str("\n\n");
            out.push_str(REASONING_LAYER);
        }
        out
    }
}

// ─── Section generation prompts ──────────────────────────────────────────────

pub const GENERATION_SYSTEM_PROMPT: &str = "\
You write sections of legal documents. If the user replies with a critique,
answer with a revised version of your previous attempt, in full.
Use proper legal language, be precise and unambiguous, include all supplied facts,
and follow standard legal document structure. Output only the section text.";

pub const CRITIQUE_SYSTEM_PROMPT: &str = "\
You review sections of legal documents. Check:
1. Legal accuracy and appropriate terminology
2. Completeness
3. Clarity, with no ambiguous language
4. Internal consistency
5. Formatting
If anything needs fixing, answer with a numbered list of specific critiques.
If the section is acceptable as is, answer with exactly: <OK>";

/// The user message that asks for one section.
pub fn section_prompt(
    document_type: DocumentType,
    section: &str,
    collected_data: &BTreeMap<String, String>,
    expertise: Option<Expertise>,
    draft: Option<&str>,
    notes: Option<&str>,
) -> String {
    let mut out = format!(
        "Write the \"{}\" section of a {}.\n\nFacts:\n",
        section_title(section),
        document_type.display_name()
    );
    if collected_data.is_empty() {
        out.push_str("- (none provided)\n");
    }
    for (field, value) in collected_data {
        let _ = writeln!(out, "- {field}: {value}");
    }
    if let Some(draft) = draft.filter(|d| !d.trim().is_empty()) {
        let _ = write!(out, "\nStart from this draft:\n{draft}\n");
    }
    if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
        let _ = write!(out, "\nNotes: {notes}\n");
    }
    let _ = write!(out, "\n{}", expertise_line(expertise));
    out
}

// ─── Tests ───────────────────────────────────────────────────────────────────
