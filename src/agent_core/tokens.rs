//! Token estimates for turn metadata and log previews.
//!
//! Character-based heuristics only. The numbers end up in the `metadata`
//! event as `token_count_estimated`; nothing is budgeted on them.

use crate::inference::types::{ChatMessage, Role};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Average characters per token for English prose, rounded down so the
/// estimate errs high.
const CHARS_PER_TOKEN: f64 = 3.2;

/// JSON packs more tokens per character (punctuation, short keys).
const JSON_CHARS_PER_TOKEN: f64 = 2.8;

/// Per-message overhead (role label, formatting tokens).
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Overhead for one tool call's JSON envelope.
const TOOL_CALL_OVERHEAD_TOKENS: u32 = 10;

// ─── UTF-8 Safe Truncation ──────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes` bytes on a char boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Short single-line preview for debug logs.
pub fn preview(s: &str, max_bytes: usize) -> String {
    let flat = s.replace(['\n', '\r'], " ");
    let cut = truncate_utf8(&flat, max_bytes);
    if cut.len() < flat.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    }
}

// ─── Estimates ──────────────────────────────────────────────────────────────

pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as f64 / CHARS_PER_TOKEN).ceil() as u32
}

pub fn estimate_json_tokens(json_text: &str) -> u32 {
    (json_text.len() as f64 / JSON_CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate one message: content, tool calls, and per-message overhead.
///
/// Tool results and tool-call arguments are JSON and use the denser ratio.
pub fn estimate_message_tokens(message: &ChatMessage) -> u32 {
    let mut total = MESSAGE_OVERHEAD_TOKENS;

    if let Some(ref content) = message.content {
        total += match message.role {
            Role::Tool => estimate_json_tokens(content),
            _ => estimate_tokens(content),
        };
    }

    if let Some(ref calls) = message.tool_calls {
        for call in calls {
            total += TOOL_CALL_OVERHEAD_TOKENS;
            total += estimate_tokens(&call.function.name);
            total += estimate_json_tokens(&call.function.arguments);
        }
    }

    total
}

/// Sum over a whole history.
pub fn estimate_history_tokens(messages: &[ChatMessage]) -> u32 {
    messages.iter().map(estimate_message_tokens).sum()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
