//! Per-session conversation state.
//!
//! A [`Session`] holds everything the engine knows about one drafting
//! conversation. `missing_fields` is derived: it is recomputed from the
//! document type's required fields and `collected_data` on every mutation,
//! so the two can never disagree.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::AgentError;
use super::phase::{Phase, PhaseView};
use super::sections::section_order;
use crate::inference::types::{ChatMessage, Role};

// ─── Enums ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentType {
    Nda,
    Employment,
    Service,
    Lease,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Nda => "NDA",
            DocumentType::Employment => "EMPLOYMENT",
            DocumentType::Service => "SERVICE",
            DocumentType::Lease => "LEASE",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            DocumentType::Nda => "Non-Disclosure Agreement",
            DocumentType::Employment => "Employment Agreement",
            DocumentType::Service => "Service Agreement",
            DocumentType::Lease => "Lease Agreement",
        }
    }

    /// Fields that must be collected before drafting can start.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            DocumentType::Nda => &[
                "party_a_name",
                "party_b_name",
                "confidential_info_type",
                "duration",
                "governing_law",
            ],
            DocumentType::Employment => &[
                "employer_name",
                "employer_address",
                "employee_name",
                "employee_address",
                "job_title",
                "job_duties",
                "salary",
                "start_date",
                "governing_law",
            ],
            DocumentType::Service => &[
                "service_provider_name",
                "client_name",
                "scope_of_services",
                "payment_terms",
                "duration",
                "governing_law",
            ],
            DocumentType::Lease => &[
                "landlord_name",
                "tenant_name",
                "property_address",
                "rent_amount",
                "lease_duration",
                "security_deposit",
                "governing_law",
            ],
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = ();

    /// Case-insensitive. `UNKNOWN` and anything else is an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NDA" => Ok(DocumentType::Nda),
            "EMPLOYMENT" => Ok(DocumentType::Employment),
            "SERVICE" => Ok(DocumentType::Service),
            "LEASE" => Ok(DocumentType::Lease),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expertise {
    Beginner,
    Intermediate,
    Expert,
}

impl Expertise {
    pub fn as_str(self) -> &'static str {
        match self {
            Expertise::Beginner => "beginner",
            Expertise::Intermediate => "intermediate",
            Expertise::Expert => "expert",
        }
    }
}

impl FromStr for Expertise {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Expertise::Beginner),
            "intermediate" => Ok(Expertise::Intermediate),
            "expert" => Ok(Expertise::Expert),
            _ => Err(()),
        }
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// Caller-visible view of a session, returned by state queries and `done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub document_type: Option<DocumentType>,
    pub expertise: Option<Expertise>,
    pub collected_data: BTreeMap<String, String>,
    pub missing_fields: Vec<String>,
    pub current_document: Option<BTreeMap<String, String>>,
}

// ─── Session ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Session {
    session_id: String,
    phase: Phase,
    document_type: Option<DocumentType>,
    expertise: Option<Expertise>,
    collected_data: BTreeMap<String, String>,
    missing_fields: Vec<String>,
    message_history: Vec<ChatMessage>,
    max_history_messages: usize,
    current_document: Option<BTreeMap<String, String>>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, max_history_messages: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            phase: Phase::Intake,
            document_type: None,
            expertise: None,
            collected_data: BTreeMap::new(),
            missing_fields: Vec::new(),
            message_history: Vec::new(),
            max_history_messages: max_history_messages.max(2),
            current_document: None,
            created_at: now,
            last_activity: now,
        }
    }

    // ── Accessors ──

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn document_type(&self) -> Option<DocumentType> {
        self.document_type
    }

    pub fn expertise(&self) -> Option<Expertise> {
        self.expertise
    }

    pub fn collected_data(&self) -> &BTreeMap<String, String> {
        &self.collected_data
    }

    pub fn missing_fields(&self) -> &[String] {
        &self.missing_fields
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.message_history
    }

    pub fn current_document(&self) -> Option<&BTreeMap<String, String>> {
        self.current_document.as_ref()
    }

    pub fn section(&self, name: &str) -> Option<&str> {
        self.current_document.as_ref()?.get(name).map(String::as_str)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Required fields of the current document type (empty when unset).
    pub fn required_fields(&self) -> &'static [&'static str] {
        self.document_type.map(DocumentType::required_fields).unwrap_or(&[])
    }

    // ── Collected facts ──

    pub fn set_document_type(&mut self, document_type: DocumentType) {
        self.document_type = Some(document_type);
        self.recompute_missing();
    }

    pub fn set_expertise(&mut self, expertise: Expertise) {
        self.expertise = Some(expertise);
    }

    /// Record one fact. Values are trimmed; an empty value is stored but does
    /// not satisfy a required field.
    pub fn set_field(&mut self, field: &str, value: &str) {
        self.collected_data
            .insert(field.to_string(), value.trim().to_string());
        self.recompute_missing();
    }

    fn recompute_missing(&mut self) {
        let collected = &self.collected_data;
        self.missing_fields = self
            .required_fields()
            .iter()
            .filter(|f| collected.get(**f).map_or(true, |v| v.is_empty()))
            .map(|f| f.to_string())
            .collect();
    }

    /// Whether `missing_fields` matches the required fields of the document
    /// type minus the non-empty collected keys.
    pub fn check_invariant(&self) -> bool {
        let expected: Vec<String> = self
            .required_fields()
            .iter()
            .filter(|f| self.collected_data.get(**f).map_or(true, |v| v.is_empty()))
            .map(|f| f.to_string())
            .collect();
        expected == self.missing_fields
    }

    // ── Phase ──

    pub fn transition_to(&mut self, to: Phase) -> Result<(), AgentError> {
        if !self.phase.can_transition_to(to) {
            return Err(AgentError::InvalidTransition {
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }
        tracing::info!(
            session_id = %self.session_id,
            from = %self.phase,
            to = %to,
            "phase transition"
        );
        self.phase = to;
        Ok(())
    }

    pub fn phase_view(&self) -> PhaseView {
        PhaseView {
            document_type_set: self.document_type.is_some(),
            missing_fields_empty: self.missing_fields.is_empty(),
            document_complete: self.document_complete(),
        }
    }

    // ── Document ──

    /// Configured sections not yet present in `current_document`.
    pub fn missing_sections(&self) -> Vec<&'static str> {
        let Some(dt) = self.document_type else {
            return Vec::new();
        };
        section_order(dt)
            .iter()
            .copied()
            .filter(|s| self.section(s).is_none())
            .collect()
    }

    pub fn document_complete(&self) -> bool {
        self.document_type.is_some()
            && self.current_document.is_some()
            && self.missing_sections().is_empty()
    }

    pub fn set_section(&mut self, name: &str, content: impl Into<String>) {
        self.current_document
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), content.into());
    }

    pub fn remove_section(&mut self, name: &str) -> Option<String> {
        self.current_document.as_mut()?.remove(name)
    }

    /// Full text: configured sections in order, then any extra sections.
    pub fn assembled_document(&self) -> String {
        let Some(doc) = self.current_document.as_ref() else {
            return String::new();
        };
        let order = self.document_type.map(section_order).unwrap_or(&[]);
        let configured = order.iter().filter_map(|s| doc.get(*s));
        let extra = doc
            .iter()
            .filter(|(name, _)| !order.iter().any(|s| s == name))
            .map(|(_, text)| text);
        configured
            .chain(extra)
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    // ── History ──

    /// Append a message, evicting the oldest ones past the bound.
    ///
    /// Eviction never leaves a tool result at the front without the
    /// assistant message that requested it.
    pub fn push_message(&mut self, message: ChatMessage) {
        self.message_history.push(message);
        self.last_activity = Utc::now();

        if self.message_history.len() <= self.max_history_messages {
            return;
        }
        let mut drop = self.message_history.len() - self.max_history_messages;
        while drop < self.message_history.len()
            && self.message_history[drop].role == Role::Tool
        {
            drop += 1;
        }
        self.message_history.drain(..drop);
        tracing::debug!(
            session_id = %self.session_id,
            evicted = drop,
            remaining = self.message_history.len(),
            "history trimmed"
        );
    }

    // ── Lifecycle ──

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            document_type: self.document_type,
            expertise: self.expertise,
            collected_data: self.collected_data.clone(),
            missing_fields: self.missing_fields.clone(),
            current_document: self.current_document.clone(),
        }
    }

    /// Back to the initial state under a new id.
    pub fn reset(&mut self, new_id: impl Into<String>) {
        *self = Session::new(new_id, self.max_history_messages);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
