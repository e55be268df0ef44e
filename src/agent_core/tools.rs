//! Tool dispatch: a closed registry of handlers operating on session state.
//!
//! Every model tool call goes through [`ToolDispatcher::dispatch`]:
//! resolve the name → validate arguments → run the handler. Handlers mutate
//! `collected_data`, `document_type` and `expertise` directly; document
//! edits come back as a [`DocumentChange`] for the orchestrator to apply and
//! announce. A handler that refuses (wrong phase, no document, unknown
//! section) returns a `{"success": false}` result rather than an error so
//! the model can recover within the same turn.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::errors::AgentError;
use super::phase::Confirmation;
use super::reflection::{reflect_and_generate, SectionRequest};
use super::sections::{is_known_section, section_order, section_spec};
use super::session::{DocumentType, Expertise, Session};
use super::validation::{validate_and_parse, ValidatedArguments};
use crate::inference::config::EngineSettings;
use crate::inference::gateway::LlmGateway;
use crate::inference::types::ToolInvocation;

pub use super::schema::ToolName;

// ─── Tool call records ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Executing,
    Completed,
    Error,
}

/// One tool call, owned by the loop iteration that issued it.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub raw_arguments: String,
    pub parsed_arguments: Option<ValidatedArguments>,
    pub status: ToolCallStatus,
}

impl ToolCallRecord {
    pub fn new(id: impl Into<String>, invocation: &ToolInvocation) -> Self {
        Self {
            id: id.into(),
            name: invocation.name.clone(),
            raw_arguments: invocation.raw_arguments.clone(),
            parsed_arguments: None,
            status: ToolCallStatus::Pending,
        }
    }
}

// ─── Handler plumbing ────────────────────────────────────────────────────────

/// An edit to `current_document` requested by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentChange {
    Upsert { section: String, content: String },
    Remove { section: String },
}

impl DocumentChange {
    pub fn section(&self) -> &str {
        match self {
            DocumentChange::Upsert { section, .. } | DocumentChange::Remove { section } => section,
        }
    }

    pub fn apply(&self, session: &mut Session) {
        match self {
            DocumentChange::Upsert { section, content } => session.set_section(section, content.clone()),
            DocumentChange::Remove { section } => {
                session.remove_section(section);
            }
        }
    }
}

/// Regenerate every section of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegenerateDocument {
    pub use_reflection: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Re-injected into the conversation as the tool result.
    pub result: Value,
    pub document_change: Option<DocumentChange>,
    /// Set by `validate_completeness`; drives the clarification edges.
    pub confirmation: Option<Confirmation>,
    pub regenerate: Option<RegenerateDocument>,
}

impl ToolOutcome {
    fn result(result: Value) -> Self {
        Self {
            result,
            document_change: None,
            confirmation: None,
            regenerate: None,
        }
    }

    fn refused(reason: impl Into<String>) -> Self {
        Self::result(json!({"success": false, "error": reason.into()}))
    }
}

/// What a handler may reach outside the session.
pub struct ToolContext<'a> {
    pub gateway: &'a dyn LlmGateway,
    pub cancel: &'a CancellationToken,
    pub settings: &'a EngineSettings,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(
        &self,
        session: &mut Session,
        args: &ValidatedArguments,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolOutcome, AgentError>;
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ToolDispatcher;

impl ToolDispatcher {
    fn handler(tool: ToolName) -> &'static dyn ToolHandler {
        match tool {
            ToolName::AnalyzeRequest => &AnalyzeRequest,
            ToolName::ExtractStructuredData => &ExtractStructuredData,
            ToolName::ValidateCompleteness => &ValidateCompleteness,
            ToolName::GenerateDocumentSection => &GenerateDocumentSection,
            ToolName::GenerateFullDocument => &GenerateFullDocument,
            ToolName::ApplyRevision => &ApplyRevision,
        }
    }

    /// Resolve, validate and run one tool call, tracking its status on
    /// `record`. Nothing touches the session unless validation succeeded.
    pub async fn dispatch(
        &self,
        session: &mut Session,
        record: &mut ToolCallRecord,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolOutcome, AgentError> {
        let start = Instant::now();
        record.status = ToolCallStatus::Executing;

        let result: Result<ToolOutcome, AgentError> = async {
            let tool: ToolName = record.name.parse()?;
            let args = validate_and_parse(tool, &record.raw_arguments)?;
            record.parsed_arguments = Some(args.clone());
            Self::handler(tool).handle(session, &args, ctx).await
        }
        .await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => {
                record.status = ToolCallStatus::Completed;
                let success = outcome
                    .result
                    .get("success")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(true);
                tracing::info!(
                    session_id = %session.id(),
                    tool = %record.name,
                    call_id = %record.id,
                    success,
                    elapsed_ms,
                    "tool executed"
                );
            }
            Err(e) => {
                record.status = ToolCallStatus::Error;
                tracing::error!(
                    session_id = %session.id(),
                    tool = %record.name,
                    call_id = %record.id,
                    error = %e,
                    elapsed_ms,
                    "tool failed"
                );
            }
        }
        result
    }
}

// ─── analyze_request ─────────────────────────────────────────────────────────

const HIGH_CONFIDENCE: f64 = 0.8;
const LOW_CONFIDENCE: f64 = 0.4;

#[derive(Debug, Deserialize)]
struct AnalyzeArgs {
    intent: String,
    document_type: Option<String>,
    #[serde(default)]
    detected_info: BTreeMap<String, String>,
    confidence: f64,
    clarification_needed: Option<bool>,
    expertise: Option<String>,
}

struct AnalyzeRequest;

#[async_trait]
impl ToolHandler for AnalyzeRequest {
    async fn handle(
        &self,
        session: &mut Session,
        args: &ValidatedArguments,
        _ctx: &ToolContext<'_>,
    ) -> Result<ToolOutcome, AgentError> {
        let args: AnalyzeArgs = args.parse()?;

        let mut document_type_locked = false;
        if let Some(detected) = args.document_type.as_deref().and_then(|s| s.parse::<DocumentType>().ok()) {
            match session.document_type() {
                Some(current) if current != detected && session.phase().allows_drafting() => {
                    tracing::warn!(
                        session_id = %session.id(),
                        current = %current,
                        detected = %detected,
                        "document type change ignored after drafting started"
                    );
                    document_type_locked = true;
                }
                Some(current) if current == detected => {}
                previous => {
                    session.set_document_type(detected);
                    tracing::info!(
                        session_id = %session.id(),
                        from = previous.map(DocumentType::as_str).unwrap_or("unset"),
                        to = %detected,
                        missing = ?session.missing_fields(),
                        "document type set"
                    );
                }
            }
        }

        if let Some(expertise) = args.expertise.as_deref().and_then(|s| s.parse::<Expertise>().ok()) {
            session.set_expertise(expertise);
        }

        for (field, value) in &args.detected_info {
            if !value.trim().is_empty() {
                session.set_field(field, value);
            }
        }

        let needs_clarification =
            args.clarification_needed.unwrap_or(false) || args.confidence < LOW_CONFIDENCE;
        let (confidence_level, guidance) = if args.confidence >= HIGH_CONFIDENCE {
            ("high", "Proceed with the collected information")
        } else if args.confidence >= LOW_CONFIDENCE {
            ("medium", "Consider asking the user to confirm")
        } else {
            ("low", "Ask for clarification before proceeding")
        };

        Ok(ToolOutcome::result(json!({
            "success": true,
            "intent": args.intent,
            "document_type": session.document_type().map(DocumentType::as_str),
            "document_type_locked": document_type_locked,
            "needs_clarification": needs_clarification,
            "confidence": args.confidence,
            "confidence_level": confidence_level,
            "guidance": guidance,
            "missing_fields": session.missing_fields(),
        })))
    }
}

// ─── extract_structured_data ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Party {
    name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfidentialInfo {
    description: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Duration {
    value: Option<i64>,
    unit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractArgs {
    party_a: Option<Party>,
    party_b: Option<Party>,
    confidential_info: Option<ConfidentialInfo>,
    duration: Option<Duration>,
    governing_law: Option<String>,
    effective_date: Option<String>,
    #[serde(default)]
    additional_fields: BTreeMap<String, String>,
}

/// Field-name prefixes for the first and second party of each document type.
fn party_prefixes(document_type: Option<DocumentType>) -> (&'static str, &'static str) {
    match document_type {
        Some(DocumentType::Employment) => ("employer", "employee"),
        Some(DocumentType::Service) => ("service_provider", "client"),
        Some(DocumentType::Lease) => ("landlord", "tenant"),
        Some(DocumentType::Nda) | None => ("party_a", "party_b"),
    }
}

struct ExtractStructuredData;

#[async_trait]
impl ToolHandler for ExtractStructuredData {
    async fn handle(
        &self,
        session: &mut Session,
        args: &ValidatedArguments,
        _ctx: &ToolContext<'_>,
    ) -> Result<ToolOutcome, AgentError> {
        let args: ExtractArgs = args.parse()?;
        let document_type = session.document_type();
        let (first, second) = party_prefixes(document_type);

        let mut extracted: Vec<(String, String)> = Vec::new();
        for (prefix, party) in [(first, &args.party_a), (second, &args.party_b)] {
            let Some(party) = party else { continue };
            extracted.push((format!("{prefix}_name"), party.name.clone()));
            if let Some(kind) = &party.kind {
                extracted.push((format!("{prefix}_type"), kind.clone()));
            }
            if let Some(address) = &party.address {
                extracted.push((format!("{prefix}_address"), address.clone()));
            }
        }

        if let Some(info) = &args.confidential_info {
            if let Some(description) = &info.description {
                extracted.push(("confidential_info_type".into(), description.clone()));
            }
            if !info.categories.is_empty() {
                extracted.push(("confidential_info_categories".into(), info.categories.join(", ")));
            }
        }

        if let Some(Duration { value: Some(value), unit }) = &args.duration {
            let key = if document_type == Some(DocumentType::Lease) {
                "lease_duration"
            } else {
                "duration"
            };
            let text = match unit {
                Some(unit) => format!("{value} {unit}"),
                None => value.to_string(),
            };
            extracted.push((key.into(), text));
        }

        if let Some(law) = &args.governing_law {
            extracted.push(("governing_law".into(), law.clone()));
        }
        if let Some(date) = &args.effective_date {
            extracted.push(("effective_date".into(), date.clone()));
        }
        extracted.extend(args.additional_fields.clone());

        let mut fields = Vec::new();
        for (field, value) in extracted {
            if value.trim().is_empty() {
                continue;
            }
            session.set_field(&field, &value);
            fields.push(field);
        }

        tracing::info!(
            session_id = %session.id(),
            extracted = ?fields,
            remaining = ?session.missing_fields(),
            "structured data extracted"
        );

        Ok(ToolOutcome::result(json!({
            "success": true,
            "extracted_fields": fields,
            "remaining_fields": session.missing_fields(),
        })))
    }
}

// ─── validate_completeness ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ValidationIssue {
    field: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletenessArgs {
    is_complete: bool,
    ready_to_generate: bool,
    #[serde(default)]
    missing_required: Vec<String>,
    #[serde(default)]
    missing_optional: Vec<String>,
    #[serde(default)]
    validation_errors: Vec<ValidationIssue>,
    recommendation: Option<String>,
}

struct ValidateCompleteness;

#[async_trait]
impl ToolHandler for ValidateCompleteness {
    async fn handle(
        &self,
        session: &mut Session,
        args: &ValidatedArguments,
        _ctx: &ToolContext<'_>,
    ) -> Result<ToolOutcome, AgentError> {
        let args: CompletenessArgs = args.parse()?;

        let confirmed = args.is_complete
            && args.ready_to_generate
            && args.validation_errors.is_empty()
            && args.missing_required.is_empty();
        let confirmation = if confirmed {
            Confirmation::Ready
        } else {
            Confirmation::NotReady
        };

        let errors: Vec<Value> = args
            .validation_errors
            .iter()
            .map(|e| json!({"field": e.field, "error": e.error}))
            .collect();

        tracing::info!(
            session_id = %session.id(),
            confirmed,
            missing_required = ?args.missing_required,
            session_missing = ?session.missing_fields(),
            "completeness reported"
        );

        Ok(ToolOutcome {
            confirmation: Some(confirmation),
            ..ToolOutcome::result(json!({
                "success": true,
                "is_complete": args.is_complete,
                "ready_to_generate": args.ready_to_generate,
                "confirmed": confirmed,
                "current_phase": session.phase(),
                "missing_required": args.missing_required,
                "missing_optional": args.missing_optional,
                "validation_errors": errors,
                "session_missing_fields": session.missing_fields(),
                "recommendation": args.recommendation.unwrap_or_default(),
            }))
        })
    }
}

// ─── generate_document_section ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SectionArgs {
    section_type: String,
    content: Option<String>,
    section_number: Option<i64>,
    notes: Option<String>,
}

struct GenerateDocumentSection;

#[async_trait]
impl ToolHandler for GenerateDocumentSection {
    async fn handle(
        &self,
        session: &mut Session,
        args: &ValidatedArguments,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolOutcome, AgentError> {
        let args: SectionArgs = args.parse()?;

        if !session.phase().allows_drafting() {
            return Ok(ToolOutcome::refused(format!(
                "sections can only be generated after the information is confirmed (current phase: {})",
                session.phase()
            )));
        }
        let Some(document_type) = session.document_type() else {
            return Ok(ToolOutcome::refused("document type is not set"));
        };
        if !is_known_section(document_type, &args.section_type) {
            return Ok(ToolOutcome::refused(format!(
                "'{}' is not a section of a {}; valid sections: {}",
                args.section_type,
                document_type.as_str(),
                section_order(document_type).join(", ")
            )));
        }

        let spec = section_spec(document_type, &args.section_type)
            .with_overrides(ctx.settings.reflection_enabled, None);
        let request = SectionRequest {
            draft: args.content.as_deref(),
            notes: args.notes.as_deref(),
            ..SectionRequest::for_session(session, document_type, &args.section_type)
        };
        let outcome = reflect_and_generate(
            ctx.gateway,
            &request,
            spec,
            ctx.settings.reflection_history_window,
            ctx.cancel,
        )
        .await?;

        Ok(ToolOutcome {
            document_change: Some(DocumentChange::Upsert {
                section: args.section_type.clone(),
                content: outcome.content.clone(),
            }),
            ..ToolOutcome::result(json!({
                "success": true,
                "section_type": args.section_type,
                "section_number": args.section_number,
                "method": outcome.method.as_str(),
                "attempts": outcome.attempts,
                "approved": outcome.approved,
                "char_count": outcome.content.chars().count(),
            }))
        })
    }
}

// ─── generate_full_document ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FullDocumentArgs {
    document_type: Option<String>,
    title: Option<String>,
    use_reflection: Option<bool>,
}

struct GenerateFullDocument;

#[async_trait]
impl ToolHandler for GenerateFullDocument {
    async fn handle(
        &self,
        session: &mut Session,
        args: &ValidatedArguments,
        _ctx: &ToolContext<'_>,
    ) -> Result<ToolOutcome, AgentError> {
        let args: FullDocumentArgs = args.parse()?;

        if !session.phase().allows_drafting() {
            return Ok(ToolOutcome::refused(format!(
                "the document can only be generated after the information is confirmed (current phase: {})",
                session.phase()
            )));
        }
        let Some(document_type) = session.document_type() else {
            return Ok(ToolOutcome::refused("document type is not set"));
        };
        let requested = args.document_type.as_deref().and_then(|s| s.parse::<DocumentType>().ok());
        if let Some(requested) = requested.filter(|r| *r != document_type) {
            tracing::warn!(
                session_id = %session.id(),
                requested = %requested,
                active = %document_type,
                "full document requested for a different type, using the active one"
            );
        }

        Ok(ToolOutcome {
            regenerate: Some(RegenerateDocument {
                use_reflection: args.use_reflection,
            }),
            ..ToolOutcome::result(json!({
                "success": true,
                "document_type": document_type.as_str(),
                "title": args.title.unwrap_or_else(|| document_type.display_name().to_string()),
                "sections": section_order(document_type),
                "use_reflection": args.use_reflection,
                "status": "generating",
            }))
        })
    }
}

// ─── apply_revision ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RevisionArgs {
    target_section: String,
    revision_type: String,
    original_text: Option<String>,
    revised_text: String,
    reason: Option<String>,
    #[serde(default)]
    affected_sections: Vec<String>,
}

/// `"Term Termination"` → `term_termination`.
fn normalize_section_name(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Compute the edit, or the reason it cannot be made.
fn plan_revision(session: &Session, args: &RevisionArgs, section: &str) -> Result<DocumentChange, String> {
    let existing = session.section(section);
    let original = args.original_text.as_deref().filter(|t| !t.is_empty());
    let revised = args.revised_text.as_str();
    let upsert = |content: String| DocumentChange::Upsert {
        section: section.to_string(),
        content,
    };

    match args.revision_type.as_str() {
        "add" => {
            if revised.trim().is_empty() {
                return Err("revised_text is required to add content".into());
            }
            Ok(match existing {
                Some(text) => upsert(format!("{}\n\n{}", text.trim_end(), revised.trim())),
                None => upsert(revised.trim().to_string()),
            })
        }
        "delete" => {
            let Some(text) = existing else {
                return Err(format!("section '{section}' does not exist"));
            };
            match original {
                Some(original) if text.contains(original) => Ok(upsert(text.replace(original, ""))),
                Some(_) => Err(format!("original_text was not found in section '{section}'")),
                None => Ok(DocumentChange::Remove {
                    section: section.to_string(),
                }),
            }
        }
        // modify | replace
        _ => {
            let Some(text) = existing else {
                return Err(format!("section '{section}' does not exist"));
            };
            match original {
                Some(original) if text.contains(original) => Ok(upsert(text.replace(original, revised))),
                Some(_) => Err(format!("original_text was not found in section '{section}'")),
                None if revised.trim().is_empty() => {
                    Err("revised_text is required to rewrite a whole section".into())
                }
                None => Ok(upsert(revised.to_string())),
            }
        }
    }
}

struct ApplyRevision;

#[async_trait]
impl ToolHandler for ApplyRevision {
    async fn handle(
        &self,
        session: &mut Session,
        args: &ValidatedArguments,
        _ctx: &ToolContext<'_>,
    ) -> Result<ToolOutcome, AgentError> {
        let args: RevisionArgs = args.parse()?;

        if session.current_document().is_none() {
            return Ok(ToolOutcome::refused("no document to revise"));
        }
        let section = normalize_section_name(&args.target_section);
        if section.is_empty() {
            return Ok(ToolOutcome::refused("target_section is empty"));
        }

        let change = match plan_revision(session, &args, &section) {
            Ok(change) => change,
            Err(reason) => return Ok(ToolOutcome::refused(reason)),
        };

        tracing::info!(
            session_id = %session.id(),
            section = %section,
            revision_type = %args.revision_type,
            "revision planned"
        );

        Ok(ToolOutcome {
            document_change: Some(change),
            ..ToolOutcome::result(json!({
                "success": true,
                "revision_type": args.revision_type,
                "target_section": section,
                "reason": args.reason,
                "affected_sections": args.affected_sections,
            }))
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::phase::Phase;
    use crate::agent_core::test_support::{Scripted, ScriptedGateway};

    async fn call(
        session: &mut Session,
        gateway: &ScriptedGateway,
        name: &str,
        args: &str,
    ) -> (Result<ToolOutcome, AgentError>, ToolCallRecord) {
        let settings = EngineSettings::default();
        let cancel = CancellationToken::new();
        let ctx = ToolContext {
            gateway,
            cancel: &cancel,
            settings: &settings,
        };
        let mut record = ToolCallRecord::new("call_1", &ToolInvocation::new(name, args));
        let result = ToolDispatcher.dispatch(session, &mut record, &ctx).await;
        (result, record)
    }

    fn drafting_session(document_type: DocumentType) -> Session {
        let mut s = Session::new("t", 50);
        s.set_document_type(document_type);
        s.transition_to(Phase::Clarification).unwrap();
        s.transition_to(Phase::Generation).unwrap();
        s
    }

    #[tokio::test]
    async fn test_analyze_sets_type_expertise_and_facts() {
        let gw = ScriptedGateway::new([]);
        let mut s = Session::new("t", 50);
        let (result, record) = call(
            &mut s,
            &gw,
            "analyze_request",
            r#"{"intent":"create","document_type":"nda","confidence":0.9,"expertise":"beginner",
                "detected_info":{"party_a_name":"Acme Corp"},"missing_info":["duration"]}"#,
        )
        .await;
        let outcome = result.unwrap();
        assert_eq!(record.status, ToolCallStatus::Completed);
        assert!(record.parsed_arguments.is_some());
        assert_eq!(s.document_type(), Some(DocumentType::Nda));
        assert_eq!(s.expertise(), Some(Expertise::Beginner));
        assert_eq!(s.collected_data()["party_a_name"], "Acme Corp");
        assert_eq!(s.missing_fields().len(), 4);
        assert!(s.check_invariant());
        assert_eq!(outcome.result["confidence_level"], "high");
        assert_eq!(outcome.result["needs_clarification"], false);
        assert_eq!(gw.calls(), 0);
    }

    #[tokio::test]
    async fn test_analyze_low_confidence_needs_clarification() {
        let gw = ScriptedGateway::new([]);
        let mut s = Session::new("t", 50);
        let (result, _) = call(&mut s, &gw, "analyze_request", r#"{"intent":"unclear","confidence":0.2}"#).await;
        let outcome = result.unwrap();
        assert_eq!(outcome.result["confidence_level"], "low");
        assert_eq!(outcome.result["needs_clarification"], true);
        assert!(s.document_type().is_none());
    }

    #[tokio::test]
    async fn test_analyze_cannot_change_type_while_drafting() {
        let gw = ScriptedGateway::new([]);
        let mut s = drafting_session(DocumentType::Nda);
        let (result, _) = call(
            &mut s,
            &gw,
            "analyze_request",
            r#"{"intent":"modify","document_type":"LEASE","confidence":0.9}"#,
        )
        .await;
        assert_eq!(result.unwrap().result["document_type_locked"], true);
        assert_eq!(s.document_type(), Some(DocumentType::Nda));
    }

    #[tokio::test]
    async fn test_extract_maps_parties_per_document_type() {
        let gw = ScriptedGateway::new([]);
        let args = r#"{"party_a":{"name":"Acme Corp","address":"1 Main St"},
                       "party_b":{"name":"Jane Doe","type":"individual"},
                       "duration":{"value":12,"unit":"months"},
                       "governing_law":"California",
                       "additional_fields":{"rent_amount":"2000 USD"}}"#;

        let mut lease = Session::new("t", 50);
        lease.set_document_type(DocumentType::Lease);
        call(&mut lease, &gw, "extract_structured_data", args).await.0.unwrap();
        let data = lease.collected_data();
        assert_eq!(data["landlord_name"], "Acme Corp");
        assert_eq!(data["landlord_address"], "1 Main St");
        assert_eq!(data["tenant_name"], "Jane Doe");
        assert_eq!(data["lease_duration"], "12 months");
        assert_eq!(data["rent_amount"], "2000 USD");
        assert!(!data.contains_key("duration"));
        assert_eq!(lease.missing_fields(), &["property_address", "security_deposit"]);
        assert!(lease.check_invariant());

        let mut nda = Session::new("t", 50);
        nda.set_document_type(DocumentType::Nda);
        let (result, _) = call(&mut nda, &gw, "extract_structured_data", args).await;
        assert_eq!(nda.collected_data()["party_a_name"], "Acme Corp");
        assert_eq!(nda.collected_data()["duration"], "12 months");
        assert_eq!(result.unwrap().result["remaining_fields"], json!(["confidential_info_type"]));

        let mut employment = Session::new("t", 50);
        employment.set_document_type(DocumentType::Employment);
        call(&mut employment, &gw, "extract_structured_data", args).await.0.unwrap();
        assert_eq!(employment.collected_data()["employer_name"], "Acme Corp");
        assert_eq!(employment.collected_data()["employer_address"], "1 Main St");
        assert_eq!(employment.collected_data()["employee_name"], "Jane Doe");
    }

    #[tokio::test]
    async fn test_extract_confidential_description() {
        let gw = ScriptedGateway::new([]);
        let mut s = Session::new("t", 50);
        s.set_document_type(DocumentType::Nda);
        call(
            &mut s,
            &gw,
            "extract_structured_data",
            r#"{"confidential_info":{"description":"source code","categories":["code","designs"]}}"#,
        )
        .await
        .0
        .unwrap();
        assert_eq!(s.collected_data()["confidential_info_type"], "source code");
        assert_eq!(s.collected_data()["confidential_info_categories"], "code, designs");
    }

    #[tokio::test]
    async fn test_validate_completeness_confirmation() {
        let gw = ScriptedGateway::new([]);
        let mut s = Session::new("t", 50);
        let ready = call(
            &mut s,
            &gw,
            "validate_completeness",
            r#"{"is_complete":true,"ready_to_generate":true}"#,
        )
        .await
        .0
        .unwrap();
        assert_eq!(ready.confirmation, Some(Confirmation::Ready));

        let not_ready = call(
            &mut s,
            &gw,
            "validate_completeness",
            r#"{"is_complete":true,"ready_to_generate":true,"validation_errors":[{"field":"duration","error":"negative"}]}"#,
        )
        .await
        .0
        .unwrap();
        assert_eq!(not_ready.confirmation, Some(Confirmation::NotReady));
        assert_eq!(not_ready.result["confirmed"], false);
    }

    #[tokio::test]
    async fn test_section_refused_outside_drafting_phases() {
        let gw = ScriptedGateway::new([]);
        let mut s = Session::new("t", 50);
        s.set_document_type(DocumentType::Nda);
        let (result, record) =
            call(&mut s, &gw, "generate_document_section", r#"{"section_type":"header"}"#).await;
        let outcome = result.unwrap();
        // A refusal is a completed call that reports failure in its result.
        assert_eq!(record.status, ToolCallStatus::Completed);
        assert_eq!(outcome.result["success"], false);
        assert!(outcome.document_change.is_none());
        assert_eq!(gw.calls(), 0);
    }

    #[tokio::test]
    async fn test_section_of_other_document_type_refused() {
        let gw = ScriptedGateway::new([]);
        let mut s = drafting_session(DocumentType::Nda);
        let outcome = call(&mut s, &gw, "generate_document_section", r#"{"section_type":"rent_terms"}"#)
            .await
            .0
            .unwrap();
        assert_eq!(outcome.result["success"], false);
        assert_eq!(gw.calls(), 0);
    }

    #[tokio::test]
    async fn test_direct_section_generation() {
        let gw = ScriptedGateway::new([Scripted::text("NON-DISCLOSURE AGREEMENT")]);
        let mut s = drafting_session(DocumentType::Nda);
        let outcome = call(&mut s, &gw, "generate_document_section", r#"{"section_type":"header"}"#)
            .await
            .0
            .unwrap();
        assert_eq!(gw.calls(), 1);
        assert_eq!(outcome.result["method"], "direct");
        assert_eq!(
            outcome.document_change,
            Some(DocumentChange::Upsert {
                section: "header".into(),
                content: "NON-DISCLOSURE AGREEMENT".into()
            })
        );
        // The orchestrator applies document changes.
        assert!(s.current_document().is_none());
    }

    #[tokio::test]
    async fn test_critical_section_uses_reflection() {
        let gw = ScriptedGateway::new([Scripted::text("draft"), Scripted::text("<OK>")]);
        let mut s = drafting_session(DocumentType::Nda);
        let outcome = call(&mut s, &gw, "generate_document_section", r#"{"section_type":"remedies"}"#)
            .await
            .0
            .unwrap();
        assert_eq!(outcome.result["method"], "reflection");
        assert_eq!(outcome.result["approved"], true);
        assert_eq!(gw.calls(), 2);
    }

    #[tokio::test]
    async fn test_full_document_requests_regeneration() {
        let gw = ScriptedGateway::new([]);
        let mut s = drafting_session(DocumentType::Service);
        let outcome = call(&mut s, &gw, "generate_full_document", r#"{"use_reflection":false}"#)
            .await
            .0
            .unwrap();
        assert_eq!(
            outcome.regenerate,
            Some(RegenerateDocument {
                use_reflection: Some(false)
            })
        );
        assert_eq!(outcome.result["sections"].as_array().unwrap().len(), 11);
    }

    #[tokio::test]
    async fn test_revision_without_document_refused() {
        let gw = ScriptedGateway::new([]);
        let mut s = drafting_session(DocumentType::Nda);
        let outcome = call(&mut s, &gw, "apply_revision", r#"{"target_section":"remedies"}"#)
            .await
            .0
            .unwrap();
        assert_eq!(outcome.result["error"], "no document to revise");
    }

    #[tokio::test]
    async fn test_revision_kinds() {
        let gw = ScriptedGateway::new([]);
        let mut s = drafting_session(DocumentType::Nda);
        s.set_section("remedies", "Damages apply. Fees are capped.");

        let modify = call(
            &mut s,
            &gw,
            "apply_revision",
            r#"{"target_section":"Remedies","original_text":"Fees are capped.","revised_text":"Injunctive relief is available."}"#,
        )
        .await
        .0
        .unwrap();
        assert_eq!(
            modify.document_change,
            Some(DocumentChange::Upsert {
                section: "remedies".into(),
                content: "Damages apply. Injunctive relief is available.".into()
            })
        );

        let add = call(
            &mut s,
            &gw,
            "apply_revision",
            r#"{"target_section":"non solicitation","revision_type":"add","revised_text":"No poaching."}"#,
        )
        .await
        .0
        .unwrap();
        assert_eq!(add.document_change.unwrap().section(), "non_solicitation");

        let delete = call(
            &mut s,
            &gw,
            "apply_revision",
            r#"{"target_section":"remedies","revision_type":"delete"}"#,
        )
        .await
        .0
        .unwrap();
        assert_eq!(
            delete.document_change,
            Some(DocumentChange::Remove {
                section: "remedies".into()
            })
        );

        let missing = call(
            &mut s,
            &gw,
            "apply_revision",
            r#"{"target_section":"remedies","original_text":"not there","revised_text":"x"}"#,
        )
        .await
        .0
        .unwrap();
        assert_eq!(missing.result["success"], false);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error() {
        let gw = ScriptedGateway::new([]);
        let mut s = Session::new("t", 50);
        let (result, record) = call(&mut s, &gw, "delete_everything", "{}").await;
        assert!(matches!(result, Err(AgentError::UnknownTool { .. })));
        assert_eq!(record.status, ToolCallStatus::Error);
    }

    #[tokio::test]
    async fn test_schema_failure_leaves_session_untouched() {
        let gw = ScriptedGateway::new([]);
        let mut s = drafting_session(DocumentType::Nda);
        s.set_section("remedies", "text");
        let before = s.snapshot();
        let (result, record) = call(&mut s, &gw, "apply_revision", r#"{"revised_text":"x"}"#).await;
        assert!(matches!(result, Err(AgentError::UnrecoverableSchema { .. })));
        assert_eq!(record.status, ToolCallStatus::Error);
        assert!(record.parsed_arguments.is_none());
        assert_eq!(s.snapshot(), before);
    }

    #[test]
    fn test_normalize_section_name() {
        assert_eq!(normalize_section_name(" Term Termination "), "term_termination");
        assert_eq!(normalize_section_name("non-compete"), "non_compete");
    }
}
