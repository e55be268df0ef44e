//! Structured output validation for tool-call arguments.
//!
//! Models produce argument payloads that are often almost, but not quite,
//! what the tool schema asks for. [`validate_and_parse`] turns a raw payload
//! into a schema-conformant JSON object in a fixed order, stopping at the
//! first stage that yields an object:
//!
//! 1. direct JSON parse (double-encoded strings are unwrapped)
//! 2. embedded fragment: a fenced code block or the first balanced `{...}`
//!    span, with light repairs (control characters, doubled quotes,
//!    trailing commas)
//! 3. keyword extraction of known field names from free text
//!
//! The candidate then goes through one schema pass that checks required
//! fields, enum membership and numeric bounds, and repairs what it can:
//! documented defaults, clamping, numeric strings, case-insensitive enum
//! matches. Anything still missing is an [`AgentError::UnrecoverableSchema`].
//!
//! The function is pure: the same input always yields the same output.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

use super::errors::AgentError;
use super::schema::{FieldKind, FieldSpec, ToolName, DOCUMENT_TYPE_VALUES};
use super::sections::ALL_SECTIONS;
use super::tokens::preview;

// ─── Output ──────────────────────────────────────────────────────────────────

/// Which stage produced the candidate object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseSource {
    Direct,
    Embedded,
    Keywords,
}

/// Schema-conformant arguments for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedArguments {
    pub tool: ToolName,
    /// Always a JSON object holding only schema fields.
    pub arguments: Value,
    pub source: ParseSource,
    /// Human-readable notes on every repair applied, in order.
    pub repairs: Vec<String>,
}

impl ValidatedArguments {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.arguments.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    /// Deserialize the arguments into a typed struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        Ok(serde_json::from_value(self.arguments.clone())?)
    }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

pub fn validate_and_parse(tool: ToolName, raw: &str) -> Result<ValidatedArguments, AgentError> {
    let schema = tool.schema();
    let mut repairs = Vec::new();

    let (candidate, source) = if let Some(obj) = parse_direct(raw, &mut repairs) {
        (obj, ParseSource::Direct)
    } else if let Some(obj) = parse_embedded(raw, &mut repairs) {
        (obj, ParseSource::Embedded)
    } else {
        repairs.push("no JSON object found, extracted fields from text".to_string());
        (extract_keywords(tool, raw), ParseSource::Keywords)
    };

    let mut missing = Vec::new();
    let arguments = conform_object(schema.fields, &candidate, "", &mut repairs, &mut missing);

    if !missing.is_empty() {
        tracing::warn!(
            tool = %tool,
            missing = ?missing,
            raw = %preview(raw, 200),
            "tool arguments unrecoverable"
        );
        return Err(AgentError::UnrecoverableSchema {
            tool: tool.as_str().to_string(),
            missing_fields: missing,
        });
    }

    if !repairs.is_empty() {
        tracing::warn!(tool = %tool, source = ?source, repairs = ?repairs, "tool arguments repaired");
    } else {
        tracing::debug!(tool = %tool, "tool arguments valid");
    }

    Ok(ValidatedArguments {
        tool,
        arguments: Value::Object(arguments),
        source,
        repairs,
    })
}

// ─── Stage 1: direct parse ───────────────────────────────────────────────────

fn parse_direct(raw: &str, repairs: &mut Vec<String>) -> Option<Map<String, Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        repairs.push("empty arguments treated as {}".to_string());
        return Some(Map::new());
    }
    match serde_json::from_str::<Value>(trimmed).ok()? {
        Value::Object(obj) => Some(obj),
        Value::String(inner) => match serde_json::from_str::<Value>(inner.trim()).ok()? {
            Value::Object(obj) => {
                repairs.push("unwrapped double-encoded JSON".to_string());
                Some(obj)
            }
            _ => None,
        },
        _ => None,
    }
}

// ─── Stage 2: embedded fragment ──────────────────────────────────────────────

static FENCED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)```").expect("valid fence regex"));

fn parse_embedded(raw: &str, repairs: &mut Vec<String>) -> Option<Map<String, Value>> {
    for caps in FENCED_BLOCK_RE.captures_iter(raw) {
        if let Some(block) = caps.get(1) {
            if let Some(obj) = parse_with_repairs(block.as_str().trim(), repairs) {
                repairs.insert(0, "extracted fenced code block".to_string());
                return Some(obj);
            }
        }
    }

    for (start, _) in raw.match_indices('{') {
        if let Some(end) = find_matching_brace(raw, start) {
            if let Some(obj) = parse_with_repairs(&raw[start..=end], repairs) {
                if start > 0 || end + 1 < raw.len() {
                    repairs.insert(0, "extracted embedded JSON object".to_string());
                }
                return Some(obj);
            }
        }
    }
    None
}

/// Find the `}` closing the `{` at byte `start`, ignoring braces in strings.
fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a fragment, applying light repairs one at a time until it parses.
fn parse_with_repairs(fragment: &str, repairs: &mut Vec<String>) -> Option<Map<String, Value>> {
    let as_object = |text: &str| match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    };

    if let Some(obj) = as_object(fragment) {
        return Some(obj);
    }

    let steps: [(&str, fn(&str) -> String); 3] = [
        ("escaped control characters", repair_control_characters),
        ("removed doubled quotes", repair_double_quotes),
        ("removed trailing commas", repair_trailing_commas),
    ];

    let mut text = fragment.to_string();
    let mut applied = Vec::new();
    for (label, repair) in steps {
        let next = repair(&text);
        if next != text {
            applied.push(label.to_string());
            text = next;
            if let Some(obj) = as_object(&text) {
                repairs.extend(applied);
                return Some(obj);
            }
        }
    }
    None
}

/// Escape raw newlines and tabs inside strings; drop other control characters.
fn repair_control_characters(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            } else if c.is_control() {
                match c {
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    _ => {}
                }
                continue;
            }
        } else if c == '"' {
            in_string = true;
        } else if c.is_control() && !c.is_whitespace() {
            continue;
        }
        out.push(c);
    }
    out
}

/// Collapse `:""value` (a doubled opening quote) into `:"value`.
fn repair_double_quotes(input: &str) -> String {
    static DOUBLED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#":\s*""([^",}\]\s])"#).expect("valid doubled quote regex"));
    DOUBLED_RE.replace_all(input, ":\"$1").into_owned()
}

/// Remove commas directly before `}` or `]`, outside strings.
fn repair_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

// ─── Stage 3: keyword extraction ─────────────────────────────────────────────

/// Pull known fields out of unstructured text.
///
/// A generic `field: value` pass runs first; tool-specific heuristics then
/// fill only the fields it did not find.
fn extract_keywords(tool: ToolName, raw: &str) -> Map<String, Value> {
    let mut out = Map::new();

    for field in tool.schema().fields {
        if matches!(
            field.kind,
            FieldKind::Object(_) | FieldKind::ObjectList(_) | FieldKind::StringMap
        ) {
            continue;
        }
        if let Some(value) = find_field_value(raw, field.name) {
            out.insert(field.name.to_string(), value);
        }
    }

    match tool {
        ToolName::AnalyzeRequest => {
            fill(&mut out, "intent", || detect_intent(raw).map(Value::from));
            fill(&mut out, "document_type", || detect_document_type(raw).map(Value::from));
        }
        ToolName::ExtractStructuredData => extract_parties_and_terms(raw, &mut out),
        ToolName::ValidateCompleteness => {
            let verdict = detect_completeness(raw);
            fill(&mut out, "is_complete", || verdict.map(Value::Bool));
            fill(&mut out, "ready_to_generate", || verdict.map(Value::Bool));
            fill(&mut out, "missing_required", || {
                MISSING_LIST_RE
                    .captures(raw)
                    .and_then(|c| c.get(1))
                    .map(|m| Value::from(split_list(m.as_str())))
            });
        }
        ToolName::GenerateDocumentSection => {
            fill(&mut out, "section_type", || detect_section(raw).map(Value::from));
            fill(&mut out, "content", || non_empty(raw).map(Value::from));
        }
        ToolName::GenerateFullDocument => {
            fill(&mut out, "document_type", || detect_document_type(raw).map(Value::from));
            fill(&mut out, "use_reflection", || {
                NO_REFLECTION_RE.is_match(raw).then_some(Value::Bool(false))
            });
        }
        ToolName::ApplyRevision => {
            fill(&mut out, "target_section", || detect_section(raw).map(Value::from));
            fill(&mut out, "revised_text", || non_empty(raw).map(Value::from));
        }
    }

    out
}

fn fill(out: &mut Map<String, Value>, key: &str, value: impl FnOnce() -> Option<Value>) {
    if !out.contains_key(key) {
        if let Some(v) = value() {
            out.insert(key.to_string(), v);
        }
    }
}

fn non_empty(raw: &str) -> Option<&str> {
    let t = raw.trim();
    (!t.is_empty()).then_some(t)
}

/// `"field": value`, `field: value` or `field = value`.
fn find_field_value(raw: &str, field: &str) -> Option<Value> {
    let pattern = format!(
        r#"(?i)"?\b{}\b"?\s*[:=]\s*("(?:[^"\\]|\\.)*"|\[[^\]]*\]|[^,}}\n]+)"#,
        regex::escape(field)
    );
    let re = Regex::new(&pattern).ok()?;
    let captured = re.captures(raw)?.get(1)?.as_str().trim();

    if captured.starts_with('"') {
        return serde_json::from_str::<String>(captured)
            .ok()
            .or_else(|| Some(captured.trim_matches('"').to_string()))
            .map(Value::String);
    }
    if captured.starts_with('[') {
        return serde_json::from_str::<Value>(captured).ok().or_else(|| {
            Some(Value::from(split_list(captured.trim_matches(|c| c == '[' || c == ']'))))
        });
    }
    let bare = captured.trim_end_matches(|c: char| c == ';' || c == '.' || c.is_whitespace());
    match serde_json::from_str::<Value>(bare) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => Some(v),
        Ok(Value::Null) => None,
        _ => Some(Value::String(bare.to_string())),
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split(|c| c == ',' || c == ';')
        .flat_map(|part| part.split(" and "))
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

static CREATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(create|draft|write|generate|prepare|make|need)\b").expect("valid regex")
});
static MODIFY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(modify|change|revise|update|edit|amend)\b").expect("valid regex")
});
static QUESTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(what|how|why|explain|question)\b|\?").expect("valid regex")
});

fn detect_intent(raw: &str) -> Option<&'static str> {
    if MODIFY_RE.is_match(raw) {
        Some("modify")
    } else if CREATE_RE.is_match(raw) {
        Some("create")
    } else if QUESTION_RE.is_match(raw) {
        Some("question")
    } else {
        None
    }
}

static DOC_TYPE_KEYWORDS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("NDA", r"(?i)\b(nda|non[- ]?disclosure|confidentiality agreement)\b"),
        ("EMPLOYMENT", r"(?i)\b(employment|employee|employer|hire|hiring|job offer)\b"),
        ("SERVICE", r"(?i)\b(service agreement|services|consulting|contractor|freelance)\b"),
        ("LEASE", r"(?i)\b(lease|rent|rental|tenant|landlord)\b"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid doc type regex")))
    .collect()
});

fn detect_document_type(raw: &str) -> Option<&'static str> {
    DOC_TYPE_KEYWORDS
        .iter()
        .find(|(_, re)| re.is_match(raw))
        .map(|(name, _)| *name)
        .filter(|name| DOCUMENT_TYPE_VALUES.contains(name))
}

static SECTION_KEYWORDS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    ALL_SECTIONS
        .iter()
        .map(|name| {
            let words = name.split('_').map(regex::escape).collect::<Vec<_>>().join(r"[_\s-]+");
            let re = Regex::new(&format!(r"(?i)\b{words}\b")).expect("valid section regex");
            (*name, re)
        })
        .collect()
});

/// First section name mentioned in the text, by position.
fn detect_section(raw: &str) -> Option<&'static str> {
    SECTION_KEYWORDS
        .iter()
        .filter_map(|(name, re)| re.find(raw).map(|m| (m.start(), std::cmp::Reverse(m.len()), *name)))
        .min()
        .map(|(_, _, name)| name)
}

static NO_REFLECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(without|no|skip|disable)\s+reflection\b").expect("valid regex")
});

static NEGATIVE_COMPLETENESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(incomplete|not\s+complete|not\s+ready|missing|still\s+need)").expect("valid regex")
});
static POSITIVE_COMPLETENESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(complete|ready|all\s+required)").expect("valid regex")
});
static MISSING_LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)missing[:\s]+([^.\n]+)").expect("valid regex"));

fn detect_completeness(raw: &str) -> Option<bool> {
    if NEGATIVE_COMPLETENESS_RE.is_match(raw) {
        Some(false)
    } else if POSITIVE_COMPLETENESS_RE.is_match(raw) {
        Some(true)
    } else {
        None
    }
}

static BETWEEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bbetween\s+(.+?)\s+and\s+(.+?)(?:[.;\n]|,\s|\s+(?:for|under|governed|effective|starting)\b|$)",
    )
    .expect("valid between regex")
});
static PARTY_A_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:party[_ ]?a|first party|disclosing party|employer|landlord|service provider)(?:[_ ]name)?\s*(?:is|:|=)\s*"?([^",;\n]+)"#)
        .expect("valid party regex")
});
static PARTY_B_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:party[_ ]?b|second party|receiving party|employee|tenant|client)(?:[_ ]name)?\s*(?:is|:|=)\s*"?([^",;\n]+)"#)
        .expect("valid party regex")
});
static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(year|month|day)s?\b").expect("valid duration regex"));

const STATES: &[&str] = &["California", "Delaware", "New York", "Texas", "Florida"];

fn extract_parties_and_terms(raw: &str, out: &mut Map<String, Value>) {
    let party = |name: &str| {
        let mut obj = Map::new();
        obj.insert("name".into(), Value::String(name.trim().to_string()));
        Value::Object(obj)
    };

    fill(out, "party_a", || {
        PARTY_A_RE.captures(raw).and_then(|c| c.get(1)).map(|m| party(m.as_str()))
    });
    fill(out, "party_b", || {
        PARTY_B_RE.captures(raw).and_then(|c| c.get(1)).map(|m| party(m.as_str()))
    });
    if let Some(caps) = BETWEEN_RE.captures(raw) {
        if let (Some(a), Some(b)) = (caps.get(1), caps.get(2)) {
            fill(out, "party_a", || Some(party(a.as_str())));
            fill(out, "party_b", || Some(party(b.as_str())));
        }
    }

    fill(out, "duration", || {
        let caps = DURATION_RE.captures(raw)?;
        let value: i64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = format!("{}s", caps.get(2)?.as_str().to_ascii_lowercase());
        let mut obj = Map::new();
        obj.insert("value".into(), Value::from(value));
        obj.insert("unit".into(), Value::String(unit));
        Some(Value::Object(obj))
    });

    fill(out, "governing_law", || {
        let lower = raw.to_ascii_lowercase();
        STATES
            .iter()
            .filter_map(|s| lower.find(&s.to_ascii_lowercase()).map(|pos| (pos, *s)))
            .min()
            .map(|(_, s)| Value::from(s))
    });
}

// ─── Schema conformance and repair ───────────────────────────────────────────

/// Why a value could not be conformed.
enum Rejection {
    Invalid,
    /// A nested object lacks required fields (paths already qualified).
    NestedMissing(Vec<String>),
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn conform_object(
    fields: &[FieldSpec],
    input: &Map<String, Value>,
    path: &str,
    repairs: &mut Vec<String>,
    missing: &mut Vec<String>,
) -> Map<String, Value> {
    let mut out = Map::new();

    for field in fields {
        let key_path = join_path(path, field.name);
        let raw = input.get(field.name).filter(|v| !v.is_null());

        let rejection = match raw.map(|v| conform_value(&field.kind, v, &key_path, repairs)) {
            Some(Ok(value)) => {
                out.insert(field.name.to_string(), value);
                continue;
            }
            Some(Err(rejection)) => Some(rejection),
            None => None,
        };

        match (field.default, rejection) {
            (Some(default), rejection) => {
                if rejection.is_some() {
                    repairs.push(format!("{key_path}: invalid value replaced with default"));
                } else if field.required {
                    repairs.push(format!("{key_path}: missing, used default"));
                }
                out.insert(field.name.to_string(), default.to_value());
            }
            (None, Some(Rejection::NestedMissing(nested))) if field.required => {
                missing.extend(nested);
            }
            (None, _) if field.required => missing.push(key_path),
            (None, Some(Rejection::NestedMissing(nested))) => {
                repairs.push(format!("{key_path}: dropped, missing {}", nested.join(", ")));
            }
            (None, Some(Rejection::Invalid)) => {
                repairs.push(format!("{key_path}: dropped invalid value"));
            }
            (None, None) => {}
        }
    }

    for key in input.keys() {
        if !fields.iter().any(|f| f.name == key) {
            repairs.push(format!("{}: dropped unknown field", join_path(path, key)));
        }
    }

    out
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn conform_value(
    kind: &FieldKind,
    value: &Value,
    path: &str,
    repairs: &mut Vec<String>,
) -> Result<Value, Rejection> {
    match kind {
        FieldKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(_) | Value::Bool(_) => {
                repairs.push(format!("{path}: converted to string"));
                Ok(Value::String(scalar_to_string(value).unwrap_or_default()))
            }
            Value::Array(items) if items.iter().all(|i| scalar_to_string(i).is_some()) => {
                repairs.push(format!("{path}: joined list into string"));
                let parts: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
                Ok(Value::String(parts.join(", ")))
            }
            _ => Err(Rejection::Invalid),
        },

        FieldKind::Number { min, max } => {
            let n = match value {
                Value::Number(n) => n.as_f64().ok_or(Rejection::Invalid)?,
                Value::String(s) => {
                    let parsed = s.trim().parse::<f64>().map_err(|_| Rejection::Invalid)?;
                    if !parsed.is_finite() {
                        return Err(Rejection::Invalid);
                    }
                    repairs.push(format!("{path}: parsed numeric string"));
                    parsed
                }
                _ => return Err(Rejection::Invalid),
            };
            let clamped = clamp_f64(n, *min, *max);
            if clamped != n {
                repairs.push(format!("{path}: clamped {n} to {clamped}"));
            }
            Number::from_f64(clamped).map(Value::Number).ok_or(Rejection::Invalid)
        }

        FieldKind::Integer { min, max } => {
            let n = match value {
                Value::Number(n) => match n.as_i64() {
                    Some(i) => i,
                    None => {
                        let f = n.as_f64().ok_or(Rejection::Invalid)?;
                        repairs.push(format!("{path}: rounded to integer"));
                        f.round() as i64
                    }
                },
                Value::String(s) => {
                    let t = s.trim();
                    let parsed = t
                        .parse::<i64>()
                        .ok()
                        .or_else(|| t.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.round() as i64))
                        .ok_or(Rejection::Invalid)?;
                    repairs.push(format!("{path}: parsed numeric string"));
                    parsed
                }
                _ => return Err(Rejection::Invalid),
            };
            let mut clamped = n;
            if let Some(lo) = min {
                clamped = clamped.max(*lo);
            }
            if let Some(hi) = max {
                clamped = clamped.min(*hi);
            }
            if clamped != n {
                repairs.push(format!("{path}: clamped {n} to {clamped}"));
            }
            Ok(Value::from(clamped))
        }

        FieldKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => {
                let b = match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "y" | "1" => true,
                    "false" | "no" | "n" | "0" => false,
                    _ => return Err(Rejection::Invalid),
                };
                repairs.push(format!("{path}: parsed boolean string"));
                Ok(Value::Bool(b))
            }
            Value::Number(n) => match n.as_i64() {
                Some(0) => {
                    repairs.push(format!("{path}: parsed boolean number"));
                    Ok(Value::Bool(false))
                }
                Some(1) => {
                    repairs.push(format!("{path}: parsed boolean number"));
                    Ok(Value::Bool(true))
                }
                _ => Err(Rejection::Invalid),
            },
            _ => Err(Rejection::Invalid),
        },

        FieldKind::Enum(values) => {
            let s = value.as_str().ok_or(Rejection::Invalid)?;
            if values.iter().any(|v| *v == s) {
                return Ok(value.clone());
            }
            let t = s.trim();
            let canonical = values
                .iter()
                .find(|v| v.eq_ignore_ascii_case(t))
                .ok_or(Rejection::Invalid)?;
            repairs.push(format!("{path}: normalized '{s}' to '{canonical}'"));
            Ok(Value::from(*canonical))
        }

        FieldKind::StringList => match value {
            Value::Array(items) => {
                let list: Vec<Value> = items
                    .iter()
                    .filter_map(scalar_to_string)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .map(Value::String)
                    .collect();
                if list.len() != items.len() {
                    repairs.push(format!("{path}: dropped non-string list items"));
                }
                Ok(Value::Array(list))
            }
            Value::String(s) => {
                repairs.push(format!("{path}: split string into list"));
                Ok(Value::from(split_list(s)))
            }
            _ => Err(Rejection::Invalid),
        },

        FieldKind::StringMap => match value {
            Value::Object(obj) => {
                let mut out = Map::new();
                for (k, v) in obj {
                    match v {
                        Value::Null => {}
                        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                            out.insert(k.clone(), Value::String(scalar_to_string(v).unwrap_or_default()));
                        }
                        other => {
                            repairs.push(format!("{path}.{k}: serialized nested value"));
                            out.insert(k.clone(), Value::String(other.to_string()));
                        }
                    }
                }
                Ok(Value::Object(out))
            }
            _ => Err(Rejection::Invalid),
        },

        FieldKind::Object(fields) => {
            let obj = match value {
                Value::Object(obj) => obj.clone(),
                Value::String(s) => match serde_json::from_str::<Value>(s) {
                    Ok(Value::Object(obj)) => {
                        repairs.push(format!("{path}: parsed JSON string"));
                        obj
                    }
                    _ => wrap_scalar(fields, s, path, repairs).ok_or(Rejection::Invalid)?,
                },
                _ => return Err(Rejection::Invalid),
            };
            let mut nested_missing = Vec::new();
            let conformed = conform_object(fields, &obj, path, repairs, &mut nested_missing);
            if nested_missing.is_empty() {
                Ok(Value::Object(conformed))
            } else {
                Err(Rejection::NestedMissing(nested_missing))
            }
        }

        FieldKind::ObjectList(fields) => {
            let items = match value {
                Value::Array(items) => items.clone(),
                Value::Object(_) => {
                    repairs.push(format!("{path}: wrapped single object in list"));
                    vec![value.clone()]
                }
                _ => return Err(Rejection::Invalid),
            };
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                let Value::Object(obj) = item else {
                    repairs.push(format!("{item_path}: dropped non-object item"));
                    continue;
                };
                let mut nested_missing = Vec::new();
                let conformed = conform_object(fields, obj, &item_path, repairs, &mut nested_missing);
                if nested_missing.is_empty() {
                    out.push(Value::Object(conformed));
                } else {
                    repairs.push(format!("{item_path}: dropped, missing {}", nested_missing.join(", ")));
                }
            }
            Ok(Value::Array(out))
        }
    }
}

/// A bare string where an object is expected fills the object's first
/// required string field, e.g. `"party_a": "Acme"` → `{"name": "Acme"}`.
fn wrap_scalar(
    fields: &[FieldSpec],
    text: &str,
    path: &str,
    repairs: &mut Vec<String>,
) -> Option<Map<String, Value>> {
    let target = fields
        .iter()
        .find(|f| f.required && matches!(f.kind, FieldKind::String))?;
    if text.trim().is_empty() {
        return None;
    }
    repairs.push(format!("{path}: wrapped string as {{{}}}", target.name));
    let mut obj = Map::new();
    obj.insert(target.name.to_string(), Value::String(text.trim().to_string()));
    Some(obj)
}

fn clamp_f64(n: f64, min: Option<f64>, max: Option<f64>) -> f64 {
    let mut v = n;
    if let Some(lo) = min {
        v = v.max(lo);
    }
    if let Some(hi) = max {
        v = v.min(hi);
    }
    v
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncated_json_falls_back_to_keywords() {
        let v = validate_and_parse(ToolName::AnalyzeRequest, r#"{"intent": "create""#).unwrap();
        assert_eq!(v.source, ParseSource::Keywords);
        assert_eq!(v.get_str("intent"), Some("create"));
        assert_eq!(v.get_f64("confidence"), Some(0.5));
    }

    #[test]
    fn test_confidence_clamped_and_intent_defaulted() {
        let v = validate_and_parse(ToolName::AnalyzeRequest, r#"{"confidence": 1.5}"#).unwrap();
        assert_eq!(v.source, ParseSource::Direct);
        assert_eq!(v.get_f64("confidence"), Some(1.0));
        assert_eq!(v.get_str("intent"), Some("unclear"));
        assert!(v.repairs.iter().any(|r| r.contains("clamped")));
    }

    #[test]
    fn test_valid_arguments_need_no_repair() {
        let raw = r#"{"intent":"create","document_type":"NDA","confidence":0.9,"expertise":"beginner"}"#;
        let v = validate_and_parse(ToolName::AnalyzeRequest, raw).unwrap();
        assert!(v.repairs.is_empty(), "{:?}", v.repairs);
        assert_eq!(v.get_str("document_type"), Some("NDA"));
    }

    #[test]
    fn test_deterministic() {
        let inputs = [
            r#"{"intent": "create""#,
            "Sure! ```json\n{\"target_section\": \"Remedies\", \"revision_type\": \"REPLACE\",}\n```",
            "the parties are between Acme Corp and Beta LLC for 2 years in Delaware",
        ];
        for raw in inputs {
            for tool in ToolName::ALL {
                let a = validate_and_parse(tool, raw).map_err(|e| e.to_string());
                let b = validate_and_parse(tool, raw).map_err(|e| e.to_string());
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_double_encoded_string_unwrapped() {
        let raw = serde_json::to_string(r#"{"intent":"modify","confidence":"0.7"}"#).unwrap();
        let v = validate_and_parse(ToolName::AnalyzeRequest, &raw).unwrap();
        assert_eq!(v.source, ParseSource::Direct);
        assert_eq!(v.get_f64("confidence"), Some(0.7));
        assert!(v.repairs.iter().any(|r| r.contains("double-encoded")));
    }

    #[test]
    fn test_fenced_block_with_trailing_comma() {
        let raw = "Here you go:\n```json\n{\"target_section\": \"remedies\", \"revision_type\": \"Replace\",}\n```";
        let v = validate_and_parse(ToolName::ApplyRevision, raw).unwrap();
        assert_eq!(v.source, ParseSource::Embedded);
        assert_eq!(v.get_str("revision_type"), Some("replace"));
        assert_eq!(v.get_str("revised_text"), Some(""));
        assert!(v.repairs.iter().any(|r| r.contains("trailing commas")));
    }

    #[test]
    fn test_brace_span_in_prose() {
        let raw = r#"I'll call it with {"section_type": "confidential_info", "notes": "keep it {short}"} now."#;
        let v = validate_and_parse(ToolName::GenerateDocumentSection, raw).unwrap();
        assert_eq!(v.source, ParseSource::Embedded);
        assert_eq!(v.get_str("section_type"), Some("confidential_info"));
        assert_eq!(v.get_str("notes"), Some("keep it {short}"));
    }

    #[test]
    fn test_raw_newline_in_string_is_escaped() {
        let raw = "{\"section_type\": \"header\", \"content\": \"line one\nline two\"}";
        let v = validate_and_parse(ToolName::GenerateDocumentSection, raw).unwrap();
        assert_eq!(v.get_str("content"), Some("line one\nline two"));
    }

    #[test]
    fn test_doubled_quote_repair() {
        assert_eq!(repair_double_quotes(r#"{"law":""Texas"}"#), r#"{"law":"Texas"}"#);
        assert_eq!(repair_double_quotes(r#"{"law":""}"#), r#"{"law":""}"#);
    }

    #[test]
    fn test_unknown_fields_dropped() {
        let v = validate_and_parse(
            ToolName::GenerateFullDocument,
            r#"{"title":"Mutual NDA","colour":"blue"}"#,
        )
        .unwrap();
        assert!(v.get("colour").is_none());
        assert!(v.repairs.iter().any(|r| r.contains("colour")));
    }

    #[test]
    fn test_missing_required_without_default_is_unrecoverable() {
        let err = validate_and_parse(ToolName::ApplyRevision, r#"{"revised_text": "x"}"#).unwrap_err();
        match err {
            AgentError::UnrecoverableSchema { tool, missing_fields } => {
                assert_eq!(tool, "apply_revision");
                assert_eq!(missing_fields, vec!["target_section".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_invalid_enum_for_required_field_is_unrecoverable() {
        let result = validate_and_parse(
            ToolName::GenerateDocumentSection,
            r#"{"section_type": "preamble_of_doom"}"#,
        );
        assert!(matches!(result, Err(AgentError::UnrecoverableSchema { .. })));
    }

    #[test]
    fn test_nested_objects_conform() {
        let raw = r#"{
            "party_a": {"name": "Acme Corp", "type": "Company", "role": "disclosing"},
            "party_b": "Beta LLC",
            "duration": {"value": "2", "unit": "Years"},
            "confidential_info": {"categories": "source code, pricing"}
        }"#;
        let v = validate_and_parse(ToolName::ExtractStructuredData, raw).unwrap();
        let args = &v.arguments;
        assert_eq!(args["party_a"]["type"], "company");
        assert_eq!(args["party_b"], json!({"name": "Beta LLC"}));
        assert_eq!(args["duration"], json!({"value": 2, "unit": "years"}));
        assert_eq!(args["confidential_info"]["categories"], json!(["source code", "pricing"]));
    }

    #[test]
    fn test_optional_party_without_name_dropped() {
        let raw = r#"{"party_a": {"address": "1 Main St"}, "governing_law": "Texas"}"#;
        let v = validate_and_parse(ToolName::ExtractStructuredData, raw).unwrap();
        assert!(v.get("party_a").is_none());
        assert_eq!(v.get_str("governing_law"), Some("Texas"));
        assert!(v.repairs.iter().any(|r| r.contains("party_a") && r.contains("party_a.name")));
    }

    #[test]
    fn test_duration_value_clamped_to_minimum() {
        let raw = r#"{"duration": {"value": 0, "unit": "months"}}"#;
        let v = validate_and_parse(ToolName::ExtractStructuredData, raw).unwrap();
        assert_eq!(v.arguments["duration"]["value"], 1);
    }

    #[test]
    fn test_keyword_extraction_for_parties_and_terms() {
        let raw = "NDA between Acme Corp and Beta LLC for 2 years under the laws of delaware";
        let v = validate_and_parse(ToolName::ExtractStructuredData, raw).unwrap();
        assert_eq!(v.source, ParseSource::Keywords);
        assert_eq!(v.arguments["party_a"]["name"], "Acme Corp");
        assert_eq!(v.arguments["party_b"]["name"], "Beta LLC");
        assert_eq!(v.arguments["duration"], json!({"value": 2, "unit": "years"}));
        assert_eq!(v.get_str("governing_law"), Some("Delaware"));
    }

    #[test]
    fn test_keyword_extraction_for_completeness() {
        let raw = "Not ready yet. Missing: party_b_name, duration";
        let v = validate_and_parse(ToolName::ValidateCompleteness, raw).unwrap();
        assert_eq!(v.get_bool("is_complete"), Some(false));
        assert_eq!(v.arguments["missing_required"], json!(["party_b_name", "duration"]));
    }

    #[test]
    fn test_keyword_extraction_for_sections() {
        let v = validate_and_parse(
            ToolName::GenerateDocumentSection,
            "Please draft the Confidential Info section",
        )
        .unwrap();
        assert_eq!(v.get_str("section_type"), Some("confidential_info"));
        assert_eq!(v.get_str("content"), Some("Please draft the Confidential Info section"));

        let v = validate_and_parse(ToolName::ApplyRevision, "Remedies: add injunctive relief").unwrap();
        assert_eq!(v.get_str("target_section"), Some("remedies"));
        assert_eq!(v.get_str("revision_type"), Some("modify"));
    }

    #[test]
    fn test_boolean_and_list_coercion() {
        let raw = r#"{"is_complete": "yes", "ready_to_generate": 0, "missing_optional": "effective_date"}"#;
        let v = validate_and_parse(ToolName::ValidateCompleteness, raw).unwrap();
        assert_eq!(v.get_bool("is_complete"), Some(true));
        assert_eq!(v.get_bool("ready_to_generate"), Some(false));
        assert_eq!(v.arguments["missing_optional"], json!(["effective_date"]));
    }

    #[test]
    fn test_validation_error_list_items() {
        let raw = r#"{"validation_errors": [{"field": "duration", "error": "negative"}, "oops"]}"#;
        let v = validate_and_parse(ToolName::ValidateCompleteness, raw).unwrap();
        assert_eq!(v.arguments["validation_errors"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_arguments() {
        let v = validate_and_parse(ToolName::GenerateFullDocument, "  ").unwrap();
        assert_eq!(v.source, ParseSource::Direct);
        assert!(v.arguments.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_typed_parse() {
        #[derive(serde::Deserialize)]
        struct Args {
            intent: String,
            confidence: f64,
        }
        let v = validate_and_parse(ToolName::AnalyzeRequest, r#"{"intent":"create"}"#).unwrap();
        let args: Args = v.parse().unwrap();
        assert_eq!(args.intent, "create");
        assert_eq!(args.confidence, 0.5);
    }
}
