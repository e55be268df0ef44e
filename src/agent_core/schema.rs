//! The closed tool registry and its argument schemas.
//!
//! Each tool's parameters are described once, as a static [`FieldSpec`]
//! table. The same table drives the JSON Schema sent to the model
//! ([`to_tool_definition`]) and the validator's conform/repair pass.

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Map, Value};

use super::errors::AgentError;
use crate::inference::types::{FunctionDefinition, ToolDefinition};

// ─── Tool names ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    AnalyzeRequest,
    ExtractStructuredData,
    ValidateCompleteness,
    GenerateDocumentSection,
    GenerateFullDocument,
    ApplyRevision,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::AnalyzeRequest,
        ToolName::ExtractStructuredData,
        ToolName::ValidateCompleteness,
        ToolName::GenerateDocumentSection,
        ToolName::GenerateFullDocument,
        ToolName::ApplyRevision,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::AnalyzeRequest => "analyze_request",
            ToolName::ExtractStructuredData => "extract_structured_data",
            ToolName::ValidateCompleteness => "validate_completeness",
            ToolName::GenerateDocumentSection => "generate_document_section",
            ToolName::GenerateFullDocument => "generate_full_document",
            ToolName::ApplyRevision => "apply_revision",
        }
    }

    pub fn schema(self) -> &'static ToolSchema {
        match self {
            ToolName::AnalyzeRequest => &ANALYZE_REQUEST,
            ToolName::ExtractStructuredData => &EXTRACT_STRUCTURED_DATA,
            ToolName::ValidateCompleteness => &VALIDATE_COMPLETENESS,
            ToolName::GenerateDocumentSection => &GENERATE_DOCUMENT_SECTION,
            ToolName::GenerateFullDocument => &GENERATE_FULL_DOCUMENT,
            ToolName::ApplyRevision => &APPLY_REVISION,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| AgentError::UnknownTool { name: s.to_string() })
    }
}

// ─── Field specs ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    String,
    Number { min: Option<f64>, max: Option<f64> },
    Integer { min: Option<i64>, max: Option<i64> },
    Boolean,
    /// Canonical values; matching is exact first, then case-insensitive.
    Enum(&'static [&'static str]),
    StringList,
    StringMap,
    Object(&'static [FieldSpec]),
    ObjectList(&'static [FieldSpec]),
}

/// Documented fallback for a field the model left out or got wrong.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Str(&'static str),
    Number(f64),
    Bool(bool),
}

impl DefaultValue {
    pub fn to_value(self) -> Value {
        match self {
            DefaultValue::Str(s) => Value::String(s.to_string()),
            DefaultValue::Number(n) => json!(n),
            DefaultValue::Bool(b) => Value::Bool(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<DefaultValue>,
    pub description: &'static str,
}

impl FieldSpec {
    const fn new(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        FieldSpec {
            name,
            kind,
            required: false,
            default: None,
            description,
        }
    }

    const fn required(self) -> Self {
        FieldSpec {
            required: true,
            ..self
        }
    }

    const fn default(self, default: DefaultValue) -> Self {
        FieldSpec {
            default: Some(default),
            ..self
        }
    }
}

pub struct ToolSchema {
    pub name: ToolName,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
}

impl ToolSchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ─── Enumerations ────────────────────────────────────────────────────────────

pub const DOCUMENT_TYPE_VALUES: &[&str] = &["NDA", "EMPLOYMENT", "SERVICE", "LEASE", "UNKNOWN"];
pub const EXPERTISE_VALUES: &[&str] = &["beginner", "intermediate", "expert"];
const PARTY_TYPE_VALUES: &[&str] = &["individual", "company"];
const PARTY_ROLE_VALUES: &[&str] = &["disclosing", "receiving", "mutual"];
const DURATION_UNIT_VALUES: &[&str] = &["days", "months", "years"];
pub const REVISION_TYPE_VALUES: &[&str] = &["modify", "delete", "add", "replace"];

const UNIT: Option<f64> = Some(1.0);

// ─── Tool tables ─────────────────────────────────────────────────────────────

const PARTY_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldKind::String, "Full legal name").required(),
    FieldSpec::new("type", FieldKind::Enum(PARTY_TYPE_VALUES), "Individual or company"),
    FieldSpec::new("address", FieldKind::String, "Postal address"),
    FieldSpec::new("role", FieldKind::Enum(PARTY_ROLE_VALUES), "Role in the agreement"),
];

const CONFIDENTIAL_INFO_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("description", FieldKind::String, "What information is protected"),
    FieldSpec::new("categories", FieldKind::StringList, "Categories of information"),
];

const DURATION_FIELDS: &[FieldSpec] = &[
    FieldSpec::new(
        "value",
        FieldKind::Integer {
            min: Some(1),
            max: None,
        },
        "Length of the term",
    ),
    FieldSpec::new("unit", FieldKind::Enum(DURATION_UNIT_VALUES), "Unit of the term"),
];

const VALIDATION_ERROR_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("field", FieldKind::String, "Field with the problem"),
    FieldSpec::new("error", FieldKind::String, "What is wrong"),
];

static ANALYZE_REQUEST: ToolSchema = ToolSchema {
    name: ToolName::AnalyzeRequest,
    description: "Analyze the user's request to understand intent, document type, and what information is present or missing.",
    fields: &[
        FieldSpec::new("intent", FieldKind::String, "What the user wants, e.g. create, modify, question")
            .required()
            .default(DefaultValue::Str("unclear")),
        FieldSpec::new(
            "document_type",
            FieldKind::Enum(DOCUMENT_TYPE_VALUES),
            "Type of legal document requested",
        ),
        FieldSpec::new("detected_info", FieldKind::StringMap, "Facts found in the message"),
        FieldSpec::new("missing_info", FieldKind::StringList, "Facts still needed"),
        FieldSpec::new(
            "confidence",
            FieldKind::Number {
                min: Some(0.0),
                max: UNIT,
            },
            "Confidence in the analysis, 0 to 1",
        )
        .required()
        .default(DefaultValue::Number(0.5)),
        FieldSpec::new(
            "clarification_needed",
            FieldKind::Boolean,
            "Whether the user must be asked a question first",
        ),
        FieldSpec::new(
            "expertise",
            FieldKind::Enum(EXPERTISE_VALUES),
            "The user's apparent legal expertise",
        ),
    ],
};

static EXTRACT_STRUCTURED_DATA: ToolSchema = ToolSchema {
    name: ToolName::ExtractStructuredData,
    description: "Extract structured facts (parties, terms, dates, jurisdiction) from the conversation.",
    fields: &[
        FieldSpec::new("party_a", FieldKind::Object(PARTY_FIELDS), "First party"),
        FieldSpec::new("party_b", FieldKind::Object(PARTY_FIELDS), "Second party"),
        FieldSpec::new(
            "confidential_info",
            FieldKind::Object(CONFIDENTIAL_INFO_FIELDS),
            "Confidential information covered",
        ),
        FieldSpec::new("duration", FieldKind::Object(DURATION_FIELDS), "Term of the agreement"),
        FieldSpec::new("governing_law", FieldKind::String, "Governing jurisdiction"),
        FieldSpec::new("effective_date", FieldKind::String, "Effective date"),
        FieldSpec::new(
            "additional_fields",
            FieldKind::StringMap,
            "Any other document fields, keyed by field name",
        ),
    ],
};

static VALIDATE_COMPLETENESS: ToolSchema = ToolSchema {
    name: ToolName::ValidateCompleteness,
    description: "Check whether every required field is collected and consistent, and whether drafting can start.",
    fields: &[
        FieldSpec::new("is_complete", FieldKind::Boolean, "All required information present")
            .default(DefaultValue::Bool(false)),
        FieldSpec::new("ready_to_generate", FieldKind::Boolean, "Drafting can begin")
            .default(DefaultValue::Bool(false)),
        FieldSpec::new("missing_required", FieldKind::StringList, "Required fields still missing"),
        FieldSpec::new("missing_optional", FieldKind::StringList, "Optional fields worth asking for"),
        FieldSpec::new(
            "validation_errors",
            FieldKind::ObjectList(VALIDATION_ERROR_FIELDS),
            "Contradictory or invalid values",
        ),
        FieldSpec::new("recommendation", FieldKind::String, "Suggested next step"),
    ],
};

static GENERATE_DOCUMENT_SECTION: ToolSchema = ToolSchema {
    name: ToolName::GenerateDocumentSection,
    description: "Generate one section of the document.",
    fields: &[
        FieldSpec::new(
            "section_type",
            FieldKind::Enum(super::sections::ALL_SECTIONS),
            "Section to generate",
        )
        .required(),
        FieldSpec::new("content", FieldKind::String, "Optional draft to start from"),
        FieldSpec::new(
            "section_number",
            FieldKind::Integer {
                min: Some(1),
                max: None,
            },
            "Position of the section",
        ),
        FieldSpec::new("notes", FieldKind::String, "Drafting notes"),
    ],
};

static GENERATE_FULL_DOCUMENT: ToolSchema = ToolSchema {
    name: ToolName::GenerateFullDocument,
    description: "Generate (or regenerate) every section of the document.",
    fields: &[
        FieldSpec::new(
            "document_type",
            FieldKind::Enum(DOCUMENT_TYPE_VALUES),
            "Type of document to generate",
        ),
        FieldSpec::new("title", FieldKind::String, "Document title"),
        FieldSpec::new(
            "use_reflection",
            FieldKind::Boolean,
            "Override reflection for critical sections",
        ),
    ],
};

static APPLY_REVISION: ToolSchema = ToolSchema {
    name: ToolName::ApplyRevision,
    description: "Apply a revision to one section of the generated document.",
    fields: &[
        FieldSpec::new("target_section", FieldKind::String, "Section to revise").required(),
        FieldSpec::new(
            "revision_type",
            FieldKind::Enum(REVISION_TYPE_VALUES),
            "Kind of change",
        )
        .default(DefaultValue::Str("modify")),
        FieldSpec::new("original_text", FieldKind::String, "Text being replaced or removed"),
        FieldSpec::new("revised_text", FieldKind::String, "New text")
            .default(DefaultValue::Str("")),
        FieldSpec::new("reason", FieldKind::String, "Why the change is made"),
        FieldSpec::new(
            "affected_sections",
            FieldKind::StringList,
            "Other sections touched by the change",
        ),
    ],
};

// ─── JSON Schema generation ──────────────────────────────────────────────────

fn object_schema(fields: &[FieldSpec]) -> Value {
    let mut properties = Map::new();
    for field in fields {
        let mut prop = field_schema(&field.kind);
        if let Value::Object(ref mut obj) = prop {
            obj.insert("description".into(), Value::String(field.description.into()));
            if let Some(default) = field.default {
                obj.insert("default".into(), default.to_value());
            }
        }
        properties.insert(field.name.to_string(), prop);
    }
    let required: Vec<&str> = fields.iter().filter(|f| f.required).map(|f| f.name).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn field_schema(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::String => json!({"type": "string"}),
        FieldKind::Number { min, max } => {
            let mut v = json!({"type": "number"});
            if let Some(min) = min {
                v["minimum"] = json!(min);
            }
            if let Some(max) = max {
                v["maximum"] = json!(max);
            }
            v
        }
        FieldKind::Integer { min, max } => {
            let mut v = json!({"type": "integer"});
            if let Some(min) = min {
                v["minimum"] = json!(min);
            }
            if let Some(max) = max {
                v["maximum"] = json!(max);
            }
            v
        }
        FieldKind::Boolean => json!({"type": "boolean"}),
        FieldKind::Enum(values) => json!({"type": "string", "enum": values}),
        FieldKind::StringList => json!({"type": "array", "items": {"type": "string"}}),
        FieldKind::StringMap => json!({"type": "object", "additionalProperties": {"type": "string"}}),
        FieldKind::Object(fields) => object_schema(fields),
        FieldKind::ObjectList(fields) => json!({"type": "array", "items": object_schema(fields)}),
    }
}

/// The OpenAI tool definition for one tool.
pub fn to_tool_definition(tool: ToolName) -> ToolDefinition {
    let schema = tool.schema();
    ToolDefinition {
        r#type: "function".to_string(),
        function: FunctionDefinition {
            name: tool.as_str().to_string(),
            description: schema.description.to_string(),
            parameters: object_schema(schema.fields),
        },
    }
}

/// Definitions for the whole registry, in registry order.
pub fn all_tool_definitions() -> Vec<ToolDefinition> {
    ToolName::ALL.into_iter().map(to_tool_definition).collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
