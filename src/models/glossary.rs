//! Business glossary terms and approved parameterised queries.

use super::ids::{ProjectId, QueryId, TermId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a glossary term came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlossarySource {
    /// Suggested by glossary discovery and validated.
    Inferred,
    /// Created via the UI.
    Manual,
    /// Created by an LLM client over the tool-call protocol.
    Client,
}

impl GlossarySource {
    /// Returns the source as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inferred => "inferred",
            Self::Manual => "manual",
            Self::Client => "client",
        }
    }

    /// Parses a source from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inferred" => Some(Self::Inferred),
            "manual" => Some(Self::Manual),
            "client" => Some(Self::Client),
            _ => None,
        }
    }
}

/// A business glossary term with its canonical defining SQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryTerm {
    /// Term identifier.
    pub id: TermId,
    /// Owning project.
    pub project_id: ProjectId,
    /// The term; unique per project.
    pub term: String,
    /// Plain-language definition.
    pub definition: String,
    /// Canonical executable SELECT.
    pub defining_sql: String,
    /// Table the definition is anchored on.
    pub base_table: Option<String>,
    /// Column names the defining SQL returns.
    pub output_columns: Vec<String>,
    /// Alternative names that resolve to this term.
    pub aliases: Vec<String>,
    /// Provenance.
    pub source: GlossarySource,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl GlossaryTerm {
    /// Whether `needle` matches the term or any alias, case-insensitively.
    #[must_use]
    pub fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.term.to_lowercase() == needle
            || self.aliases.iter().any(|a| a.to_lowercase() == needle)
    }
}

/// Approval state of a stored query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Vetted and executable.
    Approved,
    /// Suggested, awaiting review.
    Pending,
    /// Rejected by review.
    Rejected,
}

impl ApprovalStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Pending => "pending",
            Self::Rejected => "rejected",
        }
    }

    /// Parses a status from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Self::Approved),
            "pending" => Some(Self::Pending),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Declared type of a query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// UTF-8 text.
    String,
    /// 64-bit integer.
    Integer,
    /// Arbitrary-precision decimal, bound as text.
    Decimal,
    /// Boolean.
    Boolean,
    /// ISO-8601 date.
    Date,
    /// ISO-8601 instant.
    Timestamp,
    /// UUID.
    Uuid,
    /// Array of strings.
    StringArray,
    /// Array of integers.
    IntegerArray,
}

impl ParamType {
    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Uuid => "uuid",
            Self::StringArray => "string[]",
            Self::IntegerArray => "integer[]",
        }
    }

    /// Parses a type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "decimal" => Some(Self::Decimal),
            "boolean" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "timestamp" => Some(Self::Timestamp),
            "uuid" => Some(Self::Uuid),
            "string[]" => Some(Self::StringArray),
            "integer[]" => Some(Self::IntegerArray),
            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parameter definition for an approved query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name; must match a `{{name}}` placeholder.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Description shown to tool-callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether a value must be supplied.
    #[serde(default)]
    pub required: bool,
    /// Default used when no value is supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// A pre-approved parameterised SQL template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedQuery {
    /// Query identifier.
    pub id: QueryId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Short name; unique per project.
    pub name: String,
    /// What the query answers.
    pub description: String,
    /// SQL with `{{param}}` placeholders.
    pub sql_template: String,
    /// Parameter definitions.
    pub parameters: Vec<ParameterDef>,
    /// Whether the query may be executed.
    pub is_enabled: bool,
    /// Approval state.
    pub approval_status: ApprovalStatus,
    /// Column names the query returns.
    pub output_columns: Vec<String>,
    /// Times the query has been executed.
    pub usage_count: i64,
    /// Last execution time.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}
