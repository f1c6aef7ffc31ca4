//! The tiered ontology: domain summary, entity summaries, column details.
//!
//! Tier 0 describes the business as a whole; tier 1 summarises each entity
//! with its occurrences and neighbours; tier 2 carries per-column semantics
//! keyed by table name. Tier 1 is complete without tier 2.

use super::ids::ProjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Semantic classification of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    /// Categorical attribute used for grouping and filtering.
    Dimension,
    /// Numeric quantity that aggregates meaningfully.
    Measure,
    /// Key that identifies a row or references another.
    Identifier,
    /// Descriptive attribute that is neither dimension nor measure.
    Attribute,
}

impl SemanticType {
    /// Returns the semantic type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dimension => "dimension",
            Self::Measure => "measure",
            Self::Identifier => "identifier",
            Self::Attribute => "attribute",
        }
    }

    /// Parses a semantic type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dimension" => Some(Self::Dimension),
            "measure" | "metric" => Some(Self::Measure),
            "identifier" | "id" | "key" => Some(Self::Identifier),
            "attribute" => Some(Self::Attribute),
            _ => None,
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requested depth for ontology reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OntologyDepth {
    /// Tier 0: counts, relationship graph, description, conventions.
    Domain,
    /// Tier 1 keyed by entity.
    Entities,
    /// Tier 1 pivoted to tables.
    Tables,
    /// Tier 2 merged with live schema.
    Columns,
}

impl OntologyDepth {
    /// Parses a depth from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "domain" => Some(Self::Domain),
            "entities" => Some(Self::Entities),
            "tables" => Some(Self::Tables),
            "columns" => Some(Self::Columns),
            _ => None,
        }
    }
}

/// Schema conventions detected deterministically during finalisation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conventions {
    /// Tables carry a nullable `deleted_at` for soft deletes.
    pub soft_delete: bool,
    /// Detected currency scale: "cents" or "dollars".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency_scale: Option<String>,
    /// Audit columns present across tables.
    pub audit_columns: Vec<String>,
}

/// Tier 0: aggregated description of the business domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainSummary {
    /// Two-to-three sentence business description.
    pub description: String,
    /// Distinct entity domains, alphabetised.
    pub primary_domains: Vec<String>,
    /// Detected schema conventions.
    pub conventions: Conventions,
}

/// A neighbour reference inside an entity summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceSummary {
    /// Table the occurrence is in.
    pub table: String,
    /// Column carrying the identifier.
    pub column: String,
    /// Optional role disambiguator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Tier 1: per-entity summary keyed by entity name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySummary {
    /// Entity name.
    pub name: String,
    /// Business description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Business domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Backing table.
    pub primary_table: String,
    /// Places the entity occurs.
    pub occurrences: Vec<OccurrenceSummary>,
    /// Names of related entities.
    pub related_entities: Vec<String>,
}

/// A labelled enumeration value for a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    /// Stored value.
    pub value: String,
    /// Human label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Tier 2: semantics of a single column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDetail {
    /// Column name.
    pub column: String,
    /// Business description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Semantic classification.
    pub semantic_type: SemanticType,
    /// Business role, e.g. "order total".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Disambiguator when multiple FKs target the same table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fk_role: Option<String>,
    /// Labelled enum values for low-cardinality status columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<EnumValue>,
    /// Alternative names users may use.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
}

/// The persisted ontology for a project: one row per project.
///
/// `entity_summaries` keys are entity names; `column_details` keys are
/// qualified table names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ontology {
    /// Owning project.
    pub project_id: Option<ProjectId>,
    /// Tier 0.
    pub domain_summary: DomainSummary,
    /// Tier 1, keyed by entity name.
    pub entity_summaries: BTreeMap<String, EntitySummary>,
    /// Tier 2, keyed by table name.
    pub column_details: BTreeMap<String, Vec<ColumnDetail>>,
    /// Last finalisation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_type_parse_synonyms() {
        assert_eq!(SemanticType::parse("Measure"), Some(SemanticType::Measure));
        assert_eq!(SemanticType::parse("metric"), Some(SemanticType::Measure));
        assert_eq!(SemanticType::parse("key"), Some(SemanticType::Identifier));
        assert_eq!(SemanticType::parse("widget"), None);
    }

    #[test]
    fn test_depth_parse() {
        assert_eq!(OntologyDepth::parse("domain"), Some(OntologyDepth::Domain));
        assert_eq!(OntologyDepth::parse("COLUMNS"), Some(OntologyDepth::Columns));
        assert_eq!(OntologyDepth::parse("everything"), None);
    }

    #[test]
    fn test_ontology_serialises_entity_keys() {
        let mut ontology = Ontology::default();
        ontology.entity_summaries.insert(
            "Customer".to_string(),
            EntitySummary {
                name: "Customer".to_string(),
                primary_table: "customers".to_string(),
                ..EntitySummary::default()
            },
        );
        let json = serde_json::to_value(&ontology).unwrap();
        assert!(json["entity_summaries"]["Customer"].is_object());
    }
}
