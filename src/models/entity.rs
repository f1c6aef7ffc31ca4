//! Ontology entities, their occurrences, and relationships between them.
//!
//! An entity is a domain noun backed by a primary table and primary column.
//! Occurrences record every place the entity's identifier appears in the
//! physical schema; relationships connect entities through concrete column
//! pairs. Candidates are proposed relationships that automatic triage or the
//! user must resolve before they are promoted.

use super::ids::{CandidateId, DatasourceId, EntityId, ProjectId, RelationshipId};
use super::schema::{Cardinality, DetectionMethod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an entity alias came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasSource {
    /// Produced by the discovery pipeline.
    Discovery,
    /// Entered by a user.
    Manual,
    /// Suggested over the tool-call protocol.
    Chat,
}

impl AliasSource {
    /// Returns the source as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Manual => "manual",
            Self::Chat => "chat",
        }
    }

    /// Parses an alias source from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "discovery" => Some(Self::Discovery),
            "manual" => Some(Self::Manual),
            "chat" => Some(Self::Chat),
            _ => None,
        }
    }
}

/// Review status for relationships and candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    /// Awaiting a decision.
    Pending,
    /// Accepted automatically or by the user.
    Accepted,
    /// Rejected automatically or by the user.
    Rejected,
}

impl ReviewStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    /// Parses a status from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A domain noun backed by a primary table and primary column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyEntity {
    /// Entity identifier.
    pub id: EntityId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning datasource.
    pub datasource_id: DatasourceId,
    /// Entity name, singularised from the backing table.
    pub name: String,
    /// Backing table name.
    pub primary_table: String,
    /// Identifying column in the backing table.
    pub primary_column: String,
    /// Free-text business domain, filled by enrichment.
    pub domain: Option<String>,
    /// Business description, filled by enrichment.
    pub description: Option<String>,
    /// Places the entity appears across the schema.
    pub occurrences: Vec<EntityOccurrence>,
    /// Alternative names.
    pub aliases: Vec<EntityAlias>,
    /// Semantically important business columns.
    pub key_columns: Vec<EntityKeyColumn>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A column in some table that plays the entity's role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityOccurrence {
    /// Table the occurrence is in.
    pub table: String,
    /// Column carrying the entity's identifier.
    pub column: String,
    /// Optional role disambiguator, e.g. "payer".
    pub role: Option<String>,
}

/// An alternative name for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAlias {
    /// The alias text.
    pub alias: String,
    /// Where it came from.
    pub source: AliasSource,
}

/// A semantically important business column for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityKeyColumn {
    /// Column name.
    pub column: String,
    /// Alternative names users may call it.
    pub synonyms: Vec<String>,
}

/// An accepted relationship between two ontology entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelationship {
    /// Relationship identifier.
    pub id: RelationshipId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Source entity.
    pub source_entity_id: EntityId,
    /// Target entity.
    pub target_entity_id: EntityId,
    /// Source `table.column`.
    pub source_column: String,
    /// Target `table.column`.
    pub target_column: String,
    /// How the relationship was detected.
    pub detection_method: DetectionMethod,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,
    /// Review status.
    pub status: ReviewStatus,
    /// Join cardinality.
    pub cardinality: Cardinality,
}

/// Detection metrics attached to a candidate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateMetrics {
    /// Fraction of sampled source values found in the target sample.
    pub value_match_rate: Option<f64>,
    /// Name similarity between source column and target table.
    pub name_similarity: Option<f64>,
    /// Fraction of source rows that matched a target row in the test join.
    pub join_match_rate: Option<f64>,
    /// Fraction of source rows without a target match.
    pub orphan_rate: Option<f64>,
    /// Fraction of target rows referenced by at least one source row.
    pub target_coverage: Option<f64>,
}

/// LLM triage verdict over a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageVerdict {
    /// The model is confident the relationship is real.
    Confirm,
    /// The model is confident it is spurious.
    Reject,
    /// A human should look.
    NeedsReview,
}

impl TriageVerdict {
    /// Returns the verdict as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Reject => "reject",
            Self::NeedsReview => "needs_review",
        }
    }

    /// Parses a verdict from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirm" => Some(Self::Confirm),
            "reject" => Some(Self::Reject),
            "needs_review" => Some(Self::NeedsReview),
            _ => None,
        }
    }
}

/// A proposed relationship awaiting automatic or user acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipCandidate {
    /// Candidate identifier.
    pub id: CandidateId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning datasource.
    pub datasource_id: DatasourceId,
    /// Workflow that produced the candidate.
    pub workflow_id: super::ids::WorkflowId,
    /// Source `table.column`.
    pub source_table: String,
    /// Source column name.
    pub source_column: String,
    /// Target table name.
    pub target_table: String,
    /// Target column name.
    pub target_column: String,
    /// How the candidate was detected.
    pub detection_method: DetectionMethod,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Join cardinality, when a test join ran.
    pub cardinality: Cardinality,
    /// Detection metrics.
    pub metrics: CandidateMetrics,
    /// Triage reasoning from the LLM, when triage ran.
    pub reasoning: Option<String>,
    /// Review status.
    pub status: ReviewStatus,
    /// True when user action is needed before save.
    pub is_required: bool,
    /// The user's decision, once made.
    pub user_decision: Option<ReviewStatus>,
}

impl RelationshipCandidate {
    /// Whether this candidate blocks `save_relationships`.
    #[must_use]
    pub const fn blocks_save(&self) -> bool {
        self.is_required && matches!(self.status, ReviewStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ids::WorkflowId;

    fn candidate(status: ReviewStatus, is_required: bool) -> RelationshipCandidate {
        RelationshipCandidate {
            id: CandidateId::generate(),
            project_id: ProjectId::generate(),
            datasource_id: DatasourceId::generate(),
            workflow_id: WorkflowId::generate(),
            source_table: "orders".to_string(),
            source_column: "user_id".to_string(),
            target_table: "users".to_string(),
            target_column: "id".to_string(),
            detection_method: DetectionMethod::ValueMatch,
            confidence: 0.6,
            cardinality: Cardinality::ManyToOne,
            metrics: CandidateMetrics::default(),
            reasoning: None,
            status,
            is_required,
            user_decision: None,
        }
    }

    #[test]
    fn test_blocks_save_only_when_required_and_pending() {
        assert!(candidate(ReviewStatus::Pending, true).blocks_save());
        assert!(!candidate(ReviewStatus::Pending, false).blocks_save());
        assert!(!candidate(ReviewStatus::Accepted, true).blocks_save());
        assert!(!candidate(ReviewStatus::Rejected, true).blocks_save());
    }

    #[test]
    fn test_review_status_round_trip() {
        for s in [
            ReviewStatus::Pending,
            ReviewStatus::Accepted,
            ReviewStatus::Rejected,
        ] {
            assert_eq!(ReviewStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_triage_verdict_parse() {
        assert_eq!(TriageVerdict::parse("confirm"), Some(TriageVerdict::Confirm));
        assert_eq!(
            TriageVerdict::parse("needs_review"),
            Some(TriageVerdict::NeedsReview)
        );
        assert_eq!(TriageVerdict::parse("maybe"), None);
    }
}
