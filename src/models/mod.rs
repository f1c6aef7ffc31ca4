//! Core data model.
//!
//! This module contains the identifiers, tagged enumerations, and records
//! for every persistent entity in the engine.

mod entity;
mod glossary;
mod ids;
mod ontology;
mod project;
mod schema;
mod workflow;

pub use entity::{
    AliasSource, CandidateMetrics, EntityAlias, EntityKeyColumn, EntityOccurrence,
    EntityRelationship, OntologyEntity, RelationshipCandidate, ReviewStatus, TriageVerdict,
};
pub use glossary::{
    ApprovalStatus, ApprovedQuery, GlossarySource, GlossaryTerm, ParamType, ParameterDef,
};
pub use ids::{
    CandidateId, ColumnId, DatasourceId, EntityId, ProjectId, QueryId, RelationshipId, TableId,
    TermId, WorkflowId,
};
pub use ontology::{
    ColumnDetail, Conventions, DomainSummary, EntitySummary, EnumValue, OccurrenceSummary,
    Ontology, OntologyDepth, SemanticType,
};
pub use project::{DatasourceDescriptor, DatasourceKind, Project};
pub use schema::{
    Cardinality, ColumnStats, DetectionMethod, ForeignKeyTarget, Joinability, SchemaColumn,
    SchemaRelationship, SchemaTable,
};
pub use workflow::{
    Progress, QueuedTask, StateKind, TaskQueueSnapshot, WorkflowNode, WorkflowPhase,
    WorkflowRecord, WorkflowState, WorkflowStateEntry,
};
