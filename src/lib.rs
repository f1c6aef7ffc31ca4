//! # Ontoloom
//!
//! A multi-tenant schema-understanding engine.
//!
//! Ontoloom connects to a customer's relational database, deterministically
//! discovers entities and relationships, drives an LLM through bounded
//! enrichment work, and persists a tiered semantic model (the "ontology")
//! under strict per-project isolation. The ontology is consumed by LLM
//! tool-callers through a curated set of parameterised SQL queries and a
//! business glossary.
//!
//! ## Architecture
//!
//! - Tenant-scoped metadata store (`SQLite`, row filtering per project)
//! - Read-only datasource adapter for schema introspection and analytics
//! - Resumable five-phase workflow DAG with ownership and heartbeats
//! - Generic worker pool bounding LLM concurrency
//! - A single shared circuit breaker guarding the LLM provider
//! - Tiered ontology reads and injection-checked query execution
//!
//! ## Example
//!
//! ```rust,ignore
//! use ontoloom::services::EngineContainer;
//!
//! let engine = EngineContainer::open(config)?;
//! let workflow_id = engine.workflows().start(project_id, datasource_id)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod config;
pub mod datasource;
pub mod discovery;
pub mod enrichment;
pub mod llm;
pub mod models;
pub mod observability;
pub mod ontology;
pub mod pool;
pub mod query;
pub mod security;
pub mod services;
pub mod storage;
pub mod tenant;
pub mod workflow;

// Re-exports for convenience
pub use config::OntoloomConfig;
pub use datasource::{Datasource, JoinMetrics};
pub use llm::LlmProvider;
pub use models::{
    Cardinality, DatasourceId, DetectionMethod, OntologyDepth, ProjectId, WorkflowId,
    WorkflowPhase, WorkflowState,
};
pub use services::EngineContainer;

/// Error type for engine operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait
/// implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `NotFound` | No such project, datasource, entity, candidate, term, or query |
/// | `InvalidInput` | Bad UUID, malformed template, undefined parameter, unbalanced SQL |
/// | `Conflict` | Workflow already exists, ownership lost, candidate already decided |
/// | `Prerequisite` | Predecessor phase incomplete, pending required candidates, SQL fails EXPLAIN |
/// | `TenantSetupFailed` | The tenant session could not be established |
/// | `CircuitOpen` | LLM call suppressed because the circuit breaker is open |
/// | `External` | Datasource adapter or LLM provider failure |
/// | `InjectionSuspected` | A string parameter matched the injection classifier |
/// | `OperationFailed` | Internal failures: storage errors, captured panics |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - An id string is not a UUID
    /// - A query template is malformed or references undefined parameters
    /// - Supplied parameter values cannot be coerced to their declared types
    /// - Glossary SQL is not a single balanced SELECT
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation conflicts with existing state.
    ///
    /// Raised when:
    /// - A non-terminal workflow already exists for the project
    /// - A workflow claim is lost to another owner
    /// - A candidate decision is repeated
    #[error("conflict: {0}")]
    Conflict(String),

    /// A prerequisite for the operation is not met.
    ///
    /// Raised when:
    /// - A phase is requested before its predecessor completed
    /// - `save_relationships` runs with pending required candidates
    /// - Glossary SQL fails EXPLAIN validation
    #[error("prerequisite not met: {0}")]
    Prerequisite(String),

    /// The tenant session could not be established; no operation may
    /// proceed on the connection.
    #[error("tenant setup failed: {0}")]
    TenantSetupFailed(String),

    /// The LLM circuit breaker is open; the call was suppressed without
    /// reaching the provider.
    #[error("llm circuit open")]
    CircuitOpen,

    /// An external collaborator failed.
    #[error("external dependency '{dependency}' failed: {cause}")]
    External {
        /// Which collaborator failed ("datasource", "llm").
        dependency: String,
        /// The underlying cause.
        cause: String,
    },

    /// A string parameter value matched the injection classifier.
    #[error("injection suspected in parameter '{parameter}'")]
    InjectionSuspected {
        /// The offending parameter name.
        parameter: String,
        /// Classifier fingerprint of the matched token sequence.
        fingerprint: String,
    },

    /// An internal operation failed.
    ///
    /// Raised when:
    /// - Metadata store statements fail
    /// - A workflow runner panics (the panic message is captured here)
    /// - Worker-pool plumbing breaks
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Shorthand for an [`Error::OperationFailed`].
    #[must_use]
    pub fn operation(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Shorthand for an [`Error::External`] from the datasource adapter.
    #[must_use]
    pub fn datasource(cause: impl std::fmt::Display) -> Self {
        Self::External {
            dependency: "datasource".to_string(),
            cause: cause.to_string(),
        }
    }

    /// Shorthand for an [`Error::External`] from the LLM provider.
    #[must_use]
    pub fn llm(cause: impl std::fmt::Display) -> Self {
        Self::External {
            dependency: "llm".to_string(),
            cause: cause.to_string(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::OperationFailed {
            operation: "sqlite".to_string(),
            cause: e.to_string(),
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("project 42".to_string());
        assert_eq!(err.to_string(), "not found: project 42");

        let err = Error::CircuitOpen;
        assert_eq!(err.to_string(), "llm circuit open");

        let err = Error::InjectionSuspected {
            parameter: "email".to_string(),
            fingerprint: "s&1c".to_string(),
        };
        assert_eq!(err.to_string(), "injection suspected in parameter 'email'");

        let err = Error::operation("claim_workflow", "row locked");
        assert_eq!(
            err.to_string(),
            "operation 'claim_workflow' failed: row locked"
        );
    }

    #[test]
    fn test_external_shorthands() {
        assert!(matches!(
            Error::datasource("connection refused"),
            Error::External { dependency, .. } if dependency == "datasource"
        ));
        assert!(matches!(
            Error::llm("timeout"),
            Error::External { dependency, .. } if dependency == "llm"
        ));
    }
}
