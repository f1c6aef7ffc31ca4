//! Tenant context.
//!
//! Every metadata-store interaction is parameterised by a tenant context.
//! A project-scoped context pins all reads and writes to one project; the
//! system context exists only for background maintenance (workflow reclaim
//! sweeps) and must never touch per-project tables. The storage layer binds
//! the context's project id into every statement it issues, so a query can
//! never cross a project boundary.

use crate::models::ProjectId;
use crate::{Error, Result};
use std::fmt;

/// Scope of a tenant context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Pinned to one project.
    Project(ProjectId),
    /// Background maintenance only.
    System,
}

/// A tenant context carried through every persistent-store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    scope: Scope,
}

impl TenantContext {
    /// A context pinned to `project_id`.
    #[must_use]
    pub const fn for_project(project_id: ProjectId) -> Self {
        Self {
            scope: Scope::Project(project_id),
        }
    }

    /// The system context for background maintenance.
    #[must_use]
    pub const fn system() -> Self {
        Self {
            scope: Scope::System,
        }
    }

    /// The project this context is pinned to, if any.
    #[must_use]
    pub const fn project_id(&self) -> Option<ProjectId> {
        match self.scope {
            Scope::Project(id) => Some(id),
            Scope::System => None,
        }
    }

    /// Whether this is the system context.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self.scope, Scope::System)
    }

    /// Returns the pinned project id, or fails for the system context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TenantSetupFailed`] when called on the system
    /// context: per-project tables are off-limits to it.
    pub fn require_project(&self) -> Result<ProjectId> {
        self.project_id().ok_or_else(|| {
            Error::TenantSetupFailed("system context may not touch per-project tables".to_string())
        })
    }
}

impl fmt::Display for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Scope::Project(id) => write!(f, "project:{id}"),
            Scope::System => write!(f, "system"),
        }
    }
}
