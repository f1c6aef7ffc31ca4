//! Projects and datasource connection descriptors.

use super::ids::{DatasourceId, ProjectId};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// The tenancy root. Every persistent row belongs to exactly one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier.
    pub id: ProjectId,
    /// Display name.
    pub name: String,
    /// Whether LLM clients may suggest approved queries.
    pub allow_suggestions: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Kind of customer database a datasource connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasourceKind {
    /// An on-disk `SQLite` database file.
    Sqlite,
}

impl DatasourceKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
        }
    }

    /// Parses a kind from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// A connection descriptor for a customer database.
///
/// Credentials never appear in `Debug` output or serialised forms; the
/// configuration collaborator supplies them at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceDescriptor {
    /// Datasource identifier.
    pub id: DatasourceId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Display name.
    pub name: String,
    /// Database kind.
    pub kind: DatasourceKind,
    /// Connection location (file path for `SQLite`).
    pub location: String,
    /// Credentials, held encrypted at rest.
    #[serde(skip)]
    pub credentials: Option<SecretString>,
    /// Tables the user selected for extraction; empty means all.
    pub selected_tables: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl DatasourceDescriptor {
    /// Whether `table` is in scope for extraction.
    #[must_use]
    pub fn is_table_selected(&self, table: &str) -> bool {
        self.selected_tables.is_empty() || self.selected_tables.iter().any(|t| t == table)
    }
}
