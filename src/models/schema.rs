//! Introspected schema structures and derived column statistics.
//!
//! These records mirror what the datasource adapter reads from the customer
//! database: tables, columns with their constraint metadata, declared or
//! inferred table-to-table links, and the per-column statistics the
//! discovery services compute (row counts, distinct counts, joinability).

use super::ids::{ColumnId, DatasourceId, ProjectId, TableId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ternary joinability classification for a column.
///
/// Columns start `Unknown` until the scan phase has computed statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joinability {
    /// Not yet analysed.
    Unknown,
    /// Passed the joinability gates.
    Joinable,
    /// Failed a joinability gate; `joinability_reason` says which.
    NotJoinable,
}

impl Joinability {
    /// Returns the classification as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Joinable => "joinable",
            Self::NotJoinable => "not_joinable",
        }
    }

    /// Parses a classification from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(Self::Unknown),
            "joinable" => Some(Self::Joinable),
            "not_joinable" => Some(Self::NotJoinable),
            _ => None,
        }
    }
}

impl fmt::Display for Joinability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Relationship cardinality between two columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    /// Each source row matches at most one target row and vice versa.
    OneToOne,
    /// One source row matches many target rows.
    OneToMany,
    /// Many source rows match one target row.
    ManyToOne,
    /// Many-to-many.
    ManyToMany,
    /// Not yet determined.
    Unknown,
}

impl Cardinality {
    /// Returns the cardinality in `1:1` / `1:N` / `N:1` / `N:M` notation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneToOne => "1:1",
            Self::OneToMany => "1:N",
            Self::ManyToOne => "N:1",
            Self::ManyToMany => "N:M",
            Self::Unknown => "unknown",
        }
    }

    /// Parses a cardinality from its notation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1:1" => Some(Self::OneToOne),
            "1:N" => Some(Self::OneToMany),
            "N:1" => Some(Self::ManyToOne),
            "N:M" => Some(Self::ManyToMany),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Derives cardinality from the maximum per-row match counts on each
    /// side of a join: (<=1, <=1) is 1:1, (<=1, >1) is 1:N, (>1, <=1) is
    /// N:1, anything else N:M.
    #[must_use]
    pub const fn from_match_counts(max_source_matches: i64, max_target_matches: i64) -> Self {
        match (max_source_matches <= 1, max_target_matches <= 1) {
            (true, true) => Self::OneToOne,
            (true, false) => Self::OneToMany,
            (false, true) => Self::ManyToOne,
            (false, false) => Self::ManyToMany,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a relationship was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Declared foreign-key constraint.
    ForeignKey,
    /// Statistical overlap of sampled values.
    ValueMatch,
    /// Column-name to table-name inference.
    NameInference,
    /// Created by a user.
    Manual,
}

impl DetectionMethod {
    /// Returns the detection method as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ForeignKey => "foreign_key",
            Self::ValueMatch => "value_match",
            Self::NameInference => "name_inference",
            Self::Manual => "manual",
        }
    }

    /// Parses a detection method from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "foreign_key" => Some(Self::ForeignKey),
            "value_match" => Some(Self::ValueMatch),
            "name_inference" => Some(Self::NameInference),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An introspected table in the customer database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaTable {
    /// Table identifier.
    pub id: TableId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning datasource.
    pub datasource_id: DatasourceId,
    /// Table name as it appears in the customer database.
    pub name: String,
    /// Whether the user selected this table for ontology extraction.
    pub is_selected: bool,
    /// Approximate row count from the last scan.
    pub row_count: Option<i64>,
}

/// An introspected column with constraint metadata and derived statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaColumn {
    /// Column identifier.
    pub id: ColumnId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning table.
    pub table_id: TableId,
    /// Table name, denormalised for log and prompt context.
    pub table_name: String,
    /// Column name.
    pub name: String,
    /// Declared data type, lower-cased.
    pub data_type: String,
    /// Declared nullability. Advisory only; the scan measures actual nulls.
    pub is_nullable: bool,
    /// Declared primary-key membership.
    pub is_primary_key: bool,
    /// Declared unique constraint.
    pub is_unique: bool,
    /// Declared foreign-key target as `table.column`, when present.
    pub fk_target: Option<ForeignKeyTarget>,
    /// Derived statistics from the last scan, when present.
    pub stats: Option<ColumnStats>,
}

impl SchemaColumn {
    /// Returns the qualified `table.column` name.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table_name, self.name)
    }
}

/// A declared foreign-key target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyTarget {
    /// Referenced table name.
    pub table: String,
    /// Referenced column name.
    pub column: String,
}

/// Derived per-column statistics.
///
/// Written once per scan; a re-scan replaces the row and refreshes
/// `stats_updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStats {
    /// Total rows in the table at scan time.
    pub row_count: i64,
    /// Rows with a non-null value in this column.
    pub non_null_count: i64,
    /// Distinct non-null values.
    pub distinct_count: i64,
    /// Up to 50 sampled distinct values, rendered as text.
    pub sample_values: Vec<String>,
    /// Joinability classification.
    pub is_joinable: Joinability,
    /// Why the column was classified as it was.
    pub joinability_reason: Option<String>,
    /// Ranking score; gates never read it.
    pub joinability_score: f64,
    /// When the statistics were computed.
    pub stats_updated_at: DateTime<Utc>,
}

impl ColumnStats {
    /// Percentage of rows with a null in this column, in `[0, 100]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn null_percent(&self) -> f64 {
        if self.row_count == 0 {
            return 0.0;
        }
        let nulls = (self.row_count - self.non_null_count) as f64;
        nulls / self.row_count as f64 * 100.0
    }

    /// Ratio of distinct values to total rows, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cardinality_ratio(&self) -> f64 {
        if self.row_count == 0 {
            return 0.0;
        }
        self.distinct_count as f64 / self.row_count as f64
    }
}

/// A declared or inferred table-to-table link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRelationship {
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning datasource.
    pub datasource_id: DatasourceId,
    /// Source `table.column`.
    pub source_table: String,
    /// Source column name.
    pub source_column: String,
    /// Target table name.
    pub target_table: String,
    /// Target column name.
    pub target_column: String,
    /// Cardinality of the link.
    pub cardinality: Cardinality,
    /// How the link was detected.
    pub detection_method: DetectionMethod,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality_from_match_counts() {
        assert_eq!(Cardinality::from_match_counts(1, 1), Cardinality::OneToOne);
        assert_eq!(Cardinality::from_match_counts(1, 4), Cardinality::OneToMany);
        assert_eq!(Cardinality::from_match_counts(9, 1), Cardinality::ManyToOne);
        assert_eq!(Cardinality::from_match_counts(3, 3), Cardinality::ManyToMany);
    }

    #[test]
    fn test_cardinality_notation_round_trip() {
        for c in [
            Cardinality::OneToOne,
            Cardinality::OneToMany,
            Cardinality::ManyToOne,
            Cardinality::ManyToMany,
            Cardinality::Unknown,
        ] {
            assert_eq!(Cardinality::parse(c.as_str()), Some(c));
        }
    }

    #[test]
    fn test_null_percent() {
        let stats = ColumnStats {
            row_count: 200,
            non_null_count: 150,
            distinct_count: 10,
            sample_values: Vec::new(),
            is_joinable: Joinability::Unknown,
            joinability_reason: None,
            joinability_score: 1.0,
            stats_updated_at: Utc::now(),
        };
        assert!((stats.null_percent() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_null_percent_empty_table() {
        let stats = ColumnStats {
            row_count: 0,
            non_null_count: 0,
            distinct_count: 0,
            sample_values: Vec::new(),
            is_joinable: Joinability::Unknown,
            joinability_reason: None,
            joinability_score: 1.0,
            stats_updated_at: Utc::now(),
        };
        assert!(stats.null_percent().abs() < f64::EPSILON);
        assert!(stats.cardinality_ratio().abs() < f64::EPSILON);
    }

    #[test]
    fn test_detection_method_round_trip() {
        for m in [
            DetectionMethod::ForeignKey,
            DetectionMethod::ValueMatch,
            DetectionMethod::NameInference,
            DetectionMethod::Manual,
        ] {
            assert_eq!(DetectionMethod::parse(m.as_str()), Some(m));
        }
    }

    #[test]
    fn test_qualified_name() {
        let col = SchemaColumn {
            id: ColumnId::generate(),
            project_id: ProjectId::generate(),
            table_id: TableId::generate(),
            table_name: "orders".to_string(),
            name: "user_id".to_string(),
            data_type: "uuid".to_string(),
            is_nullable: false,
            is_primary_key: false,
            is_unique: false,
            fk_target: None,
            stats: None,
        };
        assert_eq!(col.qualified_name(), "orders.user_id");
    }
}
