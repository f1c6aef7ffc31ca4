//! Customer-database adapter.
//!
//! Wraps a read-only connection to the customer's database and exposes the
//! operations the pipeline needs: schema introspection, column statistics,
//! distinct-value capture for enum detection, analytic joins, and bounded
//! parameterised execution. Implementations must never write.

mod sqlite;

pub use sqlite::SqliteDatasource;

use crate::models::{Cardinality, ForeignKeyTarget};
use crate::Result;
use serde::{Deserialize, Serialize};

/// A column as read from the customer database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectedColumn {
    /// Column name.
    pub name: String,
    /// Declared data type, lower-cased.
    pub data_type: String,
    /// Declared nullability.
    pub is_nullable: bool,
    /// Primary-key membership.
    pub is_primary_key: bool,
    /// Unique constraint (single-column).
    pub is_unique: bool,
    /// Declared foreign-key target, when present.
    pub fk_target: Option<ForeignKeyTarget>,
}

/// A table as read from the customer database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectedTable {
    /// Table name.
    pub name: String,
    /// Approximate row count.
    pub row_count: i64,
    /// Columns in declaration order.
    pub columns: Vec<IntrospectedColumn>,
}

/// Raw statistics for one column, before joinability classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnAnalysis {
    /// Total rows in the table.
    pub row_count: i64,
    /// Rows with a non-null value.
    pub non_null_count: i64,
    /// Distinct non-null values.
    pub distinct_count: i64,
    /// Up to 50 sampled distinct values, rendered as text.
    pub sample_values: Vec<String>,
}

/// Metrics from an analytic join between two columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMetrics {
    /// Rows in the source table.
    pub source_row_count: i64,
    /// Rows in the target table.
    pub target_row_count: i64,
    /// Source rows with at least one target match.
    pub matched_rows: i64,
    /// Source rows with a non-null value and no target match.
    pub orphan_rows: i64,
    /// `matched_rows / source_row_count`.
    pub match_rate: f64,
    /// `orphan_rows / source_row_count`.
    pub orphan_rate: f64,
    /// Fraction of target rows referenced by at least one source row.
    pub target_coverage: f64,
    /// Join cardinality derived from per-side duplication.
    pub cardinality: Cardinality,
    /// Maximum source value, for numeric columns.
    pub max_source_value: Option<i64>,
}

/// A value bound into a positional placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit integer (also carries booleans as 0/1).
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// Text. Arrays bind as JSON-encoded text.
    Text(String),
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value};
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Self::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Self::Text(v) => ToSqlOutput::Owned(Value::Text(v.clone())),
        })
    }
}

/// A bounded result set from parameterised execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// Row values, rendered as JSON scalars.
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Read-only adapter over a customer database.
///
/// Cancellation is observed between adapter calls: every operation is
/// bounded (row limits, sample caps), so a caller that checks its token
/// between calls returns within one suspension point.
pub trait Datasource: Send + Sync {
    /// A short name for logs ("sqlite").
    fn kind(&self) -> &'static str;

    /// Reads tables, columns, and constraint metadata.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::External`] on adapter failure.
    fn introspect_schema(&self) -> Result<Vec<IntrospectedTable>>;

    /// Computes row, null, and distinct counts plus up to 50 sample values
    /// for each named column of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::External`] on adapter failure.
    fn analyse_column_stats(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<(String, ColumnAnalysis)>>;

    /// Reads up to `cap` distinct values of a column, rendered as text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::External`] on adapter failure.
    fn distinct_values(&self, table: &str, column: &str, cap: usize) -> Result<Vec<String>>;

    /// Runs an analytic join between two columns and derives metrics.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::External`] on adapter failure.
    fn analyse_join(
        &self,
        source_table: &str,
        source_column: &str,
        target_table: &str,
        target_column: &str,
    ) -> Result<JoinMetrics>;

    /// Executes prepared SQL with positional values, returning at most
    /// `row_limit` rows.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::External`] on adapter failure.
    fn execute_with_params(
        &self,
        sql: &str,
        values: &[SqlValue],
        row_limit: usize,
    ) -> Result<ResultSet>;

    /// Validates SQL by asking the engine to plan it without execution.
    /// Returns the statement's output column names.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Prerequisite`] when the SQL does not plan.
    fn explain(&self, sql: &str) -> Result<Vec<String>>;
}

/// Quotes an identifier for interpolation into introspection SQL.
///
/// Identifiers come from the database's own catalogue, not from users, but
/// quoting keeps names with spaces or keywords working.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }
}
