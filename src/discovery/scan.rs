//! Column scanning and joinability classification.
//!
//! For every selected column the scan computes row, null, and distinct
//! counts plus a value sample, then classifies whether the column is worth
//! considering as a join endpoint. The score only ranks candidates for the
//! value-matching stage; gating decisions never read it.

use crate::datasource::{ColumnAnalysis, Datasource};
use crate::models::{ColumnStats, DatasourceId, Joinability, SchemaColumn};
use crate::storage::TenantSession;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;

/// Data types excluded from joinability outright.
const EXCLUDED_TYPE_FRAGMENTS: &[&str] = &[
    "bool", "json", "xml", "blob", "binary", "geometry", "geography", "date", "time",
    "interval", "float", "double", "real",
];

/// Maximum measured null percentage for a joinable column.
const MAX_NULL_PERCENT: f64 = 80.0;

/// Minimum distinct values for a non-key joinable column.
const MIN_DISTINCT: i64 = 3;

/// Classifies a column's joinability from its declared type, key flags,
/// and measured statistics. Declared nullability is advisory only; the
/// measured null rate decides.
#[must_use]
pub fn classify_joinability(
    data_type: &str,
    is_primary_key: bool,
    analysis: &ColumnAnalysis,
) -> (Joinability, Option<String>) {
    let lower = data_type.to_lowercase();
    if EXCLUDED_TYPE_FRAGMENTS.iter().any(|t| lower.contains(t)) {
        return (
            Joinability::NotJoinable,
            Some(format!("excluded data type '{data_type}'")),
        );
    }

    let null_percent = null_percent(analysis);
    if null_percent > MAX_NULL_PERCENT {
        return (
            Joinability::NotJoinable,
            Some(format!("{null_percent:.0}% null")),
        );
    }

    if analysis.distinct_count < MIN_DISTINCT && !is_primary_key {
        return (
            Joinability::NotJoinable,
            Some(format!(
                "only {} distinct values",
                analysis.distinct_count
            )),
        );
    }

    (Joinability::Joinable, None)
}

/// Ranking score for the value-matching stage.
#[must_use]
pub fn joinability_score(column_name: &str, analysis: &ColumnAnalysis) -> f64 {
    let mut score = 1.0;
    let null_percent = null_percent(analysis);
    if null_percent > 50.0 {
        score *= 0.5;
    } else if null_percent > 20.0 {
        score *= 0.8;
    }
    if column_name.ends_with("_id") {
        score *= 1.2;
    }
    if cardinality_ratio(analysis) > 0.1 {
        score *= 1.1;
    }
    score
}

#[allow(clippy::cast_precision_loss)]
fn null_percent(analysis: &ColumnAnalysis) -> f64 {
    if analysis.row_count == 0 {
        return 0.0;
    }
    (analysis.row_count - analysis.non_null_count) as f64 / analysis.row_count as f64 * 100.0
}

#[allow(clippy::cast_precision_loss)]
fn cardinality_ratio(analysis: &ColumnAnalysis) -> f64 {
    if analysis.row_count == 0 {
        return 0.0;
    }
    analysis.distinct_count as f64 / analysis.row_count as f64
}

/// Scans columns of the customer database and persists their statistics.
pub struct ColumnScanService {
    datasource: Arc<dyn Datasource>,
}

impl ColumnScanService {
    /// Creates a scanner over a datasource adapter.
    #[must_use]
    pub fn new(datasource: Arc<dyn Datasource>) -> Self {
        Self { datasource }
    }

    /// Scans every column of `table` and writes statistics. Idempotent:
    /// re-running replaces the statistics and refreshes their timestamp.
    ///
    /// Returns the number of columns scanned.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::External`] on adapter failure or a storage
    /// error on write.
    pub fn scan_table(
        &self,
        session: &TenantSession,
        datasource_id: DatasourceId,
        table: &str,
    ) -> Result<usize> {
        let columns: Vec<SchemaColumn> = session
            .list_schema_columns(datasource_id)?
            .into_iter()
            .filter(|c| c.table_name == table)
            .collect();
        if columns.is_empty() {
            return Ok(0);
        }

        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let analyses = self.datasource.analyse_column_stats(table, &names)?;

        let mut scanned = 0;
        for (name, analysis) in analyses {
            let Some(column) = columns.iter().find(|c| c.name == name) else {
                continue;
            };
            let (joinability, reason) =
                classify_joinability(&column.data_type, column.is_primary_key, &analysis);
            let stats = ColumnStats {
                row_count: analysis.row_count,
                non_null_count: analysis.non_null_count,
                distinct_count: analysis.distinct_count,
                sample_values: analysis.sample_values.clone(),
                is_joinable: joinability,
                joinability_reason: reason,
                joinability_score: joinability_score(&column.name, &analysis),
                stats_updated_at: Utc::now(),
            };
            session.update_column_stats(column.id, &stats)?;
            scanned += 1;
        }
        tracing::debug!(table, scanned, "column scan complete");
        Ok(scanned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(rows: i64, non_null: i64, distinct: i64) -> ColumnAnalysis {
        ColumnAnalysis {
            row_count: rows,
            non_null_count: non_null,
            distinct_count: distinct,
            sample_values: Vec::new(),
        }
    }

    #[test]
    fn test_excluded_types_not_joinable() {
        for t in ["boolean", "json", "jsonb", "blob", "timestamp", "double precision"] {
            let (j, reason) = classify_joinability(t, false, &analysis(100, 100, 50));
            assert_eq!(j, Joinability::NotJoinable, "type {t}");
            assert!(reason.unwrap().contains("excluded"));
        }
    }

    #[test]
    fn test_nullability_is_measured_not_declared() {
        // 90% measured nulls exceeds the gate even for a text column.
        let (j, _) = classify_joinability("text", false, &analysis(100, 10, 9));
        assert_eq!(j, Joinability::NotJoinable);
        // 50% nulls is fine.
        let (j, _) = classify_joinability("text", false, &analysis(100, 50, 40));
        assert_eq!(j, Joinability::Joinable);
    }

    #[test]
    fn test_low_distinct_needs_primary_key() {
        let (j, _) = classify_joinability("integer", false, &analysis(100, 100, 2));
        assert_eq!(j, Joinability::NotJoinable);
        let (j, _) = classify_joinability("integer", true, &analysis(2, 2, 2));
        assert_eq!(j, Joinability::Joinable);
    }

    #[test]
    fn test_score_weights() {
        // Baseline.
        let base = joinability_score("email", &analysis(100, 100, 5));
        assert!((base - 1.1).abs() < 1e-9 || (base - 1.0).abs() < 1e-9);

        // _id suffix boosts.
        let id = joinability_score("user_id", &analysis(100, 100, 5));
        assert!(id > joinability_score("user", &analysis(100, 100, 5)));

        // Heavy nulls halve.
        let sparse = joinability_score("user_id", &analysis(100, 40, 5));
        let dense = joinability_score("user_id", &analysis(100, 100, 5));
        assert!(sparse < dense);

        // Moderate nulls dampen less than heavy nulls.
        let moderate = joinability_score("user_id", &analysis(100, 70, 5));
        assert!(moderate > sparse && moderate < dense);
    }

    #[test]
    fn test_high_cardinality_bonus() {
        let high = joinability_score("code", &analysis(100, 100, 60));
        let low = joinability_score("code", &analysis(100, 100, 5));
        assert!(high > low);
    }
}
