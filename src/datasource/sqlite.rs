//! `SQLite` datasource adapter.
//!
//! Opens the customer database read-only (`SQLITE_OPEN_READ_ONLY` plus
//! `PRAGMA query_only`) and implements introspection through the pragma
//! catalogue: `table_info`, `index_list`, `index_info`, and
//! `foreign_key_list`.

use super::{
    quote_ident, ColumnAnalysis, Datasource, IntrospectedColumn, IntrospectedTable, JoinMetrics,
    ResultSet, SqlValue,
};
use crate::models::{Cardinality, ForeignKeyTarget};
use crate::storage::acquire_lock;
use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Mutex;

/// Maximum sample values captured per column.
const SAMPLE_CAP: usize = 50;

/// Read-only adapter over a `SQLite` file.
pub struct SqliteDatasource {
    conn: Mutex<Connection>,
}

impl SqliteDatasource {
    /// Opens the database at `path` read-only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::External`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::datasource(format!("{}: {e}", path.display())))?;
        let _ = conn.pragma_update(None, "query_only", "ON");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = acquire_lock(&self.conn);
        f(&conn).map_err(Error::datasource)
    }

    fn table_names(conn: &Connection) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect()
    }

    fn unique_single_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
        let mut unique = Vec::new();
        let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", quote_ident(table)))?;
        let indexes: Vec<(String, bool)> = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(1)?, row.get::<_, bool>(2)?))
            })?
            .collect::<rusqlite::Result<_>>()?;
        for (index_name, is_unique) in indexes {
            if !is_unique {
                continue;
            }
            let mut stmt =
                conn.prepare(&format!("PRAGMA index_info({})", quote_ident(&index_name)))?;
            let cols: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(2))?
                .collect::<rusqlite::Result<_>>()?;
            if let [only] = cols.as_slice() {
                unique.push(only.clone());
            }
        }
        Ok(unique)
    }

    fn foreign_keys(
        conn: &Connection,
        table: &str,
    ) -> rusqlite::Result<Vec<(String, ForeignKeyTarget)>> {
        let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(3)?,
                ForeignKeyTarget {
                    table: row.get(2)?,
                    // A null "to" column means the FK references the
                    // target's primary key; resolved by the caller.
                    column: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                },
            ))
        })?;
        rows.collect()
    }

}

impl Datasource for SqliteDatasource {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn introspect_schema(&self) -> Result<Vec<IntrospectedTable>> {
        self.with_conn(|conn| {
            let mut tables = Vec::new();
            for table in Self::table_names(conn)? {
                let row_count: i64 = conn.query_row(
                    &format!("SELECT count(*) FROM {}", quote_ident(&table)),
                    [],
                    |row| row.get(0),
                )?;
                let unique = Self::unique_single_columns(conn, &table)?;
                let fks = Self::foreign_keys(conn, &table)?;

                let mut stmt =
                    conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&table)))?;
                let columns: Vec<IntrospectedColumn> = stmt
                    .query_map([], |row| {
                        let name: String = row.get(1)?;
                        let data_type: String = row.get::<_, String>(2)?.to_lowercase();
                        let notnull: bool = row.get(3)?;
                        let pk: i64 = row.get(5)?;
                        let fk_target = fks
                            .iter()
                            .find(|(from, _)| *from == name)
                            .map(|(_, target)| target.clone());
                        Ok(IntrospectedColumn {
                            is_unique: unique.contains(&name) || pk == 1,
                            is_primary_key: pk > 0,
                            is_nullable: !notnull && pk == 0,
                            name,
                            data_type,
                            fk_target,
                        })
                    })?
                    .collect::<rusqlite::Result<_>>()?;
                tables.push(IntrospectedTable {
                    name: table,
                    row_count,
                    columns,
                });
            }

            // An FK declared without a target column references the target
            // table's primary key; resolve those now that all tables are
            // loaded.
            let pk_by_table: Vec<(String, String)> = tables
                .iter()
                .filter_map(|t| {
                    t.columns
                        .iter()
                        .find(|c| c.is_primary_key)
                        .map(|c| (t.name.clone(), c.name.clone()))
                })
                .collect();
            for table in &mut tables {
                for column in &mut table.columns {
                    if let Some(fk) = &mut column.fk_target {
                        if fk.column.is_empty() {
                            if let Some((_, pk)) =
                                pk_by_table.iter().find(|(name, _)| *name == fk.table)
                            {
                                fk.column.clone_from(pk);
                            }
                        }
                    }
                }
            }
            Ok(tables)
        })
    }

    fn analyse_column_stats(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<(String, ColumnAnalysis)>> {
        self.with_conn(|conn| {
            let qtable = quote_ident(table);
            let row_count: i64 =
                conn.query_row(&format!("SELECT count(*) FROM {qtable}"), [], |row| {
                    row.get(0)
                })?;
            let mut out = Vec::with_capacity(columns.len());
            for column in columns {
                let qcol = quote_ident(column);
                let (non_null_count, distinct_count): (i64, i64) = conn.query_row(
                    &format!("SELECT count({qcol}), count(DISTINCT {qcol}) FROM {qtable}"),
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                let mut stmt = conn.prepare(&format!(
                    "SELECT DISTINCT CAST({qcol} AS TEXT) FROM {qtable}
                     WHERE {qcol} IS NOT NULL LIMIT {SAMPLE_CAP}"
                ))?;
                let sample_values: Vec<String> = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<_>>()?;
                out.push((
                    column.clone(),
                    ColumnAnalysis {
                        row_count,
                        non_null_count,
                        distinct_count,
                        sample_values,
                    },
                ));
            }
            Ok(out)
        })
    }

    fn distinct_values(&self, table: &str, column: &str, cap: usize) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT CAST({col} AS TEXT) FROM {table}
                 WHERE {col} IS NOT NULL ORDER BY 1 LIMIT {cap}",
                col = quote_ident(column),
                table = quote_ident(table),
            ))?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn analyse_join(
        &self,
        source_table: &str,
        source_column: &str,
        target_table: &str,
        target_column: &str,
    ) -> Result<JoinMetrics> {
        self.with_conn(|conn| {
            let st = quote_ident(source_table);
            let sc = quote_ident(source_column);
            let tt = quote_ident(target_table);
            let tc = quote_ident(target_column);

            let source_row_count: i64 =
                conn.query_row(&format!("SELECT count(*) FROM {st}"), [], |row| row.get(0))?;
            let target_row_count: i64 =
                conn.query_row(&format!("SELECT count(*) FROM {tt}"), [], |row| row.get(0))?;
            let matched_rows: i64 = conn.query_row(
                &format!("SELECT count(*) FROM {st} WHERE {sc} IN (SELECT {tc} FROM {tt})"),
                [],
                |row| row.get(0),
            )?;
            let orphan_rows: i64 = conn.query_row(
                &format!(
                    "SELECT count(*) FROM {st}
                     WHERE {sc} IS NOT NULL AND {sc} NOT IN
                           (SELECT {tc} FROM {tt} WHERE {tc} IS NOT NULL)"
                ),
                [],
                |row| row.get(0),
            )?;
            let covered_targets: i64 = conn.query_row(
                &format!("SELECT count(*) FROM {tt} WHERE {tc} IN (SELECT {sc} FROM {st})"),
                [],
                |row| row.get(0),
            )?;
            // Per-side duplication of matched values determines cardinality.
            let max_source_dup: i64 = conn
                .query_row(
                    &format!(
                        "SELECT max(c) FROM (
                             SELECT count(*) AS c FROM {st}
                             WHERE {sc} IN (SELECT {tc} FROM {tt})
                             GROUP BY {sc})"
                    ),
                    [],
                    |row| row.get::<_, Option<i64>>(0),
                )?
                .unwrap_or(0);
            let max_target_dup: i64 = conn
                .query_row(
                    &format!(
                        "SELECT max(c) FROM (
                             SELECT count(*) AS c FROM {tt}
                             WHERE {tc} IN (SELECT {sc} FROM {st})
                             GROUP BY {tc})"
                    ),
                    [],
                    |row| row.get::<_, Option<i64>>(0),
                )?
                .unwrap_or(0);

            let source_type: String = conn
                .query_row(
                    &format!("SELECT typeof({sc}) FROM {st} WHERE {sc} IS NOT NULL LIMIT 1"),
                    [],
                    |row| row.get(0),
                )
                .unwrap_or_else(|_| "null".to_string());
            let max_source_value = if source_type == "integer" {
                conn.query_row(&format!("SELECT max({sc}) FROM {st}"), [], |row| {
                    row.get::<_, Option<i64>>(0)
                })?
            } else {
                None
            };

            let (match_rate, orphan_rate) = if source_row_count == 0 {
                (0.0, 0.0)
            } else {
                (
                    matched_rows as f64 / source_row_count as f64,
                    orphan_rows as f64 / source_row_count as f64,
                )
            };
            let target_coverage = if target_row_count == 0 {
                0.0
            } else {
                covered_targets as f64 / target_row_count as f64
            };
            let cardinality = if matched_rows == 0 {
                Cardinality::Unknown
            } else {
                Cardinality::from_match_counts(max_source_dup, max_target_dup)
            };

            Ok(JoinMetrics {
                source_row_count,
                target_row_count,
                matched_rows,
                orphan_rows,
                match_rate,
                orphan_rate,
                target_coverage,
                cardinality,
                max_source_value,
            })
        })
    }

    fn execute_with_params(
        &self,
        sql: &str,
        values: &[SqlValue],
        row_limit: usize,
    ) -> Result<ResultSet> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
            let params = rusqlite::params_from_iter(values.iter());
            let mut rows = stmt.query(params)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                if out.len() >= row_limit {
                    break;
                }
                let mut rendered = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    let value = row.get_ref(i)?;
                    rendered.push(value_ref_to_json(value));
                }
                out.push(rendered);
            }
            Ok(ResultSet {
                columns,
                rows: out,
            })
        })
    }

    fn explain(&self, sql: &str) -> Result<Vec<String>> {
        let conn = acquire_lock(&self.conn);
        let stmt = conn
            .prepare(&format!("EXPLAIN {sql}"))
            .map_err(|e| Error::Prerequisite(format!("sql does not plan: {e}")))?;
        drop(stmt);
        let stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Prerequisite(format!("sql does not prepare: {e}")))?;
        Ok(stmt.column_names().iter().map(ToString::to_string).collect())
    }
}

fn value_ref_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(v) => serde_json::Value::from(v),
        ValueRef::Real(v) => serde_json::Number::from_f64(v)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        ValueRef::Text(v) => serde_json::Value::from(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => serde_json::Value::from(format!("<blob {} bytes>", v.len())),
    }
}
