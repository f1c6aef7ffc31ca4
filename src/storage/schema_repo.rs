//! Introspected-schema persistence: tables, columns, statistics, declared
//! relationships.

use super::{from_json, parse_ts, to_json, to_ts, TenantSession};
use crate::models::{
    Cardinality, ColumnId, ColumnStats, DatasourceId, DetectionMethod, ForeignKeyTarget,
    Joinability, SchemaColumn, SchemaRelationship, SchemaTable, TableId,
};
use crate::{Error, Result};
use rusqlite::params;

impl TenantSession {
    /// Replaces the introspected schema for a datasource. Runs on explicit
    /// schema refresh; prior rows are dropped first.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails; the transaction rolls back.
    pub fn replace_schema(
        &self,
        datasource_id: DatasourceId,
        tables: &[SchemaTable],
        columns: &[SchemaColumn],
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::operation("replace_schema", e.to_string()))?;
        tx.execute(
            "DELETE FROM schema_tables WHERE datasource_id = ?1 AND project_id = ?2",
            params![datasource_id.to_string(), self.pid()],
        )?;
        for table in tables {
            tx.execute(
                "INSERT INTO schema_tables
                     (id, project_id, datasource_id, name, is_selected, row_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    table.id.to_string(),
                    self.pid(),
                    datasource_id.to_string(),
                    table.name,
                    table.is_selected,
                    table.row_count,
                ],
            )?;
        }
        for column in columns {
            tx.execute(
                "INSERT INTO schema_columns
                     (id, project_id, table_id, table_name, name, data_type,
                      is_nullable, is_primary_key, is_unique, fk_table, fk_column)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    column.id.to_string(),
                    self.pid(),
                    column.table_id.to_string(),
                    column.table_name,
                    column.name,
                    column.data_type,
                    column.is_nullable,
                    column.is_primary_key,
                    column.is_unique,
                    column.fk_target.as_ref().map(|fk| fk.table.clone()),
                    column.fk_target.as_ref().map(|fk| fk.column.clone()),
                ],
            )?;
        }
        tx.commit()
            .map_err(|e| Error::operation("replace_schema", e.to_string()))
    }

    /// Lists the tables introspected for a datasource.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn list_schema_tables(&self, datasource_id: DatasourceId) -> Result<Vec<SchemaTable>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, is_selected, row_count
             FROM schema_tables
             WHERE datasource_id = ?1 AND project_id = ?2
             ORDER BY name",
        )?;
        let project = self.project_id();
        let rows = stmt.query_map(params![datasource_id.to_string(), self.pid()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;
        let mut tables = Vec::new();
        for row in rows {
            let (id, name, is_selected, row_count) = row?;
            tables.push(SchemaTable {
                id: id.parse()?,
                project_id: project,
                datasource_id,
                name,
                is_selected,
                row_count,
            });
        }
        Ok(tables)
    }

    /// Lists every column for a datasource, statistics included.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn list_schema_columns(&self, datasource_id: DatasourceId) -> Result<Vec<SchemaColumn>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.table_id, c.table_name, c.name, c.data_type, c.is_nullable,
                    c.is_primary_key, c.is_unique, c.fk_table, c.fk_column,
                    c.row_count, c.non_null_count, c.distinct_count, c.sample_values,
                    c.is_joinable, c.joinability_reason, c.joinability_score, c.stats_updated_at
             FROM schema_columns c
             JOIN schema_tables t ON t.id = c.table_id
             WHERE t.datasource_id = ?1 AND c.project_id = ?2
             ORDER BY c.table_name, c.name",
        )?;
        let rows = stmt.query_map(params![datasource_id.to_string(), self.pid()], |row| {
            Ok(RawColumn {
                id: row.get(0)?,
                table_id: row.get(1)?,
                table_name: row.get(2)?,
                name: row.get(3)?,
                data_type: row.get(4)?,
                is_nullable: row.get(5)?,
                is_primary_key: row.get(6)?,
                is_unique: row.get(7)?,
                fk_table: row.get(8)?,
                fk_column: row.get(9)?,
                row_count: row.get(10)?,
                non_null_count: row.get(11)?,
                distinct_count: row.get(12)?,
                sample_values: row.get(13)?,
                is_joinable: row.get(14)?,
                joinability_reason: row.get(15)?,
                joinability_score: row.get(16)?,
                stats_updated_at: row.get(17)?,
            })
        })?;
        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?.into_column(self.project_id())?);
        }
        Ok(columns)
    }

    /// Writes the statistics computed by a column scan.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the column does not exist.
    pub fn update_column_stats(&self, column_id: ColumnId, stats: &ColumnStats) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE schema_columns SET
                 row_count = ?1, non_null_count = ?2, distinct_count = ?3,
                 sample_values = ?4, is_joinable = ?5, joinability_reason = ?6,
                 joinability_score = ?7, stats_updated_at = ?8
             WHERE id = ?9 AND project_id = ?10",
            params![
                stats.row_count,
                stats.non_null_count,
                stats.distinct_count,
                to_json(&stats.sample_values)?,
                stats.is_joinable.as_str(),
                stats.joinability_reason,
                stats.joinability_score,
                to_ts(stats.stats_updated_at),
                column_id.to_string(),
                self.pid(),
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("column {column_id}")));
        }
        Ok(())
    }

    /// Replaces the stored schema relationships for a datasource.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails; the transaction rolls back.
    pub fn replace_schema_relationships(
        &self,
        datasource_id: DatasourceId,
        relationships: &[SchemaRelationship],
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::operation("replace_schema_relationships", e.to_string()))?;
        tx.execute(
            "DELETE FROM schema_relationships WHERE datasource_id = ?1 AND project_id = ?2",
            params![datasource_id.to_string(), self.pid()],
        )?;
        for rel in relationships {
            tx.execute(
                "INSERT OR REPLACE INTO schema_relationships
                     (project_id, datasource_id, source_table, source_column,
                      target_table, target_column, cardinality, detection_method)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    self.pid(),
                    datasource_id.to_string(),
                    rel.source_table,
                    rel.source_column,
                    rel.target_table,
                    rel.target_column,
                    rel.cardinality.as_str(),
                    rel.detection_method.as_str(),
                ],
            )?;
        }
        tx.commit()
            .map_err(|e| Error::operation("replace_schema_relationships", e.to_string()))
    }

    /// Lists stored schema relationships for a datasource.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn list_schema_relationships(
        &self,
        datasource_id: DatasourceId,
    ) -> Result<Vec<SchemaRelationship>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT source_table, source_column, target_table, target_column,
                    cardinality, detection_method
             FROM schema_relationships
             WHERE datasource_id = ?1 AND project_id = ?2
             ORDER BY source_table, source_column",
        )?;
        let rows = stmt.query_map(params![datasource_id.to_string(), self.pid()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (source_table, source_column, target_table, target_column, cardinality, method) =
                row?;
            out.push(SchemaRelationship {
                project_id: self.project_id(),
                datasource_id,
                source_table,
                source_column,
                target_table,
                target_column,
                cardinality: Cardinality::parse(&cardinality).unwrap_or(Cardinality::Unknown),
                detection_method: DetectionMethod::parse(&method)
                    .unwrap_or(DetectionMethod::Manual),
            });
        }
        Ok(out)
    }
}

struct RawColumn {
    id: String,
    table_id: String,
    table_name: String,
    name: String,
    data_type: String,
    is_nullable: bool,
    is_primary_key: bool,
    is_unique: bool,
    fk_table: Option<String>,
    fk_column: Option<String>,
    row_count: Option<i64>,
    non_null_count: Option<i64>,
    distinct_count: Option<i64>,
    sample_values: Option<String>,
    is_joinable: String,
    joinability_reason: Option<String>,
    joinability_score: f64,
    stats_updated_at: Option<String>,
}

impl RawColumn {
    fn into_column(self, project_id: crate::models::ProjectId) -> Result<SchemaColumn> {
        let stats = match self.stats_updated_at {
            Some(updated) => Some(ColumnStats {
                row_count: self.row_count.unwrap_or(0),
                non_null_count: self.non_null_count.unwrap_or(0),
                distinct_count: self.distinct_count.unwrap_or(0),
                sample_values: self
                    .sample_values
                    .as_deref()
                    .map(from_json)
                    .transpose()?
                    .unwrap_or_default(),
                is_joinable: Joinability::parse(&self.is_joinable).unwrap_or(Joinability::Unknown),
                joinability_reason: self.joinability_reason,
                joinability_score: self.joinability_score,
                stats_updated_at: parse_ts(&updated)?,
            }),
            None => None,
        };
        let fk_target = match (self.fk_table, self.fk_column) {
            (Some(table), Some(column)) => Some(ForeignKeyTarget { table, column }),
            _ => None,
        };
        Ok(SchemaColumn {
            id: self.id.parse::<ColumnId>()?,
            project_id,
            table_id: self.table_id.parse::<TableId>()?,
            table_name: self.table_name,
            name: self.name,
            data_type: self.data_type,
            is_nullable: self.is_nullable,
            is_primary_key: self.is_primary_key,
            is_unique: self.is_unique,
            fk_target,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::store_with_project;
    use super::*;
    use crate::models::ProjectId;
    use crate::tenant::TenantContext;
    use chrono::Utc;

    fn sample_schema(
        project_id: ProjectId,
        datasource_id: DatasourceId,
    ) -> (Vec<SchemaTable>, Vec<SchemaColumn>) {
        let users = SchemaTable {
            id: TableId::generate(),
            project_id,
            datasource_id,
            name: "users".to_string(),
            is_selected: true,
            row_count: Some(100),
        };
        let col = SchemaColumn {
            id: ColumnId::generate(),
            project_id,
            table_id: users.id,
            table_name: "users".to_string(),
            name: "id".to_string(),
            data_type: "uuid".to_string(),
            is_nullable: false,
            is_primary_key: true,
            is_unique: true,
            fk_target: None,
            stats: None,
        };
        (vec![users], vec![col])
    }

    #[test]
    fn test_replace_and_list_schema() {
        let (store, project_id, ds_id) = store_with_project();
        let ctx = TenantContext::for_project(project_id);
        let session = store.tenant(&ctx).unwrap();
        let (tables, columns) = sample_schema(project_id, ds_id);
        session.replace_schema(ds_id, &tables, &columns).unwrap();

        let listed = session.list_schema_tables(ds_id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "users");

        let cols = session.list_schema_columns(ds_id).unwrap();
        assert_eq!(cols.len(), 1);
        assert!(cols[0].is_primary_key);
        assert!(cols[0].stats.is_none());
    }

    #[test]
    fn test_update_column_stats_round_trip() {
        let (store, project_id, ds_id) = store_with_project();
        let ctx = TenantContext::for_project(project_id);
        let session = store.tenant(&ctx).unwrap();
        let (tables, columns) = sample_schema(project_id, ds_id);
        session.replace_schema(ds_id, &tables, &columns).unwrap();

        let stats = ColumnStats {
            row_count: 100,
            non_null_count: 100,
            distinct_count: 100,
            sample_values: vec!["a".to_string(), "b".to_string()],
            is_joinable: Joinability::Joinable,
            joinability_reason: None,
            joinability_score: 1.2,
            stats_updated_at: Utc::now(),
        };
        session.update_column_stats(columns[0].id, &stats).unwrap();

        let cols = session.list_schema_columns(ds_id).unwrap();
        let loaded = cols[0].stats.as_ref().unwrap();
        assert_eq!(loaded.distinct_count, 100);
        assert_eq!(loaded.is_joinable, Joinability::Joinable);
        assert_eq!(loaded.sample_values.len(), 2);
    }

    #[test]
    fn test_rescan_replaces_rows() {
        let (store, project_id, ds_id) = store_with_project();
        let ctx = TenantContext::for_project(project_id);
        let session = store.tenant(&ctx).unwrap();
        let (tables, columns) = sample_schema(project_id, ds_id);
        session.replace_schema(ds_id, &tables, &columns).unwrap();
        session.replace_schema(ds_id, &tables, &columns).unwrap();
        assert_eq!(session.list_schema_tables(ds_id).unwrap().len(), 1);
    }
}
