//! Entity and entity-relationship persistence.
//!
//! Entities are written atomically with their occurrences, aliases, and key
//! columns. Dependents cascade on delete, and an entity whose last
//! occurrence is removed is deleted outright.

use super::{from_json, parse_ts, to_json, to_ts, TenantSession};
use crate::models::{
    AliasSource, Cardinality, DatasourceId, DetectionMethod, EntityAlias, EntityId,
    EntityKeyColumn, EntityOccurrence, EntityRelationship, OntologyEntity, RelationshipId,
    ReviewStatus,
};
use crate::{Error, Result};
use rusqlite::params;

impl TenantSession {
    /// Deletes all entities for a datasource, cascading to occurrences,
    /// aliases, key columns, and relationships. A fresh discovery run calls
    /// this before repopulating.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn truncate_entities(&self, datasource_id: DatasourceId) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM entities WHERE datasource_id = ?1 AND project_id = ?2",
            params![datasource_id.to_string(), self.pid()],
        )?;
        Ok(())
    }

    /// Inserts an entity with its dependents in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an entity with no occurrences
    /// (every entity must occur at least once), or a write error.
    pub fn insert_entity(&self, entity: &OntologyEntity) -> Result<()> {
        if entity.occurrences.is_empty() {
            return Err(Error::InvalidInput(format!(
                "entity '{}' has no occurrences",
                entity.name
            )));
        }
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::operation("insert_entity", e.to_string()))?;
        tx.execute(
            "INSERT INTO entities
                 (id, project_id, datasource_id, name, primary_table, primary_column,
                  domain, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entity.id.to_string(),
                self.pid(),
                entity.datasource_id.to_string(),
                entity.name,
                entity.primary_table,
                entity.primary_column,
                entity.domain,
                entity.description,
                to_ts(entity.created_at),
            ],
        )?;
        for occ in &entity.occurrences {
            tx.execute(
                "INSERT OR REPLACE INTO entity_occurrences
                     (entity_id, project_id, table_name, column_name, role)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entity.id.to_string(),
                    self.pid(),
                    occ.table,
                    occ.column,
                    occ.role,
                ],
            )?;
        }
        for alias in &entity.aliases {
            tx.execute(
                "INSERT OR REPLACE INTO entity_aliases (entity_id, project_id, alias, source)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entity.id.to_string(),
                    self.pid(),
                    alias.alias,
                    alias.source.as_str(),
                ],
            )?;
        }
        for key in &entity.key_columns {
            tx.execute(
                "INSERT OR REPLACE INTO entity_key_columns
                     (entity_id, project_id, column_name, synonyms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entity.id.to_string(),
                    self.pid(),
                    key.column,
                    to_json(&key.synonyms)?,
                ],
            )?;
        }
        tx.commit()
            .map_err(|e| Error::operation("insert_entity", e.to_string()))
    }

    /// Loads all entities for a datasource, dependents included.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn list_entities(&self, datasource_id: DatasourceId) -> Result<Vec<OntologyEntity>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, primary_table, primary_column, domain, description, created_at
             FROM entities
             WHERE datasource_id = ?1 AND project_id = ?2
             ORDER BY name",
        )?;
        let rows = stmt.query_map(params![datasource_id.to_string(), self.pid()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;
        let mut entities = Vec::new();
        for row in rows {
            let (id, name, primary_table, primary_column, domain, description, created_at) = row?;
            let entity_id: EntityId = id.parse()?;
            entities.push(OntologyEntity {
                id: entity_id,
                project_id: self.project_id(),
                datasource_id,
                name,
                primary_table,
                primary_column,
                domain,
                description,
                occurrences: Vec::new(),
                aliases: Vec::new(),
                key_columns: Vec::new(),
                created_at: parse_ts(&created_at)?,
            });
        }
        drop(stmt);

        for entity in &mut entities {
            let eid = entity.id.to_string();
            let mut stmt = conn.prepare(
                "SELECT table_name, column_name, role FROM entity_occurrences
                 WHERE entity_id = ?1 AND project_id = ?2
                 ORDER BY table_name, column_name",
            )?;
            let occ_rows = stmt.query_map(params![eid, self.pid()], |row| {
                Ok(EntityOccurrence {
                    table: row.get(0)?,
                    column: row.get(1)?,
                    role: row.get(2)?,
                })
            })?;
            for occ in occ_rows {
                entity.occurrences.push(occ?);
            }

            let mut stmt = conn.prepare(
                "SELECT alias, source FROM entity_aliases
                 WHERE entity_id = ?1 AND project_id = ?2 ORDER BY alias",
            )?;
            let alias_rows = stmt.query_map(params![eid, self.pid()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for alias in alias_rows {
                let (alias, source) = alias?;
                entity.aliases.push(EntityAlias {
                    alias,
                    source: AliasSource::parse(&source).unwrap_or(AliasSource::Discovery),
                });
            }

            let mut stmt = conn.prepare(
                "SELECT column_name, synonyms FROM entity_key_columns
                 WHERE entity_id = ?1 AND project_id = ?2 ORDER BY column_name",
            )?;
            let key_rows = stmt.query_map(params![eid, self.pid()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for key in key_rows {
                let (column, synonyms) = key?;
                entity.key_columns.push(EntityKeyColumn {
                    column,
                    synonyms: from_json(&synonyms)?,
                });
            }
        }
        Ok(entities)
    }

    /// Removes one occurrence. When it was the entity's last, the entity is
    /// deleted too.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the occurrence does not exist.
    pub fn remove_entity_occurrence(
        &self,
        entity_id: EntityId,
        table: &str,
        column: &str,
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::operation("remove_occurrence", e.to_string()))?;
        let removed = tx.execute(
            "DELETE FROM entity_occurrences
             WHERE entity_id = ?1 AND project_id = ?2 AND table_name = ?3 AND column_name = ?4",
            params![entity_id.to_string(), self.pid(), table, column],
        )?;
        if removed == 0 {
            return Err(Error::NotFound(format!(
                "occurrence {table}.{column} of entity {entity_id}"
            )));
        }
        let remaining: i64 = tx.query_row(
            "SELECT count(*) FROM entity_occurrences WHERE entity_id = ?1 AND project_id = ?2",
            params![entity_id.to_string(), self.pid()],
            |row| row.get(0),
        )?;
        if remaining == 0 {
            tx.execute(
                "DELETE FROM entities WHERE id = ?1 AND project_id = ?2",
                params![entity_id.to_string(), self.pid()],
            )?;
        }
        tx.commit()
            .map_err(|e| Error::operation("remove_occurrence", e.to_string()))
    }

    /// Inserts an accepted entity relationship.
    ///
    /// # Errors
    ///
    /// Returns an error if either endpoint entity is missing (foreign keys
    /// reject the row) or the write fails.
    pub fn insert_entity_relationship(&self, rel: &EntityRelationship) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO entity_relationships
                 (id, project_id, source_entity_id, target_entity_id, source_column,
                  target_column, detection_method, confidence, status, cardinality)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                rel.id.to_string(),
                self.pid(),
                rel.source_entity_id.to_string(),
                rel.target_entity_id.to_string(),
                rel.source_column,
                rel.target_column,
                rel.detection_method.as_str(),
                rel.confidence,
                rel.status.as_str(),
                rel.cardinality.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Lists entity relationships for the project.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn list_entity_relationships(&self) -> Result<Vec<EntityRelationship>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, source_entity_id, target_entity_id, source_column, target_column,
                    detection_method, confidence, status, cardinality
             FROM entity_relationships
             WHERE project_id = ?1
             ORDER BY source_column",
        )?;
        let rows = stmt.query_map(params![self.pid()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, source, target, source_column, target_column, method, confidence, status, cardinality) =
                row?;
            out.push(EntityRelationship {
                id: id.parse::<RelationshipId>()?,
                project_id: self.project_id(),
                source_entity_id: source.parse()?,
                target_entity_id: target.parse()?,
                source_column,
                target_column,
                detection_method: DetectionMethod::parse(&method)
                    .unwrap_or(DetectionMethod::Manual),
                confidence,
                status: ReviewStatus::parse(&status).unwrap_or(ReviewStatus::Accepted),
                cardinality: Cardinality::parse(&cardinality).unwrap_or(Cardinality::Unknown),
            });
        }
        Ok(out)
    }
}
