//! Entity discovery.
//!
//! Emits one entity per selected table that has a primary-key or unique
//! column, singularising the table name into the entity name and recording
//! every occurrence of the entity's identifier across the schema (name
//! match, declared foreign key, or sample-value overlap). The LLM pass is
//! optional enrichment: its failure leaves fields empty, never blocks the
//! entity.

use super::singular::{entity_name_from_table, singularise};
use crate::llm::{extract_json, LlmRuntime};
use crate::models::{
    AliasSource, DatasourceId, EntityAlias, EntityId, EntityKeyColumn, EntityOccurrence,
    OntologyEntity, SchemaColumn,
};
use crate::pool::CancelToken;
use crate::storage::TenantSession;
use crate::{Error, Result};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Minimum sample overlap for a statistical occurrence.
const OCCURRENCE_OVERLAP_THRESHOLD: f64 = 0.5;

/// LLM response shape for entity enrichment.
#[derive(Debug, Deserialize)]
struct EntityEnrichment {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    key_columns: Vec<EnrichedKeyColumn>,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EnrichedKeyColumn {
    column: String,
    #[serde(default)]
    synonyms: Vec<String>,
}

const ENRICHMENT_SYSTEM_PROMPT: &str = "You are a data analyst describing database entities \
for a business glossary. Respond with JSON only: {\"description\": string, \"domain\": string, \
\"key_columns\": [{\"column\": string, \"synonyms\": [string]}], \"aliases\": [string]}. \
Give a one-sentence description, a short business domain (e.g. \"sales\"), two or three key \
business columns with user-facing synonyms, and alternative names for the entity.";

/// Discovers entities for a datasource.
pub struct EntityDiscoveryService {
    llm: Option<Arc<LlmRuntime>>,
}

impl EntityDiscoveryService {
    /// Creates a discovery service with LLM enrichment.
    #[must_use]
    pub const fn new(llm: Arc<LlmRuntime>) -> Self {
        Self { llm: Some(llm) }
    }

    /// Creates a discovery service without enrichment.
    #[must_use]
    pub const fn without_llm() -> Self {
        Self { llm: None }
    }

    /// Runs entity discovery over every selected table. A fresh run
    /// truncates existing entities first, so re-execution is idempotent.
    ///
    /// Returns the number of entities created. `on_progress` receives
    /// `(done, total, table)` per table.
    ///
    /// # Errors
    ///
    /// Returns a storage error; individual tables without keys are skipped
    /// with a warning, not an error.
    pub fn discover(
        &self,
        session: &TenantSession,
        datasource_id: DatasourceId,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(usize, usize, &str),
    ) -> Result<usize> {
        let tables = session.list_schema_tables(datasource_id)?;
        let columns = session.list_schema_columns(datasource_id)?;
        let selected: Vec<_> = tables.iter().filter(|t| t.is_selected).collect();

        session.truncate_entities(datasource_id)?;

        let mut created = 0;
        let total = selected.len();
        for (index, table) in selected.iter().enumerate() {
            cancel.check()?;
            match self.discover_table(session, datasource_id, &table.name, &columns)? {
                Some(_) => created += 1,
                None => {
                    tracing::warn!(
                        table = %table.name,
                        "table has no primary key or unique column, skipping entity"
                    );
                },
            }
            on_progress(index + 1, total, &table.name);
        }
        Ok(created)
    }

    /// Discovers the entity backed by one table, if it has an identifying
    /// column.
    ///
    /// # Errors
    ///
    /// Returns a storage error on persistence failure.
    pub fn discover_table(
        &self,
        session: &TenantSession,
        datasource_id: DatasourceId,
        table: &str,
        all_columns: &[SchemaColumn],
    ) -> Result<Option<EntityId>> {
        let table_columns: Vec<&SchemaColumn> = all_columns
            .iter()
            .filter(|c| c.table_name == table)
            .collect();
        let primary = table_columns
            .iter()
            .find(|c| c.is_primary_key)
            .or_else(|| table_columns.iter().find(|c| c.is_unique));
        let Some(primary) = primary else {
            return Ok(None);
        };

        let name = entity_name_from_table(table);
        let occurrences = find_occurrences(table, primary, all_columns);

        let mut entity = OntologyEntity {
            id: EntityId::generate(),
            project_id: session.project_id(),
            datasource_id,
            name,
            primary_table: table.to_string(),
            primary_column: primary.name.clone(),
            domain: None,
            description: None,
            occurrences,
            aliases: Vec::new(),
            key_columns: Vec::new(),
            created_at: Utc::now(),
        };

        if let Some(llm) = &self.llm {
            match enrich_entity(llm, &entity, &table_columns) {
                Ok(enrichment) => apply_enrichment(&mut entity, enrichment),
                Err(err) => {
                    tracing::warn!(
                        entity = %entity.name,
                        error = %err,
                        "entity enrichment failed, creating entity without it"
                    );
                },
            }
        }

        session.insert_entity(&entity)?;
        Ok(Some(entity.id))
    }
}

/// Finds every column that plays the entity's role: the primary column
/// itself, name matches, declared FKs, and statistical value overlap.
fn find_occurrences(
    table: &str,
    primary: &SchemaColumn,
    all_columns: &[SchemaColumn],
) -> Vec<EntityOccurrence> {
    let singular = singularise(table);
    let name_pattern = format!("{singular}_id");
    let primary_samples: HashSet<&str> = primary
        .stats
        .as_ref()
        .map(|s| s.sample_values.iter().map(String::as_str).collect())
        .unwrap_or_default();

    let mut occurrences = vec![EntityOccurrence {
        table: table.to_string(),
        column: primary.name.clone(),
        role: None,
    }];

    for column in all_columns {
        if column.table_name == table {
            continue;
        }
        let by_fk = column
            .fk_target
            .as_ref()
            .is_some_and(|fk| fk.table == table && fk.column == primary.name);
        let by_name = column.name == name_pattern;
        // Another table's own key overlapping by value is coincidence
        // (integer sequences), not an occurrence.
        let by_overlap = !by_fk
            && !by_name
            && !column.is_primary_key
            && sample_overlap(column, &primary_samples);
        if by_fk || by_name || by_overlap {
            occurrences.push(EntityOccurrence {
                table: column.table_name.clone(),
                column: column.name.clone(),
                role: None,
            });
        }
    }
    occurrences
}

#[allow(clippy::cast_precision_loss)]
fn sample_overlap(column: &SchemaColumn, primary_samples: &HashSet<&str>) -> bool {
    if primary_samples.is_empty() {
        return false;
    }
    let Some(stats) = &column.stats else {
        return false;
    };
    if stats.sample_values.is_empty() {
        return false;
    }
    let hits = stats
        .sample_values
        .iter()
        .filter(|v| primary_samples.contains(v.as_str()))
        .count();
    hits as f64 / stats.sample_values.len() as f64 >= OCCURRENCE_OVERLAP_THRESHOLD
}

fn enrich_entity(
    llm: &LlmRuntime,
    entity: &OntologyEntity,
    table_columns: &[&SchemaColumn],
) -> Result<EntityEnrichment> {
    use std::fmt::Write;

    let mut user = format!(
        "Entity '{}' backed by table '{}' (identifier column '{}').\nColumns:\n",
        entity.name, entity.primary_table, entity.primary_column
    );
    for column in table_columns {
        let _ = write!(user, "- {} {}", column.name, column.data_type);
        if let Some(stats) = &column.stats {
            let preview: Vec<&str> = stats
                .sample_values
                .iter()
                .take(5)
                .map(String::as_str)
                .collect();
            if !preview.is_empty() {
                let _ = write!(user, " (e.g. {})", preview.join(", "));
            }
        }
        let _ = writeln!(user);
    }

    let response = llm.complete_guarded(ENRICHMENT_SYSTEM_PROMPT, &user)?;
    serde_json::from_str(&extract_json(&response))
        .map_err(|e| Error::llm(format!("invalid enrichment response: {e}")))
}

fn apply_enrichment(entity: &mut OntologyEntity, enrichment: EntityEnrichment) {
    entity.description = enrichment.description;
    entity.domain = enrichment.domain;
    entity.key_columns = enrichment
        .key_columns
        .into_iter()
        .map(|k| EntityKeyColumn {
            column: k.column,
            synonyms: k.synonyms,
        })
        .collect();
    entity.aliases = enrichment
        .aliases
        .into_iter()
        .map(|alias| EntityAlias {
            alias,
            source: AliasSource::Discovery,
        })
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnId, ColumnStats, ForeignKeyTarget, Joinability, ProjectId, TableId};

    fn column(
        table: &str,
        name: &str,
        is_pk: bool,
        fk: Option<ForeignKeyTarget>,
        samples: &[&str],
    ) -> SchemaColumn {
        SchemaColumn {
            id: ColumnId::generate(),
            project_id: ProjectId::generate(),
            table_id: TableId::generate(),
            table_name: table.to_string(),
            name: name.to_string(),
            data_type: "integer".to_string(),
            is_nullable: false,
            is_primary_key: is_pk,
            is_unique: is_pk,
            fk_target: fk,
            stats: Some(ColumnStats {
                row_count: 100,
                non_null_count: 100,
                distinct_count: 50,
                sample_values: samples.iter().map(ToString::to_string).collect(),
                is_joinable: Joinability::Joinable,
                joinability_reason: None,
                joinability_score: 1.0,
                stats_updated_at: Utc::now(),
            }),
        }
    }

    #[test]
    fn test_occurrence_by_declared_fk() {
        let pk = column("users", "id", true, None, &["1", "2"]);
        let all = vec![
            pk.clone(),
            column(
                "orders",
                "buyer",
                false,
                Some(ForeignKeyTarget {
                    table: "users".to_string(),
                    column: "id".to_string(),
                }),
                &[],
            ),
        ];
        let occ = find_occurrences("users", &pk, &all);
        assert_eq!(occ.len(), 2);
        assert_eq!(occ[1].table, "orders");
        assert_eq!(occ[1].column, "buyer");
    }

    #[test]
    fn test_occurrence_by_name_match() {
        let pk = column("users", "id", true, None, &[]);
        let all = vec![pk.clone(), column("sessions", "user_id", false, None, &[])];
        let occ = find_occurrences("users", &pk, &all);
        assert_eq!(occ.len(), 2);
    }

    #[test]
    fn test_occurrence_by_sample_overlap() {
        let pk = column("users", "id", true, None, &["1", "2", "3", "4"]);
        let all = vec![
            pk.clone(),
            column("events", "actor", false, None, &["1", "2", "3"]),
            column("events", "kind", false, None, &["click", "view"]),
        ];
        let occ = find_occurrences("users", &pk, &all);
        assert_eq!(occ.len(), 2);
        assert_eq!(occ[1].column, "actor");
    }

    #[test]
    fn test_same_table_columns_are_not_occurrences() {
        let pk = column("users", "id", true, None, &["1", "2"]);
        let all = vec![pk.clone(), column("users", "ref_id", false, None, &["1", "2"])];
        let occ = find_occurrences("users", &pk, &all);
        assert_eq!(occ.len(), 1);
    }

    #[test]
    fn test_apply_enrichment() {
        let mut entity = OntologyEntity {
            id: EntityId::generate(),
            project_id: ProjectId::generate(),
            datasource_id: DatasourceId::generate(),
            name: "User".to_string(),
            primary_table: "users".to_string(),
            primary_column: "id".to_string(),
            domain: None,
            description: None,
            occurrences: Vec::new(),
            aliases: Vec::new(),
            key_columns: Vec::new(),
            created_at: Utc::now(),
        };
        apply_enrichment(
            &mut entity,
            EntityEnrichment {
                description: Some("A registered account.".to_string()),
                domain: Some("identity".to_string()),
                key_columns: vec![EnrichedKeyColumn {
                    column: "email".to_string(),
                    synonyms: vec!["e-mail".to_string()],
                }],
                aliases: vec!["Account".to_string()],
            },
        );
        assert_eq!(entity.domain.as_deref(), Some("identity"));
        assert_eq!(entity.key_columns[0].synonyms, vec!["e-mail"]);
        assert_eq!(entity.aliases[0].source, AliasSource::Discovery);
    }
}
