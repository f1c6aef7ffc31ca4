//! Ontology finalisation.
//!
//! Assembles the tiered ontology after the entity and relationship phases
//! complete: tier 0 (domain summary with deterministically detected
//! conventions), tier 1 (entity summaries with neighbour lists
//! materialised from the relationship graph), and whatever tier 2 content
//! column enrichment has already written. Finalisation is idempotent and
//! non-blocking: its failure is logged and surfaced on the node, never
//! failing the workflow.

use crate::llm::LlmRuntime;
use crate::models::{
    Conventions, DatasourceId, EntitySummary, OccurrenceSummary, Ontology, SchemaColumn,
};
use crate::storage::TenantSession;
use crate::Result;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const DOMAIN_SYSTEM_PROMPT: &str = "You summarise database schemas for business users. Given \
the entities of a database, write a two-to-three sentence description of what business this \
system runs. Respond with the description text only, no JSON.";

/// Audit columns recognised by convention detection.
const AUDIT_COLUMNS: &[&str] = &["created_at", "updated_at", "deleted_at"];

/// Detects schema conventions deterministically.
#[must_use]
pub fn detect_conventions(columns: &[SchemaColumn]) -> Conventions {
    let mut audit: BTreeSet<&str> = BTreeSet::new();
    let mut soft_delete = false;
    let mut saw_amount_integer = false;
    let mut saw_amount_decimal = false;

    for column in columns {
        let lower = column.name.to_lowercase();
        if let Some(name) = AUDIT_COLUMNS.iter().find(|a| **a == lower) {
            audit.insert(name);
        }
        if lower == "deleted_at" && column.is_nullable {
            soft_delete = true;
        }
        if lower.ends_with("_amount") || lower == "amount" || lower.ends_with("_total") {
            if let Some(stats) = &column.stats {
                for value in &stats.sample_values {
                    if value.contains('.') {
                        saw_amount_decimal = true;
                    } else if value.parse::<i64>().map_or(false, |v| v > 100) {
                        saw_amount_integer = true;
                    }
                }
            }
        }
    }

    let currency_scale = if saw_amount_decimal {
        Some("dollars".to_string())
    } else if saw_amount_integer {
        Some("cents".to_string())
    } else {
        None
    };

    Conventions {
        soft_delete,
        currency_scale,
        audit_columns: audit.into_iter().map(String::from).collect(),
    }
}

/// Assembles and persists the tiered ontology.
pub struct OntologyFinalizeService {
    llm: Option<Arc<LlmRuntime>>,
}

impl OntologyFinalizeService {
    /// Creates a finaliser with LLM-generated business descriptions.
    #[must_use]
    pub const fn new(llm: Arc<LlmRuntime>) -> Self {
        Self { llm: Some(llm) }
    }

    /// Creates a finaliser without the LLM; the description stays empty.
    #[must_use]
    pub const fn without_llm() -> Self {
        Self { llm: None }
    }

    /// Builds tiers 0 and 1 from stored entities and relationships,
    /// preserving any tier-2 content already written, and persists the
    /// result. Running it twice on the same inputs produces the same
    /// ontology.
    ///
    /// # Errors
    ///
    /// Returns a storage error. LLM failure only leaves the description
    /// empty.
    pub fn finalize(&self, session: &TenantSession, datasource_id: DatasourceId) -> Result<()> {
        let entities = session.list_entities(datasource_id)?;
        let relationships = session.list_entity_relationships()?;
        let columns = session.list_schema_columns(datasource_id)?;

        // Materialise neighbour names from the edge list; the graph may
        // have cycles, which a name list renders harmlessly.
        let name_by_id: BTreeMap<_, _> = entities.iter().map(|e| (e.id, e.name.clone())).collect();
        let mut neighbours: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for rel in &relationships {
            if let (Some(source), Some(target)) = (
                name_by_id.get(&rel.source_entity_id),
                name_by_id.get(&rel.target_entity_id),
            ) {
                neighbours
                    .entry(source.clone())
                    .or_default()
                    .insert(target.clone());
                neighbours
                    .entry(target.clone())
                    .or_default()
                    .insert(source.clone());
            }
        }

        let mut entity_summaries = BTreeMap::new();
        let mut domains: BTreeSet<String> = BTreeSet::new();
        for entity in &entities {
            if let Some(domain) = &entity.domain {
                if !domain.is_empty() {
                    domains.insert(domain.clone());
                }
            }
            entity_summaries.insert(
                entity.name.clone(),
                EntitySummary {
                    name: entity.name.clone(),
                    description: entity.description.clone(),
                    domain: entity.domain.clone(),
                    primary_table: entity.primary_table.clone(),
                    occurrences: entity
                        .occurrences
                        .iter()
                        .map(|o| OccurrenceSummary {
                            table: o.table.clone(),
                            column: o.column.clone(),
                            role: o.role.clone(),
                        })
                        .collect(),
                    related_entities: neighbours
                        .get(&entity.name)
                        .map(|set| set.iter().cloned().collect())
                        .unwrap_or_default(),
                },
            );
        }

        let description = self.describe_domain(&entities);
        let conventions = detect_conventions(&columns);

        // Preserve tier 2 written by column enrichment.
        let prior = session.load_ontology()?.unwrap_or_default();
        let ontology = Ontology {
            project_id: Some(session.project_id()),
            domain_summary: crate::models::DomainSummary {
                description,
                primary_domains: domains.into_iter().collect(),
                conventions,
            },
            entity_summaries,
            column_details: prior.column_details,
            finalized_at: Some(Utc::now()),
        };
        session.save_ontology(&ontology)?;
        tracing::info!(
            entities = ontology.entity_summaries.len(),
            "ontology finalised"
        );
        Ok(())
    }

    fn describe_domain(&self, entities: &[crate::models::OntologyEntity]) -> String {
        let Some(llm) = &self.llm else {
            return String::new();
        };
        if entities.is_empty() {
            return String::new();
        }
        let listing: Vec<String> = entities
            .iter()
            .map(|e| {
                e.domain.as_ref().map_or_else(
                    || e.name.clone(),
                    |domain| format!("{} ({domain})", e.name),
                )
            })
            .collect();
        let user = format!("Entities: {}", listing.join(", "));
        match llm.complete_guarded(DOMAIN_SYSTEM_PROMPT, &user) {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "domain description failed, leaving empty");
                String::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnId, ColumnStats, Joinability, ProjectId, TableId};

    fn column(name: &str, nullable: bool, samples: &[&str]) -> SchemaColumn {
        SchemaColumn {
            id: ColumnId::generate(),
            project_id: ProjectId::generate(),
            table_id: TableId::generate(),
            table_name: "orders".to_string(),
            name: name.to_string(),
            data_type: "text".to_string(),
            is_nullable: nullable,
            is_primary_key: false,
            is_unique: false,
            fk_target: None,
            stats: Some(ColumnStats {
                row_count: 10,
                non_null_count: 10,
                distinct_count: 10,
                sample_values: samples.iter().map(ToString::to_string).collect(),
                is_joinable: Joinability::Unknown,
                joinability_reason: None,
                joinability_score: 1.0,
                stats_updated_at: Utc::now(),
            }),
        }
    }

    #[test]
    fn test_soft_delete_requires_nullable_deleted_at() {
        let conventions = detect_conventions(&[column("deleted_at", true, &[])]);
        assert!(conventions.soft_delete);
        let conventions = detect_conventions(&[column("deleted_at", false, &[])]);
        assert!(!conventions.soft_delete);
    }

    #[test]
    fn test_audit_columns_alphabetised() {
        let conventions = detect_conventions(&[
            column("updated_at", true, &[]),
            column("created_at", false, &[]),
        ]);
        assert_eq!(conventions.audit_columns, vec!["created_at", "updated_at"]);
    }

    #[test]
    fn test_currency_scale_cents_from_large_integers() {
        let conventions = detect_conventions(&[column("total_amount", false, &["1200", "500"])]);
        assert_eq!(conventions.currency_scale.as_deref(), Some("cents"));
    }

    #[test]
    fn test_currency_scale_dollars_from_decimals() {
        let conventions = detect_conventions(&[column("total_amount", false, &["12.99", "5.00"])]);
        assert_eq!(conventions.currency_scale.as_deref(), Some("dollars"));
    }

    #[test]
    fn test_no_currency_scale_without_amount_columns() {
        let conventions = detect_conventions(&[column("note", true, &["hello"])]);
        assert!(conventions.currency_scale.is_none());
    }
}
