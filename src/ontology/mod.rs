//! Tiered ontology reads.
//!
//! Four depth levels over the stored ontology, merged with the live
//! schema where the spec of a column is concerned: key flags always come
//! from the schema, semantics from the stored tier-2 details. Reads are
//! snapshot-consistent per call and paginated where the result is a list.

use crate::models::{
    ColumnDetail, Conventions, DatasourceId, EntityRelationship, ForeignKeyTarget, OntologyDepth,
    OntologyEntity,
};
use crate::storage::TenantSession;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pagination window for list-shaped depths.
#[derive(Debug, Clone, Copy, Default)]
pub struct Page {
    /// Rows to skip.
    pub offset: usize,
    /// Maximum rows to return; `None` returns everything.
    pub limit: Option<usize>,
}

impl Page {
    fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// An edge in the relationship graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipEdge {
    /// Source entity name.
    pub source: String,
    /// Target entity name.
    pub target: String,
    /// Joining columns, `table.column` on each side.
    pub source_column: String,
    /// Target side.
    pub target_column: String,
    /// Cardinality notation.
    pub cardinality: String,
}

/// Depth `domain`: the tier-0 view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainView {
    /// Number of discovered entities.
    pub entity_count: usize,
    /// Number of introspected columns.
    pub column_count: usize,
    /// Entity relationship graph.
    pub relationship_graph: Vec<RelationshipEdge>,
    /// Business description.
    pub description: String,
    /// Distinct business domains, alphabetised.
    pub primary_domains: Vec<String>,
    /// Detected conventions.
    pub conventions: Conventions,
}

/// Depth `entities`: one row per entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityView {
    /// Entity name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Business domain.
    pub domain: Option<String>,
    /// Alternative names.
    pub aliases: Vec<String>,
    /// Key business columns with synonyms.
    pub key_columns: Vec<(String, Vec<String>)>,
    /// How many places the entity occurs.
    pub occurrence_count: usize,
}

/// Depth `tables`: tier 1 pivoted to tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableView {
    /// Physical table name.
    pub table: String,
    /// Business name (the backing entity).
    pub business_name: Option<String>,
    /// Entity description.
    pub description: Option<String>,
    /// Containing entity's domain.
    pub domain: Option<String>,
    /// Entity aliases.
    pub aliases: Vec<String>,
    /// Names of related entities.
    pub relationships: Vec<String>,
}

/// Depth `columns`: tier 2 merged with the live schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnView {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
    /// Declared data type, from the live schema.
    pub data_type: String,
    /// Primary-key flag, always from the live schema.
    pub is_primary_key: bool,
    /// Declared FK target, always from the live schema.
    pub fk_target: Option<ForeignKeyTarget>,
    /// Stored semantics, when column enrichment has run.
    pub detail: Option<ColumnDetail>,
}

/// A depth-selected read result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "depth", content = "data")]
pub enum OntologyView {
    /// Tier-0 summary.
    Domain(DomainView),
    /// Per-entity rows.
    Entities(Vec<EntityView>),
    /// Per-table rows.
    Tables(Vec<TableView>),
    /// Per-column rows.
    Columns(Vec<ColumnView>),
}

/// Reads the ontology at a requested depth.
///
/// # Errors
///
/// Returns a storage error on read failure.
pub fn read_ontology(
    session: &TenantSession,
    datasource_id: DatasourceId,
    depth: OntologyDepth,
    page: Page,
) -> Result<OntologyView> {
    match depth {
        OntologyDepth::Domain => read_domain(session, datasource_id),
        OntologyDepth::Entities => read_entities(session, datasource_id, page),
        OntologyDepth::Tables => read_tables(session, datasource_id, page),
        OntologyDepth::Columns => read_columns(session, datasource_id, page),
    }
}

fn relationship_edges(
    entities: &[OntologyEntity],
    relationships: &[EntityRelationship],
) -> Vec<RelationshipEdge> {
    let name_by_id: BTreeMap<_, _> = entities.iter().map(|e| (e.id, e.name.clone())).collect();
    relationships
        .iter()
        .filter_map(|rel| {
            let source = name_by_id.get(&rel.source_entity_id)?;
            let target = name_by_id.get(&rel.target_entity_id)?;
            Some(RelationshipEdge {
                source: source.clone(),
                target: target.clone(),
                source_column: rel.source_column.clone(),
                target_column: rel.target_column.clone(),
                cardinality: rel.cardinality.as_str().to_string(),
            })
        })
        .collect()
}

fn read_domain(session: &TenantSession, datasource_id: DatasourceId) -> Result<OntologyView> {
    let entities = session.list_entities(datasource_id)?;
    let relationships = session.list_entity_relationships()?;
    let columns = session.list_schema_columns(datasource_id)?;
    let ontology = session.load_ontology()?.unwrap_or_default();

    Ok(OntologyView::Domain(DomainView {
        entity_count: entities.len(),
        column_count: columns.len(),
        relationship_graph: relationship_edges(&entities, &relationships),
        description: ontology.domain_summary.description,
        primary_domains: ontology.domain_summary.primary_domains,
        conventions: ontology.domain_summary.conventions,
    }))
}

fn read_entities(
    session: &TenantSession,
    datasource_id: DatasourceId,
    page: Page,
) -> Result<OntologyView> {
    let entities = session.list_entities(datasource_id)?;
    let views = entities
        .into_iter()
        .map(|e| EntityView {
            name: e.name,
            description: e.description,
            domain: e.domain,
            aliases: e.aliases.into_iter().map(|a| a.alias).collect(),
            key_columns: e
                .key_columns
                .into_iter()
                .map(|k| (k.column, k.synonyms))
                .collect(),
            occurrence_count: e.occurrences.len(),
        })
        .collect();
    Ok(OntologyView::Entities(page.apply(views)))
}

fn read_tables(
    session: &TenantSession,
    datasource_id: DatasourceId,
    page: Page,
) -> Result<OntologyView> {
    let tables = session.list_schema_tables(datasource_id)?;
    let entities = session.list_entities(datasource_id)?;
    let ontology = session.load_ontology()?.unwrap_or_default();

    let views = tables
        .into_iter()
        .map(|table| {
            let entity = entities.iter().find(|e| e.primary_table == table.name);
            let related = entity
                .and_then(|e| ontology.entity_summaries.get(&e.name))
                .map(|summary| summary.related_entities.clone())
                .unwrap_or_default();
            TableView {
                table: table.name,
                business_name: entity.map(|e| e.name.clone()),
                description: entity.and_then(|e| e.description.clone()),
                domain: entity.and_then(|e| e.domain.clone()),
                aliases: entity
                    .map(|e| e.aliases.iter().map(|a| a.alias.clone()).collect())
                    .unwrap_or_default(),
                relationships: related,
            }
        })
        .collect();
    Ok(OntologyView::Tables(page.apply(views)))
}

fn read_columns(
    session: &TenantSession,
    datasource_id: DatasourceId,
    page: Page,
) -> Result<OntologyView> {
    let columns = session.list_schema_columns(datasource_id)?;
    let ontology = session.load_ontology()?.unwrap_or_default();

    let views = columns
        .into_iter()
        .map(|column| {
            let detail = ontology
                .column_details
                .get(&column.table_name)
                .and_then(|details| details.iter().find(|d| d.column == column.name))
                .cloned();
            ColumnView {
                table: column.table_name,
                column: column.name,
                data_type: column.data_type,
                is_primary_key: column.is_primary_key,
                fk_target: column.fk_target,
                detail,
            }
        })
        .collect();
    Ok(OntologyView::Columns(page.apply(views)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_apply() {
        let page = Page {
            offset: 1,
            limit: Some(2),
        };
        assert_eq!(page.apply(vec![1, 2, 3, 4, 5]), vec![2, 3]);

        let all = Page::default();
        assert_eq!(all.apply(vec![1, 2, 3]), vec![1, 2, 3]);
    }
}
