//! Column enrichment.
//!
//! For each selected table the LLM is asked for per-column semantics:
//! description, semantic type, role, synonyms, labelled enum values, and
//! an FK-role disambiguator when several foreign keys point at the same
//! table. Wide tables are chunked and the chunks dispatched to the worker
//! pool in parallel; results are reassembled in the original column order
//! by parsing the chunk index out of the work-item id.

use crate::datasource::Datasource;
use crate::llm::{extract_json, LlmRuntime};
use crate::models::{ColumnDetail, DatasourceId, EnumValue, SchemaColumn, SemanticType};
use crate::pool::{CancelToken, WorkItem, WorkerPool};
use crate::storage::TenantSession;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Columns per LLM chunk.
pub const CHUNK_SIZE: usize = 50;

/// Distinct values captured for an enum-candidate column.
const ENUM_SAMPLE_CAP: usize = 20;

/// Name fragments that mark a column as an enum candidate.
const ENUM_NAME_FRAGMENTS: &[&str] = &["status", "state", "type", "kind", "category"];

const COLUMN_SYSTEM_PROMPT: &str = "You are annotating database columns for a semantic layer. \
For every column listed, respond with JSON only: {\"columns\": [{\"column\": string, \
\"description\": string, \"semantic_type\": \"dimension\"|\"measure\"|\"identifier\"|\"attribute\", \
\"role\": string|null, \"synonyms\": [string], \"enum_values\": [{\"value\": string, \
\"label\": string, \"description\": string|null}], \"fk_role\": string|null}]}. \
Monetary and quantity columns are measures; keys are identifiers; categorical columns are \
dimensions. When several foreign keys reference the same table, give each a distinguishing \
fk_role (e.g. \"payer\" vs \"payee\").";

/// LLM response shapes.
#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    columns: Vec<EnrichedColumn>,
}

#[derive(Debug, Deserialize)]
struct EnrichedColumn {
    column: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    semantic_type: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    synonyms: Vec<String>,
    #[serde(default)]
    enum_values: Vec<EnrichedEnumValue>,
    #[serde(default)]
    fk_role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnrichedEnumValue {
    value: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Enriches columns table by table.
pub struct ColumnEnrichmentService {
    datasource: Arc<dyn Datasource>,
    llm: Arc<LlmRuntime>,
    pool: WorkerPool,
}

impl ColumnEnrichmentService {
    /// Creates an enrichment service.
    #[must_use]
    pub const fn new(
        datasource: Arc<dyn Datasource>,
        llm: Arc<LlmRuntime>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            datasource,
            llm,
            pool,
        }
    }

    /// Enriches one table and persists its tier-2 column details.
    ///
    /// Chunks run in parallel through the worker pool. Any chunk failing
    /// after retries fails the whole table with the chunk's column range
    /// cited; an open circuit short-circuits immediately.
    ///
    /// Returns the number of columns enriched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] when the breaker is open, an LLM
    /// error citing the failed chunk, or a storage error on persist.
    pub fn enrich_table(
        &self,
        session: &TenantSession,
        datasource_id: DatasourceId,
        table: &str,
        cancel: &CancelToken,
    ) -> Result<usize> {
        let columns: Vec<SchemaColumn> = session
            .list_schema_columns(datasource_id)?
            .into_iter()
            .filter(|c| c.table_name == table)
            .collect();
        if columns.is_empty() {
            return Ok(0);
        }

        let entity_summary = session
            .list_entities(datasource_id)?
            .into_iter()
            .find(|e| e.primary_table == table)
            .map(|e| {
                format!(
                    "Entity '{}'{}{}",
                    e.name,
                    e.domain
                        .as_deref()
                        .map(|d| format!(" in domain '{d}'"))
                        .unwrap_or_default(),
                    e.description
                        .as_deref()
                        .map(|d| format!(": {d}"))
                        .unwrap_or_default(),
                )
            });

        let enum_samples = self.collect_enum_samples(table, &columns)?;

        // One work item per chunk; the chunk index rides in the id.
        let chunks: Vec<&[SchemaColumn]> = columns.chunks(CHUNK_SIZE).collect();
        let mut items: Vec<WorkItem<ChunkResponse>> = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let prompt = chunk_prompt(table, entity_summary.as_deref(), chunk, &enum_samples);
            let llm = Arc::clone(&self.llm);
            items.push(WorkItem::new(
                format!("{table}:chunk:{index}"),
                move |token: &CancelToken| {
                    token.check()?;
                    let response = llm.complete_guarded(COLUMN_SYSTEM_PROMPT, &prompt)?;
                    serde_json::from_str::<ChunkResponse>(&extract_json(&response))
                        .map_err(|e| Error::llm(format!("invalid enrichment response: {e}")))
                },
            ));
        }

        let results = self.pool.process(cancel, items, |done, total, id| {
            tracing::debug!(table, done, total, chunk = id, "enrichment chunk complete");
        })?;

        // Reassemble by chunk index; the first failure stops the table.
        let mut by_chunk: Vec<Option<ChunkResponse>> = Vec::new();
        by_chunk.resize_with(chunks.len(), || None);
        for (id, result) in results {
            let index = parse_chunk_index(&id)
                .ok_or_else(|| Error::operation("enrich_table", format!("bad item id {id}")))?;
            match result {
                Ok(response) => by_chunk[index] = Some(response),
                Err(Error::CircuitOpen) => return Err(Error::CircuitOpen),
                Err(err) => {
                    let start = index * CHUNK_SIZE;
                    let end = (start + CHUNK_SIZE).min(columns.len());
                    return Err(Error::llm(format!(
                        "table '{table}' columns {start}..{end}: {err}"
                    )));
                },
            }
        }

        let mut enriched_by_name: HashMap<String, ColumnDetail> = HashMap::new();
        for response in by_chunk.into_iter().flatten() {
            for column in response.columns {
                enriched_by_name.insert(column.column.clone(), to_detail(column));
            }
        }

        // Original column order, defaults for anything the model skipped.
        let details: Vec<ColumnDetail> = columns
            .iter()
            .map(|c| {
                enriched_by_name
                    .remove(&c.name)
                    .unwrap_or_else(|| default_detail(c))
            })
            .collect();
        let count = details.len();
        session.save_column_details(table, &details)?;
        tracing::info!(table, columns = count, "column enrichment persisted");
        Ok(count)
    }

    /// Gathers distinct values for enum-candidate columns.
    fn collect_enum_samples(
        &self,
        table: &str,
        columns: &[SchemaColumn],
    ) -> Result<HashMap<String, Vec<String>>> {
        let mut samples = HashMap::new();
        for column in columns {
            let lower = column.name.to_lowercase();
            if !ENUM_NAME_FRAGMENTS.iter().any(|f| lower.contains(f)) {
                continue;
            }
            match self
                .datasource
                .distinct_values(table, &column.name, ENUM_SAMPLE_CAP)
            {
                Ok(values) if !values.is_empty() => {
                    samples.insert(column.name.clone(), values);
                },
                Ok(_) => {},
                Err(err) => {
                    tracing::warn!(table, column = %column.name, error = %err,
                        "enum sample fetch failed");
                },
            }
        }
        Ok(samples)
    }
}

fn parse_chunk_index(id: &str) -> Option<usize> {
    id.rsplit(':').next()?.parse().ok()
}

fn chunk_prompt(
    table: &str,
    entity_summary: Option<&str>,
    chunk: &[SchemaColumn],
    enum_samples: &HashMap<String, Vec<String>>,
) -> String {
    use std::fmt::Write;

    let mut prompt = String::new();
    if let Some(summary) = entity_summary {
        let _ = writeln!(prompt, "{summary}");
    }
    let _ = writeln!(prompt, "Table '{table}' columns:");
    for column in chunk {
        let _ = write!(prompt, "- {} {}", column.name, column.data_type);
        if column.is_primary_key {
            let _ = write!(prompt, " [primary key]");
        }
        if let Some(fk) = &column.fk_target {
            let _ = write!(prompt, " [FK -> {}.{}]", fk.table, fk.column);
        }
        if let Some(stats) = &column.stats {
            let preview: Vec<&str> = stats
                .sample_values
                .iter()
                .take(5)
                .map(String::as_str)
                .collect();
            if !preview.is_empty() {
                let _ = write!(prompt, " (e.g. {})", preview.join(", "));
            }
        }
        // Enum samples filtered to this chunk's columns only.
        if let Some(values) = enum_samples.get(&column.name) {
            let _ = write!(prompt, " [distinct values: {}]", values.join(", "));
        }
        let _ = writeln!(prompt);
    }
    prompt
}

fn to_detail(column: EnrichedColumn) -> ColumnDetail {
    ColumnDetail {
        column: column.column,
        description: column.description,
        semantic_type: column
            .semantic_type
            .as_deref()
            .and_then(SemanticType::parse)
            .unwrap_or(SemanticType::Attribute),
        role: column.role,
        fk_role: column.fk_role,
        enum_values: column
            .enum_values
            .into_iter()
            .map(|v| EnumValue {
                value: v.value,
                label: v.label,
                description: v.description,
            })
            .collect(),
        synonyms: column.synonyms,
    }
}

fn default_detail(column: &SchemaColumn) -> ColumnDetail {
    let semantic_type = if column.is_primary_key || column.fk_target.is_some() {
        SemanticType::Identifier
    } else {
        SemanticType::Attribute
    };
    ColumnDetail {
        column: column.name.clone(),
        description: None,
        semantic_type,
        role: None,
        fk_role: None,
        enum_values: Vec::new(),
        synonyms: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnId, ProjectId, TableId};

    fn column(name: &str, is_pk: bool) -> SchemaColumn {
        SchemaColumn {
            id: ColumnId::generate(),
            project_id: ProjectId::generate(),
            table_id: TableId::generate(),
            table_name: "orders".to_string(),
            name: name.to_string(),
            data_type: "text".to_string(),
            is_nullable: true,
            is_primary_key: is_pk,
            is_unique: is_pk,
            fk_target: None,
            stats: None,
        }
    }

    #[test]
    fn test_parse_chunk_index() {
        assert_eq!(parse_chunk_index("orders:chunk:0"), Some(0));
        assert_eq!(parse_chunk_index("wide_table:chunk:17"), Some(17));
        assert_eq!(parse_chunk_index("no-index"), None);
    }

    #[test]
    fn test_chunk_prompt_filters_enum_samples_to_chunk() {
        let chunk = vec![column("status", false)];
        let mut samples = HashMap::new();
        samples.insert(
            "status".to_string(),
            vec!["paid".to_string(), "refunded".to_string()],
        );
        samples.insert("other_kind".to_string(), vec!["x".to_string()]);
        let prompt = chunk_prompt("orders", Some("Entity 'Order'"), &chunk, &samples);
        assert!(prompt.contains("paid, refunded"));
        assert!(!prompt.contains("other_kind"));
        assert!(prompt.contains("Entity 'Order'"));
    }

    #[test]
    fn test_default_detail_identifier_for_keys() {
        assert_eq!(
            default_detail(&column("id", true)).semantic_type,
            SemanticType::Identifier
        );
        assert_eq!(
            default_detail(&column("note", false)).semantic_type,
            SemanticType::Attribute
        );
    }

    #[test]
    fn test_to_detail_parses_semantic_type() {
        let detail = to_detail(EnrichedColumn {
            column: "total".to_string(),
            description: Some("Order total in cents".to_string()),
            semantic_type: Some("measure".to_string()),
            role: None,
            synonyms: vec!["amount".to_string()],
            enum_values: vec![EnrichedEnumValue {
                value: "1".to_string(),
                label: Some("one".to_string()),
                description: None,
            }],
            fk_role: None,
        });
        assert_eq!(detail.semantic_type, SemanticType::Measure);
        assert_eq!(detail.enum_values.len(), 1);
    }
}
