//! Glossary discovery.
//!
//! Suggests business terms with complete, executable defining SQL. Every
//! suggestion is validated against the datasource: the SQL must plan
//! (EXPLAIN) and a `LIMIT 1` execution captures its output columns.
//! Suggestions that fail validation are dropped with a log line; survivors
//! persist with `source = inferred`.

use crate::datasource::Datasource;
use crate::llm::{extract_json, LlmRuntime};
use crate::models::{DatasourceId, GlossarySource, GlossaryTerm, TermId};
use crate::pool::CancelToken;
use crate::storage::TenantSession;
use crate::{Error, Result};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

const GLOSSARY_SYSTEM_PROMPT: &str = "You define business glossary terms over a relational \
schema. Each term needs a complete, executable SELECT statement that computes it. Respond \
with JSON only: {\"terms\": [{\"term\": string, \"definition\": string, \"sql\": string, \
\"base_table\": string, \"aliases\": [string]}]}. Suggest at most five high-value terms \
(revenue, active users, churn and the like) grounded in the actual table and column names.";

#[derive(Debug, Deserialize)]
struct GlossaryResponse {
    #[serde(default)]
    terms: Vec<SuggestedTerm>,
}

#[derive(Debug, Deserialize)]
struct SuggestedTerm {
    term: String,
    #[serde(default)]
    definition: String,
    sql: String,
    #[serde(default)]
    base_table: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Validates defining SQL against the datasource: EXPLAIN, then a
/// `LIMIT 1` execution to capture output columns.
///
/// # Errors
///
/// Returns [`Error::Prerequisite`] when the SQL does not plan or execute.
pub fn validate_defining_sql(datasource: &dyn Datasource, sql: &str) -> Result<Vec<String>> {
    crate::query::validate_statement(sql)?;
    let columns = datasource.explain(sql)?;
    let probe = datasource
        .execute_with_params(sql, &[], 1)
        .map_err(|e| Error::Prerequisite(format!("sql does not execute: {e}")))?;
    if probe.columns.is_empty() {
        return Ok(columns);
    }
    Ok(probe.columns)
}

/// Discovers glossary terms for a datasource.
pub struct GlossaryDiscoveryService {
    datasource: Arc<dyn Datasource>,
    llm: Arc<LlmRuntime>,
}

impl GlossaryDiscoveryService {
    /// Creates a discovery service.
    #[must_use]
    pub const fn new(datasource: Arc<dyn Datasource>, llm: Arc<LlmRuntime>) -> Self {
        Self { datasource, llm }
    }

    /// Suggests, validates, and persists glossary terms.
    ///
    /// Returns the number of terms persisted. Individual suggestions that
    /// fail SQL validation or collide with existing terms are dropped with
    /// a warning.
    ///
    /// # Errors
    ///
    /// Returns the LLM error when the suggestion call itself fails, or a
    /// storage error.
    pub fn discover(
        &self,
        session: &TenantSession,
        datasource_id: DatasourceId,
        cancel: &CancelToken,
    ) -> Result<usize> {
        cancel.check()?;
        let prompt = self.schema_prompt(session, datasource_id)?;
        let response = self.llm.complete_guarded(GLOSSARY_SYSTEM_PROMPT, &prompt)?;
        let parsed: GlossaryResponse = serde_json::from_str(&extract_json(&response))
            .map_err(|e| Error::llm(format!("invalid glossary response: {e}")))?;

        let mut persisted = 0;
        for suggestion in parsed.terms {
            cancel.check()?;
            let output_columns = match validate_defining_sql(&*self.datasource, &suggestion.sql) {
                Ok(columns) => columns,
                Err(err) => {
                    tracing::warn!(term = %suggestion.term, error = %err,
                        "dropping glossary suggestion with invalid sql");
                    continue;
                },
            };
            let term = GlossaryTerm {
                id: TermId::generate(),
                project_id: session.project_id(),
                term: suggestion.term,
                definition: suggestion.definition,
                defining_sql: suggestion.sql,
                base_table: suggestion.base_table,
                output_columns,
                aliases: suggestion.aliases,
                source: GlossarySource::Inferred,
                created_at: Utc::now(),
            };
            match session.create_glossary_term(&term) {
                Ok(()) => persisted += 1,
                Err(Error::Conflict(_)) => {
                    tracing::debug!(term = %term.term, "glossary term already exists, skipping");
                },
                Err(err) => return Err(err),
            }
        }
        Ok(persisted)
    }

    fn schema_prompt(
        &self,
        session: &TenantSession,
        datasource_id: DatasourceId,
    ) -> Result<String> {
        use std::fmt::Write;

        let mut prompt = String::from("Schema:\n");
        let columns = session.list_schema_columns(datasource_id)?;
        let mut current_table = String::new();
        for column in &columns {
            if column.table_name != current_table {
                current_table.clone_from(&column.table_name);
                let _ = writeln!(prompt, "table {current_table}:");
            }
            let _ = writeln!(prompt, "  - {} {}", column.name, column.data_type);
        }
        if let Some(ontology) = session.load_ontology()? {
            if !ontology.entity_summaries.is_empty() {
                let _ = writeln!(
                    prompt,
                    "\nEntities: {}",
                    ontology
                        .entity_summaries
                        .keys()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::SqliteDatasource;
    use rusqlite::Connection;

    #[test]
    fn test_validate_defining_sql() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, active INTEGER);
             INSERT INTO customers VALUES (1, 1), (2, 0);",
        )
        .unwrap();
        drop(conn);
        let ds = SqliteDatasource::open(file.path()).unwrap();

        let columns =
            validate_defining_sql(&ds, "SELECT id FROM customers WHERE active = 1").unwrap();
        assert_eq!(columns, vec!["id"]);

        assert!(validate_defining_sql(&ds, "SELECT nope FROM missing").is_err());
        assert!(validate_defining_sql(&ds, "DELETE FROM customers").is_err());
    }
}
