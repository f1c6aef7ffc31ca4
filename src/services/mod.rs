//! The engine container: construction and the external surface.
//!
//! Wires configuration into the metadata store, the LLM runtime with its
//! process-wide circuit breaker, the worker pool, the workflow engine,
//! and the audit sink, then exposes every externally observable operation:
//! workflow control, candidate review, ontology reads, glossary CRUD, and
//! approved-query execution.

use crate::config::OntoloomConfig;
use crate::datasource::ResultSet;
use crate::enrichment::validate_defining_sql;
use crate::llm::{AnthropicClient, LlmHttpConfig, LlmRuntime, OllamaClient, ResilienceConfig};
use crate::models::{
    ApprovalStatus, ApprovedQuery, DatasourceId, GlossarySource, GlossaryTerm, OntologyDepth,
    ParameterDef, ProjectId, QueryId, TermId,
};
use crate::ontology::{read_ontology, OntologyView, Page};
use crate::pool::WorkerPool;
use crate::query::{validate_template, QueryExecutor};
use crate::security::{AuditSink, StdoutSink, TracingSink};
use crate::storage::{MetaStore, TenantSession};
use crate::tenant::TenantContext;
use crate::workflow::{DatasourceFactory, SqliteDatasourceFactory, WorkflowEngine};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// An approved query as listed to LLM tool-callers. SQL and dialect are
/// present only when the project allows suggestions.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovedQueryListing {
    /// Query id.
    pub id: QueryId,
    /// Short name.
    pub name: String,
    /// What the query answers.
    pub description: String,
    /// Parameter definitions.
    pub parameters: Vec<ParameterDef>,
    /// The template, when the project exposes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// The SQL dialect, when the project exposes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
}

/// Result of a glossary SQL test.
#[derive(Debug, Clone, Serialize)]
pub struct SqlTestResult {
    /// Whether the SQL planned and executed.
    pub valid: bool,
    /// Output columns when valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_columns: Option<Vec<String>>,
    /// The failure when invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Container for initialised engine components.
pub struct EngineContainer {
    store: MetaStore,
    engine: WorkflowEngine,
    factory: Arc<dyn DatasourceFactory>,
    sink: Arc<dyn AuditSink>,
    max_query_rows: usize,
}

impl EngineContainer {
    /// Opens the container from configuration, constructing the provider
    /// named there.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn open(config: &OntoloomConfig) -> Result<Self> {
        let http = LlmHttpConfig {
            timeout_ms: config.llm.timeout_ms,
            connect_timeout_ms: config.llm.connect_timeout_ms,
        };
        let llm: Option<Arc<LlmRuntime>> = match config.llm.provider.as_str() {
            "anthropic" => {
                let mut client = AnthropicClient::new().with_http_config(http);
                if let Some(model) = &config.llm.model {
                    client = client.with_model(model.clone());
                }
                if let Some(key) = &config.llm.api_key {
                    client = client.with_api_key(key.clone());
                }
                if let Some(url) = &config.llm.base_url {
                    client = client.with_endpoint(url.clone());
                }
                Some(Arc::new(LlmRuntime::new(
                    Arc::new(client),
                    ResilienceConfig::from_config(&config.llm),
                )))
            },
            "ollama" => {
                let mut client = OllamaClient::new().with_http_config(http);
                if let Some(model) = &config.llm.model {
                    client = client.with_model(model.clone());
                }
                if let Some(url) = &config.llm.base_url {
                    client = client.with_host(url.clone());
                }
                Some(Arc::new(LlmRuntime::new(
                    Arc::new(client),
                    ResilienceConfig::from_config(&config.llm),
                )))
            },
            "none" => None,
            other => {
                return Err(Error::InvalidInput(format!("unknown llm provider '{other}'")));
            },
        };

        let sink: Arc<dyn AuditSink> = if config.audit_sink == "tracing" {
            Arc::new(TracingSink)
        } else {
            Arc::new(StdoutSink)
        };

        let store = MetaStore::open(&config.store_path)?;
        Self::assemble(store, config, llm, Arc::new(SqliteDatasourceFactory), sink)
    }

    /// Assembles a container from explicit components. Tests and
    /// embedders use this to supply mock providers, factories, and sinks.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for parity with [`Self::open`].
    pub fn assemble(
        store: MetaStore,
        config: &OntoloomConfig,
        llm: Option<Arc<LlmRuntime>>,
        factory: Arc<dyn DatasourceFactory>,
        sink: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let pool = WorkerPool::new(config.pool.max_concurrent);
        let engine = WorkflowEngine::new(
            store.clone(),
            config.workflow.clone(),
            llm,
            pool,
            Arc::clone(&factory),
        );
        Ok(Self {
            store,
            engine,
            factory,
            sink,
            max_query_rows: config.workflow.max_query_rows,
        })
    }

    /// The metadata store.
    #[must_use]
    pub const fn store(&self) -> &MetaStore {
        &self.store
    }

    /// The workflow engine: start, status, cancel, save, review.
    #[must_use]
    pub const fn workflows(&self) -> &WorkflowEngine {
        &self.engine
    }

    fn session(&self, project_id: ProjectId) -> Result<TenantSession> {
        self.store.tenant(&TenantContext::for_project(project_id))
    }

    // --- ontology -----------------------------------------------------

    /// Reads the ontology at a depth.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn get_ontology(
        &self,
        project_id: ProjectId,
        datasource_id: DatasourceId,
        depth: OntologyDepth,
        page: Page,
    ) -> Result<OntologyView> {
        let session = self.session(project_id)?;
        read_ontology(&session, datasource_id, depth, page)
    }

    // --- glossary -----------------------------------------------------

    /// Lists glossary terms.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn list_glossary(&self, project_id: ProjectId) -> Result<Vec<GlossaryTerm>> {
        self.session(project_id)?.list_glossary_terms()
    }

    /// Returns a term's defining SQL verbatim, resolved by term or alias,
    /// with its output columns. Never re-executes the SQL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when nothing matches.
    pub fn get_glossary_sql(
        &self,
        project_id: ProjectId,
        term_or_alias: &str,
    ) -> Result<(String, Vec<String>)> {
        let terms = self.list_glossary(project_id)?;
        terms
            .iter()
            .find(|t| t.matches(term_or_alias))
            .map(|t| (t.defining_sql.clone(), t.output_columns.clone()))
            .ok_or_else(|| Error::NotFound(format!("glossary term '{term_or_alias}'")))
    }

    /// Creates a glossary term after validating its defining SQL against
    /// the datasource (EXPLAIN plus a `LIMIT 1` probe).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Prerequisite`] when the SQL fails validation and
    /// [`Error::Conflict`] when the term exists.
    pub fn create_glossary_term(
        &self,
        project_id: ProjectId,
        datasource_id: DatasourceId,
        term: &str,
        definition: &str,
        defining_sql: &str,
        aliases: Vec<String>,
        source: GlossarySource,
    ) -> Result<TermId> {
        let session = self.session(project_id)?;
        let descriptor = session.get_datasource(datasource_id)?;
        let datasource = self.factory.connect(&descriptor)?;
        let output_columns = validate_defining_sql(&*datasource, defining_sql)?;

        let record = GlossaryTerm {
            id: TermId::generate(),
            project_id,
            term: term.to_string(),
            definition: definition.to_string(),
            defining_sql: defining_sql.to_string(),
            base_table: None,
            output_columns,
            aliases,
            source,
            created_at: Utc::now(),
        };
        session.create_glossary_term(&record)?;
        Ok(record.id)
    }

    /// Updates a term, re-validating its SQL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown term or
    /// [`Error::Prerequisite`] for invalid SQL.
    pub fn update_glossary_term(
        &self,
        project_id: ProjectId,
        datasource_id: DatasourceId,
        term: &str,
        definition: &str,
        defining_sql: &str,
        aliases: Vec<String>,
    ) -> Result<()> {
        let session = self.session(project_id)?;
        let descriptor = session.get_datasource(datasource_id)?;
        let datasource = self.factory.connect(&descriptor)?;
        let output_columns = validate_defining_sql(&*datasource, defining_sql)?;

        let existing = session
            .list_glossary_terms()?
            .into_iter()
            .find(|t| t.term == term)
            .ok_or_else(|| Error::NotFound(format!("glossary term '{term}'")))?;
        session.update_glossary_term(&GlossaryTerm {
            definition: definition.to_string(),
            defining_sql: defining_sql.to_string(),
            output_columns,
            aliases,
            ..existing
        })
    }

    /// Deletes a term.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown term.
    pub fn delete_glossary_term(&self, project_id: ProjectId, term: &str) -> Result<()> {
        self.session(project_id)?.delete_glossary_term(term)
    }

    /// Tests SQL against the datasource without persisting anything.
    ///
    /// # Errors
    ///
    /// Returns storage errors only; SQL failures land in the result.
    pub fn test_glossary_sql(
        &self,
        project_id: ProjectId,
        datasource_id: DatasourceId,
        sql: &str,
    ) -> Result<SqlTestResult> {
        let session = self.session(project_id)?;
        let descriptor = session.get_datasource(datasource_id)?;
        let datasource = self.factory.connect(&descriptor)?;
        Ok(match validate_defining_sql(&*datasource, sql) {
            Ok(columns) => SqlTestResult {
                valid: true,
                output_columns: Some(columns),
                error: None,
            },
            Err(err) => SqlTestResult {
                valid: false,
                output_columns: None,
                error: Some(err.to_string()),
            },
        })
    }

    // --- approved queries ---------------------------------------------

    /// Lists enabled approved queries for tool-callers. SQL and dialect
    /// are included only when the project's `allow_suggestions` flag is
    /// set.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn list_approved_queries(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<ApprovedQueryListing>> {
        let project = self.store.get_project(project_id)?;
        let session = self.session(project_id)?;
        let queries = session.list_approved_queries(true)?;
        Ok(queries
            .into_iter()
            .map(|q| ApprovedQueryListing {
                id: q.id,
                name: q.name,
                description: q.description,
                parameters: q.parameters,
                sql: project.allow_suggestions.then(|| q.sql_template.clone()),
                dialect: project.allow_suggestions.then(|| "sqlite".to_string()),
            })
            .collect())
    }

    /// Creates an approved query after validating its template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a bad template or
    /// [`Error::Conflict`] for a duplicate name.
    pub fn create_approved_query(
        &self,
        project_id: ProjectId,
        name: &str,
        description: &str,
        sql_template: &str,
        parameters: Vec<ParameterDef>,
    ) -> Result<QueryId> {
        validate_template(sql_template, &parameters)?;
        let session = self.session(project_id)?;
        let query = ApprovedQuery {
            id: QueryId::generate(),
            project_id,
            name: name.to_string(),
            description: description.to_string(),
            sql_template: sql_template.to_string(),
            parameters,
            is_enabled: true,
            approval_status: ApprovalStatus::Approved,
            output_columns: Vec::new(),
            usage_count: 0,
            last_used_at: None,
            created_at: Utc::now(),
        };
        session.create_approved_query(&query)?;
        Ok(query.id)
    }

    /// Suggests an approved query; requires `allow_suggestions` on the
    /// project. Created pending and disabled until reviewed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Prerequisite`] when suggestions are disabled,
    /// [`Error::InvalidInput`] for a bad template, or [`Error::Conflict`]
    /// for a duplicate name.
    pub fn suggest_approved_query(
        &self,
        project_id: ProjectId,
        name: &str,
        description: &str,
        sql_template: &str,
        parameters: Vec<ParameterDef>,
    ) -> Result<QueryId> {
        let project = self.store.get_project(project_id)?;
        if !project.allow_suggestions {
            return Err(Error::Prerequisite(
                "query suggestions are disabled for this project".to_string(),
            ));
        }
        validate_template(sql_template, &parameters)?;
        let session = self.session(project_id)?;
        let query = ApprovedQuery {
            id: QueryId::generate(),
            project_id,
            name: name.to_string(),
            description: description.to_string(),
            sql_template: sql_template.to_string(),
            parameters,
            is_enabled: false,
            approval_status: ApprovalStatus::Pending,
            output_columns: Vec::new(),
            usage_count: 0,
            last_used_at: None,
            created_at: Utc::now(),
        };
        session.create_approved_query(&query)?;
        Ok(query.id)
    }

    /// Executes an approved query through the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown or disabled query and
    /// the pipeline errors from [`QueryExecutor::execute`].
    pub fn execute_approved_query(
        &self,
        project_id: ProjectId,
        datasource_id: DatasourceId,
        query_id: QueryId,
        parameters: &HashMap<String, serde_json::Value>,
        limit: Option<usize>,
    ) -> Result<ResultSet> {
        let session = self.session(project_id)?;
        let query = session.get_approved_query(query_id)?;
        if !query.is_enabled || query.approval_status != ApprovalStatus::Approved {
            return Err(Error::NotFound(format!(
                "approved query {query_id} is not executable"
            )));
        }
        let descriptor = session.get_datasource(datasource_id)?;
        let datasource = self.factory.connect(&descriptor)?;
        let executor = QueryExecutor::new(datasource, Arc::clone(&self.sink));
        let clamped = limit.map(|l| l.min(self.max_query_rows));
        executor.execute(&session, &query, parameters, clamped)
    }
}
