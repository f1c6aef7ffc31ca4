//! Metadata-store schema.
//!
//! Every per-project table carries a `project_id` column; the partial
//! unique index on `workflows` enforces at most one non-terminal workflow
//! per project, which is what the claim protocol's `ON CONFLICT DO
//! NOTHING` insert races against.

/// DDL executed on store open. Idempotent.
pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    allow_suggestions INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS datasources (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    location TEXT NOT NULL,
    credentials TEXT,
    selected_tables TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_tables (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    datasource_id TEXT NOT NULL REFERENCES datasources(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    is_selected INTEGER NOT NULL DEFAULT 1,
    row_count INTEGER,
    UNIQUE (datasource_id, name)
);

CREATE TABLE IF NOT EXISTS schema_columns (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    table_id TEXT NOT NULL REFERENCES schema_tables(id) ON DELETE CASCADE,
    table_name TEXT NOT NULL,
    name TEXT NOT NULL,
    data_type TEXT NOT NULL,
    is_nullable INTEGER NOT NULL,
    is_primary_key INTEGER NOT NULL,
    is_unique INTEGER NOT NULL,
    fk_table TEXT,
    fk_column TEXT,
    row_count INTEGER,
    non_null_count INTEGER,
    distinct_count INTEGER,
    sample_values TEXT,
    is_joinable TEXT NOT NULL DEFAULT 'unknown',
    joinability_reason TEXT,
    joinability_score REAL NOT NULL DEFAULT 0,
    stats_updated_at TEXT,
    UNIQUE (table_id, name)
);

CREATE TABLE IF NOT EXISTS schema_relationships (
    project_id TEXT NOT NULL,
    datasource_id TEXT NOT NULL REFERENCES datasources(id) ON DELETE CASCADE,
    source_table TEXT NOT NULL,
    source_column TEXT NOT NULL,
    target_table TEXT NOT NULL,
    target_column TEXT NOT NULL,
    cardinality TEXT NOT NULL,
    detection_method TEXT NOT NULL,
    PRIMARY KEY (datasource_id, source_table, source_column, target_table, target_column)
);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    datasource_id TEXT NOT NULL,
    name TEXT NOT NULL,
    primary_table TEXT NOT NULL,
    primary_column TEXT NOT NULL,
    domain TEXT,
    description TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (project_id, datasource_id, name)
);

CREATE TABLE IF NOT EXISTS entity_occurrences (
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    project_id TEXT NOT NULL,
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    role TEXT,
    PRIMARY KEY (entity_id, table_name, column_name)
);

CREATE TABLE IF NOT EXISTS entity_aliases (
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    project_id TEXT NOT NULL,
    alias TEXT NOT NULL,
    source TEXT NOT NULL,
    PRIMARY KEY (entity_id, alias)
);

CREATE TABLE IF NOT EXISTS entity_key_columns (
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    project_id TEXT NOT NULL,
    column_name TEXT NOT NULL,
    synonyms TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (entity_id, column_name)
);

CREATE TABLE IF NOT EXISTS entity_relationships (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    source_entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    target_entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    source_column TEXT NOT NULL,
    target_column TEXT NOT NULL,
    detection_method TEXT NOT NULL,
    confidence REAL NOT NULL,
    status TEXT NOT NULL,
    cardinality TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS relationship_candidates (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    datasource_id TEXT NOT NULL,
    workflow_id TEXT NOT NULL,
    source_table TEXT NOT NULL,
    source_column TEXT NOT NULL,
    target_table TEXT NOT NULL,
    target_column TEXT NOT NULL,
    detection_method TEXT NOT NULL,
    confidence REAL NOT NULL,
    cardinality TEXT NOT NULL,
    metrics TEXT NOT NULL DEFAULT '{}',
    reasoning TEXT,
    status TEXT NOT NULL,
    is_required INTEGER NOT NULL DEFAULT 0,
    user_decision TEXT,
    UNIQUE (workflow_id, source_table, source_column, target_table, target_column)
);

CREATE TABLE IF NOT EXISTS ontologies (
    project_id TEXT PRIMARY KEY,
    domain_summary TEXT NOT NULL DEFAULT '{}',
    entity_summaries TEXT NOT NULL DEFAULT '{}',
    column_details TEXT NOT NULL DEFAULT '{}',
    finalized_at TEXT
);

CREATE TABLE IF NOT EXISTS workflows (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    datasource_id TEXT NOT NULL,
    phase TEXT NOT NULL,
    state TEXT NOT NULL,
    progress TEXT NOT NULL DEFAULT '{}',
    task_queue TEXT NOT NULL DEFAULT '{}',
    current_node TEXT,
    owner_id TEXT NOT NULL,
    heartbeat_at TEXT NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_workflows_one_live_per_project
    ON workflows (project_id)
    WHERE state IN ('pending', 'running', 'paused');

CREATE TABLE IF NOT EXISTS workflow_nodes (
    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    phase TEXT NOT NULL,
    state TEXT NOT NULL,
    error_message TEXT,
    PRIMARY KEY (workflow_id, phase)
);

CREATE TABLE IF NOT EXISTS workflow_state (
    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    data TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (workflow_id, kind, key)
);

CREATE TABLE IF NOT EXISTS glossary_terms (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    term TEXT NOT NULL,
    definition TEXT NOT NULL,
    defining_sql TEXT NOT NULL,
    base_table TEXT,
    output_columns TEXT NOT NULL DEFAULT '[]',
    aliases TEXT NOT NULL DEFAULT '[]',
    source TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (project_id, term)
);

CREATE TABLE IF NOT EXISTS approved_queries (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    sql_template TEXT NOT NULL,
    parameters TEXT NOT NULL DEFAULT '[]',
    is_enabled INTEGER NOT NULL DEFAULT 1,
    approval_status TEXT NOT NULL,
    output_columns TEXT NOT NULL DEFAULT '[]',
    usage_count INTEGER NOT NULL DEFAULT 0,
    last_used_at TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (project_id, name)
);

CREATE INDEX IF NOT EXISTS idx_schema_columns_project ON schema_columns (project_id, table_name);
CREATE INDEX IF NOT EXISTS idx_candidates_workflow ON relationship_candidates (workflow_id, status);
CREATE INDEX IF NOT EXISTS idx_workflows_pair ON workflows (project_id, datasource_id, updated_at);
";
