//! Approved-query pipeline and glossary surface tests against a real
//! `SQLite` datasource, with the audit sink captured in memory.

use chrono::Utc;
use ontoloom::config::OntoloomConfig;
use ontoloom::models::{
    DatasourceDescriptor, DatasourceId, DatasourceKind, GlossarySource, ParamType, ParameterDef,
    Project, ProjectId,
};
use ontoloom::security::{MemorySink, Severity};
use ontoloom::services::EngineContainer;
use ontoloom::storage::MetaStore;
use ontoloom::tenant::TenantContext;
use ontoloom::workflow::SqliteDatasourceFactory;
use ontoloom::Error;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Arc;

struct Fixture {
    container: EngineContainer,
    sink: Arc<MemorySink>,
    project_id: ProjectId,
    datasource_id: DatasourceId,
    _customer_db: tempfile::NamedTempFile,
}

fn fixture(allow_suggestions: bool) -> Fixture {
    let customer_db = tempfile::NamedTempFile::new().unwrap();
    let conn = Connection::open(customer_db.path()).unwrap();
    conn.execute_batch(
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, email TEXT, total INTEGER);
         INSERT INTO orders VALUES
             (1, 'a@x.com', 1200),
             (2, 'a@x.com', 500),
             (3, 'b@x.com', 900);",
    )
    .unwrap();
    drop(conn);

    let store = MetaStore::open_in_memory().unwrap();
    let project = Project {
        id: ProjectId::generate(),
        name: "acme".to_string(),
        allow_suggestions,
        created_at: Utc::now(),
    };
    store.create_project(&project).unwrap();
    let descriptor = DatasourceDescriptor {
        id: DatasourceId::generate(),
        project_id: project.id,
        name: "prod".to_string(),
        kind: DatasourceKind::Sqlite,
        location: customer_db.path().display().to_string(),
        credentials: None,
        selected_tables: Vec::new(),
        created_at: Utc::now(),
    };
    store
        .tenant(&TenantContext::for_project(project.id))
        .unwrap()
        .upsert_datasource(&descriptor)
        .unwrap();

    let sink = Arc::new(MemorySink::new());
    let container = EngineContainer::assemble(
        store,
        &OntoloomConfig::default(),
        None,
        Arc::new(SqliteDatasourceFactory),
        Arc::clone(&sink) as Arc<dyn ontoloom::security::AuditSink>,
    )
    .unwrap();

    Fixture {
        container,
        sink,
        project_id: project.id,
        datasource_id: descriptor.id,
        _customer_db: customer_db,
    }
}

fn email_query(fixture: &Fixture) -> ontoloom::models::QueryId {
    fixture
        .container
        .create_approved_query(
            fixture.project_id,
            "orders_by_email",
            "Orders for a customer email",
            "SELECT id, total FROM orders WHERE email = {{email}} ORDER BY id",
            vec![ParameterDef {
                name: "email".to_string(),
                param_type: ParamType::String,
                description: None,
                required: true,
                default: None,
            }],
        )
        .unwrap()
}

#[test]
fn executes_with_coerced_parameters() {
    let fixture = fixture(true);
    let query_id = email_query(&fixture);

    let mut params = HashMap::new();
    params.insert("email".to_string(), serde_json::json!("a@x.com"));
    let result = fixture
        .container
        .execute_approved_query(fixture.project_id, fixture.datasource_id, query_id, &params, None)
        .unwrap();
    assert_eq!(result.columns, vec!["id", "total"]);
    assert_eq!(result.rows.len(), 2);

    // Success leaves an info audit event and bumps usage.
    let events = fixture.sink.events();
    assert!(events
        .iter()
        .any(|e| e.event_type == "query_executed" && e.severity == Severity::Info));
    let listed = fixture
        .container
        .list_approved_queries(fixture.project_id)
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[test]
fn injection_is_blocked_before_any_database_call() {
    let fixture = fixture(true);
    let query_id = email_query(&fixture);

    let mut params = HashMap::new();
    params.insert("email".to_string(), serde_json::json!("' OR 1=1 --"));
    let err = fixture
        .container
        .execute_approved_query(fixture.project_id, fixture.datasource_id, query_id, &params, None)
        .unwrap_err();
    let Error::InjectionSuspected { parameter, fingerprint } = err else {
        panic!("expected injection error, got {err}");
    };
    assert_eq!(parameter, "email");
    assert!(!fingerprint.is_empty());

    // Exactly one critical audit event carrying the fingerprint; no
    // execution event.
    let events = fixture.sink.events();
    let critical: Vec<_> = events
        .iter()
        .filter(|e| e.severity == Severity::Critical)
        .collect();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].event_type, "injection_blocked");
    assert_eq!(critical[0].details["fingerprint"], fingerprint);
    assert!(!events.iter().any(|e| e.event_type == "query_executed"));
}

#[test]
fn missing_required_parameter_fails() {
    let fixture = fixture(true);
    let query_id = email_query(&fixture);
    let err = fixture
        .container
        .execute_approved_query(
            fixture.project_id,
            fixture.datasource_id,
            query_id,
            &HashMap::new(),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn row_limit_is_clamped() {
    let fixture = fixture(true);
    let query_id = fixture
        .container
        .create_approved_query(
            fixture.project_id,
            "all_orders",
            "Every order",
            "SELECT id FROM orders WHERE total > {{min}} ORDER BY id",
            vec![ParameterDef {
                name: "min".to_string(),
                param_type: ParamType::Integer,
                description: None,
                required: false,
                default: Some(serde_json::json!(0)),
            }],
        )
        .unwrap();
    let result = fixture
        .container
        .execute_approved_query(
            fixture.project_id,
            fixture.datasource_id,
            query_id,
            &HashMap::new(),
            Some(2),
        )
        .unwrap();
    assert_eq!(result.rows.len(), 2);
}

#[test]
fn template_validation_at_save_time() {
    let fixture = fixture(true);

    // Undefined placeholder.
    let err = fixture
        .container
        .create_approved_query(
            fixture.project_id,
            "bad",
            "x",
            "SELECT * FROM orders WHERE email = {{email}}",
            Vec::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    // Placeholder in identifier position.
    let err = fixture
        .container
        .create_approved_query(
            fixture.project_id,
            "bad2",
            "x",
            "SELECT * FROM {{table}}",
            vec![ParameterDef {
                name: "table".to_string(),
                param_type: ParamType::String,
                description: None,
                required: true,
                default: None,
            }],
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn suggestions_honour_project_flag() {
    let closed = fixture(false);
    let err = closed
        .container
        .suggest_approved_query(closed.project_id, "s", "x", "SELECT 1", Vec::new())
        .unwrap_err();
    assert!(matches!(err, Error::Prerequisite(_)));

    // SQL and dialect are hidden when suggestions are off.
    email_query(&closed);
    let listed = closed
        .container
        .list_approved_queries(closed.project_id)
        .unwrap();
    assert!(listed[0].sql.is_none());
    assert!(listed[0].dialect.is_none());

    let open = fixture(true);
    let id = open
        .container
        .suggest_approved_query(open.project_id, "s", "x", "SELECT 1", Vec::new())
        .unwrap();
    // Pending suggestions are not executable.
    let err = open
        .container
        .execute_approved_query(open.project_id, open.datasource_id, id, &HashMap::new(), None)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn glossary_round_trip_with_alias_resolution() {
    let fixture = fixture(true);
    fixture
        .container
        .create_glossary_term(
            fixture.project_id,
            fixture.datasource_id,
            "Big Order",
            "An order worth 1000 or more.",
            "SELECT id FROM orders WHERE total >= 1000",
            vec!["large order".to_string()],
            GlossarySource::Manual,
        )
        .unwrap();

    let (sql, columns) = fixture
        .container
        .get_glossary_sql(fixture.project_id, "LARGE ORDER")
        .unwrap();
    assert_eq!(sql, "SELECT id FROM orders WHERE total >= 1000");
    assert_eq!(columns, vec!["id"]);

    // Invalid defining SQL is rejected before persisting.
    let err = fixture
        .container
        .create_glossary_term(
            fixture.project_id,
            fixture.datasource_id,
            "Broken",
            "x",
            "SELECT nope FROM missing",
            Vec::new(),
            GlossarySource::Manual,
        )
        .unwrap_err();
    assert!(matches!(err, Error::Prerequisite(_)));

    let test = fixture
        .container
        .test_glossary_sql(fixture.project_id, fixture.datasource_id, "SELECT id FROM orders")
        .unwrap();
    assert!(test.valid);
    assert_eq!(test.output_columns.unwrap(), vec!["id"]);

    let test = fixture
        .container
        .test_glossary_sql(fixture.project_id, fixture.datasource_id, "DROP TABLE orders")
        .unwrap();
    assert!(!test.valid);
    assert!(test.error.is_some());
}

#[test]
fn tenant_isolation_between_projects() {
    let fixture = fixture(true);
    let query_id = email_query(&fixture);

    // A second project cannot see the first project's query.
    let other = Project {
        id: ProjectId::generate(),
        name: "intruder".to_string(),
        allow_suggestions: true,
        created_at: Utc::now(),
    };
    fixture.container.store().create_project(&other).unwrap();
    let err = fixture
        .container
        .execute_approved_query(
            other.id,
            fixture.datasource_id,
            query_id,
            &HashMap::new(),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(fixture
        .container
        .list_approved_queries(other.id)
        .unwrap()
        .is_empty());
}
