//! End-to-end workflow tests against seeded SQLite customer databases,
//! with a scripted LLM provider.

use chrono::Utc;
use ontoloom::config::OntoloomConfig;
use ontoloom::llm::{LlmProvider, LlmRuntime, ResilienceConfig};
use ontoloom::models::{
    Cardinality, DatasourceDescriptor, DatasourceId, DatasourceKind, DetectionMethod,
    OntologyDepth, Project, ProjectId, WorkflowState,
};
use ontoloom::ontology::{OntologyView, Page};
use ontoloom::security::MemorySink;
use ontoloom::services::EngineContainer;
use ontoloom::storage::MetaStore;
use ontoloom::tenant::TenantContext;
use ontoloom::workflow::SqliteDatasourceFactory;
use ontoloom::{Error, Result};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scripted provider: answers each enrichment call from the shape of its
/// system prompt, deriving content from the user prompt.
struct ScriptedLlm;

impl ScriptedLlm {
    fn columns_response(user: &str) -> String {
        let mut columns = Vec::new();
        for line in user.lines() {
            let Some(rest) = line.strip_prefix("- ") else {
                continue;
            };
            let name = rest.split_whitespace().next().unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            let semantic_type = if name == "total" || name.ends_with("_amount") {
                "measure"
            } else if name == "id" || name.ends_with("_id") {
                "identifier"
            } else {
                "attribute"
            };
            let fk_role = match name {
                "visitor_id" => Some("visitor"),
                "host_id" => Some("host"),
                _ => None,
            };
            columns.push(serde_json::json!({
                "column": name,
                "description": format!("The {name} column"),
                "semantic_type": semantic_type,
                "role": null,
                "synonyms": [],
                "enum_values": [],
                "fk_role": fk_role,
            }));
        }
        serde_json::json!({ "columns": columns }).to_string()
    }

    fn triage_response(user: &str) -> String {
        let mut assessments = Vec::new();
        for line in user.lines() {
            let Some(rest) = line.strip_prefix("- ") else {
                continue;
            };
            let Some((left, right)) = rest.split_once(" -> ") else {
                continue;
            };
            let source_column = left.rsplit('.').next().unwrap_or_default();
            let target_table = right.split('.').next().unwrap_or_default();
            assessments.push(serde_json::json!({
                "source_column": source_column,
                "target_table": target_table,
                "verdict": "needs_review",
                "confidence": 0.6,
                "reasoning": "value overlap without a declared constraint",
            }));
        }
        serde_json::json!({ "assessments": assessments }).to_string()
    }
}

impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.complete_with_system("", prompt)
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        if system.contains("annotating database columns") {
            Ok(Self::columns_response(user))
        } else if system.contains("reviewing proposed foreign-key relationships") {
            Ok(Self::triage_response(user))
        } else if system.contains("describing database entities") {
            Ok(serde_json::json!({
                "description": "A business record.",
                "domain": "sales",
                "key_columns": [],
                "aliases": [],
            })
            .to_string())
        } else if system.contains("business glossary terms") {
            Ok(serde_json::json!({
                "terms": [{
                    "term": "Active User",
                    "definition": "A user known to the system.",
                    "sql": "SELECT count(*) AS n FROM users",
                    "base_table": "users",
                    "aliases": ["AU"],
                }],
            })
            .to_string())
        } else {
            Ok("An online commerce business.".to_string())
        }
    }
}

struct Fixture {
    container: EngineContainer,
    project_id: ProjectId,
    datasource_id: DatasourceId,
    _store_file: tempfile::NamedTempFile,
    _customer_db: tempfile::NamedTempFile,
}

fn fixture(seed_sql: &str) -> Fixture {
    let customer_db = tempfile::NamedTempFile::new().unwrap();
    let conn = Connection::open(customer_db.path()).unwrap();
    conn.execute_batch(seed_sql).unwrap();
    drop(conn);

    let store_file = tempfile::NamedTempFile::new().unwrap();
    let store = MetaStore::open(store_file.path()).unwrap();

    let project = Project {
        id: ProjectId::generate(),
        name: "acme".to_string(),
        allow_suggestions: true,
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

    let llm = Arc::new(LlmRuntime::new(
        Arc::new(ScriptedLlm),
        ResilienceConfig {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
            ..ResilienceConfig::default()
        },
    ));
    let config = OntoloomConfig::default();
    let container = EngineContainer::assemble(
        store,
        &config,
        Some(llm),
        Arc::new(SqliteDatasourceFactory),
        Arc::new(MemorySink::new()),
    )
    .unwrap();

    Fixture {
        container,
        project_id: project.id,
        datasource_id: descriptor.id,
        _store_file: store_file,
        _customer_db: customer_db,
    }
}

fn wait_terminal(fixture: &Fixture) -> WorkflowState {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let status = fixture
            .container
            .workflows()
            .status(fixture.project_id, fixture.datasource_id)
            .unwrap();
        if status.workflow.state.is_terminal() {
            return status.workflow.state;
        }
        assert!(Instant::now() < deadline, "workflow did not finish in time");
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn shop_schema() -> String {
    let mut sql = String::from(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL UNIQUE);
         CREATE TABLE orders (
             id INTEGER PRIMARY KEY,
             user_id INTEGER REFERENCES users(id),
             total INTEGER
         );\n",
    );
    for i in 1..=30 {
        sql.push_str(&format!(
            "INSERT INTO users (id, email) VALUES ({i}, 'user{i}@example.com');\n"
        ));
    }
    for i in 1..=40 {
        let user = (i % 30) + 1;
        let total = i * 250;
        sql.push_str(&format!(
            "INSERT INTO orders (id, user_id, total) VALUES ({i}, {user}, {total});\n"
        ));
    }
    sql
}

#[test]
fn simple_ontology_end_to_end() {
    let fixture = fixture(&shop_schema());
    fixture
        .container
        .workflows()
        .start(fixture.project_id, fixture.datasource_id)
        .unwrap();
    assert_eq!(wait_terminal(&fixture), WorkflowState::Completed);

    let status = fixture
        .container
        .workflows()
        .status(fixture.project_id, fixture.datasource_id)
        .unwrap();
    assert!(status.can_save, "declared FK needs no review");
    assert!(status.candidates.confirmed >= 1);

    let (confirmed, _, _) = fixture
        .container
        .workflows()
        .list_candidates(fixture.project_id, fixture.datasource_id)
        .unwrap();
    let fk = confirmed
        .iter()
        .find(|c| c.detection_method == DetectionMethod::ForeignKey)
        .expect("declared FK candidate");
    assert_eq!(fk.source_table, "orders");
    assert_eq!(fk.cardinality, Cardinality::ManyToOne);

    let promoted = fixture
        .container
        .workflows()
        .save_relationships(fixture.project_id, fixture.datasource_id)
        .unwrap();
    assert!(promoted >= 1);

    // Tier-1 summaries present at depth `entities`.
    let view = fixture
        .container
        .get_ontology(
            fixture.project_id,
            fixture.datasource_id,
            OntologyDepth::Entities,
            Page::default(),
        )
        .unwrap();
    let OntologyView::Entities(entities) = view else {
        panic!("expected entities view");
    };
    let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"User"), "{names:?}");
    assert!(names.contains(&"Order"), "{names:?}");

    // Column enrichment marked `total` as a measure.
    let view = fixture
        .container
        .get_ontology(
            fixture.project_id,
            fixture.datasource_id,
            OntologyDepth::Columns,
            Page::default(),
        )
        .unwrap();
    let OntologyView::Columns(columns) = view else {
        panic!("expected columns view");
    };
    let total = columns
        .iter()
        .find(|c| c.table == "orders" && c.column == "total")
        .expect("orders.total");
    let detail = total.detail.as_ref().expect("enriched detail");
    assert_eq!(detail.semantic_type.as_str(), "measure");

    // Domain depth carries counts and the relationship graph.
    let view = fixture
        .container
        .get_ontology(
            fixture.project_id,
            fixture.datasource_id,
            OntologyDepth::Domain,
            Page::default(),
        )
        .unwrap();
    let OntologyView::Domain(domain) = view else {
        panic!("expected domain view");
    };
    assert_eq!(domain.entity_count, 2);
    assert!(!domain.relationship_graph.is_empty());
}

fn sessions_schema() -> String {
    let mut sql = String::from(
        "CREATE TABLE users (user_id TEXT PRIMARY KEY);
         CREATE TABLE sessions (
             id INTEGER PRIMARY KEY,
             visitor_id TEXT,
             host_id TEXT
         );\n",
    );
    for i in 1..=30 {
        sql.push_str(&format!("INSERT INTO users (user_id) VALUES ('u-{i}');\n"));
    }
    for i in 1..=40 {
        let visitor = (i % 30) + 1;
        let host = (i % 25) + 1;
        sql.push_str(&format!(
            "INSERT INTO sessions (id, visitor_id, host_id) VALUES ({i}, 'u-{visitor}', 'u-{host}');\n"
        ));
    }
    sql
}

#[test]
fn ambiguous_fk_requires_review() {
    let fixture = fixture(&sessions_schema());
    fixture
        .container
        .workflows()
        .start(fixture.project_id, fixture.datasource_id)
        .unwrap();
    assert_eq!(wait_terminal(&fixture), WorkflowState::Completed);

    let (_, needs_review, _) = fixture
        .container
        .workflows()
        .list_candidates(fixture.project_id, fixture.datasource_id)
        .unwrap();
    let session_candidates: Vec<_> = needs_review
        .iter()
        .filter(|c| c.source_table == "sessions")
        .collect();
    assert_eq!(session_candidates.len(), 2, "{needs_review:?}");
    assert!(session_candidates.iter().all(|c| c.is_required));

    // Save is gated until both are decided.
    let err = fixture
        .container
        .workflows()
        .save_relationships(fixture.project_id, fixture.datasource_id)
        .unwrap_err();
    assert!(matches!(err, Error::Prerequisite(_)));

    for candidate in &session_candidates {
        fixture
            .container
            .workflows()
            .decide_candidate(fixture.project_id, candidate.id, true)
            .unwrap();
    }
    let promoted = fixture
        .container
        .workflows()
        .save_relationships(fixture.project_id, fixture.datasource_id)
        .unwrap();
    assert_eq!(promoted, 2);

    // Column enrichment distinguished the two FK roles.
    let view = fixture
        .container
        .get_ontology(
            fixture.project_id,
            fixture.datasource_id,
            OntologyDepth::Columns,
            Page::default(),
        )
        .unwrap();
    let OntologyView::Columns(columns) = view else {
        panic!("expected columns view");
    };
    let fk_role = |name: &str| {
        columns
            .iter()
            .find(|c| c.table == "sessions" && c.column == name)
            .and_then(|c| c.detail.as_ref())
            .and_then(|d| d.fk_role.clone())
    };
    assert_eq!(fk_role("visitor_id").as_deref(), Some("visitor"));
    assert_eq!(fk_role("host_id").as_deref(), Some("host"));
}

#[test]
fn concurrent_start_race_single_winner() {
    let fixture = fixture(&shop_schema());
    let container = &fixture.container;

    let results: Vec<Result<ontoloom::WorkflowId>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    container
                        .workflows()
                        .start(fixture.project_id, fixture.datasource_id)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "{results:?}");
    let loser = results.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(loser, Err(Error::Conflict(_))));

    assert_eq!(wait_terminal(&fixture), WorkflowState::Completed);
}

#[test]
fn abandoned_workflow_is_reclaimed_and_resumed() {
    let fixture = fixture(&shop_schema());
    let session = fixture
        .container
        .store()
        .tenant(&TenantContext::for_project(fixture.project_id))
        .unwrap();

    // A dead process claimed the workflow and never heartbeated again.
    session
        .claim_workflow(fixture.datasource_id, "dead-process", 60_000)
        .unwrap();

    // Zero expiry makes the heartbeat instantly stale for the sweep.
    let mut config = OntoloomConfig::default();
    config.workflow.heartbeat_expiry_ms = 1;
    let engine = ontoloom::workflow::WorkflowEngine::new(
        fixture.container.store().clone(),
        config.workflow,
        None,
        ontoloom::pool::WorkerPool::new(2),
        Arc::new(SqliteDatasourceFactory),
    );
    std::thread::sleep(Duration::from_millis(10));
    let resumed = engine.resume_abandoned().unwrap();
    assert_eq!(resumed, 1);

    assert_eq!(wait_terminal(&fixture), WorkflowState::Completed);
}

#[test]
fn panic_in_runner_marks_workflow_failed() {
    struct PanickingFactory;
    impl ontoloom::workflow::DatasourceFactory for PanickingFactory {
        fn connect(
            &self,
            _descriptor: &DatasourceDescriptor,
        ) -> Result<Arc<dyn ontoloom::Datasource>> {
            panic!("adapter exploded");
        }
    }

    let customer_db = tempfile::NamedTempFile::new().unwrap();
    Connection::open(customer_db.path())
        .unwrap()
        .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);")
        .unwrap();

    let store = MetaStore::open_in_memory().unwrap();
    let project = Project {
        id: ProjectId::generate(),
        name: "p".to_string(),
        allow_suggestions: false,
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

    let config = OntoloomConfig::default();
    let engine = ontoloom::workflow::WorkflowEngine::new(
        store.clone(),
        config.workflow,
        None,
        ontoloom::pool::WorkerPool::new(2),
        Arc::new(PanickingFactory),
    );
    engine.start(project.id, descriptor.id).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let record = loop {
        let status = engine.status(project.id, descriptor.id).unwrap();
        if status.workflow.state.is_terminal() {
            break status;
        }
        assert!(Instant::now() < deadline, "runner did not terminate");
        std::thread::sleep(Duration::from_millis(20));
    };
    assert_eq!(record.workflow.state, WorkflowState::Failed);
    let message = record.workflow.error_message.unwrap();
    assert!(message.contains("panic"), "{message}");
    assert!(
        record.nodes.iter().any(|n| n.error_message.is_some()),
        "failure must land on a node"
    );

    // The slot is free again: a new start succeeds.
    let second = engine.start(project.id, descriptor.id);
    assert!(second.is_ok());
}
