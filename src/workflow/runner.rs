//! The workflow runner.
//!
//! Executes the five phases in dependency order on a background thread.
//! The heartbeat loop runs beside it and is stopped by the guard's drop
//! on every exit path, panic included; the panic itself is captured,
//! written to the workflow row, and attached to the owning node.

use super::engine::DatasourceFactory;
use crate::config::WorkflowConfig;
use crate::datasource::Datasource;
use crate::discovery::{ColumnScanService, EntityDiscoveryService, RelationshipDetectionService};
use crate::enrichment::{ColumnEnrichmentService, GlossaryDiscoveryService, OntologyFinalizeService};
use crate::llm::LlmRuntime;
use crate::models::{
    ColumnId, DatasourceDescriptor, ForeignKeyTarget, Progress, QueuedTask, SchemaColumn,
    SchemaTable, TableId, TaskQueueSnapshot, WorkflowId, WorkflowPhase, WorkflowRecord,
    WorkflowState,
};
use crate::pool::{CancelToken, WorkerPool};
use crate::storage::{MetaStore, TenantSession};
use crate::tenant::TenantContext;
use crate::{Error, Result};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Everything a runner thread needs.
pub(crate) struct RunnerContext {
    pub store: MetaStore,
    pub config: WorkflowConfig,
    pub llm: Option<Arc<LlmRuntime>>,
    pub pool: WorkerPool,
    pub factory: Arc<dyn DatasourceFactory>,
    pub owner_id: String,
    pub record: WorkflowRecord,
    pub descriptor: DatasourceDescriptor,
    pub cancel: CancelToken,
}

/// Stops the heartbeat thread when dropped, unwind included.
struct HeartbeatGuard {
    stop: Option<mpsc::Sender<()>>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl HeartbeatGuard {
    fn start(
        store: &MetaStore,
        project: crate::models::ProjectId,
        workflow_id: WorkflowId,
        owner_id: String,
        interval: Duration,
        cancel: CancelToken,
    ) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let store = store.clone();
        let join = std::thread::spawn(move || loop {
            match stopped.recv_timeout(interval) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {},
            }
            let beat = store
                .tenant(&TenantContext::for_project(project))
                .and_then(|session| session.heartbeat_workflow(workflow_id, &owner_id));
            if let Err(err) = beat {
                // Ownership lost to a re-claim: stop doing work here.
                tracing::warn!(workflow = %workflow_id, error = %err, "heartbeat failed");
                cancel.cancel();
                break;
            }
        });
        Self {
            stop: Some(stop),
            join: Some(join),
        }
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Runner entry point; never panics out.
pub(crate) fn run_workflow(ctx: RunnerContext) {
    let workflow_id = ctx.record.id;
    let project_id = ctx.record.project_id;
    let span = tracing::info_span!(
        "workflow.run",
        workflow = %workflow_id,
        project = %project_id,
        datasource = %ctx.record.datasource_id
    );
    let _enter = span.enter();

    let outcome = catch_unwind(AssertUnwindSafe(|| run_phases(&ctx)));

    let session = match ctx.store.tenant(&TenantContext::for_project(project_id)) {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(error = %err, "cannot reach store to finalise workflow state");
            return;
        },
    };
    match outcome {
        Ok(Ok(())) => {},
        Ok(Err(err)) => {
            if ctx.cancel.is_cancelled() {
                let _ = session.set_workflow_state(workflow_id, WorkflowState::Cancelled, None);
                tracing::info!("workflow cancelled");
            } else {
                tracing::error!(error = %err, "workflow failed");
                let _ = session.mark_workflow_failed(workflow_id, &err.to_string());
                metrics::counter!("workflows_failed_total").increment(1);
            }
        },
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(panic = %message, "workflow runner panicked");
            let _ = session.mark_workflow_failed(workflow_id, &format!("panic: {message}"));
            metrics::counter!("workflows_panicked_total").increment(1);
        },
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic.downcast_ref::<&str>().map_or_else(
        || {
            panic
                .downcast_ref::<String>()
                .cloned()
                .unwrap_or_else(|| "unknown panic".to_string())
        },
        |s| (*s).to_string(),
    )
}

/// Tracks the task queue through a run, snapshotting after every
/// completion so status polls and resume see fresh state.
struct TaskTracker<'a> {
    session: &'a TenantSession,
    workflow_id: WorkflowId,
    queue: TaskQueueSnapshot,
    done: HashSet<String>,
}

impl<'a> TaskTracker<'a> {
    fn new(session: &'a TenantSession, record: &WorkflowRecord) -> Self {
        let queue = record.task_queue.clone();
        let done = queue
            .completed_keys()
            .into_iter()
            .map(String::from)
            .collect();
        Self {
            session,
            workflow_id: record.id,
            queue,
            done,
        }
    }

    /// Registers the tasks of a phase, keeping completion state for keys
    /// that already ran in a previous incarnation.
    fn register(&mut self, phase: WorkflowPhase, keys: &[String]) {
        for key in keys {
            if !self.queue.tasks.iter().any(|t| t.key == *key) {
                self.queue.tasks.push(QueuedTask {
                    key: key.clone(),
                    phase,
                    done: false,
                });
            }
        }
    }

    fn is_done(&self, key: &str) -> bool {
        self.done.contains(key)
    }

    fn mark_done(&mut self, phase: WorkflowPhase, key: &str) -> Result<()> {
        if let Some(task) = self.queue.tasks.iter_mut().find(|t| t.key == key) {
            task.done = true;
        }
        self.done.insert(key.to_string());
        self.snapshot(phase)
    }

    fn snapshot(&self, phase: WorkflowPhase) -> Result<()> {
        let total = self.queue.tasks.len() as u64;
        let current = self.queue.tasks.iter().filter(|t| t.done).count() as u64;
        let progress = Progress::of(current, total, format!("phase {phase}"));
        self.session.snapshot_workflow(
            self.workflow_id,
            phase,
            &progress,
            &self.queue,
            Some(phase.as_str()),
        )
    }
}

fn run_phases(ctx: &RunnerContext) -> Result<()> {
    let session = ctx
        .store
        .tenant(&TenantContext::for_project(ctx.record.project_id))?;
    session.set_workflow_state(ctx.record.id, WorkflowState::Running, None)?;

    let _heartbeat = HeartbeatGuard::start(
        &ctx.store,
        ctx.record.project_id,
        ctx.record.id,
        ctx.owner_id.clone(),
        Duration::from_millis(ctx.config.heartbeat_interval_ms),
        ctx.cancel.clone(),
    );

    let datasource = ctx.factory.connect(&ctx.descriptor)?;

    // A fresh run re-introspects the schema; a resumed run keeps the rows
    // its completed scan tasks already wrote statistics into.
    let fresh_run = ctx.record.task_queue.tasks.is_empty();
    if fresh_run || session.list_schema_tables(ctx.descriptor.id)?.is_empty() {
        refresh_schema(&session, &ctx.descriptor, &*datasource)?;
    }

    let mut tracker = TaskTracker::new(&session, &ctx.record);
    let selected_tables: Vec<String> = session
        .list_schema_tables(ctx.descriptor.id)?
        .into_iter()
        .filter(|t| t.is_selected)
        .map(|t| t.name)
        .collect();

    run_relationships_phase(ctx, &session, &datasource, &mut tracker, &selected_tables)?;
    run_entities_phase(ctx, &session, &mut tracker)?;
    run_ontology_phase(ctx, &session, &mut tracker);
    run_enrichment_phase(ctx, &session, &datasource, &mut tracker, &selected_tables)?;
    run_glossary_phase(ctx, &session, &datasource, &mut tracker);

    ctx.cancel.check()?;
    session.set_workflow_state(ctx.record.id, WorkflowState::Completed, None)?;
    metrics::counter!("workflows_completed_total").increment(1);
    tracing::info!("workflow completed");
    Ok(())
}

/// Gate on the DAG: a phase may start only when its predecessor node
/// reached `completed`. Column enrichment and glossary hang off the
/// ontology phase and only require it to have started (its finalisation
/// is non-blocking).
fn ensure_phase_ready(
    session: &TenantSession,
    workflow_id: WorkflowId,
    phase: WorkflowPhase,
) -> Result<()> {
    let Some(predecessor) = phase.predecessor() else {
        return Ok(());
    };
    let nodes = session.list_nodes(workflow_id)?;
    let state = nodes
        .iter()
        .find(|n| n.phase == predecessor)
        .map_or(WorkflowState::Pending, |n| n.state);
    let started_is_enough = matches!(
        phase,
        WorkflowPhase::ColumnEnrichment | WorkflowPhase::Glossary
    );
    let ready = if started_is_enough {
        state != WorkflowState::Pending
    } else {
        state == WorkflowState::Completed
    };
    if !ready {
        return Err(Error::Prerequisite(format!(
            "phase {phase} requires {predecessor} first (currently {state})"
        )));
    }
    Ok(())
}

/// Re-introspects the customer schema into the metadata store, preserving
/// the descriptor's table selection.
fn refresh_schema(
    session: &TenantSession,
    descriptor: &DatasourceDescriptor,
    datasource: &dyn Datasource,
) -> Result<()> {
    let introspected = datasource.introspect_schema()?;
    let mut tables = Vec::new();
    let mut columns = Vec::new();
    for table in introspected {
        let table_id = TableId::generate();
        tables.push(SchemaTable {
            id: table_id,
            project_id: descriptor.project_id,
            datasource_id: descriptor.id,
            name: table.name.clone(),
            is_selected: descriptor.is_table_selected(&table.name),
            row_count: Some(table.row_count),
        });
        for column in table.columns {
            columns.push(SchemaColumn {
                id: ColumnId::generate(),
                project_id: descriptor.project_id,
                table_id,
                table_name: table.name.clone(),
                name: column.name,
                data_type: column.data_type,
                is_nullable: column.is_nullable,
                is_primary_key: column.is_primary_key,
                is_unique: column.is_unique,
                fk_target: column.fk_target.map(|fk| ForeignKeyTarget {
                    table: fk.table,
                    column: fk.column,
                }),
                stats: None,
            });
        }
    }
    session.replace_schema(descriptor.id, &tables, &columns)
}

fn run_relationships_phase(
    ctx: &RunnerContext,
    session: &TenantSession,
    datasource: &Arc<dyn Datasource>,
    tracker: &mut TaskTracker<'_>,
    selected_tables: &[String],
) -> Result<()> {
    let phase = WorkflowPhase::Relationships;
    session.set_node_state(ctx.record.id, phase, WorkflowState::Running, None)?;

    let mut keys: Vec<String> = selected_tables
        .iter()
        .map(|t| format!("scan:{t}"))
        .collect();
    keys.push("relationships:detect".to_string());
    tracker.register(phase, &keys);
    tracker.snapshot(phase)?;

    let scanner = ColumnScanService::new(Arc::clone(datasource));
    for table in selected_tables {
        ctx.cancel.check()?;
        let key = format!("scan:{table}");
        if tracker.is_done(&key) {
            continue;
        }
        scanner.scan_table(session, ctx.descriptor.id, table)?;
        tracker.mark_done(phase, &key)?;
    }

    if !tracker.is_done("relationships:detect") {
        let detector = ctx.llm.as_ref().map_or_else(
            || RelationshipDetectionService::without_llm(Arc::clone(datasource)),
            |llm| RelationshipDetectionService::new(Arc::clone(datasource), Arc::clone(llm)),
        );
        detector.detect(
            session,
            ctx.descriptor.id,
            ctx.record.id,
            &ctx.cancel,
            |done, total, table| {
                tracing::debug!(done, total, table, "relationship detection progress");
            },
        )?;
        tracker.mark_done(phase, "relationships:detect")?;
    }

    session.set_node_state(ctx.record.id, phase, WorkflowState::Completed, None)
}

fn run_entities_phase(
    ctx: &RunnerContext,
    session: &TenantSession,
    tracker: &mut TaskTracker<'_>,
) -> Result<()> {
    let phase = WorkflowPhase::Entities;
    ensure_phase_ready(session, ctx.record.id, phase)?;
    session.set_node_state(ctx.record.id, phase, WorkflowState::Running, None)?;
    let key = "entities:discover".to_string();
    tracker.register(phase, std::slice::from_ref(&key));
    tracker.snapshot(phase)?;

    if !tracker.is_done(&key) {
        let discovery = ctx.llm.as_ref().map_or_else(
            EntityDiscoveryService::without_llm,
            |llm| EntityDiscoveryService::new(Arc::clone(llm)),
        );
        discovery.discover(
            session,
            ctx.descriptor.id,
            &ctx.cancel,
            |done, total, table| {
                tracing::debug!(done, total, table, "entity discovery progress");
            },
        )?;
        tracker.mark_done(phase, &key)?;
    }

    session.set_node_state(ctx.record.id, phase, WorkflowState::Completed, None)
}

/// Finalisation is non-blocking: failure lands on the node, never the
/// workflow.
fn run_ontology_phase(
    ctx: &RunnerContext,
    session: &TenantSession,
    tracker: &mut TaskTracker<'_>,
) {
    let phase = WorkflowPhase::Ontology;
    if let Err(err) = ensure_phase_ready(session, ctx.record.id, phase) {
        let _ = session.set_node_state(
            ctx.record.id,
            phase,
            WorkflowState::Failed,
            Some(&err.to_string()),
        );
        return;
    }
    let _ = session.set_node_state(ctx.record.id, phase, WorkflowState::Running, None);
    let key = "ontology:finalize".to_string();
    tracker.register(phase, std::slice::from_ref(&key));
    let _ = tracker.snapshot(phase);

    if tracker.is_done(&key) {
        let _ = session.set_node_state(ctx.record.id, phase, WorkflowState::Completed, None);
        return;
    }
    let finalizer = ctx.llm.as_ref().map_or_else(
        OntologyFinalizeService::without_llm,
        |llm| OntologyFinalizeService::new(Arc::clone(llm)),
    );
    match finalizer.finalize(session, ctx.descriptor.id) {
        Ok(()) => {
            let _ = tracker.mark_done(phase, &key);
            let _ = session.set_node_state(ctx.record.id, phase, WorkflowState::Completed, None);
        },
        Err(err) => {
            tracing::error!(error = %err, "ontology finalisation failed");
            let _ = session.set_node_state(
                ctx.record.id,
                phase,
                WorkflowState::Failed,
                Some(&err.to_string()),
            );
        },
    }
}

fn run_enrichment_phase(
    ctx: &RunnerContext,
    session: &TenantSession,
    datasource: &Arc<dyn Datasource>,
    tracker: &mut TaskTracker<'_>,
    selected_tables: &[String],
) -> Result<()> {
    let phase = WorkflowPhase::ColumnEnrichment;
    ensure_phase_ready(session, ctx.record.id, phase)?;
    session.set_node_state(ctx.record.id, phase, WorkflowState::Running, None)?;
    let keys: Vec<String> = selected_tables
        .iter()
        .map(|t| format!("enrich:{t}"))
        .collect();
    tracker.register(phase, &keys);
    tracker.snapshot(phase)?;

    let Some(llm) = &ctx.llm else {
        session.set_node_state(
            ctx.record.id,
            phase,
            WorkflowState::Completed,
            Some("no llm configured, enrichment skipped"),
        )?;
        return Ok(());
    };

    let enricher = ColumnEnrichmentService::new(
        Arc::clone(datasource),
        Arc::clone(llm),
        ctx.pool.clone(),
    );
    let mut table_errors = Vec::new();
    for table in selected_tables {
        ctx.cancel.check()?;
        let key = format!("enrich:{table}");
        if tracker.is_done(&key) {
            continue;
        }
        match enricher.enrich_table(session, ctx.descriptor.id, table, &ctx.cancel) {
            Ok(_) => tracker.mark_done(phase, &key)?,
            Err(Error::CircuitOpen) => {
                // Provider-wide outage: stop enriching, surface it, move on.
                table_errors.push(format!("{table}: llm circuit open"));
                break;
            },
            Err(err) => {
                tracing::error!(table, error = %err, "table enrichment failed");
                table_errors.push(format!("{table}: {err}"));
            },
        }
    }

    if table_errors.is_empty() {
        session.set_node_state(ctx.record.id, phase, WorkflowState::Completed, None)
    } else {
        session.set_node_state(
            ctx.record.id,
            phase,
            WorkflowState::Failed,
            Some(&table_errors.join("; ")),
        )
    }
}

fn run_glossary_phase(
    ctx: &RunnerContext,
    session: &TenantSession,
    datasource: &Arc<dyn Datasource>,
    tracker: &mut TaskTracker<'_>,
) {
    let phase = WorkflowPhase::Glossary;
    if let Err(err) = ensure_phase_ready(session, ctx.record.id, phase) {
        let _ = session.set_node_state(
            ctx.record.id,
            phase,
            WorkflowState::Failed,
            Some(&err.to_string()),
        );
        return;
    }
    let _ = session.set_node_state(ctx.record.id, phase, WorkflowState::Running, None);
    let key = "glossary:discover".to_string();
    tracker.register(phase, std::slice::from_ref(&key));
    let _ = tracker.snapshot(phase);

    if tracker.is_done(&key) {
        let _ = session.set_node_state(ctx.record.id, phase, WorkflowState::Completed, None);
        return;
    }
    let Some(llm) = &ctx.llm else {
        let _ = session.set_node_state(
            ctx.record.id,
            phase,
            WorkflowState::Completed,
            Some("no llm configured, glossary skipped"),
        );
        return;
    };

    let service = GlossaryDiscoveryService::new(Arc::clone(datasource), Arc::clone(llm));
    match service.discover(session, ctx.descriptor.id, &ctx.cancel) {
        Ok(count) => {
            tracing::info!(terms = count, "glossary discovery complete");
            let _ = tracker.mark_done(phase, &key);
            let _ = session.set_node_state(ctx.record.id, phase, WorkflowState::Completed, None);
        },
        Err(err) => {
            tracing::error!(error = %err, "glossary discovery failed");
            let _ = session.set_node_state(
                ctx.record.id,
                phase,
                WorkflowState::Failed,
                Some(&err.to_string()),
            );
        },
    }
}
