//! Workflow lifecycle: start, status, cancel, save, and restart-time
//! reclaim.

use super::runner::{self, RunnerContext};
use crate::config::WorkflowConfig;
use crate::datasource::{Datasource, SqliteDatasource};
use crate::llm::LlmRuntime;
use crate::models::{
    DatasourceDescriptor, DatasourceId, EntityRelationship, ProjectId, RelationshipCandidate,
    RelationshipId, ReviewStatus, WorkflowId, WorkflowNode, WorkflowPhase, WorkflowRecord,
    WorkflowState,
};
use crate::pool::{CancelToken, WorkerPool};
use crate::storage::{ClaimOutcome, MetaStore, TenantSession};
use crate::tenant::TenantContext;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Connects datasource adapters from stored descriptors.
pub trait DatasourceFactory: Send + Sync {
    /// Opens a read-only adapter for the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::External`] when the connection fails.
    fn connect(&self, descriptor: &DatasourceDescriptor) -> Result<Arc<dyn Datasource>>;
}

/// Factory for `SQLite` customer databases.
#[derive(Debug, Default)]
pub struct SqliteDatasourceFactory;

impl DatasourceFactory for SqliteDatasourceFactory {
    fn connect(&self, descriptor: &DatasourceDescriptor) -> Result<Arc<dyn Datasource>> {
        let adapter = SqliteDatasource::open(Path::new(&descriptor.location))?;
        Ok(Arc::new(adapter))
    }
}

/// Candidate counts by review bucket.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CandidateBuckets {
    /// Auto-accepted or user-accepted.
    pub confirmed: usize,
    /// Pending with `is_required`.
    pub needs_review: usize,
    /// Rejected.
    pub rejected: usize,
}

/// Snapshot returned by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatus {
    /// The workflow row.
    pub workflow: WorkflowRecord,
    /// Per-phase node states.
    pub nodes: Vec<WorkflowNode>,
    /// Candidate counts by bucket.
    pub candidates: CandidateBuckets,
    /// True iff the relationships phase completed and no required
    /// candidate is still pending.
    pub can_save: bool,
}

struct RunnerHandle {
    cancel: CancelToken,
}

/// The workflow engine.
pub struct WorkflowEngine {
    store: MetaStore,
    config: WorkflowConfig,
    llm: Option<Arc<LlmRuntime>>,
    pool: WorkerPool,
    factory: Arc<dyn DatasourceFactory>,
    owner_id: String,
    runners: Mutex<HashMap<WorkflowId, RunnerHandle>>,
}

impl WorkflowEngine {
    /// Creates an engine owned by this process.
    #[must_use]
    pub fn new(
        store: MetaStore,
        config: WorkflowConfig,
        llm: Option<Arc<LlmRuntime>>,
        pool: WorkerPool,
        factory: Arc<dyn DatasourceFactory>,
    ) -> Self {
        let owner_id = format!("{}:{}", std::process::id(), uuid::Uuid::new_v4());
        Self {
            store,
            config,
            llm,
            pool,
            factory,
            owner_id,
            runners: Mutex::new(HashMap::new()),
        }
    }

    fn session(&self, project_id: ProjectId) -> Result<TenantSession> {
        self.store.tenant(&TenantContext::for_project(project_id))
    }

    /// Starts a workflow for `(project, datasource)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when a live workflow already exists for
    /// the project, or [`Error::NotFound`] for an unknown datasource.
    pub fn start(&self, project_id: ProjectId, datasource_id: DatasourceId) -> Result<WorkflowId> {
        let session = self.session(project_id)?;
        let descriptor = session.get_datasource(datasource_id)?;

        let outcome =
            session.claim_workflow(datasource_id, &self.owner_id, self.config.heartbeat_expiry_ms)?;
        let record = match outcome {
            ClaimOutcome::Claimed(record) => record,
            ClaimOutcome::Reclaimed(record) => record,
        };
        let id = record.id;
        self.spawn_runner(record, descriptor);
        metrics::counter!("workflows_started_total").increment(1);
        Ok(id)
    }

    /// Reclaims workflows abandoned by dead processes (expired
    /// heartbeats) and resumes them. Called on process start.
    ///
    /// Returns the number of workflows resumed.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the sweep itself; individual reclaim
    /// failures are logged and skipped.
    pub fn resume_abandoned(&self) -> Result<usize> {
        let expired = self
            .store
            .system()
            .expired_workflows(self.config.heartbeat_expiry_ms)?;
        let mut resumed = 0;
        for (workflow_id, project_id, datasource_id) in expired {
            let result = self.session(project_id).and_then(|session| {
                let descriptor = session.get_datasource(datasource_id)?;
                let outcome = session.claim_workflow(
                    datasource_id,
                    &self.owner_id,
                    self.config.heartbeat_expiry_ms,
                )?;
                Ok((outcome, descriptor))
            });
            match result {
                Ok((ClaimOutcome::Reclaimed(record), descriptor)) => {
                    tracing::info!(workflow = %record.id, "resuming abandoned workflow");
                    self.spawn_runner(record, descriptor);
                    resumed += 1;
                },
                Ok((ClaimOutcome::Claimed(record), _)) => {
                    // The abandoned row went terminal between sweep and
                    // claim and we opened a fresh one; roll that back.
                    let _ = self.session(project_id).and_then(|s| {
                        s.set_workflow_state(record.id, WorkflowState::Cancelled, None)
                    });
                },
                Err(err) => {
                    tracing::warn!(workflow = %workflow_id, error = %err, "reclaim failed");
                },
            }
        }
        Ok(resumed)
    }

    fn spawn_runner(&self, record: WorkflowRecord, descriptor: DatasourceDescriptor) {
        let cancel = CancelToken::new();
        {
            let mut runners = self
                .runners
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            runners.insert(
                record.id,
                RunnerHandle {
                    cancel: cancel.clone(),
                },
            );
        }
        let ctx = RunnerContext {
            store: self.store.clone(),
            config: self.config.clone(),
            llm: self.llm.clone(),
            pool: self.pool.clone(),
            factory: Arc::clone(&self.factory),
            owner_id: self.owner_id.clone(),
            record,
            descriptor,
            cancel,
        };
        std::thread::spawn(move || runner::run_workflow(ctx));
    }

    /// Current status for the pair's most recent workflow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no workflow has ever run for the
    /// pair.
    pub fn status(
        &self,
        project_id: ProjectId,
        datasource_id: DatasourceId,
    ) -> Result<WorkflowStatus> {
        let session = self.session(project_id)?;
        let workflow = session
            .latest_workflow(datasource_id)?
            .ok_or_else(|| Error::NotFound(format!("no workflow for datasource {datasource_id}")))?;
        let nodes = session.list_nodes(workflow.id)?;
        let candidates = session.list_candidates(datasource_id, workflow.id)?;

        let mut buckets = CandidateBuckets::default();
        for candidate in &candidates {
            match candidate.status {
                ReviewStatus::Accepted => buckets.confirmed += 1,
                ReviewStatus::Rejected => buckets.rejected += 1,
                ReviewStatus::Pending => buckets.needs_review += 1,
            }
        }
        let relationships_done = nodes
            .iter()
            .any(|n| n.phase == WorkflowPhase::Relationships && n.state == WorkflowState::Completed);
        let blocking = candidates.iter().any(RelationshipCandidate::blocks_save);

        Ok(WorkflowStatus {
            can_save: relationships_done && !blocking,
            workflow,
            nodes,
            candidates: buckets,
        })
    }

    /// Cancels the live workflow for the pair: the runner's context is
    /// cancelled, the row goes terminal, and the workflow's candidates are
    /// discarded. Data persisted by completed nodes is retained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no live workflow exists.
    pub fn cancel(&self, project_id: ProjectId, datasource_id: DatasourceId) -> Result<()> {
        let session = self.session(project_id)?;
        let workflow = session
            .live_workflow()?
            .filter(|w| w.datasource_id == datasource_id)
            .ok_or_else(|| Error::NotFound("no live workflow to cancel".to_string()))?;

        {
            let runners = self
                .runners
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(handle) = runners.get(&workflow.id) {
                handle.cancel.cancel();
            }
        }
        session.set_workflow_state(workflow.id, WorkflowState::Cancelled, None)?;
        session.discard_candidates(workflow.id)?;
        metrics::counter!("workflows_cancelled_total").increment(1);
        Ok(())
    }

    /// Promotes accepted candidates into entity relationships.
    ///
    /// Gated on the relationships phase having completed with no required
    /// candidate still pending. Returns the number of promoted rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Prerequisite`] when the gate fails.
    pub fn save_relationships(
        &self,
        project_id: ProjectId,
        datasource_id: DatasourceId,
    ) -> Result<usize> {
        let session = self.session(project_id)?;
        let workflow = session
            .latest_workflow(datasource_id)?
            .ok_or_else(|| Error::NotFound(format!("no workflow for datasource {datasource_id}")))?;

        let nodes = session.list_nodes(workflow.id)?;
        let relationships_done = nodes
            .iter()
            .any(|n| n.phase == WorkflowPhase::Relationships && n.state == WorkflowState::Completed);
        if !relationships_done {
            return Err(Error::Prerequisite(
                "relationships phase has not completed".to_string(),
            ));
        }
        if session.count_blocking_candidates(workflow.id)? > 0 {
            return Err(Error::Prerequisite(
                "required candidates are still pending review".to_string(),
            ));
        }

        let entities = session.list_entities(datasource_id)?;
        let entity_for_table = |table: &str| {
            entities
                .iter()
                .find(|e| e.primary_table == table || e.occurrences.iter().any(|o| o.table == table))
        };

        let mut promoted = 0;
        for candidate in session.list_candidates(datasource_id, workflow.id)? {
            if candidate.status != ReviewStatus::Accepted {
                continue;
            }
            let (Some(source), Some(target)) = (
                entity_for_table(&candidate.source_table),
                entity_for_table(&candidate.target_table),
            ) else {
                tracing::warn!(
                    source = %candidate.source_table,
                    target = %candidate.target_table,
                    "accepted candidate has no backing entities, skipping"
                );
                continue;
            };
            session.insert_entity_relationship(&EntityRelationship {
                id: RelationshipId::generate(),
                project_id,
                source_entity_id: source.id,
                target_entity_id: target.id,
                source_column: format!("{}.{}", candidate.source_table, candidate.source_column),
                target_column: format!("{}.{}", candidate.target_table, candidate.target_column),
                detection_method: candidate.detection_method,
                confidence: candidate.confidence,
                status: ReviewStatus::Accepted,
                cardinality: candidate.cardinality,
            })?;
            promoted += 1;
        }
        tracing::info!(promoted, "relationships saved");
        Ok(promoted)
    }

    /// Records a user decision on a candidate.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::NotFound`] and [`Error::Conflict`] from the
    /// store.
    pub fn decide_candidate(
        &self,
        project_id: ProjectId,
        candidate_id: crate::models::CandidateId,
        accepted: bool,
    ) -> Result<()> {
        let session = self.session(project_id)?;
        let decision = if accepted {
            ReviewStatus::Accepted
        } else {
            ReviewStatus::Rejected
        };
        session.decide_candidate(candidate_id, decision)
    }

    /// Lists the pair's candidates grouped by bucket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no workflow exists for the pair.
    pub fn list_candidates(
        &self,
        project_id: ProjectId,
        datasource_id: DatasourceId,
    ) -> Result<(Vec<RelationshipCandidate>, Vec<RelationshipCandidate>, Vec<RelationshipCandidate>)>
    {
        let session = self.session(project_id)?;
        let workflow = session
            .latest_workflow(datasource_id)?
            .ok_or_else(|| Error::NotFound(format!("no workflow for datasource {datasource_id}")))?;
        let mut confirmed = Vec::new();
        let mut needs_review = Vec::new();
        let mut rejected = Vec::new();
        for candidate in session.list_candidates(datasource_id, workflow.id)? {
            match candidate.status {
                ReviewStatus::Accepted => confirmed.push(candidate),
                ReviewStatus::Pending => needs_review.push(candidate),
                ReviewStatus::Rejected => rejected.push(candidate),
            }
        }
        Ok((confirmed, needs_review, rejected))
    }
}
