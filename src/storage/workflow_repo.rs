//! Workflow-row persistence: the claim protocol, heartbeats, node states,
//! and per-entity intermediate state.
//!
//! Ownership is enforced by the partial unique index on non-terminal
//! workflow rows plus the heartbeat column; no in-process locking is
//! authoritative.

use super::{from_json, parse_ts, to_json, to_ts, SystemSession, TenantSession};
use crate::models::{
    DatasourceId, Progress, ProjectId, StateKind, TaskQueueSnapshot, WorkflowId, WorkflowNode,
    WorkflowPhase, WorkflowRecord, WorkflowState, WorkflowStateEntry,
};
use crate::{Error, Result};
use chrono::{Duration, Utc};
use rusqlite::params;

/// Outcome of a claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// A fresh workflow row was inserted and claimed.
    Claimed(WorkflowRecord),
    /// An abandoned workflow (expired heartbeat) was re-claimed for resume.
    Reclaimed(WorkflowRecord),
}

impl ClaimOutcome {
    /// The claimed record, either way.
    #[must_use]
    pub const fn record(&self) -> &WorkflowRecord {
        match self {
            Self::Claimed(record) | Self::Reclaimed(record) => record,
        }
    }
}

type RawWorkflowRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    Option<String>,
    String,
    String,
);

const WORKFLOW_COLUMNS: &str = "id, datasource_id, phase, state, progress, task_queue, \
     current_node, owner_id, heartbeat_at, error_message, created_at, updated_at";

fn map_workflow_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawWorkflowRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn raw_to_record(row: RawWorkflowRow, project_id: ProjectId) -> Result<WorkflowRecord> {
    let (
        id,
        datasource_id,
        phase,
        state,
        progress,
        task_queue,
        current_node,
        owner_id,
        heartbeat_at,
        error_message,
        created_at,
        updated_at,
    ) = row;
    Ok(WorkflowRecord {
        id: id.parse::<WorkflowId>()?,
        project_id,
        datasource_id: datasource_id.parse()?,
        phase: WorkflowPhase::parse(&phase)
            .ok_or_else(|| Error::operation("decode_workflow", format!("phase {phase}")))?,
        state: WorkflowState::parse(&state)
            .ok_or_else(|| Error::operation("decode_workflow", format!("state {state}")))?,
        progress: from_json::<Progress>(&progress)?,
        task_queue: from_json::<TaskQueueSnapshot>(&task_queue)?,
        current_node,
        owner_id,
        heartbeat_at: parse_ts(&heartbeat_at)?,
        error_message,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

impl TenantSession {
    /// Attempts to claim a new workflow for `(project, datasource)`.
    ///
    /// The insert races against the partial unique index on non-terminal
    /// rows. If it loses, the existing row is inspected: an expired
    /// heartbeat allows a compare-and-set re-claim on the previous owner,
    /// otherwise the start attempt is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when a live workflow already exists for
    /// the project.
    pub fn claim_workflow(
        &self,
        datasource_id: DatasourceId,
        owner_id: &str,
        heartbeat_expiry_ms: u64,
    ) -> Result<ClaimOutcome> {
        let now = Utc::now();
        let id = WorkflowId::generate();
        let fresh = WorkflowRecord {
            id,
            project_id: self.project_id(),
            datasource_id,
            phase: WorkflowPhase::Relationships,
            state: WorkflowState::Pending,
            progress: Progress::default(),
            task_queue: TaskQueueSnapshot::default(),
            current_node: None,
            owner_id: owner_id.to_string(),
            heartbeat_at: now,
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        let inserted = {
            let conn = self.lock();
            conn.execute(
                "INSERT INTO workflows
                     (id, project_id, datasource_id, phase, state, progress, task_queue,
                      owner_id, heartbeat_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT DO NOTHING",
                params![
                    id.to_string(),
                    self.pid(),
                    datasource_id.to_string(),
                    fresh.phase.as_str(),
                    fresh.state.as_str(),
                    to_json(&fresh.progress)?,
                    to_json(&fresh.task_queue)?,
                    owner_id,
                    to_ts(now),
                    to_ts(now),
                    to_ts(now),
                ],
            )?
        };
        if inserted == 1 {
            for phase in WorkflowPhase::ordered() {
                self.upsert_node(&WorkflowNode {
                    workflow_id: id,
                    phase: *phase,
                    state: WorkflowState::Pending,
                    error_message: None,
                })?;
            }
            return Ok(ClaimOutcome::Claimed(fresh));
        }

        // Lost the race: inspect the live row.
        let existing = self
            .live_workflow()?
            .ok_or_else(|| Error::Conflict("workflow row vanished during claim".to_string()))?;
        let expiry = Duration::milliseconds(i64::try_from(heartbeat_expiry_ms).unwrap_or(i64::MAX));
        if now.signed_duration_since(existing.heartbeat_at) < expiry {
            return Err(Error::Conflict(format!(
                "workflow {} already running for project",
                existing.id
            )));
        }

        // Abandoned: compare-and-set on the previous owner.
        let reclaimed = {
            let conn = self.lock();
            conn.execute(
                "UPDATE workflows SET owner_id = ?1, heartbeat_at = ?2, updated_at = ?2
                 WHERE id = ?3 AND owner_id = ?4 AND project_id = ?5",
                params![
                    owner_id,
                    to_ts(now),
                    existing.id.to_string(),
                    existing.owner_id,
                    self.pid(),
                ],
            )?
        };
        if reclaimed == 0 {
            return Err(Error::Conflict(format!(
                "workflow {} was re-claimed by another owner",
                existing.id
            )));
        }
        let mut record = existing;
        record.owner_id = owner_id.to_string();
        record.heartbeat_at = now;
        Ok(ClaimOutcome::Reclaimed(record))
    }

    /// The project's current non-terminal workflow, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn live_workflow(&self) -> Result<Option<WorkflowRecord>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows
                     WHERE project_id = ?1 AND state IN ('pending', 'running', 'paused')"
                ),
                params![self.pid()],
                map_workflow_row,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(Error::from(other)),
            })?;
        row.map(|r| raw_to_record(r, self.project_id())).transpose()
    }

    /// The most recent workflow for a datasource, terminal or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn latest_workflow(&self, datasource_id: DatasourceId) -> Result<Option<WorkflowRecord>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows
                     WHERE project_id = ?1 AND datasource_id = ?2
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![self.pid(), datasource_id.to_string()],
                map_workflow_row,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(Error::from(other)),
            })?;
        row.map(|r| raw_to_record(r, self.project_id())).transpose()
    }

    /// Fetches a workflow by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when absent.
    pub fn get_workflow(&self, id: WorkflowId) -> Result<WorkflowRecord> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?1 AND project_id = ?2"),
                params![id.to_string(), self.pid()],
                map_workflow_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Error::NotFound(format!("workflow {id}")),
                other => other.into(),
            })?;
        raw_to_record(row, self.project_id())
    }

    /// Advances the heartbeat, verifying ownership.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when the row is no longer owned by
    /// `owner_id` (ownership lost to a re-claim).
    pub fn heartbeat_workflow(&self, id: WorkflowId, owner_id: &str) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE workflows SET heartbeat_at = ?1
             WHERE id = ?2 AND owner_id = ?3 AND project_id = ?4",
            params![to_ts(Utc::now()), id.to_string(), owner_id, self.pid()],
        )?;
        if updated == 0 {
            return Err(Error::Conflict(format!(
                "ownership of workflow {id} lost"
            )));
        }
        Ok(())
    }

    /// Sets the workflow state, clearing or setting the error message.
    /// Terminal states are final: a completed, failed, or cancelled row is
    /// never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the workflow does not exist and
    /// [`Error::Conflict`] when it already reached a terminal state.
    pub fn set_workflow_state(
        &self,
        id: WorkflowId,
        state: WorkflowState,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE workflows SET state = ?1, error_message = ?2, updated_at = ?3
             WHERE id = ?4 AND project_id = ?5
               AND state IN ('pending', 'running', 'paused')",
            params![
                state.as_str(),
                error_message,
                to_ts(Utc::now()),
                id.to_string(),
                self.pid(),
            ],
        )?;
        if updated == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM workflows WHERE id = ?1 AND project_id = ?2)",
                params![id.to_string(), self.pid()],
                |row| row.get(0),
            )?;
            if exists {
                return Err(Error::Conflict(format!(
                    "workflow {id} is already terminal"
                )));
            }
            return Err(Error::NotFound(format!("workflow {id}")));
        }
        Ok(())
    }

    /// Snapshots progress, the task queue, and the current node into the
    /// workflow row for status polling.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn snapshot_workflow(
        &self,
        id: WorkflowId,
        phase: WorkflowPhase,
        progress: &Progress,
        task_queue: &TaskQueueSnapshot,
        current_node: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE workflows SET phase = ?1, progress = ?2, task_queue = ?3,
                    current_node = ?4, updated_at = ?5
             WHERE id = ?6 AND project_id = ?7",
            params![
                phase.as_str(),
                to_json(progress)?,
                to_json(task_queue)?,
                current_node,
                to_ts(Utc::now()),
                id.to_string(),
                self.pid(),
            ],
        )?;
        Ok(())
    }

    /// Marks a workflow failed and attaches the message to the current
    /// node, or the first pending node, or the first node as a last
    /// resort. Called from the panic-recovery path.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn mark_workflow_failed(&self, id: WorkflowId, message: &str) -> Result<()> {
        self.set_workflow_state(id, WorkflowState::Failed, Some(message))?;
        let record = self.get_workflow(id)?;
        let nodes = self.list_nodes(id)?;
        let target = record
            .current_node
            .as_deref()
            .and_then(WorkflowPhase::parse)
            .or_else(|| {
                nodes
                    .iter()
                    .find(|n| n.state == WorkflowState::Pending)
                    .map(|n| n.phase)
            })
            .or_else(|| nodes.first().map(|n| n.phase));
        if let Some(phase) = target {
            self.set_node_state(id, phase, WorkflowState::Failed, Some(message))?;
        }
        Ok(())
    }

    /// Inserts or replaces a node row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_node(&self, node: &WorkflowNode) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO workflow_nodes (workflow_id, phase, state, error_message)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                node.workflow_id.to_string(),
                node.phase.as_str(),
                node.state.as_str(),
                node.error_message,
            ],
        )?;
        Ok(())
    }

    /// Sets a node's state and error message.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_node_state(
        &self,
        workflow_id: WorkflowId,
        phase: WorkflowPhase,
        state: WorkflowState,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.upsert_node(&WorkflowNode {
            workflow_id,
            phase,
            state,
            error_message: error_message.map(String::from),
        })
    }

    /// Lists a workflow's nodes in phase order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn list_nodes(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowNode>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT phase, state, error_message FROM workflow_nodes WHERE workflow_id = ?1",
        )?;
        let rows = stmt.query_map(params![workflow_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        let mut nodes = Vec::new();
        for row in rows {
            let (phase, state, error_message) = row?;
            let Some(phase) = WorkflowPhase::parse(&phase) else {
                continue;
            };
            nodes.push(WorkflowNode {
                workflow_id,
                phase,
                state: WorkflowState::parse(&state).unwrap_or(WorkflowState::Pending),
                error_message,
            });
        }
        nodes.sort_by_key(|n| {
            WorkflowPhase::ordered()
                .iter()
                .position(|p| *p == n.phase)
                .unwrap_or(usize::MAX)
        });
        Ok(nodes)
    }

    /// Saves a per-entity intermediate state entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save_state_entry(&self, entry: &WorkflowStateEntry) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO workflow_state (workflow_id, kind, key, data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.workflow_id.to_string(),
                entry.kind.as_str(),
                entry.key,
                entry.data.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Loads a state entry by kind and key.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn load_state_entry(
        &self,
        workflow_id: WorkflowId,
        kind: StateKind,
        key: &str,
    ) -> Result<Option<WorkflowStateEntry>> {
        let conn = self.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM workflow_state WHERE workflow_id = ?1 AND kind = ?2 AND key = ?3",
                params![workflow_id.to_string(), kind.as_str(), key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(Error::from(other)),
            })?;
        data.map(|raw| {
            Ok(WorkflowStateEntry {
                workflow_id,
                kind,
                key: key.to_string(),
                data: serde_json::from_str(&raw)
                    .map_err(|e| Error::operation("decode_state_entry", e.to_string()))?,
            })
        })
        .transpose()
    }
}

impl SystemSession {
    /// Lists non-terminal workflows whose heartbeat has expired, across
    /// projects. This is the only cross-project read in the engine and
    /// feeds the restart-time reclaim sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn expired_workflows(
        &self,
        heartbeat_expiry_ms: u64,
    ) -> Result<Vec<(WorkflowId, ProjectId, DatasourceId)>> {
        let cutoff = Utc::now()
            - Duration::milliseconds(i64::try_from(heartbeat_expiry_ms).unwrap_or(i64::MAX));
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, datasource_id FROM workflows
             WHERE state IN ('pending', 'running', 'paused') AND heartbeat_at < ?1",
        )?;
        let rows = stmt.query_map(params![to_ts(cutoff)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, project, datasource) = row?;
            out.push((id.parse()?, project.parse()?, datasource.parse()?));
        }
        Ok(out)
    }
}
