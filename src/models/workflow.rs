//! Workflow records: phases, states, nodes, progress, and the task queue.
//!
//! A workflow drives five phases in dependency order. Its row carries the
//! owner and heartbeat used by the claim protocol; nodes give per-phase
//! status for the UI; state entries hold per-entity scan data reused across
//! phases.

use super::ids::{DatasourceId, ProjectId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five workflow phases, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// Relationship detection and candidate production.
    Relationships,
    /// Entity discovery.
    Entities,
    /// Ontology finalisation.
    Ontology,
    /// Per-table column enrichment.
    ColumnEnrichment,
    /// Glossary discovery.
    Glossary,
}

impl WorkflowPhase {
    /// All phases in execution order.
    #[must_use]
    pub const fn ordered() -> &'static [Self] {
        &[
            Self::Relationships,
            Self::Entities,
            Self::Ontology,
            Self::ColumnEnrichment,
            Self::Glossary,
        ]
    }

    /// Returns the phase as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Relationships => "relationships",
            Self::Entities => "entities",
            Self::Ontology => "ontology",
            Self::ColumnEnrichment => "column_enrichment",
            Self::Glossary => "glossary",
        }
    }

    /// Parses a phase from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "relationships" => Some(Self::Relationships),
            "entities" => Some(Self::Entities),
            "ontology" => Some(Self::Ontology),
            "column_enrichment" => Some(Self::ColumnEnrichment),
            "glossary" => Some(Self::Glossary),
            _ => None,
        }
    }

    /// The phase that must reach `completed` before this one may start.
    ///
    /// Column enrichment and glossary are sub-phases of ontology: they
    /// require ontology to have started, which the runner models as a
    /// predecessor on the ontology phase.
    #[must_use]
    pub const fn predecessor(&self) -> Option<Self> {
        match self {
            Self::Relationships => None,
            Self::Entities => Some(Self::Relationships),
            Self::Ontology => Some(Self::Entities),
            Self::ColumnEnrichment | Self::Glossary => Some(Self::Ontology),
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a workflow or node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    /// Claimed but not yet running.
    Pending,
    /// Actively executing.
    Running,
    /// Suspended; resumable.
    Paused,
    /// Finished successfully. Terminal.
    Completed,
    /// Finished with an error. Terminal.
    Failed,
    /// Cancelled by request. Terminal.
    Cancelled,
}

impl WorkflowState {
    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the state as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a state from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress counters for a workflow or node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    /// Completed work units.
    pub current: u64,
    /// Total work units, when known.
    pub total: u64,
    /// Percentage in `[0, 100]`.
    pub percentage: f64,
    /// Human-readable status line.
    pub message: String,
}

impl Progress {
    /// Builds progress from counters, computing the percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(current: u64, total: u64, message: impl Into<String>) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            (current as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        };
        Self {
            current,
            total,
            percentage,
            message: message.into(),
        }
    }
}

/// A queued work unit, snapshotted into the workflow row for polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    /// Stable task key, unique within the workflow. Idempotent re-execution
    /// keys off this.
    pub key: String,
    /// Phase the task belongs to.
    pub phase: WorkflowPhase,
    /// Whether the task has completed.
    pub done: bool,
}

/// Snapshot of the per-node task queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskQueueSnapshot {
    /// Tasks in enqueue order.
    pub tasks: Vec<QueuedTask>,
}

impl TaskQueueSnapshot {
    /// Keys of tasks already completed, for resume.
    #[must_use]
    pub fn completed_keys(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.done)
            .map(|t| t.key.as_str())
            .collect()
    }
}

/// The persisted workflow row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Workflow identifier.
    pub id: WorkflowId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Datasource under extraction.
    pub datasource_id: DatasourceId,
    /// Phase currently (or last) executing.
    pub phase: WorkflowPhase,
    /// Lifecycle state.
    pub state: WorkflowState,
    /// Accumulated progress.
    pub progress: Progress,
    /// Task-queue snapshot for polling and resume.
    pub task_queue: TaskQueueSnapshot,
    /// Name of the node currently executing.
    pub current_node: Option<String>,
    /// Owner process identifier.
    pub owner_id: String,
    /// Last heartbeat time.
    pub heartbeat_at: DateTime<Utc>,
    /// Failure message when state is `failed`.
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// A per-phase node record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Owning workflow.
    pub workflow_id: WorkflowId,
    /// The phase this node runs.
    pub phase: WorkflowPhase,
    /// Node state.
    pub state: WorkflowState,
    /// Failure message, surfaced per node in the UI.
    pub error_message: Option<String>,
}

/// Kind discriminator for workflow state entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    /// Workflow-global state.
    Global,
    /// Per-entity state keyed by entity key.
    Entity,
}

impl StateKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Entity => "entity",
        }
    }

    /// Parses a kind from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global" => Some(Self::Global),
            "entity" => Some(Self::Entity),
            _ => None,
        }
    }
}

/// Per-entity intermediate state carried between phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStateEntry {
    /// Owning workflow.
    pub workflow_id: WorkflowId,
    /// `global` or `entity`.
    pub kind: StateKind,
    /// Entity key; empty for global entries.
    pub key: String,
    /// Gathered scan data, reused across phases.
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_and_predecessors() {
        let phases = WorkflowPhase::ordered();
        assert_eq!(phases.len(), 5);
        assert_eq!(WorkflowPhase::Relationships.predecessor(), None);
        assert_eq!(
            WorkflowPhase::Entities.predecessor(),
            Some(WorkflowPhase::Relationships)
        );
        assert_eq!(
            WorkflowPhase::Ontology.predecessor(),
            Some(WorkflowPhase::Entities)
        );
        assert_eq!(
            WorkflowPhase::ColumnEnrichment.predecessor(),
            Some(WorkflowPhase::Ontology)
        );
        assert_eq!(
            WorkflowPhase::Glossary.predecessor(),
            Some(WorkflowPhase::Ontology)
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!WorkflowState::Pending.is_terminal());
        assert!(!WorkflowState::Running.is_terminal());
        assert!(!WorkflowState::Paused.is_terminal());
        assert!(WorkflowState::Completed.is_terminal());
        assert!(WorkflowState::Failed.is_terminal());
        assert!(WorkflowState::Cancelled.is_terminal());
    }

    #[test]
    fn test_progress_percentage() {
        let p = Progress::of(3, 12, "scanning");
        assert!((p.percentage - 25.0).abs() < f64::EPSILON);
        let empty = Progress::of(0, 0, "idle");
        assert!(empty.percentage.abs() < f64::EPSILON);
    }

    #[test]
    fn test_state_round_trip() {
        for s in [
            WorkflowState::Pending,
            WorkflowState::Running,
            WorkflowState::Paused,
            WorkflowState::Completed,
            WorkflowState::Failed,
            WorkflowState::Cancelled,
        ] {
            assert_eq!(WorkflowState::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_completed_keys() {
        let snapshot = TaskQueueSnapshot {
            tasks: vec![
                QueuedTask {
                    key: "scan:users".to_string(),
                    phase: WorkflowPhase::Relationships,
                    done: true,
                },
                QueuedTask {
                    key: "scan:orders".to_string(),
                    phase: WorkflowPhase::Relationships,
                    done: false,
                },
            ],
        };
        assert_eq!(snapshot.completed_keys(), vec!["scan:users"]);
    }
}
