//! Relationship-candidate persistence and review decisions.

use super::{from_json, to_json, TenantSession};
use crate::models::{
    CandidateId, CandidateMetrics, Cardinality, DatasourceId, DetectionMethod,
    RelationshipCandidate, ReviewStatus, WorkflowId,
};
use crate::{Error, Result};
use rusqlite::params;

impl TenantSession {
    /// Inserts a candidate, replacing any prior candidate for the same
    /// column pair in the same workflow (idempotent re-runs).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_candidate(&self, candidate: &RelationshipCandidate) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO relationship_candidates
                 (id, project_id, datasource_id, workflow_id, source_table, source_column,
                  target_table, target_column, detection_method, confidence, cardinality,
                  metrics, reasoning, status, is_required, user_decision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                candidate.id.to_string(),
                self.pid(),
                candidate.datasource_id.to_string(),
                candidate.workflow_id.to_string(),
                candidate.source_table,
                candidate.source_column,
                candidate.target_table,
                candidate.target_column,
                candidate.detection_method.as_str(),
                candidate.confidence,
                candidate.cardinality.as_str(),
                to_json(&candidate.metrics)?,
                candidate.reasoning,
                candidate.status.as_str(),
                candidate.is_required,
                candidate.user_decision.map(|d| d.as_str()),
            ],
        )?;
        Ok(())
    }

    /// Lists candidates for a datasource, newest workflow only.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn list_candidates(
        &self,
        datasource_id: DatasourceId,
        workflow_id: WorkflowId,
    ) -> Result<Vec<RelationshipCandidate>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, source_table, source_column, target_table, target_column,
                    detection_method, confidence, cardinality, metrics, reasoning,
                    status, is_required, user_decision
             FROM relationship_candidates
             WHERE datasource_id = ?1 AND workflow_id = ?2 AND project_id = ?3
             ORDER BY source_table, source_column",
        )?;
        let rows = stmt.query_map(
            params![datasource_id.to_string(), workflow_id.to_string(), self.pid()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, bool>(11)?,
                    row.get::<_, Option<String>>(12)?,
                ))
            },
        )?;
        let mut out = Vec::new();
        for row in rows {
            let (
                id,
                source_table,
                source_column,
                target_table,
                target_column,
                method,
                confidence,
                cardinality,
                metrics,
                reasoning,
                status,
                is_required,
                user_decision,
            ) = row?;
            out.push(RelationshipCandidate {
                id: id.parse::<CandidateId>()?,
                project_id: self.project_id(),
                datasource_id,
                workflow_id,
                source_table,
                source_column,
                target_table,
                target_column,
                detection_method: DetectionMethod::parse(&method)
                    .unwrap_or(DetectionMethod::ValueMatch),
                confidence,
                cardinality: Cardinality::parse(&cardinality).unwrap_or(Cardinality::Unknown),
                metrics: from_json::<CandidateMetrics>(&metrics)?,
                reasoning,
                status: ReviewStatus::parse(&status).unwrap_or(ReviewStatus::Pending),
                is_required,
                user_decision: user_decision.as_deref().and_then(ReviewStatus::parse),
            });
        }
        Ok(out)
    }

    /// Records the user's decision on a candidate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown candidate,
    /// [`Error::Conflict`] when a decision was already made, and
    /// [`Error::InvalidInput`] for a `pending` decision.
    pub fn decide_candidate(&self, id: CandidateId, decision: ReviewStatus) -> Result<()> {
        if decision == ReviewStatus::Pending {
            return Err(Error::InvalidInput(
                "decision must be accepted or rejected".to_string(),
            ));
        }
        let conn = self.lock();
        let existing: Option<Option<String>> = conn
            .query_row(
                "SELECT user_decision FROM relationship_candidates
                 WHERE id = ?1 AND project_id = ?2",
                params![id.to_string(), self.pid()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Error::NotFound(format!("candidate {id}"))
                },
                other => other.into(),
            })
            .map(Some)?;
        if let Some(Some(prior)) = existing {
            return Err(Error::Conflict(format!(
                "candidate {id} already decided: {prior}"
            )));
        }
        conn.execute(
            "UPDATE relationship_candidates
             SET status = ?1, user_decision = ?1, is_required = 0
             WHERE id = ?2 AND project_id = ?3",
            params![decision.as_str(), id.to_string(), self.pid()],
        )?;
        Ok(())
    }

    /// Counts candidates that still block `save_relationships`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn count_blocking_candidates(&self, workflow_id: WorkflowId) -> Result<i64> {
        let conn = self.lock();
        conn.query_row(
            "SELECT count(*) FROM relationship_candidates
             WHERE workflow_id = ?1 AND project_id = ?2
               AND is_required = 1 AND status = 'pending'",
            params![workflow_id.to_string(), self.pid()],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    /// Deletes every candidate produced by a workflow. Used on cancel.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn discard_candidates(&self, workflow_id: WorkflowId) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM relationship_candidates WHERE workflow_id = ?1 AND project_id = ?2",
            params![workflow_id.to_string(), self.pid()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::store_with_project;
    use super::*;
    use crate::models::ProjectId;
    use crate::tenant::TenantContext;

    fn candidate(
        project_id: ProjectId,
        datasource_id: DatasourceId,
        workflow_id: WorkflowId,
        source_column: &str,
        status: ReviewStatus,
        is_required: bool,
    ) -> RelationshipCandidate {
        RelationshipCandidate {
            id: CandidateId::generate(),
            project_id,
            datasource_id,
            workflow_id,
            source_table: "sessions".to_string(),
            source_column: source_column.to_string(),
            target_table: "users".to_string(),
            target_column: "user_id".to_string(),
            detection_method: DetectionMethod::ValueMatch,
            confidence: 0.6,
            cardinality: Cardinality::ManyToOne,
            metrics: CandidateMetrics {
                value_match_rate: Some(0.6),
                ..CandidateMetrics::default()
            },
            reasoning: None,
            status,
            is_required,
            user_decision: None,
        }
    }

    #[test]
    fn test_upsert_and_list() {
        let (store, project_id, ds_id) = store_with_project();
        let session = store
            .tenant(&TenantContext::for_project(project_id))
            .unwrap();
        let wf = WorkflowId::generate();
        let c = candidate(project_id, ds_id, wf, "visitor_id", ReviewStatus::Pending, true);
        session.upsert_candidate(&c).unwrap();
        // replacing the same column pair keeps a single row
        session.upsert_candidate(&c).unwrap();

        let listed = session.list_candidates(ds_id, wf).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].blocks_save());
        assert_eq!(listed[0].metrics.value_match_rate, Some(0.6));
    }

    #[test]
    fn test_decide_candidate_once() {
        let (store, project_id, ds_id) = store_with_project();
        let session = store
            .tenant(&TenantContext::for_project(project_id))
            .unwrap();
        let wf = WorkflowId::generate();
        let c = candidate(project_id, ds_id, wf, "visitor_id", ReviewStatus::Pending, true);
        session.upsert_candidate(&c).unwrap();

        session.decide_candidate(c.id, ReviewStatus::Accepted).unwrap();
        assert_eq!(session.count_blocking_candidates(wf).unwrap(), 0);

        assert!(matches!(
            session.decide_candidate(c.id, ReviewStatus::Rejected),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_decide_rejects_pending() {
        let (store, project_id, ds_id) = store_with_project();
        let session = store
            .tenant(&TenantContext::for_project(project_id))
            .unwrap();
        let wf = WorkflowId::generate();
        let c = candidate(project_id, ds_id, wf, "visitor_id", ReviewStatus::Pending, true);
        session.upsert_candidate(&c).unwrap();
        assert!(matches!(
            session.decide_candidate(c.id, ReviewStatus::Pending),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_discard_candidates() {
        let (store, project_id, ds_id) = store_with_project();
        let session = store
            .tenant(&TenantContext::for_project(project_id))
            .unwrap();
        let wf = WorkflowId::generate();
        for (i, col) in ["visitor_id", "host_id"].iter().enumerate() {
            let required = i == 0;
            session
                .upsert_candidate(&candidate(
                    project_id,
                    ds_id,
                    wf,
                    col,
                    ReviewStatus::Pending,
                    required,
                ))
                .unwrap();
        }
        assert_eq!(session.count_blocking_candidates(wf).unwrap(), 1);
        session.discard_candidates(wf).unwrap();
        assert!(session.list_candidates(ds_id, wf).unwrap().is_empty());
    }
}
