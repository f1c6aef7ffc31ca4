//! Tiered-ontology persistence.
//!
//! One row per project. Writes within a finalisation run go through a
//! single transaction so concurrent readers always see a consistent tier 0
//! and tier 1.

use super::{from_json, parse_ts, to_json, to_ts, TenantSession};
use crate::models::Ontology;
use crate::{Error, Result};
use rusqlite::params;

impl TenantSession {
    /// Writes the full ontology row, replacing prior content.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save_ontology(&self, ontology: &Ontology) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO ontologies
                 (project_id, domain_summary, entity_summaries, column_details, finalized_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (project_id) DO UPDATE SET
                 domain_summary = excluded.domain_summary,
                 entity_summaries = excluded.entity_summaries,
                 column_details = excluded.column_details,
                 finalized_at = excluded.finalized_at",
            params![
                self.pid(),
                to_json(&ontology.domain_summary)?,
                to_json(&ontology.entity_summaries)?,
                to_json(&ontology.column_details)?,
                ontology.finalized_at.map(to_ts),
            ],
        )?;
        Ok(())
    }

    /// Overlays tier-2 column details for one table, leaving tiers 0 and 1
    /// untouched. Column enrichment writes per table as chunks complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save_column_details(
        &self,
        table: &str,
        details: &[crate::models::ColumnDetail],
    ) -> Result<()> {
        let mut ontology = self.load_ontology()?.unwrap_or_default();
        ontology
            .column_details
            .insert(table.to_string(), details.to_vec());
        self.save_ontology(&ontology)
    }

    /// Loads the project's ontology, if finalisation has ever run.
    ///
    /// # Errors
    ///
    /// Returns an error if the read or decode fails.
    pub fn load_ontology(&self) -> Result<Option<Ontology>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT domain_summary, entity_summaries, column_details, finalized_at
                 FROM ontologies WHERE project_id = ?1",
                params![self.pid()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(Error::from(other)),
            })?;
        let Some((domain_summary, entity_summaries, column_details, finalized_at)) = row else {
            return Ok(None);
        };
        Ok(Some(Ontology {
            project_id: Some(self.project_id()),
            domain_summary: from_json(&domain_summary)?,
            entity_summaries: from_json(&entity_summaries)?,
            column_details: from_json(&column_details)?,
            finalized_at: finalized_at.as_deref().map(parse_ts).transpose()?,
        }))
    }

    /// Clears tier-1 and tier-2 content before a re-run repopulates them.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn truncate_ontology_tiers(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE ontologies SET entity_summaries = '{}', column_details = '{}'
             WHERE project_id = ?1",
            params![self.pid()],
        )?;
        Ok(())
    }
}
