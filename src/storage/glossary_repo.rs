//! Glossary-term and approved-query persistence.
//!
//! Both use optimistic updates keyed by `(project, name)`.

use super::{from_json, parse_ts, to_json, to_ts, TenantSession};
use crate::models::{
    ApprovalStatus, ApprovedQuery, GlossarySource, GlossaryTerm, QueryId, TermId,
};
use crate::{Error, Result};
use chrono::Utc;
use rusqlite::params;

impl TenantSession {
    /// Creates a glossary term.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the term already exists for the
    /// project.
    pub fn create_glossary_term(&self, term: &GlossaryTerm) -> Result<()> {
        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT INTO glossary_terms
                 (id, project_id, term, definition, defining_sql, base_table,
                  output_columns, aliases, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (project_id, term) DO NOTHING",
            params![
                term.id.to_string(),
                self.pid(),
                term.term,
                term.definition,
                term.defining_sql,
                term.base_table,
                to_json(&term.output_columns)?,
                to_json(&term.aliases)?,
                term.source.as_str(),
                to_ts(term.created_at),
            ],
        )?;
        if inserted == 0 {
            return Err(Error::Conflict(format!(
                "glossary term '{}' already exists",
                term.term
            )));
        }
        Ok(())
    }

    /// Updates a term's definition, SQL, and aliases.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown term.
    pub fn update_glossary_term(&self, term: &GlossaryTerm) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE glossary_terms SET
                 definition = ?1, defining_sql = ?2, base_table = ?3,
                 output_columns = ?4, aliases = ?5
             WHERE project_id = ?6 AND term = ?7",
            params![
                term.definition,
                term.defining_sql,
                term.base_table,
                to_json(&term.output_columns)?,
                to_json(&term.aliases)?,
                self.pid(),
                term.term,
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("glossary term '{}'", term.term)));
        }
        Ok(())
    }

    /// Deletes a term by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown term.
    pub fn delete_glossary_term(&self, term: &str) -> Result<()> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM glossary_terms WHERE project_id = ?1 AND term = ?2",
            params![self.pid(), term],
        )?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("glossary term '{term}'")));
        }
        Ok(())
    }

    /// Lists every glossary term for the project.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn list_glossary_terms(&self) -> Result<Vec<GlossaryTerm>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, term, definition, defining_sql, base_table, output_columns,
                    aliases, source, created_at
             FROM glossary_terms WHERE project_id = ?1 ORDER BY term",
        )?;
        let rows = stmt.query_map(params![self.pid()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, term, definition, defining_sql, base_table, output_columns, aliases, source, created_at) =
                row?;
            out.push(GlossaryTerm {
                id: id.parse::<TermId>()?,
                project_id: self.project_id(),
                term,
                definition,
                defining_sql,
                base_table,
                output_columns: from_json(&output_columns)?,
                aliases: from_json(&aliases)?,
                source: GlossarySource::parse(&source).unwrap_or(GlossarySource::Manual),
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(out)
    }

    /// Creates an approved query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the name already exists for the
    /// project.
    pub fn create_approved_query(&self, query: &ApprovedQuery) -> Result<()> {
        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT INTO approved_queries
                 (id, project_id, name, description, sql_template, parameters,
                  is_enabled, approval_status, output_columns, usage_count,
                  last_used_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT (project_id, name) DO NOTHING",
            params![
                query.id.to_string(),
                self.pid(),
                query.name,
                query.description,
                query.sql_template,
                to_json(&query.parameters)?,
                query.is_enabled,
                query.approval_status.as_str(),
                to_json(&query.output_columns)?,
                query.usage_count,
                query.last_used_at.map(to_ts),
                to_ts(query.created_at),
            ],
        )?;
        if inserted == 0 {
            return Err(Error::Conflict(format!(
                "approved query '{}' already exists",
                query.name
            )));
        }
        Ok(())
    }

    /// Fetches an approved query by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when absent.
    pub fn get_approved_query(&self, id: QueryId) -> Result<ApprovedQuery> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, name, description, sql_template, parameters, is_enabled,
                        approval_status, output_columns, usage_count, last_used_at, created_at
                 FROM approved_queries WHERE id = ?1 AND project_id = ?2",
                params![id.to_string(), self.pid()],
                map_query_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Error::NotFound(format!("approved query {id}"))
                },
                other => other.into(),
            })?;
        raw_to_query(row, self.project_id())
    }

    /// Lists enabled approved queries for the project.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn list_approved_queries(&self, enabled_only: bool) -> Result<Vec<ApprovedQuery>> {
        let conn = self.lock();
        let sql = if enabled_only {
            "SELECT id, name, description, sql_template, parameters, is_enabled,
                    approval_status, output_columns, usage_count, last_used_at, created_at
             FROM approved_queries
             WHERE project_id = ?1 AND is_enabled = 1 AND approval_status = 'approved'
             ORDER BY name"
        } else {
            "SELECT id, name, description, sql_template, parameters, is_enabled,
                    approval_status, output_columns, usage_count, last_used_at, created_at
             FROM approved_queries WHERE project_id = ?1 ORDER BY name"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![self.pid()], map_query_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(raw_to_query(row?, self.project_id())?);
        }
        Ok(out)
    }

    /// Increments usage and stamps the last execution time.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn record_query_usage(&self, id: QueryId) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE approved_queries
             SET usage_count = usage_count + 1, last_used_at = ?1
             WHERE id = ?2 AND project_id = ?3",
            params![to_ts(Utc::now()), id.to_string(), self.pid()],
        )?;
        Ok(())
    }
}

type RawQueryRow = (
    String,
    String,
    String,
    String,
    String,
    bool,
    String,
    String,
    i64,
    Option<String>,
    String,
);

fn map_query_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawQueryRow> {
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
    ))
}

fn raw_to_query(row: RawQueryRow, project_id: crate::models::ProjectId) -> Result<ApprovedQuery> {
    let (
        id,
        name,
        description,
        sql_template,
        parameters,
        is_enabled,
        approval_status,
        output_columns,
        usage_count,
        last_used_at,
        created_at,
    ) = row;
    Ok(ApprovedQuery {
        id: id.parse::<QueryId>()?,
        project_id,
        name,
        description,
        sql_template,
        parameters: from_json(&parameters)?,
        is_enabled,
        approval_status: ApprovalStatus::parse(&approval_status).unwrap_or(ApprovalStatus::Pending),
        output_columns: from_json(&output_columns)?,
        usage_count,
        last_used_at: last_used_at.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::testutil::store_with_project;
    use super::*;
    use crate::models::{ParamType, ParameterDef, ProjectId};
    use crate::tenant::TenantContext;

    fn term(project_id: ProjectId, name: &str) -> GlossaryTerm {
        GlossaryTerm {
            id: TermId::generate(),
            project_id,
            term: name.to_string(),
            definition: "a paying customer".to_string(),
            defining_sql: "SELECT id FROM customers WHERE active = 1".to_string(),
            base_table: Some("customers".to_string()),
            output_columns: vec!["id".to_string()],
            aliases: vec!["buyer".to_string()],
            source: GlossarySource::Inferred,
            created_at: Utc::now(),
        }
    }

    fn query(project_id: ProjectId, name: &str) -> ApprovedQuery {
        ApprovedQuery {
            id: QueryId::generate(),
            project_id,
            name: name.to_string(),
            description: "orders for a customer".to_string(),
            sql_template: "SELECT * FROM orders WHERE customer_id = {{customer_id}}".to_string(),
            parameters: vec![ParameterDef {
                name: "customer_id".to_string(),
                param_type: ParamType::Uuid,
                description: None,
                required: true,
                default: None,
            }],
            is_enabled: true,
            approval_status: ApprovalStatus::Approved,
            output_columns: Vec::new(),
            usage_count: 0,
            last_used_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_glossary_crud() {
        let (store, project_id, _) = store_with_project();
        let session = store
            .tenant(&TenantContext::for_project(project_id))
            .unwrap();
        let t = term(project_id, "Active Customer");
        session.create_glossary_term(&t).unwrap();
        assert!(matches!(
            session.create_glossary_term(&term(project_id, "Active Customer")),
            Err(Error::Conflict(_))
        ));

        let mut updated = t.clone();
        updated.definition = "revised".to_string();
        session.update_glossary_term(&updated).unwrap();

        let listed = session.list_glossary_terms().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].definition, "revised");
        assert_eq!(listed[0].aliases, vec!["buyer"]);

        session.delete_glossary_term("Active Customer").unwrap();
        assert!(matches!(
            session.delete_glossary_term("Active Customer"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_approved_query_round_trip_and_usage() {
        let (store, project_id, _) = store_with_project();
        let session = store
            .tenant(&TenantContext::for_project(project_id))
            .unwrap();
        let q = query(project_id, "orders_by_customer");
        session.create_approved_query(&q).unwrap();

        let fetched = session.get_approved_query(q.id).unwrap();
        assert_eq!(fetched.parameters[0].param_type, ParamType::Uuid);
        assert_eq!(fetched.usage_count, 0);

        session.record_query_usage(q.id).unwrap();
        let fetched = session.get_approved_query(q.id).unwrap();
        assert_eq!(fetched.usage_count, 1);
        assert!(fetched.last_used_at.is_some());
    }

    #[test]
    fn test_enabled_only_filter() {
        let (store, project_id, _) = store_with_project();
        let session = store
            .tenant(&TenantContext::for_project(project_id))
            .unwrap();
        let mut pending = query(project_id, "pending_one");
        pending.approval_status = ApprovalStatus::Pending;
        pending.is_enabled = false;
        session.create_approved_query(&pending).unwrap();
        session
            .create_approved_query(&query(project_id, "live_one"))
            .unwrap();

        assert_eq!(session.list_approved_queries(true).unwrap().len(), 1);
        assert_eq!(session.list_approved_queries(false).unwrap().len(), 2);
    }
}
