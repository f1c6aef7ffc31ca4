//! Project and datasource persistence.

use super::{from_json, parse_ts, to_json, to_ts, MetaStore, TenantSession};
use crate::models::{
    DatasourceDescriptor, DatasourceId, DatasourceKind, Project, ProjectId,
};
use crate::{Error, Result};
use rusqlite::params;

impl MetaStore {
    /// Creates a project. Bootstrap operation; not tenant-scoped because
    /// the tenant does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the id already exists.
    pub fn create_project(&self, project: &Project) -> Result<()> {
        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT INTO projects (id, name, allow_suggestions, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT DO NOTHING",
            params![
                project.id.to_string(),
                project.name,
                project.allow_suggestions,
                to_ts(project.created_at),
            ],
        )?;
        if inserted == 0 {
            return Err(Error::Conflict(format!(
                "project {} already exists",
                project.id
            )));
        }
        Ok(())
    }

    /// Fetches a project by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when absent.
    pub fn get_project(&self, id: ProjectId) -> Result<Project> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, name, allow_suggestions, created_at FROM projects WHERE id = ?1",
            [id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound(format!("project {id}")),
            other => other.into(),
        })
        .and_then(|(id, name, allow_suggestions, created_at)| {
            Ok(Project {
                id: id.parse()?,
                name,
                allow_suggestions,
                created_at: parse_ts(&created_at)?,
            })
        })
    }
}

impl TenantSession {
    /// Inserts or replaces a datasource descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor belongs to a different project
    /// or the write fails.
    pub fn upsert_datasource(&self, ds: &DatasourceDescriptor) -> Result<()> {
        if ds.project_id != self.project_id() {
            return Err(Error::TenantSetupFailed(
                "datasource belongs to a different project".to_string(),
            ));
        }
        let conn = self.lock();
        conn.execute(
            "INSERT INTO datasources
                 (id, project_id, name, kind, location, selected_tables, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 kind = excluded.kind,
                 location = excluded.location,
                 selected_tables = excluded.selected_tables",
            params![
                ds.id.to_string(),
                self.pid(),
                ds.name,
                ds.kind.as_str(),
                ds.location,
                to_json(&ds.selected_tables)?,
                to_ts(ds.created_at),
            ],
        )?;
        Ok(())
    }

    /// Fetches a datasource descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when absent or owned by another project.
    pub fn get_datasource(&self, id: DatasourceId) -> Result<DatasourceDescriptor> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, name, kind, location, selected_tables, created_at
                 FROM datasources WHERE id = ?1 AND project_id = ?2",
                params![id.to_string(), self.pid()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Error::NotFound(format!("datasource {id}"))
                },
                other => other.into(),
            })?;
        let (id, name, kind, location, selected_tables, created_at) = row;
        Ok(DatasourceDescriptor {
            id: id.parse()?,
            project_id: self.project_id(),
            name,
            kind: DatasourceKind::parse(&kind)
                .ok_or_else(|| Error::operation("decode_datasource", format!("kind {kind}")))?,
            location,
            credentials: None,
            selected_tables: from_json(&selected_tables)?,
            created_at: parse_ts(&created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::store_with_project;
    use super::*;
    use crate::tenant::TenantContext;
    use chrono::Utc;

    #[test]
    fn test_create_project_conflict() {
        let store = MetaStore::open_in_memory().unwrap();
        let project = Project {
            id: ProjectId::generate(),
            name: "p".to_string(),
            allow_suggestions: false,
            created_at: Utc::now(),
        };
        store.create_project(&project).unwrap();
        assert!(matches!(
            store.create_project(&project),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_get_project_round_trip() {
        let (store, project_id, _) = store_with_project();
        let fetched = store.get_project(project_id).unwrap();
        assert_eq!(fetched.name, "acme");
        assert!(fetched.allow_suggestions);
    }

    #[test]
    fn test_datasource_not_visible_across_projects() {
        let (store, _, ds_id) = store_with_project();
        let other = Project {
            id: ProjectId::generate(),
            name: "other".to_string(),
            allow_suggestions: false,
            created_at: Utc::now(),
        };
        store.create_project(&other).unwrap();
        let ctx = TenantContext::for_project(other.id);
        let session = store.tenant(&ctx).unwrap();
        assert!(matches!(
            session.get_datasource(ds_id),
            Err(Error::NotFound(_))
        ));
    }
}
