//! Metadata store.
//!
//! A single `SQLite` database holds every persistent record the engine
//! owns: projects, datasource descriptors, introspected schema, entities,
//! candidates, the tiered ontology, workflow rows, glossary terms, and
//! approved queries. Access goes through a [`TenantSession`], which binds a
//! project id into every statement it issues; the [`SystemSession`] exists
//! only for cross-project maintenance (workflow reclaim sweeps).
//!
//! The connection runs in WAL mode behind a mutex with poison recovery;
//! the mutex serialises writers while WAL keeps readers cheap.

mod candidate_repo;
mod entity_repo;
mod glossary_repo;
mod ontology_repo;
mod project_repo;
mod schema;
mod schema_repo;
mod workflow_repo;

pub use workflow_repo::ClaimOutcome;

use crate::models::ProjectId;
use crate::tenant::TenantContext;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Helper to acquire the connection lock with poison recovery.
///
/// If the mutex is poisoned by a panic in a previous critical section, we
/// recover the inner value and log a warning; the connection state is still
/// valid.
pub(crate) fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("metadata store mutex was poisoned, recovering");
            metrics::counter!("store_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a `SQLite` connection for concurrent use.
fn configure_connection(conn: &Connection) -> Result<()> {
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    let _ = conn.pragma_update(None, "foreign_keys", "ON");
    Ok(())
}

/// The metadata store.
#[derive(Clone)]
pub struct MetaStore {
    conn: Arc<Mutex<Connection>>,
}

impl MetaStore {
    /// Opens (creating if necessary) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the database cannot be opened
    /// or the schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::operation("open_store", format!("{}: {e}", path.display())))?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory store. Used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::operation("open_store", e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        configure_connection(&conn)?;
        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(|e| Error::operation("apply_schema", e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        acquire_lock(&self.conn)
    }

    /// Establishes a tenant session for `ctx`.
    ///
    /// Verifies the pinned project exists before any operation proceeds;
    /// the session's release (its `Drop`) is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TenantSetupFailed`] for the system context or when
    /// the project does not exist.
    pub fn tenant(&self, ctx: &TenantContext) -> Result<TenantSession> {
        let project_id = ctx.require_project()?;
        let exists: bool = {
            let conn = self.lock();
            conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM projects WHERE id = ?1)",
                [project_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| Error::TenantSetupFailed(e.to_string()))?
        };
        if !exists {
            return Err(Error::TenantSetupFailed(format!(
                "no such project: {project_id}"
            )));
        }
        Ok(TenantSession {
            store: self.clone(),
            project_id,
            released: false,
        })
    }

    /// Establishes the system session for background maintenance.
    #[must_use]
    pub fn system(&self) -> SystemSession {
        SystemSession {
            store: self.clone(),
        }
    }
}

/// A project-pinned session over the metadata store.
///
/// Every statement the session issues filters on its project id, so reads
/// and writes cannot cross project boundaries.
pub struct TenantSession {
    store: MetaStore,
    project_id: ProjectId,
    released: bool,
}

impl TenantSession {
    /// The project this session is pinned to.
    #[must_use]
    pub const fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.store.lock()
    }

    pub(crate) fn pid(&self) -> String {
        self.project_id.to_string()
    }

    /// Releases the session. Idempotent; also runs on drop.
    pub fn release(&mut self) {
        self.released = true;
    }
}

impl Drop for TenantSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// A maintenance session with no project pin.
///
/// Only exposes cross-project operations required by background jobs; it
/// cannot read or mutate per-project content.
pub struct SystemSession {
    store: MetaStore,
}

impl SystemSession {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.store.lock()
    }
}

// --- shared row conversion helpers -----------------------------------------

pub(crate) fn to_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::operation("parse_timestamp", format!("{raw}: {e}")))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::operation("encode_json", e.to_string()))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::operation("decode_json", e.to_string()))
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Store fixtures shared by repository tests.

    use super::MetaStore;
    use crate::models::{DatasourceDescriptor, DatasourceKind, DatasourceId, Project, ProjectId};
    use chrono::Utc;

    /// Creates an in-memory store with one project and one datasource.
    pub fn store_with_project() -> (MetaStore, ProjectId, DatasourceId) {
        let store = MetaStore::open_in_memory().unwrap();
        let project = Project {
            id: ProjectId::generate(),
            name: "acme".to_string(),
            allow_suggestions: true,
            created_at: Utc::now(),
        };
        store.create_project(&project).unwrap();
        let ds = DatasourceDescriptor {
            id: DatasourceId::generate(),
            project_id: project.id,
            name: "prod".to_string(),
            kind: DatasourceKind::Sqlite,
            location: ":memory:".to_string(),
            credentials: None,
            selected_tables: Vec::new(),
            created_at: Utc::now(),
        };
        let ctx = crate::tenant::TenantContext::for_project(project.id);
        let session = store.tenant(&ctx).unwrap();
        session.upsert_datasource(&ds).unwrap();
        (store, project.id, ds.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_applies_schema() {
        let store = MetaStore::open_in_memory().unwrap();
        let conn = store.lock();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'workflows'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_tenant_requires_existing_project() {
        let store = MetaStore::open_in_memory().unwrap();
        let ctx = TenantContext::for_project(ProjectId::generate());
        assert!(matches!(
            store.tenant(&ctx),
            Err(Error::TenantSetupFailed(_))
        ));
    }

    #[test]
    fn test_tenant_rejects_system_context() {
        let store = MetaStore::open_in_memory().unwrap();
        assert!(matches!(
            store.tenant(&TenantContext::system()),
            Err(Error::TenantSetupFailed(_))
        ));
    }

    #[test]
    fn test_release_is_idempotent() {
        let (store, project_id, _) = testutil::store_with_project();
        let ctx = TenantContext::for_project(project_id);
        let mut session = store.tenant(&ctx).unwrap();
        session.release();
        session.release();
    }
}
