//! Command-line surface.
//!
//! Thin operational wrapper over the engine container: create a project
//! and datasource, run a workflow, poll status, review and save
//! relationships, read the ontology, and execute approved queries.

use crate::models::{
    DatasourceDescriptor, DatasourceId, DatasourceKind, OntologyDepth, Project, ProjectId,
    QueryId,
};
use crate::ontology::Page;
use crate::services::EngineContainer;
use crate::tenant::TenantContext;
use crate::{Error, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Multi-tenant schema-understanding engine.
#[derive(Debug, Parser)]
#[command(name = "ontoloom", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand.
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Creates a project with a SQLite datasource.
    Init {
        /// Project display name.
        #[arg(long)]
        name: String,
        /// Path to the customer SQLite database.
        #[arg(long)]
        db: PathBuf,
        /// Allow LLM clients to suggest approved queries.
        #[arg(long)]
        allow_suggestions: bool,
    },
    /// Runs the full ontology workflow and waits for it to finish.
    Scan {
        /// Project id.
        #[arg(long)]
        project: ProjectId,
        /// Datasource id.
        #[arg(long)]
        datasource: DatasourceId,
    },
    /// Prints the current workflow status as JSON.
    Status {
        /// Project id.
        #[arg(long)]
        project: ProjectId,
        /// Datasource id.
        #[arg(long)]
        datasource: DatasourceId,
    },
    /// Cancels the live workflow.
    Cancel {
        /// Project id.
        #[arg(long)]
        project: ProjectId,
        /// Datasource id.
        #[arg(long)]
        datasource: DatasourceId,
    },
    /// Promotes accepted relationship candidates.
    Save {
        /// Project id.
        #[arg(long)]
        project: ProjectId,
        /// Datasource id.
        #[arg(long)]
        datasource: DatasourceId,
    },
    /// Reads the ontology at a depth.
    Ontology {
        /// Project id.
        #[arg(long)]
        project: ProjectId,
        /// Datasource id.
        #[arg(long)]
        datasource: DatasourceId,
        /// domain, entities, tables, or columns.
        #[arg(long, default_value = "domain")]
        depth: String,
        /// Rows to skip.
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Maximum rows.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Lists glossary terms.
    Glossary {
        /// Project id.
        #[arg(long)]
        project: ProjectId,
    },
    /// Executes an approved query with JSON parameters.
    Query {
        /// Project id.
        #[arg(long)]
        project: ProjectId,
        /// Datasource id.
        #[arg(long)]
        datasource: DatasourceId,
        /// Approved query id.
        #[arg(long)]
        id: QueryId,
        /// Parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
        /// Row limit.
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| Error::operation("render_json", e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

/// Dispatches a parsed command against the container.
///
/// # Errors
///
/// Propagates engine errors to the binary edge.
pub fn run(container: &EngineContainer, command: Command) -> Result<()> {
    match command {
        Command::Init {
            name,
            db,
            allow_suggestions,
        } => {
            let project = Project {
                id: ProjectId::generate(),
                name,
                allow_suggestions,
                created_at: Utc::now(),
            };
            container.store().create_project(&project)?;
            let descriptor = DatasourceDescriptor {
                id: DatasourceId::generate(),
                project_id: project.id,
                name: "default".to_string(),
                kind: DatasourceKind::Sqlite,
                location: db.display().to_string(),
                credentials: None,
                selected_tables: Vec::new(),
                created_at: Utc::now(),
            };
            container
                .store()
                .tenant(&TenantContext::for_project(project.id))?
                .upsert_datasource(&descriptor)?;
            println!("project {}", project.id);
            println!("datasource {}", descriptor.id);
            Ok(())
        },
        Command::Scan {
            project,
            datasource,
        } => {
            let id = container.workflows().start(project, datasource)?;
            println!("workflow {id}");
            loop {
                std::thread::sleep(Duration::from_secs(1));
                let status = container.workflows().status(project, datasource)?;
                eprintln!(
                    "{} {} {:.0}% {}",
                    status.workflow.phase,
                    status.workflow.state,
                    status.workflow.progress.percentage,
                    status.workflow.progress.message
                );
                if status.workflow.state.is_terminal() {
                    print_json(&status)?;
                    break;
                }
            }
            Ok(())
        },
        Command::Status {
            project,
            datasource,
        } => print_json(&container.workflows().status(project, datasource)?),
        Command::Cancel {
            project,
            datasource,
        } => container.workflows().cancel(project, datasource),
        Command::Save {
            project,
            datasource,
        } => {
            let promoted = container.workflows().save_relationships(project, datasource)?;
            println!("promoted {promoted}");
            Ok(())
        },
        Command::Ontology {
            project,
            datasource,
            depth,
            offset,
            limit,
        } => {
            let depth = OntologyDepth::parse(&depth)
                .ok_or_else(|| Error::InvalidInput(format!("unknown depth '{depth}'")))?;
            let view =
                container.get_ontology(project, datasource, depth, Page { offset, limit })?;
            print_json(&view)
        },
        Command::Glossary { project } => print_json(&container.list_glossary(project)?),
        Command::Query {
            project,
            datasource,
            id,
            params,
            limit,
        } => {
            let parameters: std::collections::HashMap<String, serde_json::Value> =
                serde_json::from_str(&params)
                    .map_err(|e| Error::InvalidInput(format!("params must be JSON: {e}")))?;
            let result =
                container.execute_approved_query(project, datasource, id, &parameters, limit)?;
            print_json(&result)
        },
    }
}
