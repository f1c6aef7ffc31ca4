//! LLM-driven enrichment: column semantics, ontology finalisation, and
//! glossary discovery.

mod columns;
mod finalize;
mod glossary;

pub use columns::{ColumnEnrichmentService, CHUNK_SIZE};
pub use finalize::{detect_conventions, OntologyFinalizeService};
pub use glossary::{validate_defining_sql, GlossaryDiscoveryService};
