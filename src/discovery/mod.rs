//! Deterministic discovery: column scanning, entity identification, and
//! relationship detection.

mod entities;
mod relationships;
mod scan;
mod singular;

pub use entities::EntityDiscoveryService;
pub use relationships::{RelationshipDetectionService, VALUE_MATCH_THRESHOLD};
pub use scan::{classify_joinability, joinability_score, ColumnScanService};
pub use singular::{entity_name_from_table, singularise};
