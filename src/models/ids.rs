//! Typed identifiers for persistent entities.
//!
//! Every identifier wraps a UUID. The newtypes exist so that a workflow id
//! can never be passed where a project id is expected; storage code converts
//! through [`std::fmt::Display`] / [`std::str::FromStr`] at the SQL boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the inner UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = crate::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| crate::Error::InvalidInput(format!("invalid uuid: {s}")))
            }
        }
    };
}

define_id!(
    /// Identifies a project, the tenancy root.
    ProjectId
);
define_id!(
    /// Identifies a datasource connection descriptor.
    DatasourceId
);
define_id!(
    /// Identifies an introspected table.
    TableId
);
define_id!(
    /// Identifies an introspected column.
    ColumnId
);
define_id!(
    /// Identifies a discovered ontology entity.
    EntityId
);
define_id!(
    /// Identifies an accepted entity relationship.
    RelationshipId
);
define_id!(
    /// Identifies a relationship candidate awaiting review.
    CandidateId
);
define_id!(
    /// Identifies an ontology workflow run.
    WorkflowId
);
define_id!(
    /// Identifies a business glossary term.
    TermId
);
define_id!(
    /// Identifies an approved parameterised query.
    QueryId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        let a = ProjectId::generate();
        let b = ProjectId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_round_trip_through_string() {
        let id = WorkflowId::generate();
        let parsed: WorkflowId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<EntityId>().is_err());
    }
}
