//! Entity identifiers
//!
//! All ids are ULIDs: sortable by creation order, which keeps JSON dumps and
//! timeline listings in a stable, human-legible sequence without an extra
//! "created_at" sort key.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Generate a new identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Ulid::from_string(s)?))
            }
        }
    };
}

id_type!(BlueprintId);
id_type!(ModuleId);
id_type!(ProcessId);
id_type!(NfrId);
id_type!(TaskTreeId);
id_type!(TaskId);
id_type!(AcceptanceTestId);
id_type!(CheckpointId);
id_type!(QueenId);
id_type!(WorkerId);
id_type!(EventId);
id_type!(DecisionId);
