//! Secondary index definitions.
//!
//! Only the registry interface exists: definitions are persisted in the
//! collection metadata and listed back, but no index data structures
//! are built or consulted by the read path.

use serde::{Deserialize, Serialize};

/// Definition of a secondary index over one document field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// The indexed field name.
    pub field: String,
    /// Whether values must be unique across the collection.
    pub unique: bool,
}

impl IndexDefinition {
    /// Creates a non-unique index definition for a field.
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            unique: false,
        }
    }

    /// Marks the definition unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}
