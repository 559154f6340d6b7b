//! Tag data model for annotation tags.
//!
//! Tags are store-scoped labels that any annotation can carry via its
//! `tag_ids` set. Tag ids are allocated monotonically by the store and are
//! never shared across stores.

use serde::{Deserialize, Serialize};

/// A tag with a numeric id and display label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnnotationTag {
    /// Unique identifier for the tag within its store.
    pub id: u32,
    /// Display label of the tag.
    pub label: String,
}

impl AnnotationTag {
    /// Create a new tag with the given id and label.
    pub fn new(id: u32, label: &str) -> Self {
        Self {
            id,
            label: label.to_string(),
        }
    }
}
