//! Error types for annotation and transform operations.

use thiserror::Error;

/// Errors that can occur during annotation store operations.
///
/// These represent caller contract violations (duplicate ids, operating on a
/// deleted reference) or malformed snapshot data. User-actionable conditions
/// such as "cannot complete an empty collection" are surfaced through the
/// status-message channel instead and never appear here.
#[derive(Error, Debug)]
pub enum AnnotationError {
    /// An annotation with this id already exists in the store.
    #[error("annotation id already exists: {id}")]
    DuplicateId {
        /// The conflicting annotation id
        id: String,
    },

    /// The operation targeted a reference whose annotation was deleted.
    #[error("annotation was already deleted: {id}")]
    ReferenceDeleted {
        /// The id of the deleted annotation
        id: String,
    },

    /// Required field is missing from serialized annotation JSON.
    #[error("missing required field: {field}")]
    MissingField {
        /// Name of the missing field
        field: String,
    },

    /// Serialized annotation JSON has an invalid structure or value.
    #[error("invalid annotation JSON: {message}")]
    InvalidJson {
        /// Description of the problem
        message: String,
    },

    /// Unknown annotation type discriminant in serialized JSON.
    #[error("unknown annotation type: {name}")]
    UnknownType {
        /// The unrecognized discriminant
        name: String,
    },

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnnotationError {
    /// Create an invalid-JSON error with a message.
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::InvalidJson {
            message: message.into(),
        }
    }

    /// Create a missing-field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

/// Errors from the render-layer transform engine.
///
/// `RankMismatch` and `InvalidChannel` describe configurations that are not
/// ready rather than broken (e.g. a dataset still loading); callers check the
/// `Result` every frame. `Singular` indicates a genuinely unusable transform.
#[derive(Error, Debug, PartialEq)]
pub enum TransformError {
    /// The layer dimensions reachable from the source dimensions do not
    /// match the source dimension count.
    #[error(
        "rank mismatch: {input_rank} source dimensions map to {output_rank} layer dimensions"
    )]
    RankMismatch {
        /// Number of source (model) dimensions present in the data
        input_rank: usize,
        /// Number of reachable layer dimensions
        output_rank: usize,
    },

    /// A channel dimension violates the channel-space constraints.
    #[error("invalid channel dimension {name:?}: {message}")]
    InvalidChannel {
        /// Name of the offending channel dimension
        name: String,
        /// Description of the violated constraint
        message: String,
    },

    /// The composed chunk-to-layer transform has zero determinant.
    #[error("Transform is singular")]
    Singular,

    /// Two coordinate structures that must agree in rank do not.
    #[error("expected rank {expected}, got {actual}")]
    RankInvalid {
        /// The required rank
        expected: usize,
        /// The rank actually supplied
        actual: usize,
    },
}
