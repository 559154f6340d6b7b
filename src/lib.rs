//! VVAT - Volumetric Viewer and Annotation Tool core
//!
//! The data-model core of an N-dimensional volumetric viewer: annotation
//! records with hierarchical collections, a mutation-tracked annotation
//! store, interactive placement tools, the render-layer coordinate
//! transform engine, and the GPU pick-readback pipeline. Rendering, UI,
//! and data fetching live in collaborator crates layered on top.

pub mod coordinates;
pub mod error;
pub mod model;
pub mod picking;
pub mod serialization;
pub mod source;
pub mod status;
pub mod tools;

pub use error::{AnnotationError, TransformError};
pub use model::{Annotation, AnnotationId, AnnotationTag, AnnotationType, Geometry};
pub use serialization::{serialize_annotations, SerializedAnnotations};
pub use source::{AnnotationEvent, AnnotationReference, AnnotationSource};
pub use status::{StatusLog, StatusMessage};
