//! Data models for annotation records.

mod annotation;
mod tag;

pub use annotation::{
    random_annotation_id, type_handler, Annotation, AnnotationId, AnnotationType,
    AnnotationTypeHandler, CollectionState, Geometry,
};
pub use tag::AnnotationTag;
