//! N-dimensional coordinate spaces and the render-layer transform engine.
//!
//! Everything in this module is pure computation over [`ndarray`] matrices:
//! no store access, no side effects. The derivation pipeline runs
//! per frame as configuration changes, so invalid-but-expected states
//! (loading datasets, mismatched declarations) come back as
//! [`TransformError`](crate::error::TransformError) values for the caller
//! to check.

mod chunk;
mod matrix;
mod space;
mod transform;

pub use chunk::{
    get_chunk_display_transform_parameters, get_chunk_position_from_combined_global_local_positions,
    get_chunk_transform_parameters, ChunkDisplayTransformParameters, ChunkTransformParameters,
};
pub use matrix::{from_translation, identity, invert, transform_point};
pub use space::CoordinateSpace;
pub use transform::{
    display_to_layer_coordinates, get_render_layer_transform, layer_to_display_coordinates,
    CoordinateSpaceTransform, RenderLayerTransform,
};
