//! Chunk-space transform composition.
//!
//! A chunk source supplies data in its own integer grid; composing its
//! chunk-to-model transform with the layer's [`RenderLayerTransform`] yields
//! the bidirectional chunk/layer matrices the renderer binds, plus a
//! combined projection that drops a global+local viewer position straight
//! into a chunk's local frame. The display stage further restricts this to
//! the up-to-3 dimensions on screen as a 4x4 matrix pair for the GPU.

use ndarray::Array2;

use super::matrix;
use super::transform::RenderLayerTransform;
use crate::error::TransformError;

/// Bidirectional chunk/layer transforms for one chunk source.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkTransformParameters {
    /// Transform rank.
    pub rank: usize,
    /// Leading chunk dimensions with actual data; the rest are padding.
    pub unpadded_rank: usize,
    /// Homogeneous chunk-to-layer matrix.
    pub chunk_to_layer_transform: Array2<f64>,
    /// Inverse of `chunk_to_layer_transform`.
    pub layer_to_chunk_transform: Array2<f64>,
    /// `rank x (global_rank + local_rank + 1)` projection taking the
    /// concatenated global and local positions (plus homogeneous 1) to
    /// chunk coordinates.
    pub combined_global_local_to_chunk_transform: Array2<f64>,
    /// Number of global dimensions the projection consumes.
    pub global_rank: usize,
    /// Number of local dimensions the projection consumes.
    pub local_rank: usize,
    /// Chunk dimensions addressed by channel coordinates. Channel
    /// dimensions are constrained to unit stride, so model and chunk
    /// indices coincide for them.
    pub chunk_channel_dimension_indices: Vec<usize>,
}

/// Compose a chunk source's chunk-to-model transform with the layer
/// transform. Fails with [`TransformError::Singular`] if the composed
/// matrix cannot be inverted.
pub fn get_chunk_transform_parameters(
    layer_transform: &RenderLayerTransform,
    chunk_to_model: &Array2<f64>,
) -> Result<ChunkTransformParameters, TransformError> {
    let rank = layer_transform.rank;
    if chunk_to_model.nrows() != rank + 1 || chunk_to_model.ncols() != rank + 1 {
        return Err(TransformError::RankInvalid {
            expected: rank + 1,
            actual: chunk_to_model.nrows(),
        });
    }
    let chunk_to_layer = layer_transform
        .model_to_render_layer_transform
        .dot(chunk_to_model);
    let layer_to_chunk = matrix::invert(&chunk_to_layer)?;

    let global_map = &layer_transform.global_to_render_layer_dimensions;
    let local_map = &layer_transform.local_to_render_layer_dimensions;
    let global_rank = global_map.len();
    let local_rank = local_map.len();
    let mut combined = Array2::zeros((rank, global_rank + local_rank + 1));
    for row in 0..rank {
        for (g, &layer_dim) in global_map.iter().enumerate() {
            if layer_dim >= 0 {
                combined[(row, g)] = layer_to_chunk[(row, layer_dim as usize)];
            }
        }
        for (l, &layer_dim) in local_map.iter().enumerate() {
            if layer_dim >= 0 {
                combined[(row, global_rank + l)] = layer_to_chunk[(row, layer_dim as usize)];
            }
        }
        combined[(row, global_rank + local_rank)] = layer_to_chunk[(row, rank)];
    }

    let chunk_channel_dimension_indices = layer_transform
        .channel_to_model_dimensions
        .iter()
        .filter(|&&dim| dim >= 0)
        .map(|&dim| dim as usize)
        .collect();

    Ok(ChunkTransformParameters {
        rank,
        unpadded_rank: layer_transform.unpadded_rank,
        chunk_to_layer_transform: chunk_to_layer,
        layer_to_chunk_transform: layer_to_chunk,
        combined_global_local_to_chunk_transform: combined,
        global_rank,
        local_rank,
        chunk_channel_dimension_indices,
    })
}

/// Locate a viewer position inside a chunk's local frame.
///
/// Returns `None` when any padding dimension lands outside `[0, 1)`: that
/// means "this position is not inside this chunk", not an error.
pub fn get_chunk_position_from_combined_global_local_positions(
    parameters: &ChunkTransformParameters,
    global_position: &[f32],
    local_position: &[f32],
) -> Option<Vec<f32>> {
    let combined = &parameters.combined_global_local_to_chunk_transform;
    let g = parameters.global_rank;
    let l = parameters.local_rank;
    let mut chunk = vec![0.0_f32; parameters.rank];
    for (row, value) in chunk.iter_mut().enumerate() {
        let mut sum = combined[(row, g + l)];
        for (i, &p) in global_position.iter().enumerate().take(g) {
            sum += combined[(row, i)] * f64::from(p);
        }
        for (i, &p) in local_position.iter().enumerate().take(l) {
            sum += combined[(row, g + i)] * f64::from(p);
        }
        *value = sum as f32;
    }
    for &value in &chunk[parameters.unpadded_rank..] {
        if !(0.0..1.0).contains(&value) {
            return None;
        }
    }
    Some(chunk)
}

/// 4x4 display-stage matrices for one chunk source.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDisplayTransformParameters {
    /// Layer dimensions currently shown on screen, at most 3.
    pub display_dimension_indices: Vec<usize>,
    /// Chunk dimensions feeding the display dimensions, in matrix column
    /// order.
    pub chunk_display_dimension_indices: Vec<usize>,
    /// 4x4 homogeneous matrix mapping chunk display coordinates to display
    /// coordinates.
    pub model_matrix: Array2<f64>,
    /// Inverse of `model_matrix`.
    pub inverse_model_matrix: Array2<f64>,
}

/// Restrict the chunk transform to the display dimensions.
///
/// `display_dimensions` names at most 3 layer dimensions; the chunk
/// dimensions with any influence on them become the matrix columns. A
/// display dimension no chunk dimension reaches makes the matrix singular,
/// which is reported as such.
pub fn get_chunk_display_transform_parameters(
    parameters: &ChunkTransformParameters,
    display_dimensions: &[usize],
) -> Result<ChunkDisplayTransformParameters, TransformError> {
    if display_dimensions.len() > 3 {
        return Err(TransformError::RankInvalid {
            expected: 3,
            actual: display_dimensions.len(),
        });
    }
    let rank = parameters.rank;
    let chunk_to_layer = &parameters.chunk_to_layer_transform;

    let mut chunk_dims: Vec<usize> = Vec::new();
    for &d in display_dimensions {
        for k in 0..rank {
            if chunk_to_layer[(d, k)] != 0.0 && !chunk_dims.contains(&k) {
                chunk_dims.push(k);
            }
        }
    }
    if chunk_dims.len() > 3 {
        return Err(TransformError::RankInvalid {
            expected: 3,
            actual: chunk_dims.len(),
        });
    }

    let mut model = matrix::identity(3);
    for (i, &d) in display_dimensions.iter().enumerate() {
        for (j, &k) in chunk_dims.iter().enumerate() {
            model[(i, j)] = chunk_to_layer[(d, k)];
        }
        model[(i, 3)] = chunk_to_layer[(d, rank)];
    }
    let inverse = matrix::invert(&model)?;

    Ok(ChunkDisplayTransformParameters {
        display_dimension_indices: display_dimensions.to_vec(),
        chunk_display_dimension_indices: chunk_dims,
        model_matrix: model,
        inverse_model_matrix: inverse,
    })
}
