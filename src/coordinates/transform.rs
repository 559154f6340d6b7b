//! Render-layer transform derivation.
//!
//! A layer declares an affine transform from its data's "model" space to the
//! layer's named output space. From that declaration plus the viewer's
//! global/local/channel coordinate spaces, [`get_render_layer_transform`]
//! derives the mappings the renderer and the picking path consume every
//! frame. The computation is pure; invalid configurations come back as
//! `Err`, never panics, because a half-loaded dataset is expected state.

use ndarray::Array2;

use super::matrix;
use super::space::CoordinateSpace;
use crate::error::TransformError;

/// Declared affine transform from model space to a named layer space.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateSpaceTransform {
    /// The layer (output) coordinate space; its rank is the transform rank.
    pub output_space: CoordinateSpace,
    /// Homogeneous `(rank + 1)²` matrix mapping model to layer coordinates.
    pub matrix: Array2<f64>,
}

impl CoordinateSpaceTransform {
    /// Identity transform onto the given output space.
    pub fn identity(output_space: CoordinateSpace) -> Self {
        let rank = output_space.rank();
        Self {
            output_space,
            matrix: matrix::identity(rank),
        }
    }

    /// Transform rank (model rank == layer rank).
    pub fn rank(&self) -> usize {
        self.output_space.rank()
    }
}

/// Derived per-layer transform state.
///
/// `rank` counts all model/layer dimensions; the first `unpadded_rank` model
/// dimensions carry actual data, the rest are padding carried through as
/// identity and bounds-checked against `[0, 1)` during picking. The
/// `*_to_render_layer_dimensions` maps give, for each viewer dimension, the
/// layer dimension index it corresponds to, or `-1` when unrelated.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderLayerTransform {
    /// Full transform rank.
    pub rank: usize,
    /// Number of leading model dimensions with actual data.
    pub unpadded_rank: usize,
    /// Homogeneous model-to-layer matrix.
    pub model_to_render_layer_transform: Array2<f64>,
    /// Layer dimension index per global dimension, `-1` if unrelated.
    pub global_to_render_layer_dimensions: Vec<isize>,
    /// Layer dimension index per local dimension, `-1` if unrelated.
    pub local_to_render_layer_dimensions: Vec<isize>,
    /// Layer dimension index per channel dimension, `-1` if unrelated.
    pub channel_to_render_layer_dimensions: Vec<isize>,
    /// Model dimension each channel dimension maps to with unit stride,
    /// `-1` if unmapped.
    pub channel_to_model_dimensions: Vec<isize>,
    /// The channel coordinate space the maps were derived against.
    pub channel_space: CoordinateSpace,
}

fn dimension_map(space: &CoordinateSpace, output: &CoordinateSpace) -> Vec<isize> {
    space
        .names
        .iter()
        .map(|name| {
            output
                .dimension_index(name)
                .map(|i| i as isize)
                .unwrap_or(-1)
        })
        .collect()
}

/// Derive the render-layer transform for one subsource.
///
/// `unpadded_rank` is the number of leading model dimensions the subsource
/// has data for. Validation: the layer dimensions reachable from those
/// dimensions must number exactly `unpadded_rank`, and every channel
/// dimension must have bounds `[0, n)` with integer `n > 0` and map (if at
/// all) to exactly one model dimension with unit stride and no translation.
pub fn get_render_layer_transform(
    global: &CoordinateSpace,
    local: &CoordinateSpace,
    channel: &CoordinateSpace,
    transform: &CoordinateSpaceTransform,
    unpadded_rank: usize,
) -> Result<RenderLayerTransform, TransformError> {
    let rank = transform.rank();
    if unpadded_rank > rank {
        return Err(TransformError::RankInvalid {
            expected: rank,
            actual: unpadded_rank,
        });
    }
    let m = &transform.matrix;

    // Every data dimension must reach a distinct layer dimension.
    let mut reachable = vec![false; rank];
    for input in 0..unpadded_rank {
        for (output, flag) in reachable.iter_mut().enumerate() {
            if m[(output, input)] != 0.0 {
                *flag = true;
            }
        }
    }
    let output_rank = reachable.iter().filter(|&&r| r).count();
    if output_rank != unpadded_rank {
        return Err(TransformError::RankMismatch {
            input_rank: unpadded_rank,
            output_rank,
        });
    }

    let global_map = dimension_map(global, &transform.output_space);
    let local_map = dimension_map(local, &transform.output_space);
    let channel_map = dimension_map(channel, &transform.output_space);

    let mut channel_to_model = vec![-1isize; channel.rank()];
    for (c, name) in channel.names.iter().enumerate() {
        let lower = channel.lower_bounds[c];
        let upper = channel.upper_bounds[c];
        if lower != 0.0 {
            return Err(TransformError::InvalidChannel {
                name: name.clone(),
                message: "lower bound must be 0".to_string(),
            });
        }
        if !upper.is_finite() || upper <= 0.0 || upper.fract() != 0.0 {
            return Err(TransformError::InvalidChannel {
                name: name.clone(),
                message: "upper bound must be a positive integer".to_string(),
            });
        }
        let layer_dim = channel_map[c];
        if layer_dim < 0 {
            continue;
        }
        let row = layer_dim as usize;
        let mut unit_column: Option<usize> = None;
        let mut valid = m[(row, rank)] == 0.0;
        for col in 0..rank {
            let coefficient = m[(row, col)];
            if coefficient == 0.0 {
                continue;
            }
            if coefficient == 1.0 && unit_column.is_none() {
                unit_column = Some(col);
            } else {
                valid = false;
            }
        }
        match (valid, unit_column) {
            (true, Some(col)) => channel_to_model[c] = col as isize,
            _ => {
                return Err(TransformError::InvalidChannel {
                    name: name.clone(),
                    message: "must map to exactly one model dimension with unit stride"
                        .to_string(),
                });
            }
        }
    }

    Ok(RenderLayerTransform {
        rank,
        unpadded_rank,
        model_to_render_layer_transform: m.clone(),
        global_to_render_layer_dimensions: global_map,
        local_to_render_layer_dimensions: local_map,
        channel_to_render_layer_dimensions: channel_map,
        channel_to_model_dimensions: channel_to_model,
        channel_space: channel.clone(),
    })
}

/// Project a layer position onto display coordinates through a dimension
/// map. Unmapped display dimensions (`-1`) read as 0.
pub fn layer_to_display_coordinates(
    display: &mut [f32],
    layer_position: &[f32],
    map: &[isize],
) {
    for (out, &dim) in display.iter_mut().zip(map) {
        *out = if dim >= 0 {
            layer_position[dim as usize]
        } else {
            0.0
        };
    }
}

/// Write display coordinates back into a layer position through a dimension
/// map. Unmapped display dimensions (`-1`) are no-ops.
pub fn display_to_layer_coordinates(
    layer_position: &mut [f32],
    display: &[f32],
    map: &[isize],
) {
    for (&value, &dim) in display.iter().zip(map) {
        if dim >= 0 {
            layer_position[dim as usize] = value;
        }
    }
}
