//! Named N-dimensional coordinate spaces.

use serde::{Deserialize, Serialize};

/// Descriptor of an N-dimensional coordinate space: dimension names,
/// per-dimension physical scale/unit, and optional bounds.
///
/// Bounds default to unbounded. By convention (shared with the serialized
/// layer state) local dimension names end in `'` and channel dimension names
/// end in `^`; this module treats names as opaque and matches them exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSpace {
    /// Dimension names, one per dimension.
    pub names: Vec<String>,
    /// Physical scale of one coordinate step, per dimension. Carried for
    /// the viewer's scale bar and unit display; transform math operates on
    /// unscaled coordinates.
    pub scales: Vec<f64>,
    /// Unit of the scale, per dimension (e.g. `"nm"`, `"s"`, `""`).
    pub units: Vec<String>,
    /// Inclusive lower bound per dimension.
    pub lower_bounds: Vec<f64>,
    /// Exclusive upper bound per dimension.
    pub upper_bounds: Vec<f64>,
}

impl CoordinateSpace {
    /// Unbounded space with the given dimension names, unit scale, and no
    /// units.
    pub fn with_names(names: &[&str]) -> Self {
        let rank = names.len();
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            scales: vec![1.0; rank],
            units: vec![String::new(); rank],
            lower_bounds: vec![f64::NEG_INFINITY; rank],
            upper_bounds: vec![f64::INFINITY; rank],
        }
    }

    /// Replace the bounds.
    pub fn with_bounds(mut self, lower: &[f64], upper: &[f64]) -> Self {
        self.lower_bounds = lower.to_vec();
        self.upper_bounds = upper.to_vec();
        self
    }

    /// Replace the scales and units.
    pub fn with_scales(mut self, scales: &[f64], units: &[&str]) -> Self {
        self.scales = scales.to_vec();
        self.units = units.iter().map(|u| u.to_string()).collect();
        self
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.names.len()
    }

    /// Index of a dimension by exact name.
    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

impl Default for CoordinateSpace {
    fn default() -> Self {
        Self::with_names(&[])
    }
}
