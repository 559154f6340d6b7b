//! Small dense matrix helpers for homogeneous affine transforms.
//!
//! Transforms are square `(rank + 1)²` row-major matrices over `f64`, with
//! the last column holding the translation and the last row fixed at
//! `[0, ..., 0, 1]`.

use ndarray::Array2;

use crate::error::TransformError;

/// Homogeneous identity of the given rank.
pub fn identity(rank: usize) -> Array2<f64> {
    Array2::eye(rank + 1)
}

/// Homogeneous transform that only translates.
pub fn from_translation(translation: &[f64]) -> Array2<f64> {
    let mut m = identity(translation.len());
    for (i, &t) in translation.iter().enumerate() {
        m[(i, translation.len())] = t;
    }
    m
}

/// Apply a homogeneous transform to a point (length `rank`).
pub fn transform_point(m: &Array2<f64>, point: &[f64]) -> Vec<f64> {
    let rank = m.nrows() - 1;
    let mut out = vec![0.0; rank];
    for (row, value) in out.iter_mut().enumerate() {
        let mut sum = m[(row, rank)];
        for (col, &p) in point.iter().enumerate() {
            sum += m[(row, col)] * p;
        }
        *value = sum;
    }
    out
}

/// Invert a square matrix by Gauss-Jordan elimination with partial
/// pivoting.
pub fn invert(m: &Array2<f64>) -> Result<Array2<f64>, TransformError> {
    let n = m.nrows();
    let mut work = m.clone();
    let mut inverse = Array2::eye(n);
    for col in 0..n {
        // Pivot on the largest remaining magnitude in this column.
        let mut pivot = col;
        for row in col + 1..n {
            if work[(row, col)].abs() > work[(pivot, col)].abs() {
                pivot = row;
            }
        }
        if work[(pivot, col)].abs() < 1e-12 {
            return Err(TransformError::Singular);
        }
        if pivot != col {
            for k in 0..n {
                work.swap((pivot, k), (col, k));
                inverse.swap((pivot, k), (col, k));
            }
        }
        let scale = work[(col, col)];
        for k in 0..n {
            work[(col, k)] /= scale;
            inverse[(col, k)] /= scale;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[(row, col)];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                let w = work[(col, k)];
                let inv = inverse[(col, k)];
                work[(row, k)] -= factor * w;
                inverse[(row, k)] -= factor * inv;
            }
        }
    }
    Ok(inverse)
}
