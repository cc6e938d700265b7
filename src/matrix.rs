//! Dense matrices with paired value and gradient storage.
//!
//! Every tensor in this crate is a small row-major matrix of `f32`
//! carrying two buffers of identical length:
//!
//! - `w`: the values
//! - `dw`: the accumulated gradient with respect to those values
//!
//! Parameter matrices live in the [`Model`](crate::model::Model) and are
//! updated by the solver from their `dw` buffers; intermediate activation
//! matrices live in the computation graph for the duration of one
//! forward/backward walk. Column vectors are represented as `rows x 1`
//! matrices.
//!
//! # Memory Layout
//!
//! For shape `[rows, cols]`, element `(i, j)` lives at `w[i * cols + j]`.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// A row-major `f32` matrix with a gradient buffer of the same shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    /// Values, length `rows * cols`.
    pub w: Vec<f32>,
    /// Gradient accumulator, length `rows * cols`.
    pub dw: Vec<f32>,
}

impl Matrix {
    /// Create a matrix filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        let len = rows * cols;
        Self {
            rows,
            cols,
            w: vec![0.0; len],
            dw: vec![0.0; len],
        }
    }

    /// Create a matrix from existing values, with a zeroed gradient.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != rows * cols`.
    pub fn with_data(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "data length {} does not match shape [{}, {}]",
            data.len(),
            rows,
            cols
        );
        let len = data.len();
        Self {
            rows,
            cols,
            w: data,
            dw: vec![0.0; len],
        }
    }

    /// Create a column vector from existing values.
    pub fn column(data: Vec<f32>) -> Self {
        let rows = data.len();
        Self::with_data(rows, 1, data)
    }

    /// Create a matrix with values drawn from `N(0, std)`.
    pub fn randn(rows: usize, cols: usize, std: f32, rng: &mut impl Rng) -> Self {
        let normal = Normal::new(0.0, std).unwrap();
        let data = (0..rows * cols).map(|_| normal.sample(rng)).collect();
        Self::with_data(rows, cols, data)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    /// Reset the gradient buffer to zero.
    pub fn zero_grad(&mut self) {
        for g in self.dw.iter_mut() {
            *g = 0.0;
        }
    }

    /// Whether a deserialized matrix is internally consistent: non-empty
    /// shape, and both buffers of length `rows * cols` holding finite
    /// values.
    pub fn is_consistent(&self) -> bool {
        self.rows > 0
            && self.cols > 0
            && self.w.len() == self.rows * self.cols
            && self.dw.len() == self.w.len()
            && self.w.iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn zeros_has_matching_buffers() {
        let m = Matrix::zeros(3, 4);
        assert_eq!(m.len(), 12);
        assert_eq!(m.dw.len(), 12);
        assert!(m.w.iter().all(|&v| v == 0.0));
        assert!(m.is_consistent());
    }

    #[test]
    fn randn_fills_every_element() {
        let mut rng = StdRng::seed_from_u64(1);
        let m = Matrix::randn(5, 7, 0.08, &mut rng);
        assert_eq!(m.len(), 35);
        assert!(m.w.iter().any(|&v| v != 0.0));
        assert!(m.is_consistent());
    }

    #[test]
    fn column_is_single_column() {
        let m = Matrix::column(vec![1.0, 2.0, 3.0]);
        assert_eq!((m.rows, m.cols), (3, 1));
    }

    #[test]
    fn inconsistent_shapes_are_detected() {
        let mut m = Matrix::zeros(2, 2);
        m.w.pop();
        assert!(!m.is_consistent());
    }

    #[test]
    #[should_panic]
    fn with_data_rejects_bad_length() {
        Matrix::with_data(2, 2, vec![0.0; 3]);
    }
}
