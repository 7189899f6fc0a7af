//! Dense embedding tables over the unified feature-index space.
//!
//! The index space is `[0, cont_field_size + cate_index_size)`: continuous
//! slots first, categorical indices offset by `cont_field_size`. Row 0 is
//! the reserved null/padding row and is held at exact zero — enforced at
//! initialization and after every gradient step, never by rebuilding the
//! table.

use serde::{Deserialize, Serialize};

use crate::error::{DeepFmError, Result};
use crate::rng::LcgRng;
use crate::tensor::Tensor;

/// A trainable embedding matrix of shape `[rows, dim]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingTable {
    weights: Tensor,
    rows: usize,
    dim: usize,
}

impl EmbeddingTable {
    /// Creates a table with N(mean, std²) entries and a zeroed null row.
    pub fn new_normal(rows: usize, dim: usize, mean: f32, std: f32, rng: &mut LcgRng) -> Self {
        let mut table = Self {
            weights: Tensor::randn(&[rows, dim], mean, std, rng),
            rows,
            dim,
        };
        table.zero_null_row();
        table
    }

    /// Creates a table with U[lo, hi) entries and a zeroed null row.
    pub fn new_uniform(rows: usize, dim: usize, lo: f32, hi: f32, rng: &mut LcgRng) -> Self {
        let mut table = Self {
            weights: Tensor::rand_uniform(&[rows, dim], lo, hi, rng),
            rows,
            dim,
        };
        table.zero_null_row();
        table
    }

    /// Rebuilds a table from checkpointed weights.
    pub fn from_weights(weights: Tensor) -> Result<Self> {
        if weights.ndim() != 2 {
            return Err(DeepFmError::Config {
                message: format!("embedding table must be 2D, got {}D", weights.ndim()),
            });
        }
        let rows = weights.shape()[0];
        let dim = weights.shape()[1];
        let mut table = Self { weights, rows, dim };
        table.zero_null_row();
        Ok(table)
    }

    /// Number of rows (the index-space size).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Embedding dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The underlying weight matrix.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// Mutable access to the weight matrix.
    ///
    /// Callers that mutate rows must re-establish the null-row invariant via
    /// [`EmbeddingTable::zero_null_row`] afterwards.
    pub fn weights_mut(&mut self) -> &mut Tensor {
        &mut self.weights
    }

    /// Forces row 0 back to exact zeros.
    pub fn zero_null_row(&mut self) {
        for v in &mut self.weights.data_mut()[..self.dim] {
            *v = 0.0;
        }
    }

    /// Gathers rows for the given indices into a `[indices.len(), dim]`
    /// tensor.
    ///
    /// # Panics
    ///
    /// Panics if an index is out of range; indices are validated against the
    /// vocabulary when batches enter the model.
    pub fn lookup(&self, indices: &[usize]) -> Tensor {
        let mut data = vec![0.0; indices.len() * self.dim];
        for (i, &idx) in indices.iter().enumerate() {
            assert!(idx < self.rows, "embedding index {} out of {}", idx, self.rows);
            data[i * self.dim..(i + 1) * self.dim]
                .copy_from_slice(&self.weights.data()[idx * self.dim..(idx + 1) * self.dim]);
        }
        Tensor::from_data(&[indices.len(), self.dim], data)
    }

    /// Allocates a zeroed gradient buffer matching this table.
    pub fn zero_grad(&self) -> Tensor {
        Tensor::zeros(&[self.rows, self.dim])
    }
}

/// Accumulates `grad_row` into row `idx` of a table-shaped gradient buffer.
///
/// Contributions to the null row are dropped so updates never touch it.
pub fn scatter_add(grad: &mut Tensor, idx: usize, grad_row: &[f32]) {
    if idx == 0 {
        return;
    }
    let dim = grad.shape()[1];
    debug_assert_eq!(grad_row.len(), dim);
    let slot = &mut grad.data_mut()[idx * dim..(idx + 1) * dim];
    for (s, g) in slot.iter_mut().zip(grad_row) {
        *s += g;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_row_zero_after_init() {
        let mut rng = LcgRng::new(2019);
        for dim in [1, 4, 16] {
            let table = EmbeddingTable::new_normal(10, dim, 0.0, 0.01, &mut rng);
            assert!(table.weights().data()[..dim].iter().all(|&v| v == 0.0));

            let table = EmbeddingTable::new_uniform(10, dim, 0.0, 1.0, &mut rng);
            assert!(table.weights().data()[..dim].iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_null_row_restored_after_mutation() {
        let mut rng = LcgRng::new(2019);
        let mut table = EmbeddingTable::new_normal(5, 3, 0.0, 0.01, &mut rng);
        for v in table.weights_mut().data_mut().iter_mut() {
            *v = 1.0;
        }
        table.zero_null_row();
        assert_eq!(&table.weights().data()[..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&table.weights().data()[3..6], &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_lookup_gathers_rows() {
        let weights = Tensor::from_data(
            &[3, 2],
            vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0],
        );
        let table = EmbeddingTable::from_weights(weights).unwrap();
        let out = table.lookup(&[2, 1, 0]);
        assert_eq!(out.shape(), &[3, 2]);
        assert_eq!(out.data(), &[3.0, 4.0, 1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_from_weights_zeroes_null_row() {
        let weights = Tensor::from_data(&[2, 2], vec![9.0, 9.0, 1.0, 1.0]);
        let table = EmbeddingTable::from_weights(weights).unwrap();
        assert_eq!(&table.weights().data()[..2], &[0.0, 0.0]);
    }

    #[test]
    fn test_scatter_add_skips_null_row() {
        let mut rng = LcgRng::new(2019);
        let table = EmbeddingTable::new_normal(4, 2, 0.0, 0.01, &mut rng);
        let mut grad = table.zero_grad();

        scatter_add(&mut grad, 0, &[5.0, 5.0]);
        scatter_add(&mut grad, 2, &[1.0, 2.0]);
        scatter_add(&mut grad, 2, &[1.0, 2.0]);

        assert_eq!(&grad.data()[..2], &[0.0, 0.0]);
        assert_eq!(&grad.data()[4..6], &[2.0, 4.0]);
    }
}
