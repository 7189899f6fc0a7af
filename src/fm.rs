//! Factorization-machine interaction block.
//!
//! Computes the first-order (linear) and second-order (pairwise) interaction
//! terms from the shared embedding tables. The second-order term uses the
//! identity `0.5 * (square-of-sum - sum-of-squares)`, which is linear in the
//! field count; the naive pairwise enumeration exists only as a test oracle.

use crate::dropout::Dropout;
use crate::embedding::{scatter_add, EmbeddingTable};
use crate::error::{DeepFmError, Result};
use crate::rng::LcgRng;
use crate::tensor::Tensor;

/// FM interaction block over `num_fields` unified feature slots.
///
/// Output layout is `[batch, num_fields + embedding_size]`: the per-field
/// first-order terms followed by the second-order interaction vector.
#[derive(Debug, Clone)]
pub struct FmBlock {
    num_fields: usize,
    embedding_size: usize,
    first_order_dropout: Dropout,
    second_order_dropout: Dropout,
    cache: Option<FmCache>,
}

#[derive(Debug, Clone)]
struct FmCache {
    batch_size: usize,
    /// Unified indices, `[batch * num_fields]`.
    indices: Vec<usize>,
    /// Per-field values, `[batch * num_fields]`.
    values: Vec<f32>,
    /// Value-scaled embeddings, `[batch * num_fields * embedding_size]`.
    scaled_emb: Vec<f32>,
    /// Field sums of scaled embeddings, `[batch * embedding_size]`.
    sum_emb: Vec<f32>,
}

impl FmBlock {
    /// Creates the block.
    ///
    /// `dropout_keep` holds the keep-probabilities for the first- and
    /// second-order outputs.
    pub fn new(num_fields: usize, embedding_size: usize, dropout_keep: [f32; 2]) -> Self {
        Self {
            num_fields,
            embedding_size,
            first_order_dropout: Dropout::new(dropout_keep[0]),
            second_order_dropout: Dropout::new(dropout_keep[1]),
            cache: None,
        }
    }

    /// Width of the block's output.
    pub fn output_size(&self) -> usize {
        self.num_fields + self.embedding_size
    }

    fn check_inputs(&self, indices: &[usize], values: &[f32], batch_size: usize) -> Result<()> {
        let expected = batch_size * self.num_fields;
        if indices.len() != expected || values.len() != expected {
            return Err(DeepFmError::Batch {
                message: format!(
                    "FM block expected {} index/value pairs ({} examples x {} fields), got {}/{}",
                    expected,
                    batch_size,
                    self.num_fields,
                    indices.len(),
                    values.len()
                ),
            });
        }
        Ok(())
    }

    fn compute(
        &self,
        feats_emb: &EmbeddingTable,
        first_order_emb: &EmbeddingTable,
        indices: &[usize],
        values: &[f32],
        batch_size: usize,
    ) -> (Tensor, Tensor, FmCache) {
        let fields = self.num_fields;
        let k = self.embedding_size;

        // First order: w1[idx] * value, one scalar per field.
        let mut first = vec![0.0; batch_size * fields];
        let w1 = first_order_emb.weights().data();
        for b in 0..batch_size {
            for f in 0..fields {
                let pos = b * fields + f;
                first[pos] = w1[indices[pos]] * values[pos];
            }
        }

        // Second order via 0.5 * (square(sum) - sum(square)).
        let emb = feats_emb.weights().data();
        let mut scaled_emb = vec![0.0; batch_size * fields * k];
        let mut sum_emb = vec![0.0; batch_size * k];
        let mut sum_sq = vec![0.0; batch_size * k];
        for b in 0..batch_size {
            for f in 0..fields {
                let pos = b * fields + f;
                let idx = indices[pos];
                let x = values[pos];
                let row = &emb[idx * k..(idx + 1) * k];
                let out = &mut scaled_emb[pos * k..(pos + 1) * k];
                for d in 0..k {
                    let e = row[d] * x;
                    out[d] = e;
                    sum_emb[b * k + d] += e;
                    sum_sq[b * k + d] += e * e;
                }
            }
        }
        let mut second = vec![0.0; batch_size * k];
        for i in 0..second.len() {
            second[i] = 0.5 * (sum_emb[i] * sum_emb[i] - sum_sq[i]);
        }

        let first = Tensor::from_data(&[batch_size, fields], first);
        let second = Tensor::from_data(&[batch_size, k], second);
        let cache = FmCache {
            batch_size,
            indices: indices.to_vec(),
            values: values.to_vec(),
            scaled_emb,
            sum_emb,
        };
        (first, second, cache)
    }

    /// Inference forward pass.
    pub fn forward(
        &self,
        feats_emb: &EmbeddingTable,
        first_order_emb: &EmbeddingTable,
        indices: &[usize],
        values: &[f32],
        batch_size: usize,
    ) -> Result<Tensor> {
        self.check_inputs(indices, values, batch_size)?;
        let (first, second, _) =
            self.compute(feats_emb, first_order_emb, indices, values, batch_size);
        Ok(Tensor::concat_cols(&[&first, &second]))
    }

    /// Training forward pass; caches intermediates and applies dropout.
    pub fn forward_train(
        &mut self,
        feats_emb: &EmbeddingTable,
        first_order_emb: &EmbeddingTable,
        indices: &[usize],
        values: &[f32],
        batch_size: usize,
        rng: &mut LcgRng,
    ) -> Result<Tensor> {
        self.check_inputs(indices, values, batch_size)?;
        let (first, second, cache) =
            self.compute(feats_emb, first_order_emb, indices, values, batch_size);
        self.cache = Some(cache);
        let first = self.first_order_dropout.forward_train(&first, rng);
        let second = self.second_order_dropout.forward_train(&second, rng);
        Ok(Tensor::concat_cols(&[&first, &second]))
    }

    /// Backward pass.
    ///
    /// Splits `grad` (`[batch, num_fields + embedding_size]`) into its
    /// first- and second-order parts and scatters the table gradients into
    /// `feats_grad` and `first_order_grad`. Row 0 never receives gradient.
    pub fn backward(
        &mut self,
        grad: &Tensor,
        feats_grad: &mut Tensor,
        first_order_grad: &mut Tensor,
    ) -> Result<()> {
        let cache = self.cache.as_ref().ok_or(DeepFmError::NotInitialized)?;
        let fields = self.num_fields;
        let k = self.embedding_size;
        if grad.shape() != &[cache.batch_size, fields + k][..] {
            return Err(DeepFmError::ShapeMismatch {
                expected: vec![cache.batch_size, fields + k],
                actual: grad.shape().to_vec(),
            });
        }

        let parts = grad.split_cols(&[fields, k]);
        let g_first = self.first_order_dropout.backward(&parts[0])?;
        let g_second = self.second_order_dropout.backward(&parts[1])?;

        let cache = self.cache.as_ref().ok_or(DeepFmError::NotInitialized)?;
        let mut row = vec![0.0; k];
        for b in 0..cache.batch_size {
            let gs = &g_second.data()[b * k..(b + 1) * k];
            let sum = &cache.sum_emb[b * k..(b + 1) * k];
            for f in 0..fields {
                let pos = b * fields + f;
                let idx = cache.indices[pos];
                let x = cache.values[pos];

                // d(first)/d(w1[idx]) = x
                scatter_add(
                    first_order_grad,
                    idx,
                    &[g_first.data()[pos] * x],
                );

                // d(second_k)/d(V[idx, k]) = (sum_k - e_{f,k}) * x
                let e = &cache.scaled_emb[pos * k..(pos + 1) * k];
                for d in 0..k {
                    row[d] = gs[d] * (sum[d] - e[d]) * x;
                }
                scatter_add(feats_grad, idx, &row);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(rows: usize, k: usize, seed: u64) -> (EmbeddingTable, EmbeddingTable) {
        let mut rng = LcgRng::new(seed);
        let feats = EmbeddingTable::new_normal(rows, k, 0.0, 0.5, &mut rng);
        let first = EmbeddingTable::new_uniform(rows, 1, 0.0, 1.0, &mut rng);
        (feats, first)
    }

    /// Naive O(fields^2) oracle for the second-order interaction.
    fn naive_second_order(
        feats: &EmbeddingTable,
        indices: &[usize],
        values: &[f32],
        k: usize,
    ) -> Vec<f32> {
        let fields = indices.len();
        let emb = feats.weights().data();
        let mut out = vec![0.0; k];
        for i in 0..fields {
            for j in (i + 1)..fields {
                let vi = &emb[indices[i] * k..(indices[i] + 1) * k];
                let vj = &emb[indices[j] * k..(indices[j] + 1) * k];
                for d in 0..k {
                    out[d] += vi[d] * values[i] * vj[d] * values[j];
                }
            }
        }
        out
    }

    #[test]
    fn test_second_order_identity_matches_naive() {
        let k = 4;
        let (feats, first) = tables(8, k, 2019);
        let block = FmBlock::new(5, k, [1.0, 1.0]);

        let indices = vec![1, 2, 5, 6, 7];
        let values = vec![0.3, -1.2, 1.0, 1.0, 2.5];
        let out = block.forward(&feats, &first, &indices, &values, 1).unwrap();
        let second = &out.data()[5..];

        let expected = naive_second_order(&feats, &indices, &values, k);
        for (a, b) in second.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-4, "identity {} vs naive {}", a, b);
        }
    }

    #[test]
    fn test_field_order_invariance() {
        let k = 3;
        let (feats, first) = tables(10, k, 7);
        let block = FmBlock::new(4, k, [1.0, 1.0]);

        let indices = vec![2, 4, 6, 8];
        let values = vec![0.5, 1.0, -0.7, 1.0];
        let out_a = block.forward(&feats, &first, &indices, &values, 1).unwrap();

        let indices_rev: Vec<usize> = indices.iter().rev().copied().collect();
        let values_rev: Vec<f32> = values.iter().rev().copied().collect();
        let out_b = block
            .forward(&feats, &first, &indices_rev, &values_rev, 1)
            .unwrap();

        // Second-order part is a sum over fields, so it must be identical.
        for d in 0..k {
            assert!((out_a.data()[4 + d] - out_b.data()[4 + d]).abs() < 1e-5);
        }
        // First-order entries permute with the fields but sum to the same total.
        let sum_a: f32 = out_a.data()[..4].iter().sum();
        let sum_b: f32 = out_b.data()[..4].iter().sum();
        assert!((sum_a - sum_b).abs() < 1e-5);
    }

    #[test]
    fn test_null_index_contributes_zero() {
        let k = 4;
        let (feats, first) = tables(6, k, 11);
        let block = FmBlock::new(3, k, [1.0, 1.0]);

        let with_pad = block
            .forward(&feats, &first, &[0, 2, 3], &[1.0, 0.8, -0.4], 1)
            .unwrap();
        let without_pad = block
            .forward(&feats, &first, &[0, 2, 3], &[123.0, 0.8, -0.4], 1)
            .unwrap();

        // The padded slot's value is irrelevant because row 0 is zero: the
        // first-order term is 0 either way and the second-order sums see a
        // zero embedding.
        assert_eq!(with_pad.data()[0], 0.0);
        for (a, b) in with_pad.data()[3..].iter().zip(&without_pad.data()[3..]) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let k = 3;
        let fields = 3;
        let (mut feats, first) = tables(6, k, 23);
        let mut block = FmBlock::new(fields, k, [1.0, 1.0]);
        let mut rng = LcgRng::new(1);

        let indices = vec![1, 3, 4];
        let values = vec![0.7, 1.0, -1.3];

        // Loss = sum of block output; its gradient wrt the output is ones.
        let out = block
            .forward_train(&feats, &first, &indices, &values, 1, &mut rng)
            .unwrap();
        let grad = Tensor::ones(out.shape());
        let mut feats_grad = feats.zero_grad();
        let mut first_grad = first.zero_grad();
        block
            .backward(&grad, &mut feats_grad, &mut first_grad)
            .unwrap();

        let eps = 1e-3;
        for &idx in &indices {
            for d in 0..k {
                let flat = idx * k + d;
                let orig = feats.weights().data()[flat];

                feats.weights_mut().data_mut()[flat] = orig + eps;
                let up = block
                    .forward(&feats, &first, &indices, &values, 1)
                    .unwrap()
                    .sum();
                feats.weights_mut().data_mut()[flat] = orig - eps;
                let down = block
                    .forward(&feats, &first, &indices, &values, 1)
                    .unwrap()
                    .sum();
                feats.weights_mut().data_mut()[flat] = orig;

                let numeric = (up - down) / (2.0 * eps);
                let analytic = feats_grad.data()[flat];
                assert!(
                    (numeric - analytic).abs() < 1e-2,
                    "grad mismatch at ({}, {}): numeric {} analytic {}",
                    idx,
                    d,
                    numeric,
                    analytic
                );
            }
        }
    }

    #[test]
    fn test_backward_requires_forward() {
        let k = 2;
        let (feats, first) = tables(4, k, 3);
        let mut block = FmBlock::new(2, k, [1.0, 1.0]);
        let grad = Tensor::ones(&[1, 4]);
        let mut fg = feats.zero_grad();
        let mut wg = first.zero_grad();
        assert!(block.backward(&grad, &mut fg, &mut wg).is_err());
    }
}
