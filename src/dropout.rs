//! Inverted dropout with a configurable keep-probability.

use crate::error::{DeepFmError, Result};
use crate::rng::LcgRng;
use crate::tensor::Tensor;

/// Dropout layer parameterized by keep-probability.
///
/// During training, each element is kept with probability `keep_prob` and
/// scaled by `1 / keep_prob` so expected activations are unchanged. A
/// keep-probability of 1 is a no-op (the default configuration), and
/// inference always passes inputs through untouched.
#[derive(Debug, Clone)]
pub struct Dropout {
    keep_prob: f32,
    cached_mask: Option<Tensor>,
}

impl Dropout {
    /// Creates a dropout layer.
    ///
    /// # Panics
    ///
    /// Panics if `keep_prob` is outside `(0, 1]`.
    pub fn new(keep_prob: f32) -> Self {
        assert!(
            0.0 < keep_prob && keep_prob <= 1.0,
            "keep_prob must be in (0, 1], got {}",
            keep_prob
        );
        Self {
            keep_prob,
            cached_mask: None,
        }
    }

    /// The configured keep-probability.
    pub fn keep_prob(&self) -> f32 {
        self.keep_prob
    }

    /// Inference forward pass (identity).
    pub fn forward(&self, input: &Tensor) -> Tensor {
        input.clone()
    }

    /// Training forward pass; samples and caches the mask.
    pub fn forward_train(&mut self, input: &Tensor, rng: &mut LcgRng) -> Tensor {
        if self.keep_prob >= 1.0 {
            self.cached_mask = None;
            return input.clone();
        }
        let scale = 1.0 / self.keep_prob;
        let mask_data: Vec<f32> = (0..input.numel())
            .map(|_| if rng.next_f32() < self.keep_prob { scale } else { 0.0 })
            .collect();
        let mask = Tensor::from_data(input.shape(), mask_data);
        let output = input.mul(&mask);
        self.cached_mask = Some(mask);
        output
    }

    /// Backward pass: re-applies the cached mask.
    pub fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        if self.keep_prob >= 1.0 {
            return Ok(grad.clone());
        }
        let mask = self
            .cached_mask
            .as_ref()
            .ok_or(DeepFmError::NotInitialized)?;
        Ok(grad.mul(mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_one_is_identity() {
        let mut dropout = Dropout::new(1.0);
        let mut rng = LcgRng::new(1);
        let input = Tensor::from_data(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let output = dropout.forward_train(&input, &mut rng);
        assert_eq!(output.data(), input.data());

        let grad = Tensor::ones(&[2, 2]);
        let back = dropout.backward(&grad).unwrap();
        assert_eq!(back.data(), grad.data());
    }

    #[test]
    fn test_mask_zeroes_and_scales() {
        let mut dropout = Dropout::new(0.5);
        let mut rng = LcgRng::new(3);
        let input = Tensor::ones(&[8, 8]);
        let output = dropout.forward_train(&input, &mut rng);

        let mut dropped = 0;
        for &v in output.data() {
            assert!(v == 0.0 || (v - 2.0).abs() < 1e-6);
            if v == 0.0 {
                dropped += 1;
            }
        }
        // With 64 elements at keep 0.5, both outcomes must occur.
        assert!(dropped > 0 && dropped < 64);
    }

    #[test]
    fn test_backward_matches_forward_mask() {
        let mut dropout = Dropout::new(0.5);
        let mut rng = LcgRng::new(9);
        let input = Tensor::ones(&[4, 4]);
        let output = dropout.forward_train(&input, &mut rng);
        let grad = Tensor::ones(&[4, 4]);
        let back = dropout.backward(&grad).unwrap();
        // Gradient flows exactly where activations survived.
        for (o, g) in output.data().iter().zip(back.data()) {
            assert_eq!(*o == 0.0, *g == 0.0);
        }
    }

    #[test]
    #[should_panic(expected = "keep_prob")]
    fn test_zero_keep_rejected() {
        let _ = Dropout::new(0.0);
    }
}
