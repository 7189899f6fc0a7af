//! Deep tower: a stack of fully connected ReLU layers with dropout.
//!
//! The tower consumes the concatenation of raw continuous features, raw
//! vector features, and the flattened categorical embeddings. Layers are an
//! ordered sequence of [`Dense`] blocks, one per configured hidden width.

use crate::activation::ReLU;
use crate::dense::Dense;
use crate::dropout::Dropout;
use crate::error::{DeepFmError, Result};
use crate::rng::LcgRng;
use crate::tensor::Tensor;

/// The deep half of the model.
#[derive(Debug, Clone)]
pub struct DeepBlock {
    layers: Vec<Dense>,
    activations: Vec<ReLU>,
    /// One dropout for the input concat plus one per layer.
    dropouts: Vec<Dropout>,
    input_size: usize,
}

impl DeepBlock {
    /// Builds the tower.
    ///
    /// `dropout_keep` must hold `hidden_units.len() + 1` keep-probabilities:
    /// index 0 for the input, then one per layer.
    pub fn new(
        input_size: usize,
        hidden_units: &[usize],
        dropout_keep: &[f32],
        rng: &mut LcgRng,
    ) -> Result<Self> {
        if hidden_units.is_empty() {
            return Err(DeepFmError::Config {
                message: "deep tower needs at least one hidden layer".to_string(),
            });
        }
        if dropout_keep.len() != hidden_units.len() + 1 {
            return Err(DeepFmError::Config {
                message: format!(
                    "deep tower needs {} keep-probabilities, got {}",
                    hidden_units.len() + 1,
                    dropout_keep.len()
                ),
            });
        }

        let mut layers = Vec::with_capacity(hidden_units.len());
        let mut prev = input_size;
        for &width in hidden_units {
            layers.push(Dense::new(prev, width, rng));
            prev = width;
        }
        let activations = vec![ReLU::new(); hidden_units.len()];
        let dropouts = dropout_keep.iter().map(|&p| Dropout::new(p)).collect();

        Ok(Self {
            layers,
            activations,
            dropouts,
            input_size,
        })
    }

    /// Input width of the tower.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Output width (the last hidden layer).
    pub fn output_size(&self) -> usize {
        self.layers
            .last()
            .map(|l| l.out_features())
            .unwrap_or(self.input_size)
    }

    /// The ordered dense layers.
    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    /// Mutable access to the ordered dense layers.
    pub fn layers_mut(&mut self) -> &mut [Dense] {
        &mut self.layers
    }

    /// Inference forward pass.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (layer, act) in self.layers.iter().zip(&self.activations) {
            x = act.forward(&layer.forward(&x)?);
        }
        Ok(x)
    }

    /// Training forward pass with cached intermediates and dropout.
    pub fn forward_train(&mut self, input: &Tensor, rng: &mut LcgRng) -> Result<Tensor> {
        let mut x = self.dropouts[0].forward_train(input, rng);
        for i in 0..self.layers.len() {
            x = self.layers[i].forward_train(&x)?;
            x = self.activations[i].forward_train(&x);
            x = self.dropouts[i + 1].forward_train(&x, rng);
        }
        Ok(x)
    }

    /// Mutable references to every layer parameter, in layer order.
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.parameters_mut())
            .collect()
    }

    /// Gradients from the last backward pass, ordered like
    /// [`DeepBlock::parameters_mut`].
    pub fn gradients(&self) -> Result<Vec<Tensor>> {
        let mut grads = Vec::with_capacity(self.layers.len() * 2);
        for layer in &self.layers {
            grads.extend(layer.gradients()?);
        }
        Ok(grads)
    }

    /// Backward pass; returns the gradient of the input concat so the
    /// caller can scatter the categorical-embedding slice.
    pub fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let mut g = grad.clone();
        for i in (0..self.layers.len()).rev() {
            g = self.dropouts[i + 1].backward(&g)?;
            g = self.activations[i].backward(&g)?;
            g = self.layers[i].backward(&g)?;
        }
        self.dropouts[0].backward(&g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> DeepBlock {
        let mut rng = LcgRng::new(2019);
        DeepBlock::new(10, &[8, 4], &[1.0, 1.0, 1.0], &mut rng).unwrap()
    }

    #[test]
    fn test_build_and_sizes() {
        let block = block();
        assert_eq!(block.input_size(), 10);
        assert_eq!(block.output_size(), 4);
        assert_eq!(block.layers().len(), 2);
        assert_eq!(block.layers()[0].weights().shape(), &[10, 8]);
        assert_eq!(block.layers()[1].weights().shape(), &[8, 4]);
    }

    #[test]
    fn test_forward_shape_and_relu_nonnegative() {
        let block = block();
        let input = Tensor::from_data(&[3, 10], (0..30).map(|i| i as f32 - 15.0).collect());
        let output = block.forward(&input).unwrap();
        assert_eq!(output.shape(), &[3, 4]);
        assert!(output.data().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_backward_shape() {
        let mut block = block();
        let mut rng = LcgRng::new(5);
        let input = Tensor::ones(&[3, 10]);
        let _ = block.forward_train(&input, &mut rng).unwrap();
        let grad = Tensor::ones(&[3, 4]);
        let input_grad = block.backward(&grad).unwrap();
        assert_eq!(input_grad.shape(), &[3, 10]);
        assert!(block.layers()[0].weights_grad().is_some());
        assert!(block.layers()[1].bias_grad().is_some());
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let mut rng = LcgRng::new(31);
        let mut block = DeepBlock::new(4, &[3], &[1.0, 1.0], &mut rng).unwrap();
        let mut mask_rng = LcgRng::new(0);

        // Fix the layer parameters so every pre-activation sits far from the
        // ReLU kink and the central difference is exact.
        for (flat, w) in block.layers_mut()[0]
            .weights_mut()
            .data_mut()
            .iter_mut()
            .enumerate()
        {
            *w = 0.05 * (flat as f32 - 6.0);
        }
        for b in block.layers_mut()[0].bias_mut().data_mut() {
            *b = 5.0;
        }

        let input = Tensor::from_data(&[2, 4], vec![0.5, -1.0, 2.0, 0.1, 1.5, 0.3, -0.2, 0.9]);
        let _ = block.forward_train(&input, &mut mask_rng).unwrap();
        let grad = Tensor::ones(&[2, 3]);
        let _ = block.backward(&grad).unwrap();
        let analytic = block.layers()[0].weights_grad().unwrap().clone();

        let eps = 1e-3;
        for flat in 0..analytic.numel() {
            let orig = block.layers()[0].weights().data()[flat];
            block.layers_mut()[0].weights_mut().data_mut()[flat] = orig + eps;
            let up = block.forward(&input).unwrap().sum();
            block.layers_mut()[0].weights_mut().data_mut()[flat] = orig - eps;
            let down = block.forward(&input).unwrap().sum();
            block.layers_mut()[0].weights_mut().data_mut()[flat] = orig;

            let numeric = (up - down) / (2.0 * eps);
            assert!(
                (numeric - analytic.data()[flat]).abs() < 1e-2,
                "grad mismatch at {}: numeric {} analytic {}",
                flat,
                numeric,
                analytic.data()[flat]
            );
        }
    }

    #[test]
    fn test_bad_keep_count_rejected() {
        let mut rng = LcgRng::new(1);
        assert!(DeepBlock::new(10, &[8, 4], &[1.0, 1.0], &mut rng).is_err());
    }
}
