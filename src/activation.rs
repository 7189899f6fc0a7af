//! Activation functions used by the deep tower and scoring head.

use crate::error::{DeepFmError, Result};
use crate::tensor::Tensor;

/// Rectified Linear Unit, `f(x) = max(0, x)`.
///
/// Caches its input during training so the backward pass can mask the
/// incoming gradient.
#[derive(Debug, Clone, Default)]
pub struct ReLU {
    cached_input: Option<Tensor>,
}

impl ReLU {
    /// Creates a new ReLU layer.
    pub fn new() -> Self {
        Self { cached_input: None }
    }

    /// Forward pass without caching (inference).
    pub fn forward(&self, input: &Tensor) -> Tensor {
        input.map(|x| x.max(0.0))
    }

    /// Forward pass that caches the input for [`ReLU::backward`].
    pub fn forward_train(&mut self, input: &Tensor) -> Tensor {
        self.cached_input = Some(input.clone());
        self.forward(input)
    }

    /// Backward pass: passes gradient where the input was positive.
    pub fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let input = self
            .cached_input
            .as_ref()
            .ok_or(DeepFmError::NotInitialized)?;
        let mask = input.map(|x| if x > 0.0 { 1.0 } else { 0.0 });
        Ok(grad.mul(&mask))
    }
}

/// Element-wise logistic sigmoid, `1 / (1 + exp(-x))`.
///
/// The scoring head folds the sigmoid derivative into the log-loss gradient
/// (`p - y`), so no layer-style backward is needed.
pub fn sigmoid(input: &Tensor) -> Tensor {
    input.map(|x| 1.0 / (1.0 + (-x).exp()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_forward() {
        let relu = ReLU::new();
        let input = Tensor::from_data(&[2, 2], vec![-1.0, 0.0, 1.0, 2.0]);
        let output = relu.forward(&input);
        assert_eq!(output.data(), &[0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_relu_backward_masks_gradient() {
        let mut relu = ReLU::new();
        let input = Tensor::from_data(&[1, 4], vec![-2.0, -0.5, 0.5, 3.0]);
        let _ = relu.forward_train(&input);
        let grad = Tensor::ones(&[1, 4]);
        let input_grad = relu.backward(&grad).unwrap();
        assert_eq!(input_grad.data(), &[0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_relu_backward_requires_forward() {
        let mut relu = ReLU::new();
        let grad = Tensor::ones(&[1, 2]);
        assert!(relu.backward(&grad).is_err());
    }

    #[test]
    fn test_sigmoid_midpoint_and_range() {
        let input = Tensor::from_data(&[1, 3], vec![0.0, 10.0, -10.0]);
        let output = sigmoid(&input);
        assert!((output.data()[0] - 0.5).abs() < 1e-6);
        assert!(output.data()[1] > 0.999);
        assert!(output.data()[2] < 0.001);
    }
}
