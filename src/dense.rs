//! Dense (fully connected) layer.
//!
//! Performs `y = xW + b` with a manually implemented backward pass. Both
//! weights and biases are Glorot-normal initialized with
//! `std = sqrt(2 / (fan_in + fan_out))`, matching the model's deep tower
//! and fusion head.

use serde::{Deserialize, Serialize};

use crate::error::{DeepFmError, Result};
use crate::rng::LcgRng;
use crate::tensor::Tensor;

/// A fully connected layer.
///
/// - input: `[batch, in_features]`
/// - weights: `[in_features, out_features]`
/// - bias: `[out_features]`
/// - output: `[batch, out_features]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    weights: Tensor,
    bias: Tensor,
    in_features: usize,
    out_features: usize,
    #[serde(skip)]
    weights_grad: Option<Tensor>,
    #[serde(skip)]
    bias_grad: Option<Tensor>,
    #[serde(skip)]
    cached_input: Option<Tensor>,
}

impl Dense {
    /// Creates a layer with Glorot-normal weights and biases.
    pub fn new(in_features: usize, out_features: usize, rng: &mut LcgRng) -> Self {
        let glorot = (2.0 / (in_features + out_features) as f32).sqrt();
        Self {
            weights: Tensor::randn(&[in_features, out_features], 0.0, glorot, rng),
            bias: Tensor::randn(&[out_features], 0.0, glorot, rng),
            in_features,
            out_features,
            weights_grad: None,
            bias_grad: None,
            cached_input: None,
        }
    }

    /// Creates a layer from existing weights and bias.
    pub fn from_weights(weights: Tensor, bias: Tensor) -> Result<Self> {
        if weights.ndim() != 2 {
            return Err(DeepFmError::Config {
                message: format!("Dense weights must be 2D, got {}D", weights.ndim()),
            });
        }
        if bias.ndim() != 1 || weights.shape()[1] != bias.shape()[0] {
            return Err(DeepFmError::ShapeMismatch {
                expected: vec![weights.shape()[1]],
                actual: bias.shape().to_vec(),
            });
        }
        let in_features = weights.shape()[0];
        let out_features = weights.shape()[1];
        Ok(Self {
            weights,
            bias,
            in_features,
            out_features,
            weights_grad: None,
            bias_grad: None,
            cached_input: None,
        })
    }

    /// Input feature dimension.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Output feature dimension.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// The weight matrix.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// Mutable access to the weight matrix.
    pub fn weights_mut(&mut self) -> &mut Tensor {
        &mut self.weights
    }

    /// The bias vector.
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Mutable access to the bias vector.
    pub fn bias_mut(&mut self) -> &mut Tensor {
        &mut self.bias
    }

    /// Weight gradient from the last backward pass.
    pub fn weights_grad(&self) -> Option<&Tensor> {
        self.weights_grad.as_ref()
    }

    /// Bias gradient from the last backward pass.
    pub fn bias_grad(&self) -> Option<&Tensor> {
        self.bias_grad.as_ref()
    }

    /// Adds a term to the pending weight gradient (used for the L2 penalty).
    pub fn add_to_weights_grad(&mut self, term: &Tensor) -> Result<()> {
        match &mut self.weights_grad {
            Some(grad) => {
                *grad = grad.add(term);
                Ok(())
            }
            None => Err(DeepFmError::NotInitialized),
        }
    }

    /// Forward pass without caching (inference).
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        if input.ndim() != 2 {
            return Err(DeepFmError::Config {
                message: format!("Dense expects a 2D input, got {}D", input.ndim()),
            });
        }
        if input.shape()[1] != self.in_features {
            return Err(DeepFmError::InvalidInputDimension {
                expected: self.in_features,
                actual: input.shape()[1],
            });
        }
        Ok(input.matmul(&self.weights).add(&self.bias))
    }

    /// Forward pass that caches the input for [`Dense::backward`].
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor> {
        let output = self.forward(input)?;
        self.cached_input = Some(input.clone());
        Ok(output)
    }

    /// Backward pass.
    ///
    /// Stores `dL/dW = xᵀg` and `dL/db = Σ_batch g`, and returns
    /// `dL/dx = g Wᵀ`.
    pub fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let input = self
            .cached_input
            .as_ref()
            .ok_or(DeepFmError::NotInitialized)?;
        if grad.ndim() != 2 || grad.shape()[1] != self.out_features {
            return Err(DeepFmError::ShapeMismatch {
                expected: vec![input.shape()[0], self.out_features],
                actual: grad.shape().to_vec(),
            });
        }

        self.weights_grad = Some(input.transpose().matmul(grad));
        self.bias_grad = Some(grad.sum_axis(0));
        Ok(grad.matmul(&self.weights.transpose()))
    }

    /// Clears cached input and gradients.
    pub fn clear_cache(&mut self) {
        self.cached_input = None;
        self.weights_grad = None;
        self.bias_grad = None;
    }

    /// Mutable references to the layer's parameters, weights then bias.
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.weights, &mut self.bias]
    }

    /// Gradients from the last backward pass, ordered like
    /// [`Dense::parameters_mut`].
    pub fn gradients(&self) -> Result<Vec<Tensor>> {
        match (&self.weights_grad, &self.bias_grad) {
            (Some(w), Some(b)) => Ok(vec![w.clone(), b.clone()]),
            _ => Err(DeepFmError::NotInitialized),
        }
    }
}
