//! Adam optimizer.
//!
//! Adaptive-moment gradient descent; the only optimizer this model trains
//! with. One `Adam` instance holds the moment state for one parameter
//! tensor, and the trainer keeps a vector of them aligned with the model's
//! parameter order.

use serde::{Deserialize, Serialize};

use crate::checkpoint::AdamSlot;

/// Adam optimizer state for a single parameter tensor.
///
/// Update rule:
/// ```text
/// m = beta1 * m + (1 - beta1) * g
/// v = beta2 * v + (1 - beta2) * g^2
/// m_hat = m / (1 - beta1^t)
/// v_hat = v / (1 - beta2^t)
/// param = param - lr * m_hat / (sqrt(v_hat) + epsilon)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m: Vec<f32>,
    v: Vec<f32>,
    t: u64,
}

impl Adam {
    /// Creates an optimizer with the given learning rate and standard
    /// moment decay rates.
    pub fn new(learning_rate: f32) -> Self {
        Self::with_params(learning_rate, 0.9, 0.999, 1e-8)
    }

    /// Creates an optimizer with explicit hyperparameters.
    pub fn with_params(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    /// The current learning rate.
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Updates the learning rate; the decay schedule calls this each step.
    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    /// Bias-correction timestep.
    pub fn timestep(&self) -> u64 {
        self.t
    }

    /// Applies one update in place.
    pub fn apply_gradients(&mut self, param: &mut [f32], gradients: &[f32]) {
        debug_assert_eq!(param.len(), gradients.len());
        if self.m.len() != param.len() {
            self.m = vec![0.0; param.len()];
            self.v = vec![0.0; param.len()];
        }

        self.t += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t as i32);

        for (i, (p, g)) in param.iter_mut().zip(gradients.iter()).enumerate() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] / bias_correction1;
            let v_hat = self.v[i] / bias_correction2;
            *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }

    /// Captures the moment state for checkpointing.
    pub fn to_slot(&self) -> AdamSlot {
        AdamSlot {
            m: self.m.clone(),
            v: self.v.clone(),
            t: self.t,
        }
    }

    /// Restores the moment state from a checkpoint slot.
    pub fn load_slot(&mut self, slot: &AdamSlot) {
        self.m = slot.m.clone();
        self.v = slot.v.clone();
        self.t = slot.t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_moves_against_gradient() {
        let mut adam = Adam::new(0.1);
        let mut param = vec![1.0, 2.0, 3.0];
        adam.apply_gradients(&mut param, &[1.0, 1.0, 1.0]);
        assert!(param[0] < 1.0);
        assert!(param[1] < 2.0);
        assert!(param[2] < 3.0);
    }

    #[test]
    fn test_zero_gradient_no_movement() {
        let mut adam = Adam::new(0.1);
        let mut param = vec![1.0, -2.0];
        adam.apply_gradients(&mut param, &[0.0, 0.0]);
        assert!((param[0] - 1.0).abs() < 1e-6);
        assert!((param[1] + 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_first_step_size_is_learning_rate() {
        // With bias correction, the first Adam step has magnitude ~lr.
        let mut adam = Adam::new(0.01);
        let mut param = vec![0.0];
        adam.apply_gradients(&mut param, &[0.5]);
        assert!((param[0] + 0.01).abs() < 1e-4);
    }

    #[test]
    fn test_timestep_increment() {
        let mut adam = Adam::new(0.001);
        let mut param = vec![1.0];
        assert_eq!(adam.timestep(), 0);
        adam.apply_gradients(&mut param, &[1.0]);
        adam.apply_gradients(&mut param, &[1.0]);
        assert_eq!(adam.timestep(), 2);
    }

    #[test]
    fn test_slot_round_trip() {
        let mut adam = Adam::new(0.01);
        let mut param = vec![1.0, 2.0];
        for _ in 0..5 {
            adam.apply_gradients(&mut param, &[0.3, -0.3]);
        }

        let slot = adam.to_slot();
        let mut restored = Adam::new(0.01);
        restored.load_slot(&slot);

        // Identical state must produce an identical next update.
        let mut a = param.clone();
        let mut b = param.clone();
        adam.apply_gradients(&mut a, &[0.1, 0.1]);
        restored.apply_gradients(&mut b, &[0.1, 0.1]);
        assert_eq!(a, b);
    }
}
