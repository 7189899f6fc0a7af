//! Learning-rate schedules.

use std::fmt;

/// A learning-rate schedule evaluated at an explicit global step.
pub trait LearningRateFunction: Send + Sync + fmt::Debug {
    /// Returns the learning rate at the given `global_step`.
    fn value(&self, global_step: u64) -> f32;
}

/// Exponential decay: `lr = initial * rate^(step / decay_steps)`.
///
/// With `staircase` (the model's configuration) the exponent is floored so
/// the rate drops in discrete intervals of `decay_steps`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialDecay {
    /// Base learning rate.
    pub initial_learning_rate: f32,
    /// Steps per decay interval.
    pub decay_steps: u64,
    /// Multiplicative decay per interval.
    pub decay_rate: f32,
    /// Whether to floor the exponent to whole intervals.
    pub staircase: bool,
}

impl ExponentialDecay {
    /// Creates a staircase schedule.
    pub fn new(initial_learning_rate: f32, decay_steps: u64, decay_rate: f32) -> Self {
        Self {
            initial_learning_rate,
            decay_steps,
            decay_rate,
            staircase: true,
        }
    }

    /// Switches between staircase and continuous decay.
    pub fn with_staircase(mut self, staircase: bool) -> Self {
        self.staircase = staircase;
        self
    }
}

impl LearningRateFunction for ExponentialDecay {
    fn value(&self, global_step: u64) -> f32 {
        let decay_steps = self.decay_steps.max(1);
        let exponent = if self.staircase {
            (global_step / decay_steps) as f32
        } else {
            global_step as f32 / decay_steps as f32
        };
        self.initial_learning_rate * self.decay_rate.powf(exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staircase_holds_within_interval() {
        let schedule = ExponentialDecay::new(0.1, 100, 0.5);
        assert_eq!(schedule.value(0), 0.1);
        assert_eq!(schedule.value(99), 0.1);
        assert!((schedule.value(100) - 0.05).abs() < 1e-8);
        assert!((schedule.value(199) - 0.05).abs() < 1e-8);
        assert!((schedule.value(200) - 0.025).abs() < 1e-8);
    }

    #[test]
    fn test_continuous_decays_smoothly() {
        let schedule = ExponentialDecay::new(0.1, 100, 0.5).with_staircase(false);
        let mid = schedule.value(50);
        assert!(mid < 0.1 && mid > 0.05);
        assert!((schedule.value(100) - 0.05).abs() < 1e-8);
    }

    #[test]
    fn test_rate_one_is_constant() {
        let schedule = ExponentialDecay::new(0.01, 10, 1.0);
        assert_eq!(schedule.value(0), 0.01);
        assert_eq!(schedule.value(10_000), 0.01);
    }
}
