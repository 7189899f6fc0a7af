//! Model and training configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DeepFmError, Result};

/// Configuration for the DeepFM model and its training run.
///
/// Field counts describe the three feature groups fed to the model:
/// `cont_field_size` continuous values, `cate_field_size` categorical index
/// slots drawn from a vocabulary of `cate_index_size`, and a
/// `vector_feats_size`-wide dense auxiliary vector.
///
/// # Example
///
/// ```
/// use deepfm::config::DeepFmConfig;
///
/// let config = DeepFmConfig::new(3, 2, 10, 4)
///     .with_hidden_units(vec![8, 4])
///     .with_embedding_size(4);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.index_space_size(), 13);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepFmConfig {
    /// Number of continuous feature fields.
    pub cont_field_size: usize,
    /// Number of categorical feature fields per example.
    pub cate_field_size: usize,
    /// Size of the categorical index vocabulary.
    pub cate_index_size: usize,
    /// Width of the auxiliary dense vector features.
    pub vector_feats_size: usize,
    /// Embedding dimension shared by the FM and deep paths.
    pub embedding_size: usize,
    /// Hidden-layer widths of the deep tower.
    pub hidden_units: Vec<usize>,
    /// Default batch size when a caller does not supply one.
    pub batch_size: usize,
    /// Base learning rate before decay.
    pub learning_rate: f32,
    /// Steps per learning-rate decay interval.
    pub decay_steps: u64,
    /// Multiplicative decay applied each interval.
    pub decay_rate: f32,
    /// L2 coefficient on the fusion weight matrix; 0 disables the penalty.
    pub l2_reg: f32,
    /// Dropout keep-probabilities for the FM first- and second-order outputs.
    pub dropout_keep_fm: Vec<f32>,
    /// Dropout keep-probabilities for the deep tower: one for the input
    /// concat plus one per hidden layer.
    pub dropout_keep_deep: Vec<f32>,
    /// Steps between validation-AUC reports.
    pub print_interval: u64,
    /// Directory the final checkpoint is written to.
    pub checkpoint_dir: PathBuf,
    /// Directory checkpoints are restored from when `restore` is set.
    pub restore_checkpoint_dir: PathBuf,
    /// Directory the servable bundle is exported to.
    pub export_dir: PathBuf,
    /// Whether to restore the latest checkpoint before training.
    pub restore: bool,
    /// Seed for parameter initialization and dropout masks.
    pub seed: u64,
}

impl Default for DeepFmConfig {
    fn default() -> Self {
        Self {
            cont_field_size: 0,
            cate_field_size: 0,
            cate_index_size: 0,
            vector_feats_size: 0,
            embedding_size: 8,
            hidden_units: vec![64, 32],
            batch_size: 128,
            learning_rate: 0.001,
            decay_steps: 1000,
            decay_rate: 0.96,
            l2_reg: 0.0,
            dropout_keep_fm: vec![1.0, 1.0],
            dropout_keep_deep: vec![1.0, 1.0, 1.0],
            print_interval: 100,
            checkpoint_dir: PathBuf::from("checkpoints"),
            restore_checkpoint_dir: PathBuf::from("checkpoints"),
            export_dir: PathBuf::from("export"),
            restore: false,
            seed: 2019,
        }
    }
}

impl DeepFmConfig {
    /// Creates a configuration with the given feature-group sizes and
    /// default hyperparameters.
    pub fn new(
        cont_field_size: usize,
        cate_field_size: usize,
        cate_index_size: usize,
        vector_feats_size: usize,
    ) -> Self {
        Self {
            cont_field_size,
            cate_field_size,
            cate_index_size,
            vector_feats_size,
            ..Default::default()
        }
    }

    /// Sets the hidden-layer widths and resizes the deep keep-probabilities
    /// to match (one per layer plus one for the input).
    pub fn with_hidden_units(mut self, hidden_units: Vec<usize>) -> Self {
        self.dropout_keep_deep = vec![1.0; hidden_units.len() + 1];
        self.hidden_units = hidden_units;
        self
    }

    /// Sets the embedding dimension.
    pub fn with_embedding_size(mut self, embedding_size: usize) -> Self {
        self.embedding_size = embedding_size;
        self
    }

    /// Sets the default batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the base learning rate.
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Sets the learning-rate decay schedule.
    pub fn with_decay(mut self, decay_steps: u64, decay_rate: f32) -> Self {
        self.decay_steps = decay_steps;
        self.decay_rate = decay_rate;
        self
    }

    /// Sets the L2 coefficient on the fusion weight.
    pub fn with_l2_reg(mut self, l2_reg: f32) -> Self {
        self.l2_reg = l2_reg;
        self
    }

    /// Sets the validation reporting interval.
    pub fn with_print_interval(mut self, print_interval: u64) -> Self {
        self.print_interval = print_interval;
        self
    }

    /// Sets the checkpoint directory (used for both save and restore).
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.restore_checkpoint_dir = dir.clone();
        self.checkpoint_dir = dir;
        self
    }

    /// Sets the export directory.
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    /// Enables or disables checkpoint restore at startup.
    pub fn with_restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    /// Sets the initialization seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Size of the unified embedding index space.
    ///
    /// Continuous slots occupy `[0, cont_field_size)`; categorical indices
    /// are offset by `cont_field_size` before lookup.
    pub fn index_space_size(&self) -> usize {
        self.cont_field_size + self.cate_index_size
    }

    /// Total field count seen by the FM first-order path.
    pub fn input_field_size(&self) -> usize {
        self.cont_field_size + self.cate_field_size
    }

    /// Input width of the deep tower: continuous + vector features plus the
    /// flattened categorical embeddings.
    pub fn deep_input_size(&self) -> usize {
        self.cont_field_size + self.vector_feats_size + self.cate_field_size * self.embedding_size
    }

    /// Input width of the fusion head: FM output concatenated with the last
    /// deep layer.
    pub fn fusion_input_size(&self) -> usize {
        self.input_field_size() + self.embedding_size + *self.hidden_units.last().unwrap_or(&0)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cont_field_size == 0 && self.cate_field_size == 0 {
            return Err(config_error("at least one feature field is required"));
        }
        if self.cate_field_size > 0 && self.cate_index_size == 0 {
            return Err(config_error(
                "cate_index_size must be positive when categorical fields exist",
            ));
        }
        if self.embedding_size == 0 {
            return Err(config_error("embedding_size must be positive"));
        }
        if self.hidden_units.is_empty() {
            return Err(config_error("hidden_units must name at least one layer"));
        }
        if self.hidden_units.iter().any(|&u| u == 0) {
            return Err(config_error("hidden layer widths must be positive"));
        }
        if self.batch_size == 0 {
            return Err(config_error("batch_size must be positive"));
        }
        if self.learning_rate <= 0.0 {
            return Err(config_error("learning_rate must be positive"));
        }
        if self.decay_steps == 0 {
            return Err(config_error("decay_steps must be positive"));
        }
        if !(0.0 < self.decay_rate && self.decay_rate <= 1.0) {
            return Err(config_error("decay_rate must be in (0, 1]"));
        }
        if self.l2_reg < 0.0 {
            return Err(config_error("l2_reg must be non-negative"));
        }
        if self.dropout_keep_fm.len() != 2 {
            return Err(config_error(
                "dropout_keep_fm needs exactly two entries (first order, second order)",
            ));
        }
        if self.dropout_keep_deep.len() != self.hidden_units.len() + 1 {
            return Err(config_error(
                "dropout_keep_deep needs one entry per hidden layer plus one for the input",
            ));
        }
        for &keep in self.dropout_keep_fm.iter().chain(&self.dropout_keep_deep) {
            if !(0.0 < keep && keep <= 1.0) {
                return Err(config_error("dropout keep-probabilities must be in (0, 1]"));
            }
        }
        if self.print_interval == 0 {
            return Err(config_error("print_interval must be positive"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> DeepFmError {
    DeepFmError::Config {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DeepFmConfig {
        DeepFmConfig::new(3, 2, 10, 4)
            .with_hidden_units(vec![8, 4])
            .with_embedding_size(4)
    }

    #[test]
    fn test_valid_config() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn test_derived_sizes() {
        let config = base();
        assert_eq!(config.index_space_size(), 13);
        assert_eq!(config.input_field_size(), 5);
        // 3 cont + 4 vector + 2 fields * 4-dim embeddings
        assert_eq!(config.deep_input_size(), 15);
        // 5 fields + 4 embedding + last hidden width 4
        assert_eq!(config.fusion_input_size(), 13);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(DeepFmConfig::new(0, 0, 0, 4).validate().is_err());

        let mut config = base();
        config.hidden_units.clear();
        assert!(config.validate().is_err());

        let mut config = base();
        config.dropout_keep_fm = vec![1.0];
        assert!(config.validate().is_err());

        let mut config = base();
        config.dropout_keep_deep = vec![1.0, 0.0, 1.0];
        assert!(config.validate().is_err());

        let mut config = base();
        config.decay_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hidden_units_resize_keeps() {
        let config = base().with_hidden_units(vec![16, 8, 4]);
        assert_eq!(config.dropout_keep_deep.len(), 4);
        assert!(config.validate().is_ok());
    }
}
