//! Training controller.
//!
//! Drives the model through its lifecycle:
//! `INIT -> (RESTORE?) -> TRAIN_LOOP -> {PERIODIC_EVAL}* -> STREAM_EXHAUSTED
//! -> CHECKPOINT_SAVE -> MODEL_EXPORT -> DONE`.
//!
//! Restore failure is fatal before any training happens; export failure is
//! logged and swallowed so the checkpoint written at stream exhaustion is
//! never lost.

use std::path::PathBuf;
use std::time::Instant;

use crate::checkpoint::CheckpointManager;
use crate::config::DeepFmConfig;
use crate::dataset::{materialize, BatchStream, MiniBatch};
use crate::error::{DeepFmError, Result};
use crate::export::export_saved_model;
use crate::metrics::{roc_auc, EvalReport};
use crate::model::DeepFmModel;
use crate::optimizer::Adam;
use crate::schedule::{ExponentialDecay, LearningRateFunction};

/// Summary of a completed training run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    /// Global step after the stream was exhausted.
    pub global_step: u64,
    /// Loss of the last training batch.
    pub final_loss: f32,
    /// AUC over the full validation set at the end of training.
    pub final_auc: Option<f64>,
    /// Path of the checkpoint written at stream exhaustion.
    pub checkpoint_path: PathBuf,
    /// Path of the servable bundle, when the export succeeded.
    pub export_path: Option<PathBuf>,
}

/// Owns the model, optimizers, and schedule for one training run.
pub struct Trainer {
    model: DeepFmModel,
    config: DeepFmConfig,
    optimizers: Vec<Adam>,
    schedule: ExponentialDecay,
    global_step: u64,
}

impl Trainer {
    /// Builds the trainer: model parameters, one Adam per parameter tensor,
    /// and the staircase exponential-decay schedule.
    pub fn new(config: &DeepFmConfig) -> Result<Self> {
        let model = DeepFmModel::new(config)?;
        let optimizers = model
            .param_names()
            .iter()
            .map(|_| Adam::new(config.learning_rate))
            .collect();
        let schedule = ExponentialDecay::new(
            config.learning_rate,
            config.decay_steps,
            config.decay_rate,
        );
        Ok(Self {
            model,
            config: config.clone(),
            optimizers,
            schedule,
            global_step: 0,
        })
    }

    /// The trained model.
    pub fn model(&self) -> &DeepFmModel {
        &self.model
    }

    /// Current global step.
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    fn restore(&mut self) -> Result<()> {
        let dir = self.config.restore_checkpoint_dir.clone();
        let manager = CheckpointManager::new(&dir);
        let state = manager.restore_latest()?;

        self.model.load_state(&state).map_err(|e| DeepFmError::Restore {
            dir: dir.clone(),
            message: format!("checkpoint does not match model: {}", e),
        })?;

        if !state.optimizer.is_empty() {
            if state.optimizer.len() != self.optimizers.len() {
                return Err(DeepFmError::Restore {
                    dir,
                    message: format!(
                        "checkpoint has {} optimizer slots, model has {} parameters",
                        state.optimizer.len(),
                        self.optimizers.len()
                    ),
                });
            }
            for (opt, slot) in self.optimizers.iter_mut().zip(&state.optimizer) {
                opt.load_slot(slot);
            }
        }

        self.global_step = state.global_step;
        tracing::info!(step = self.global_step, dir = %dir.display(), "model restored");
        Ok(())
    }

    fn train_step(&mut self, batch: &MiniBatch) -> Result<f32> {
        let scores = self.model.forward_train(batch)?;
        let loss = self.model.loss(&scores, &batch.labels);
        self.model.backward(&batch.labels)?;
        let grads = self.model.gradients()?;

        let lr = self.schedule.value(self.global_step);
        for ((param, opt), grad) in self
            .model
            .parameters_mut()
            .into_iter()
            .zip(self.optimizers.iter_mut())
            .zip(&grads)
        {
            opt.set_learning_rate(lr);
            opt.apply_gradients(param.data_mut(), grad.data());
        }
        self.model.enforce_null_row();
        self.global_step += 1;
        Ok(loss)
    }

    fn evaluate(&self, val_data: &[MiniBatch]) -> Result<Option<f64>> {
        let mut labels = Vec::new();
        let mut scores = Vec::new();
        for batch in val_data {
            scores.extend(self.model.score_batch(batch)?);
            labels.extend_from_slice(&batch.labels);
        }
        if labels.is_empty() {
            return Ok(None);
        }
        Ok(roc_auc(&labels, &scores))
    }

    /// Runs the full training lifecycle against the given streams.
    ///
    /// Pulls `train` until exhaustion, evaluating against the materialized
    /// `val` set every `print_interval` steps, then writes the final
    /// checkpoint and the servable export.
    pub fn fit(
        &mut self,
        train: &mut dyn BatchStream,
        val: &mut dyn BatchStream,
    ) -> Result<TrainReport> {
        if self.config.restore {
            self.restore()?;
        }

        let val_data = materialize(val);
        tracing::info!(
            batches = val_data.len(),
            examples = val_data.iter().map(|b| b.batch_size()).sum::<usize>(),
            "validation set materialized"
        );

        tracing::info!(step = self.global_step, "start of training");
        let mut last_loss = 0.0;
        let mut report_timer = Instant::now();
        while let Some(batch) = train.next_batch() {
            last_loss = self.train_step(&batch)?;

            if self.global_step % self.config.print_interval == 0 {
                let auc = self.evaluate(&val_data)?;
                let report = EvalReport {
                    step: self.global_step,
                    auc,
                    loss: last_loss,
                    elapsed_secs: report_timer.elapsed().as_secs_f64(),
                };
                match report.auc {
                    Some(auc) => tracing::info!(
                        step = report.step,
                        val_auc = auc,
                        loss = report.loss,
                        elapsed_secs = report.elapsed_secs,
                        "periodic evaluation"
                    ),
                    None => tracing::info!(
                        step = report.step,
                        loss = report.loss,
                        elapsed_secs = report.elapsed_secs,
                        "periodic evaluation (auc unavailable)"
                    ),
                }
                report_timer = Instant::now();
            }
        }
        tracing::info!(step = self.global_step, "end of dataset");

        // Checkpoint at stream exhaustion, retention 1.
        let mut state = self.model.to_state(self.global_step);
        state.optimizer = self.optimizers.iter().map(|o| o.to_slot()).collect();
        let manager = CheckpointManager::new(&self.config.checkpoint_dir);
        let checkpoint_path = manager.save(&state)?;

        // Export failure must not lose the checkpoint: log and continue.
        let export_path = match export_saved_model(
            &self.config.export_dir,
            &self.model,
            self.global_step,
        ) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(error = %e, "failed to export servable model");
                None
            }
        };

        let final_auc = self.evaluate(&val_data)?;
        Ok(TrainReport {
            global_step: self.global_step,
            final_loss: last_loss,
            final_auc,
            checkpoint_path,
            export_path,
        })
    }
}
