//! Batch inference runner over an exported servable model.

use std::path::Path;

use crate::dataset::BatchStream;
use crate::error::{DeepFmError, Result};
use crate::export::SavedModel;
use crate::metrics::roc_auc;

/// Summary of one batch-inference run.
#[derive(Debug, Clone)]
pub struct PredictReport {
    /// Total examples scored.
    pub examples: usize,
    /// Batches pulled before exhaustion.
    pub batches: usize,
    /// AUC over the whole stream, when both classes were present.
    pub auc: Option<f64>,
}

/// Scores a held-out dataset against a loaded export and reports AUC.
pub struct Predictor {
    model: SavedModel,
}

impl Predictor {
    /// Loads the servable bundle; malformed bundles are fatal here.
    pub fn load(export_dir: &Path) -> Result<Self> {
        Ok(Self {
            model: SavedModel::load(export_dir)?,
        })
    }

    /// Wraps an already-loaded model.
    pub fn new(model: SavedModel) -> Self {
        Self { model }
    }

    /// The loaded model.
    pub fn model(&self) -> &SavedModel {
        &self.model
    }

    /// Pulls every batch until exhaustion, accumulating labels and scores,
    /// and reports the final AUC. Batches are scored exactly once; there
    /// are no retries.
    pub fn run(&self, stream: &mut dyn BatchStream) -> Result<PredictReport> {
        let mut labels = Vec::new();
        let mut scores = Vec::new();
        let mut batches = 0;

        while let Some(batch) = stream.next_batch() {
            scores.extend(self.model.score(&batch)?);
            labels.extend_from_slice(&batch.labels);
            batches += 1;
        }
        tracing::info!(batches, examples = labels.len(), "end of dataset");

        if labels.len() != scores.len() {
            return Err(DeepFmError::Batch {
                message: format!(
                    "accumulated {} labels but {} scores",
                    labels.len(),
                    scores.len()
                ),
            });
        }

        let auc = roc_auc(&labels, &scores);
        match auc {
            Some(auc) => tracing::info!(auc, "inference complete"),
            None => tracing::info!("inference complete (auc undefined for single-class stream)"),
        }
        Ok(PredictReport {
            examples: labels.len(),
            batches,
            auc,
        })
    }
}
