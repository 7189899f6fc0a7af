//! Checkpoint state and lifecycle management.
//!
//! A checkpoint is a JSON snapshot of every parameter tensor, the per-tensor
//! Adam moments, and the global step, written as
//! `checkpoint-<global_step>.json`. Only the most recent `max_to_keep`
//! checkpoints are retained (one, for this model's lifecycle).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{DeepFmError, Result};
use crate::tensor::Tensor;

/// A named tensor captured in a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorState {
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Flattened row-major values.
    pub data: Vec<f32>,
}

impl TensorState {
    /// Captures a tensor.
    pub fn from_tensor(tensor: &Tensor) -> Self {
        Self {
            shape: tensor.shape().to_vec(),
            data: tensor.data().to_vec(),
        }
    }

    /// Rebuilds the tensor, validating against an expected shape.
    pub fn to_tensor(&self, expected_shape: &[usize]) -> Result<Tensor> {
        if self.shape != expected_shape {
            return Err(DeepFmError::ShapeMismatch {
                expected: expected_shape.to_vec(),
                actual: self.shape.clone(),
            });
        }
        if self.data.len() != self.shape.iter().product::<usize>() {
            return Err(DeepFmError::ShapeMismatch {
                expected: vec![self.shape.iter().product()],
                actual: vec![self.data.len()],
            });
        }
        Ok(Tensor::from_data(&self.shape, self.data.clone()))
    }
}

/// Adam moment state for one parameter tensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdamSlot {
    /// First-moment estimates.
    pub m: Vec<f32>,
    /// Second-moment estimates.
    pub v: Vec<f32>,
    /// Bias-correction timestep.
    pub t: u64,
}

/// Complete persisted model state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    /// Checkpoint format version.
    pub version: u32,
    /// Global training step at capture time.
    pub global_step: u64,
    /// Unix timestamp of capture.
    pub timestamp: u64,
    /// Parameter tensors keyed by canonical name.
    pub params: BTreeMap<String, TensorState>,
    /// Optimizer moments, ordered like the model's parameter list.
    pub optimizer: Vec<AdamSlot>,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
}

impl ModelState {
    /// Creates an empty state at the given step.
    pub fn new(global_step: u64) -> Self {
        Self {
            version: 1,
            global_step,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            params: BTreeMap::new(),
            optimizer: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Captures a named parameter tensor.
    pub fn add_param(&mut self, name: impl Into<String>, tensor: &Tensor) {
        self.params
            .insert(name.into(), TensorState::from_tensor(tensor));
    }

    /// Looks up a named parameter, validating its shape.
    pub fn param(&self, name: &str, expected_shape: &[usize]) -> Result<Tensor> {
        let state = self.params.get(name).ok_or_else(|| DeepFmError::Config {
            message: format!("checkpoint is missing parameter '{}'", name),
        })?;
        state.to_tensor(expected_shape)
    }

    /// Sets a metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }
}

/// Manages checkpoint files in a directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    max_to_keep: usize,
}

fn checkpoint_filename(step: u64) -> String {
    format!("checkpoint-{}.json", step)
}

fn parse_step(filename: &str) -> Option<u64> {
    filename
        .strip_prefix("checkpoint-")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

impl CheckpointManager {
    /// Creates a manager over the given directory, keeping one checkpoint.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_to_keep: 1,
        }
    }

    /// Overrides the retention count.
    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep.max(1);
        self
    }

    /// The managed directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Saves a checkpoint keyed by its global step and prunes old files.
    pub fn save(&self, state: &ModelState) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| DeepFmError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let path = self.dir.join(checkpoint_filename(state.global_step));
        tracing::info!(step = state.global_step, path = %path.display(), "saving checkpoint");

        let json = serde_json::to_string(state).map_err(DeepFmError::Serialization)?;
        std::fs::write(&path, json).map_err(|e| DeepFmError::Io {
            path: path.clone(),
            source: e,
        })?;

        self.cleanup_old(state.global_step)?;
        Ok(path)
    }

    /// Path of the newest checkpoint in the directory, if any.
    pub fn latest(&self) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.dir).ok()?;
        let mut best: Option<(u64, PathBuf)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            if let Some(step) = path
                .file_name()
                .and_then(|f| f.to_str())
                .and_then(parse_step)
            {
                if best.as_ref().map(|(s, _)| step >= *s).unwrap_or(true) {
                    best = Some((step, path));
                }
            }
        }
        best.map(|(_, path)| path)
    }

    /// Restores the newest checkpoint.
    ///
    /// Any failure (no checkpoint, unreadable file, corrupt JSON) is an
    /// error; there is no fallback to fresh initialization.
    pub fn restore_latest(&self) -> Result<ModelState> {
        let path = self.latest().ok_or_else(|| DeepFmError::Restore {
            dir: self.dir.clone(),
            message: "no checkpoint files found".to_string(),
        })?;

        tracing::info!(path = %path.display(), "restoring checkpoint");
        let json = std::fs::read_to_string(&path).map_err(|e| DeepFmError::Restore {
            dir: self.dir.clone(),
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        let state: ModelState = serde_json::from_str(&json).map_err(|e| DeepFmError::Restore {
            dir: self.dir.clone(),
            message: format!("corrupt checkpoint {}: {}", path.display(), e),
        })?;
        Ok(state)
    }

    /// Lists checkpoint files sorted by ascending step.
    pub fn list(&self) -> Vec<PathBuf> {
        let mut found: Vec<(u64, PathBuf)> = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if let Some(step) = path
                    .file_name()
                    .and_then(|f| f.to_str())
                    .and_then(parse_step)
                {
                    found.push((step, path));
                }
            }
        }
        found.sort_by_key(|(step, _)| *step);
        found.into_iter().map(|(_, path)| path).collect()
    }

    fn cleanup_old(&self, newest_step: u64) -> Result<()> {
        let mut found: Vec<(u64, PathBuf)> = self
            .list()
            .into_iter()
            .filter_map(|p| {
                p.file_name()
                    .and_then(|f| f.to_str())
                    .and_then(parse_step)
                    .map(|s| (s, p.clone()))
            })
            .filter(|(step, _)| *step <= newest_step)
            .collect();
        found.sort_by_key(|(step, _)| *step);

        while found.len() > self.max_to_keep {
            let (step, path) = found.remove(0);
            tracing::info!(step, path = %path.display(), "removing old checkpoint");
            std::fs::remove_file(&path).map_err(|e| DeepFmError::Io {
                path: path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}
