//! Servable model export and loading.
//!
//! An export is a self-contained directory bundle:
//!
//! ```text
//! export_dir/
//!   manifest.json        version, global step, variable names
//!   signature.json       the serving contract (4 inputs -> "score")
//!   model_spec.json      architecture sizes to rebuild the graph
//!   variables/
//!     params.json        all parameter tensors by canonical name
//! ```
//!
//! The signature's tensor names are a durable contract consumed by the
//! inference runner and external serving infrastructure; they must remain
//! stable across versions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::checkpoint::ModelState;
use crate::config::DeepFmConfig;
use crate::dataset::MiniBatch;
use crate::error::{DeepFmError, Result};
use crate::model::{DeepFmModel, SCORE_OUTPUT};

/// The four serving input names, in signature order.
pub const SIGNATURE_INPUTS: [&str; 4] =
    ["cont_feats", "cate_feats", "vector_feats", "input_data_size"];

/// Manifest file name inside an export bundle.
pub const MANIFEST_FILENAME: &str = "manifest.json";
/// Signature file name inside an export bundle.
pub const SIGNATURE_FILENAME: &str = "signature.json";
/// Model-spec file name inside an export bundle.
pub const MODEL_SPEC_FILENAME: &str = "model_spec.json";
/// Variables file name inside an export bundle.
pub const VARIABLES_FILENAME: &str = "variables/params.json";

/// Dtype and shape of one signature tensor; -1 marks the batch dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorInfo {
    /// Element type name.
    pub dtype: String,
    /// Shape with -1 for the batch dimension.
    pub shape: Vec<i64>,
}

/// The serving signature: named inputs and outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingSignature {
    /// Signature method name.
    pub method_name: String,
    /// Input tensors by name.
    pub inputs: BTreeMap<String, TensorInfo>,
    /// Output tensors by name.
    pub outputs: BTreeMap<String, TensorInfo>,
}

impl ServingSignature {
    /// Builds the model's signature from its configuration.
    pub fn for_config(config: &DeepFmConfig) -> Self {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "cont_feats".to_string(),
            TensorInfo {
                dtype: "float32".to_string(),
                shape: vec![-1, config.cont_field_size as i64],
            },
        );
        inputs.insert(
            "cate_feats".to_string(),
            TensorInfo {
                dtype: "int64".to_string(),
                shape: vec![-1, config.cate_field_size as i64],
            },
        );
        inputs.insert(
            "vector_feats".to_string(),
            TensorInfo {
                dtype: "float32".to_string(),
                shape: vec![-1, config.vector_feats_size as i64],
            },
        );
        inputs.insert(
            "input_data_size".to_string(),
            TensorInfo {
                dtype: "int64".to_string(),
                shape: vec![1],
            },
        );

        let mut outputs = BTreeMap::new();
        outputs.insert(
            SCORE_OUTPUT.to_string(),
            TensorInfo {
                dtype: "float32".to_string(),
                shape: vec![-1, 1],
            },
        );

        Self {
            method_name: "predict".to_string(),
            inputs,
            outputs,
        }
    }

    /// Validates that the signature exposes exactly the documented tensor
    /// names.
    pub fn validate(&self, bundle: &Path) -> Result<()> {
        let expected: Vec<&str> = SIGNATURE_INPUTS.to_vec();
        let mut actual: Vec<&str> = self.inputs.keys().map(|s| s.as_str()).collect();
        let mut wanted = expected.clone();
        actual.sort_unstable();
        wanted.sort_unstable();
        if actual != wanted {
            return Err(DeepFmError::Signature {
                path: bundle.to_path_buf(),
                message: format!("signature inputs {:?}, expected {:?}", actual, wanted),
            });
        }
        let outputs: Vec<&str> = self.outputs.keys().map(|s| s.as_str()).collect();
        if outputs != [SCORE_OUTPUT] {
            return Err(DeepFmError::Signature {
                path: bundle.to_path_buf(),
                message: format!(
                    "signature outputs {:?}, expected [{:?}]",
                    outputs, SCORE_OUTPUT
                ),
            });
        }
        Ok(())
    }
}

/// Architecture description stored next to the variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Number of continuous fields.
    pub cont_field_size: usize,
    /// Number of categorical fields.
    pub cate_field_size: usize,
    /// Categorical vocabulary size.
    pub cate_index_size: usize,
    /// Width of the vector features.
    pub vector_feats_size: usize,
    /// Embedding dimension.
    pub embedding_size: usize,
    /// Deep-tower hidden widths.
    pub hidden_units: Vec<usize>,
}

impl ModelSpec {
    /// Captures the spec from a configuration.
    pub fn from_config(config: &DeepFmConfig) -> Self {
        Self {
            cont_field_size: config.cont_field_size,
            cate_field_size: config.cate_field_size,
            cate_index_size: config.cate_index_size,
            vector_feats_size: config.vector_feats_size,
            embedding_size: config.embedding_size,
            hidden_units: config.hidden_units.clone(),
        }
    }

    /// Rebuilds an inference configuration (no dropout, training knobs at
    /// their defaults).
    pub fn to_config(&self) -> DeepFmConfig {
        DeepFmConfig::new(
            self.cont_field_size,
            self.cate_field_size,
            self.cate_index_size,
            self.vector_feats_size,
        )
        .with_hidden_units(self.hidden_units.clone())
        .with_embedding_size(self.embedding_size)
    }
}

/// Manifest describing an export bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    /// Bundle format version.
    pub version: u32,
    /// Global step at export time.
    pub global_step: u64,
    /// Unix timestamp of the export.
    pub timestamp: u64,
    /// Names of the exported variables.
    pub variables: Vec<String>,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
}

fn write_json<T: Serialize>(dir: &Path, rel: &str, value: &T) -> Result<()> {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DeepFmError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let json = serde_json::to_string_pretty(value).map_err(DeepFmError::Serialization)?;
    std::fs::write(&path, json).map_err(|e| DeepFmError::Io { path, source: e })
}

fn read_json<T: for<'de> Deserialize<'de>>(dir: &Path, rel: &str) -> Result<T> {
    let path = dir.join(rel);
    let json = std::fs::read_to_string(&path).map_err(|e| DeepFmError::Signature {
        path: dir.to_path_buf(),
        message: format!("cannot read {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&json).map_err(|e| DeepFmError::Signature {
        path: dir.to_path_buf(),
        message: format!("malformed {}: {}", rel, e),
    })
}

/// Writes a servable bundle for the given model.
///
/// Returns the bundle directory. Failures surface as
/// [`DeepFmError::Export`]; the caller (the training controller) logs and
/// swallows them so a failed export never loses the checkpoint.
pub fn export_saved_model(dir: &Path, model: &DeepFmModel, global_step: u64) -> Result<PathBuf> {
    tracing::info!(path = %dir.display(), step = global_step, "exporting servable model");

    let result = (|| -> Result<()> {
        let state = model.to_state(global_step);
        let signature = ServingSignature::for_config(model.config());
        let spec = ModelSpec::from_config(model.config());
        let manifest = ExportManifest {
            version: 1,
            global_step,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            variables: state.params.keys().cloned().collect(),
            metadata: BTreeMap::new(),
        };

        write_json(dir, VARIABLES_FILENAME, &state)?;
        write_json(dir, MODEL_SPEC_FILENAME, &spec)?;
        write_json(dir, SIGNATURE_FILENAME, &signature)?;
        write_json(dir, MANIFEST_FILENAME, &manifest)?;
        Ok(())
    })();

    match result {
        Ok(()) => Ok(dir.to_path_buf()),
        Err(e) => Err(DeepFmError::Export {
            path: dir.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

/// A loaded, read-only servable model.
#[derive(Debug)]
pub struct SavedModel {
    manifest: ExportManifest,
    signature: ServingSignature,
    spec: ModelSpec,
    model: DeepFmModel,
}

impl SavedModel {
    /// Loads a bundle from disk.
    ///
    /// A missing or malformed bundle, or a signature that does not expose
    /// exactly the documented tensor names, is a fatal load-time error.
    pub fn load(dir: &Path) -> Result<Self> {
        tracing::info!(path = %dir.display(), "loading servable model");

        let manifest: ExportManifest = read_json(dir, MANIFEST_FILENAME)?;
        let signature: ServingSignature = read_json(dir, SIGNATURE_FILENAME)?;
        signature.validate(dir)?;

        let spec: ModelSpec = read_json(dir, MODEL_SPEC_FILENAME)?;
        let state: ModelState = read_json(dir, VARIABLES_FILENAME)?;

        let config = spec.to_config();
        let mut model = DeepFmModel::new(&config).map_err(|e| DeepFmError::Signature {
            path: dir.to_path_buf(),
            message: format!("invalid model spec: {}", e),
        })?;
        model.load_state(&state).map_err(|e| DeepFmError::Signature {
            path: dir.to_path_buf(),
            message: format!("variables do not match model spec: {}", e),
        })?;

        tracing::info!(
            step = manifest.global_step,
            variables = manifest.variables.len(),
            "servable model ready"
        );
        Ok(Self {
            manifest,
            signature,
            spec,
            model,
        })
    }

    /// The bundle's manifest.
    pub fn manifest(&self) -> &ExportManifest {
        &self.manifest
    }

    /// The bundle's serving signature.
    pub fn signature(&self) -> &ServingSignature {
        &self.signature
    }

    /// The bundle's architecture spec.
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Scores a batch through the restored graph.
    pub fn score(&self, batch: &MiniBatch) -> Result<Vec<f32>> {
        self.model.score_batch(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::LcgRng;
    use crate::tensor::Tensor;
    use tempfile::tempdir;

    fn config() -> DeepFmConfig {
        DeepFmConfig::new(3, 2, 10, 4)
            .with_hidden_units(vec![8, 4])
            .with_embedding_size(4)
    }

    fn batch(n: usize) -> MiniBatch {
        let mut rng = LcgRng::new(5);
        MiniBatch::new(
            Tensor::randn(&[n, 3], 0.0, 1.0, &mut rng),
            (0..n * 2).map(|i| (i % 10) as i64).collect(),
            2,
            Tensor::randn(&[n, 4], 0.0, 1.0, &mut rng),
            vec![0.0; n],
        )
        .unwrap()
    }

    #[test]
    fn test_signature_names() {
        let signature = ServingSignature::for_config(&config());
        let mut inputs: Vec<&str> = signature.inputs.keys().map(|s| s.as_str()).collect();
        inputs.sort_unstable();
        assert_eq!(
            inputs,
            ["cate_feats", "cont_feats", "input_data_size", "vector_feats"]
        );
        assert_eq!(signature.outputs.len(), 1);
        assert!(signature.outputs.contains_key("score"));
        assert!(signature.validate(Path::new("/tmp/bundle")).is_ok());
    }

    #[test]
    fn test_signature_validation_rejects_extra_input() {
        let mut signature = ServingSignature::for_config(&config());
        signature.inputs.insert(
            "extra".to_string(),
            TensorInfo {
                dtype: "float32".to_string(),
                shape: vec![1],
            },
        );
        assert!(signature.validate(Path::new("/tmp/bundle")).is_err());
    }

    #[test]
    fn test_export_load_round_trip() {
        let dir = tempdir().unwrap();
        let config = config();
        let model = DeepFmModel::new(&config).unwrap();
        let batch = batch(4);
        let direct = model.score_batch(&batch).unwrap();

        export_saved_model(dir.path(), &model, 123).unwrap();
        let loaded = SavedModel::load(dir.path()).unwrap();

        assert_eq!(loaded.manifest().global_step, 123);
        assert_eq!(loaded.spec().embedding_size, 4);
        let served = loaded.score(&batch).unwrap();
        assert_eq!(direct, served);
    }

    #[test]
    fn test_load_missing_bundle_fails() {
        let dir = tempdir().unwrap();
        let err = SavedModel::load(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, DeepFmError::Signature { .. }));
    }

    #[test]
    fn test_load_wrong_signature_fails() {
        let dir = tempdir().unwrap();
        let model = DeepFmModel::new(&config()).unwrap();
        export_saved_model(dir.path(), &model, 1).unwrap();

        // Rewrite the signature with a renamed input.
        let mut signature: ServingSignature = read_json(dir.path(), SIGNATURE_FILENAME).unwrap();
        let info = signature.inputs.remove("cont_feats").unwrap();
        signature.inputs.insert("continuous".to_string(), info);
        write_json(dir.path(), SIGNATURE_FILENAME, &signature).unwrap();

        let err = SavedModel::load(dir.path()).unwrap_err();
        assert!(matches!(err, DeepFmError::Signature { .. }));
    }

    #[test]
    fn test_export_files_present() {
        let dir = tempdir().unwrap();
        let model = DeepFmModel::new(&config()).unwrap();
        export_saved_model(dir.path(), &model, 7).unwrap();

        for rel in [
            MANIFEST_FILENAME,
            SIGNATURE_FILENAME,
            MODEL_SPEC_FILENAME,
            VARIABLES_FILENAME,
        ] {
            assert!(dir.path().join(rel).exists(), "missing {}", rel);
        }
    }
}
