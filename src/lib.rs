//! DeepFM click-prediction model.
//!
//! This crate implements one model architecture end to end: a deep
//! factorization machine that fuses first- and second-order feature
//! interactions with a feed-forward tower over shared embeddings, plus the
//! full training lifecycle around it:
//!
//! - **Model graph**: embedding tables over a unified index space, the FM
//!   interaction block, the deep tower, and the sigmoid scoring head
//! - **Training controller**: optional checkpoint restore, the pull-based
//!   training loop, periodic validation AUC, final checkpoint and export
//! - **Checkpointing**: JSON snapshots of all parameters and optimizer
//!   moments, retention count 1
//! - **Serving export**: a self-contained bundle whose signature binds the
//!   inputs `cont_feats`, `cate_feats`, `vector_feats`, `input_data_size`
//!   to the `score` output
//! - **Batch inference**: a runner that loads an export and reports AUC
//!   over a held-out stream
//!
//! # Quick start
//!
//! ```
//! use deepfm::config::DeepFmConfig;
//! use deepfm::dataset::SyntheticStream;
//! use deepfm::trainer::Trainer;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = DeepFmConfig::new(3, 2, 10, 4)
//!     .with_hidden_units(vec![8, 4])
//!     .with_embedding_size(4)
//!     .with_batch_size(32)
//!     .with_checkpoint_dir(dir.path().join("ckpt"))
//!     .with_export_dir(dir.path().join("export"));
//!
//! let mut trainer = Trainer::new(&config).unwrap();
//! let mut train = SyntheticStream::new(&config, 10, 1);
//! let mut val = SyntheticStream::new(&config, 2, 2);
//! let report = trainer.fit(&mut train, &mut val).unwrap();
//! assert_eq!(report.global_step, 10);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod activation;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod deep;
pub mod dense;
pub mod dropout;
pub mod embedding;
pub mod error;
pub mod export;
pub mod fm;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod predictor;
pub mod rng;
pub mod schedule;
pub mod tensor;
pub mod trainer;

pub use checkpoint::{AdamSlot, CheckpointManager, ModelState, TensorState};
pub use config::DeepFmConfig;
pub use dataset::{materialize, BatchStream, MiniBatch, SyntheticStream, VecBatchStream};
pub use error::{DeepFmError, Result};
pub use export::{
    export_saved_model, ExportManifest, ModelSpec, SavedModel, ServingSignature, SIGNATURE_INPUTS,
};
pub use metrics::{log_loss, roc_auc, EvalReport};
pub use model::{DeepFmModel, SCORE_OUTPUT};
pub use optimizer::Adam;
pub use predictor::{PredictReport, Predictor};
pub use schedule::{ExponentialDecay, LearningRateFunction};
pub use tensor::Tensor;
pub use trainer::{TrainReport, Trainer};
