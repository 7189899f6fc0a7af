//! Error types for model construction, training, and persistence.

use std::path::PathBuf;
use thiserror::Error;

/// Error type covering the full model lifecycle.
#[derive(Debug, Error)]
pub enum DeepFmError {
    /// Shape mismatch between expected and actual tensor shapes.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The expected shape
        expected: Vec<usize>,
        /// The actual shape that was provided
        actual: Vec<usize>,
    },

    /// Invalid input dimension for a layer or block.
    #[error("Invalid input dimension: expected {expected}, got {actual}")]
    InvalidInputDimension {
        /// The expected input dimension
        expected: usize,
        /// The actual input dimension
        actual: usize,
    },

    /// A backward pass was requested before a cached forward pass.
    #[error("Not initialized: forward pass must be called before backward pass")]
    NotInitialized,

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem
        message: String,
    },

    /// A malformed batch was fed to the model.
    #[error("Batch error: {message}")]
    Batch {
        /// Description of the batch problem
        message: String,
    },

    /// Checkpoint restore was requested but failed. Fatal at startup.
    #[error("Checkpoint restore failed from {dir}: {message}")]
    Restore {
        /// The directory restore was attempted from
        dir: PathBuf,
        /// Description of the failure
        message: String,
    },

    /// A servable export bundle could not be written.
    #[error("Model export failed at {path}: {message}")]
    Export {
        /// Path of the failed export
        path: PathBuf,
        /// Description of the failure
        message: String,
    },

    /// A servable export bundle could not be loaded for inference.
    #[error("Invalid servable bundle at {path}: {message}")]
    Signature {
        /// Path of the bundle
        path: PathBuf,
        /// What is wrong with it
        message: String,
    },

    /// I/O error with the path it occurred at.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
}

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, DeepFmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeepFmError::ShapeMismatch {
            expected: vec![32, 64],
            actual: vec![32, 128],
        };
        assert!(err.to_string().contains("Shape mismatch"));

        let err = DeepFmError::Restore {
            dir: PathBuf::from("/tmp/ckpt"),
            message: "no checkpoint files found".to_string(),
        };
        assert!(err.to_string().contains("/tmp/ckpt"));
        assert!(err.to_string().contains("no checkpoint files found"));

        let err = DeepFmError::NotInitialized;
        assert!(err.to_string().contains("forward pass"));
    }
}
