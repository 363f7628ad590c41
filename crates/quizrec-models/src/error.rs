//! Model error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when loading, saving, training, or running a model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The artifact file could not be read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The artifact is not valid model JSON.
    #[error("invalid model JSON in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Weight, bias, or standardization shapes disagree.
    #[error("inconsistent model shape: {0}")]
    Shape(String),

    /// A feature vector of the wrong length was supplied.
    #[error("expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Training was requested without samples.
    #[error("no training samples")]
    EmptyTraining,
}

impl ModelError {
    /// Returns `true` if the artifact file is simply absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
