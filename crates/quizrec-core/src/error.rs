//! Error types for the recognition core.
//!
//! Parsing and feature extraction never fail; these types cover the places
//! that can: artifact loading, rule administration, calibration fitting, and
//! the per-question pipeline boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Failures while loading a model or calibration artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No path was configured for the artifact.
    #[error("no {0} artifact configured")]
    NotConfigured(&'static str),

    /// The configured file does not exist.
    #[error("artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be decoded.
    #[error("malformed artifact {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

impl ArtifactError {
    /// Returns `true` if retrying later could succeed (e.g. a file being written).
    pub fn is_transient(&self) -> bool {
        matches!(self, ArtifactError::Malformed { .. })
    }
}

/// Errors from runtime rule administration.
#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("unknown rule: {0}")]
    UnknownRule(String),

    #[error("threshold {threshold} for rule {rule} is outside [0, 1]")]
    InvalidThreshold { rule: String, threshold: f64 },
}

/// Errors from fitting a calibrator.
#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("no samples to fit")]
    EmptyFit,

    #[error("probability {0} is outside [0, 1]")]
    OutOfRange(f64),

    #[error("{probabilities} probabilities but {labels} labels")]
    LengthMismatch { probabilities: usize, labels: usize },
}

/// Failures inside one question's processing. Converted to an "unknown, needs
/// review" result at the pipeline boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("model prediction failed: {0:#}")]
    Prediction(anyhow::Error),

    #[error("model returned an empty probability map")]
    EmptyPrediction,

    #[error("processing panicked: {0}")]
    Panicked(String),
}
