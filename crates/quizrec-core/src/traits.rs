//! Core trait definitions for statistical classifiers, calibrators, and
//! artifact loaders.
//!
//! These traits are implemented by the `quizrec-models` crate and consumed
//! by the pipeline, which holds them behind `Arc<dyn _>`.

use std::sync::Arc;

use crate::error::ArtifactError;
use crate::features::{QuestionFeatures, FEATURE_NAMES};
use crate::model::ProbabilityMap;

// ---------------------------------------------------------------------------
// Statistical classifier
// ---------------------------------------------------------------------------

/// Statistical fallback that scores a feature vector against every known type.
pub trait TypeClassifier: Send + Sync {
    /// Artifact version string, recorded on each prediction.
    fn version(&self) -> &str;

    /// Names of the features the classifier consumes, in vector order.
    fn feature_names(&self) -> Vec<String> {
        FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    /// Class probabilities for one question. Should sum to 1.
    fn predict_proba(&self, features: &QuestionFeatures) -> anyhow::Result<ProbabilityMap>;
}

// ---------------------------------------------------------------------------
// Calibrator
// ---------------------------------------------------------------------------

/// Post-hoc probability correction.
pub trait ProbabilityCalibrator: Send + Sync {
    /// Calibrated, renormalized probabilities. Identity when unfitted.
    fn calibrate(&self, probabilities: &ProbabilityMap) -> ProbabilityMap;

    fn is_fitted(&self) -> bool {
        true
    }
}

/// Calibrator that returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCalibrator;

impl ProbabilityCalibrator for IdentityCalibrator {
    fn calibrate(&self, probabilities: &ProbabilityMap) -> ProbabilityMap {
        probabilities.clone()
    }

    fn is_fitted(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Artifact loading
// ---------------------------------------------------------------------------

/// Source of the model and calibrator the pipeline loads lazily.
pub trait ArtifactLoader: Send + Sync {
    fn load_model(&self) -> Result<Arc<dyn TypeClassifier>, ArtifactError>;

    fn load_calibrator(&self) -> Result<Arc<dyn ProbabilityCalibrator>, ArtifactError>;
}

/// Loader with nothing configured: rules only, no calibration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoArtifacts;

impl ArtifactLoader for NoArtifacts {
    fn load_model(&self) -> Result<Arc<dyn TypeClassifier>, ArtifactError> {
        Err(ArtifactError::NotConfigured("model"))
    }

    fn load_calibrator(&self) -> Result<Arc<dyn ProbabilityCalibrator>, ArtifactError> {
        Err(ArtifactError::NotConfigured("calibration"))
    }
}
