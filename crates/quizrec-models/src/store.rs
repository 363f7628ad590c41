//! File-backed artifact loader.

use std::sync::Arc;

use quizrec_core::calibrator::CalibrationManager;
use quizrec_core::config::{ArtifactPaths, PipelineConfig};
use quizrec_core::error::ArtifactError;
use quizrec_core::traits::{ArtifactLoader, ProbabilityCalibrator, TypeClassifier};

use crate::softmax::SoftmaxModel;

/// Loads the softmax model and the hot-reloading calibration manager from
/// the configured paths.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    paths: ArtifactPaths,
}

impl ArtifactStore {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self { paths }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.paths.clone())
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }
}

impl ArtifactLoader for ArtifactStore {
    fn load_model(&self) -> Result<Arc<dyn TypeClassifier>, ArtifactError> {
        let path = self
            .paths
            .model_path
            .as_deref()
            .ok_or(ArtifactError::NotConfigured("model"))?;
        match SoftmaxModel::load(path) {
            Ok(model) => Ok(Arc::new(model)),
            Err(e) if e.is_not_found() => Err(ArtifactError::NotFound(path.to_path_buf())),
            Err(e) => Err(ArtifactError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    fn load_calibrator(&self) -> Result<Arc<dyn ProbabilityCalibrator>, ArtifactError> {
        let path = self
            .paths
            .calibration_path
            .as_deref()
            .ok_or(ArtifactError::NotConfigured("calibration"))?;
        if !path.exists() {
            // Identity until the artifact is written, then hot-reloaded.
            tracing::warn!(path = %path.display(), "calibration artifact not written yet, watching");
            return Ok(Arc::new(CalibrationManager::new(path)));
        }
        Ok(Arc::new(CalibrationManager::open(path)?))
    }
}
