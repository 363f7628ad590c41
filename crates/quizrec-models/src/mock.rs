//! Mock classifier and calibrator for testing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use quizrec_core::features::QuestionFeatures;
use quizrec_core::model::{ProbabilityMap, QuestionType};
use quizrec_core::traits::{IdentityCalibrator, ProbabilityCalibrator, TypeClassifier};

/// A mock classifier for exercising the pipeline without a trained model.
///
/// Returns a fixed probability map, or a fixed error.
pub struct MockClassifier {
    probabilities: ProbabilityMap,
    /// Error message to fail with instead of predicting.
    failure: Option<String>,
    call_count: AtomicU32,
    last_features: Mutex<Option<QuestionFeatures>>,
}

impl MockClassifier {
    /// Create a mock that always returns `probabilities`.
    pub fn with_fixed(probabilities: ProbabilityMap) -> Self {
        Self {
            probabilities,
            failure: None,
            call_count: AtomicU32::new(0),
            last_features: Mutex::new(None),
        }
    }

    /// Equal probability for every known type.
    pub fn uniform() -> Self {
        let share = 1.0 / QuestionType::KNOWN.len() as f64;
        Self::with_fixed(QuestionType::KNOWN.iter().map(|&ty| (ty, share)).collect())
    }

    /// Create a mock whose predictions always fail.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::with_fixed(ProbabilityMap::new())
        }
    }

    /// Get the number of predictions requested.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Get the features of the last prediction request.
    pub fn last_features(&self) -> Option<QuestionFeatures> {
        self.last_features.lock().unwrap().clone()
    }
}

impl TypeClassifier for MockClassifier {
    fn version(&self) -> &str {
        "mock"
    }

    fn predict_proba(&self, features: &QuestionFeatures) -> anyhow::Result<ProbabilityMap> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self.last_features.lock().unwrap() = Some(features.clone());
        if let Some(message) = &self.failure {
            anyhow::bail!("{message}");
        }
        Ok(self.probabilities.clone())
    }
}

/// Calibrator that counts calls and delegates to an inner calibrator.
pub struct MockCalibrator {
    inner: Arc<dyn ProbabilityCalibrator>,
    call_count: AtomicU32,
}

impl MockCalibrator {
    pub fn identity() -> Self {
        Self::wrapping(Arc::new(IdentityCalibrator))
    }

    pub fn wrapping(inner: Arc<dyn ProbabilityCalibrator>) -> Self {
        Self {
            inner,
            call_count: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl ProbabilityCalibrator for MockCalibrator {
    fn calibrate(&self, probabilities: &ProbabilityMap) -> ProbabilityMap {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.inner.calibrate(probabilities)
    }

    fn is_fitted(&self) -> bool {
        self.inner.is_fitted()
    }
}
