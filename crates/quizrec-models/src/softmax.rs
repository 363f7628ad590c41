//! Multinomial logistic (softmax) classifier over the question feature vector.
//!
//! Inputs are standardized with the training set's mean and spread, then
//! scored by one linear layer per class. The whole model is a small JSON
//! artifact.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quizrec_core::features::{QuestionFeatures, FEATURE_NAMES};
use quizrec_core::model::{arg_max, ProbabilityMap, QuestionType};
use quizrec_core::traits::TypeClassifier;

use crate::error::ModelError;

/// Training configuration.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub learning_rate: f64,
    pub epochs: usize,
    /// L2 penalty on the weights.
    pub l2: f64,
    /// Version string stamped on the trained artifact.
    pub version: String,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            epochs: 300,
            l2: 1e-4,
            version: "1.0".to_string(),
        }
    }
}

/// Training result.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    /// Mean cross-entropy after the last epoch.
    pub final_loss: f64,
    pub train_accuracy: f64,
    pub epochs: usize,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxModel {
    version: String,
    created_at: DateTime<Utc>,
    feature_names: Vec<String>,
    classes: Vec<QuestionType>,
    /// Per-feature standardization.
    mean: Vec<f64>,
    scale: Vec<f64>,
    /// `[classes x features]`
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

impl SoftmaxModel {
    /// Untrained model over `classes`: every class equally likely.
    pub fn new(classes: Vec<QuestionType>, version: impl Into<String>) -> Self {
        let n_features = FEATURE_NAMES.len();
        Self {
            version: version.into(),
            created_at: Utc::now(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            mean: vec![0.0; n_features],
            scale: vec![1.0; n_features],
            weights: vec![vec![0.0; n_features]; classes.len()],
            bias: vec![0.0; classes.len()],
            classes,
        }
    }

    pub fn classes(&self) -> &[QuestionType] {
        &self.classes
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Check that every shape agrees with the feature and class counts.
    pub fn validate(&self) -> Result<(), ModelError> {
        let n = self.feature_names.len();
        if self.classes.is_empty() {
            return Err(ModelError::Shape("no classes".into()));
        }
        if self.mean.len() != n || self.scale.len() != n {
            return Err(ModelError::Shape(format!(
                "standardization has {}/{} entries for {n} features",
                self.mean.len(),
                self.scale.len()
            )));
        }
        if self.weights.len() != self.classes.len() || self.bias.len() != self.classes.len() {
            return Err(ModelError::Shape(format!(
                "{} weight rows and {} biases for {} classes",
                self.weights.len(),
                self.bias.len(),
                self.classes.len()
            )));
        }
        if let Some(row) = self.weights.iter().find(|row| row.len() != n) {
            return Err(ModelError::Shape(format!(
                "weight row has {} entries for {n} features",
                row.len()
            )));
        }
        if self.scale.iter().any(|&s| s <= 0.0 || !s.is_finite()) {
            return Err(ModelError::Shape("non-positive feature scale".into()));
        }
        Ok(())
    }

    /// Load and validate a model artifact.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model: SoftmaxModel =
            serde_json::from_str(&content).map_err(|source| ModelError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        model.validate()?;
        tracing::info!(
            path = %path.display(),
            version = %model.version,
            classes = model.classes.len(),
            "loaded softmax model"
        );
        Ok(model)
    }

    /// Save the model as JSON.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let io_err = |source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|source| ModelError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, json).map_err(io_err)
    }

    fn standardize(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&v, (&m, &s))| (v - m) / s)
            .collect()
    }

    fn probabilities(&self, z: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, &b)| b + row.iter().zip(z).map(|(w, x)| w * x).sum::<f64>())
            .collect();
        softmax(&logits)
    }

    /// Class probabilities for a raw feature vector.
    pub fn predict_vector(&self, x: &[f64]) -> Result<ProbabilityMap, ModelError> {
        if x.len() != self.mean.len() {
            return Err(ModelError::DimensionMismatch {
                expected: self.mean.len(),
                actual: x.len(),
            });
        }
        let probs = self.probabilities(&self.standardize(x));
        Ok(self.classes.iter().copied().zip(probs).collect())
    }

    /// Fit a model by full-batch gradient descent on cross-entropy.
    pub fn train(
        samples: &[(QuestionFeatures, QuestionType)],
        config: &TrainConfig,
    ) -> Result<(Self, TrainReport), ModelError> {
        if samples.is_empty() {
            return Err(ModelError::EmptyTraining);
        }
        let mut model = SoftmaxModel::new(QuestionType::KNOWN.to_vec(), config.version.clone());
        let n_features = model.mean.len();
        let n = samples.len() as f64;

        let raw: Vec<Vec<f64>> = samples.iter().map(|(f, _)| f.to_vector()).collect();
        for j in 0..n_features {
            let mean = raw.iter().map(|x| x[j]).sum::<f64>() / n;
            let var = raw.iter().map(|x| (x[j] - mean).powi(2)).sum::<f64>() / n;
            model.mean[j] = mean;
            model.scale[j] = if var.sqrt() > 1e-9 { var.sqrt() } else { 1.0 };
        }

        let data: Vec<(Vec<f64>, Option<usize>)> = raw
            .iter()
            .zip(samples)
            .map(|(x, (_, label))| {
                let target = model.classes.iter().position(|c| c == label);
                (model.standardize(x), target)
            })
            .collect();

        let k = model.classes.len();
        let mut final_loss = 0.0;
        for epoch in 0..config.epochs {
            let mut grad_w = vec![vec![0.0; n_features]; k];
            let mut grad_b = vec![0.0; k];
            let mut loss = 0.0;

            for (z, target) in &data {
                let probs = model.probabilities(z);
                for (c, &p) in probs.iter().enumerate() {
                    let d = p - if Some(c) == *target { 1.0 } else { 0.0 };
                    grad_b[c] += d;
                    for (g, &x) in grad_w[c].iter_mut().zip(z) {
                        *g += d * x;
                    }
                }
                if let Some(t) = target {
                    loss -= probs[*t].max(1e-12).ln();
                }
            }

            for c in 0..k {
                model.bias[c] -= config.learning_rate * grad_b[c] / n;
                for j in 0..n_features {
                    let g = grad_w[c][j] / n + config.l2 * model.weights[c][j];
                    model.weights[c][j] -= config.learning_rate * g;
                }
            }

            final_loss = loss / n;
            if epoch % 50 == 0 {
                tracing::debug!(epoch, loss = final_loss, "softmax training");
            }
        }

        let train_accuracy = model.accuracy(samples);
        tracing::info!(
            samples = samples.len(),
            epochs = config.epochs,
            loss = final_loss,
            accuracy = train_accuracy,
            "softmax model trained"
        );
        let report = TrainReport {
            final_loss,
            train_accuracy,
            epochs: config.epochs,
            samples: samples.len(),
        };
        Ok((model, report))
    }

    /// Share of samples whose arg-max class matches the label.
    pub fn accuracy(&self, samples: &[(QuestionFeatures, QuestionType)]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let correct = samples
            .iter()
            .filter(|(f, label)| {
                self.predict_vector(&f.to_vector())
                    .ok()
                    .and_then(|p| arg_max(&p))
                    .is_some_and(|(ty, _)| ty == *label)
            })
            .count();
        correct as f64 / samples.len() as f64
    }
}

impl TypeClassifier for SoftmaxModel {
    fn version(&self) -> &str {
        &self.version
    }

    fn feature_names(&self) -> Vec<String> {
        self.feature_names.clone()
    }

    fn predict_proba(&self, features: &QuestionFeatures) -> anyhow::Result<ProbabilityMap> {
        Ok(self.predict_vector(&features.to_vector())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizrec_core::features::FeatureExtractor;
    use quizrec_core::model::ParsedQuestion;

    fn training_set() -> Vec<(QuestionFeatures, QuestionType)> {
        let extractor = FeatureExtractor::new();
        let mut samples = Vec::new();
        for i in 0..10 {
            let choice = ParsedQuestion::with_stem(format!("Question {i} about safety rules?"))
                .options(["one", "two", "three", "four"])
                .answer("B");
            samples.push((extractor.extract(&choice), QuestionType::SingleChoice));

            let blank = ParsedQuestion::with_stem(format!("The limit is ____ volts in zone {i}."))
                .answer(format!("{}", 30 + i));
            samples.push((extractor.extract(&blank), QuestionType::FillBlank));

            let essay = ParsedQuestion::with_stem(format!("Describe procedure number {i} in detail."))
                .answer("Cut the power, verify isolation, and post warning signs before starting.");
            samples.push((extractor.extract(&essay), QuestionType::FreeResponse));
        }
        samples
    }

    #[test]
    fn untrained_model_is_uniform() {
        let model = SoftmaxModel::new(QuestionType::KNOWN.to_vec(), "0");
        let p = model.predict_proba(&QuestionFeatures::default()).unwrap();
        assert_eq!(p.len(), 5);
        assert!(p.values().all(|&v| (v - 0.2).abs() < 1e-12));
    }

    #[test]
    fn training_separates_classes() {
        let samples = training_set();
        let (model, report) = SoftmaxModel::train(&samples, &TrainConfig::default()).unwrap();

        assert_eq!(report.samples, 30);
        assert_eq!(report.train_accuracy, 1.0);
        assert!(report.final_loss < 0.5);

        let p = model.predict_proba(&samples[1].0).unwrap();
        let sum: f64 = p.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(arg_max(&p).map(|(ty, _)| ty), Some(QuestionType::FillBlank));
    }

    #[test]
    fn empty_training_is_rejected() {
        assert!(matches!(
            SoftmaxModel::train(&[], &TrainConfig::default()),
            Err(ModelError::EmptyTraining)
        ));
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let model = SoftmaxModel::new(QuestionType::KNOWN.to_vec(), "0");
        let err = model.predict_vector(&[1.0, 2.0]).unwrap_err();
        assert_eq!(err.to_string(), "expected 19 features, got 2");
    }

    #[test]
    fn save_and_load() {
        let (model, _) = SoftmaxModel::train(&training_set(), &TrainConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifacts/model.json");

        model.save(&path).unwrap();
        let loaded = SoftmaxModel::load(&path).unwrap();
        assert_eq!(loaded, model);
        assert_eq!(loaded.version(), "1.0");
    }

    #[test]
    fn load_reports_bad_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let missing = SoftmaxModel::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(missing.is_not_found());

        let path = dir.path().join("half.json");
        std::fs::write(&path, "{\"version\": \"1.0\", \"weig").unwrap();
        assert!(matches!(SoftmaxModel::load(&path), Err(ModelError::Parse { .. })));

        let mut broken = SoftmaxModel::new(QuestionType::KNOWN.to_vec(), "0");
        broken.bias.pop();
        broken.save(&path).unwrap();
        assert!(matches!(SoftmaxModel::load(&path), Err(ModelError::Shape(_))));
    }
}
