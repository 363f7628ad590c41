//! Per-document classification pipeline.
//!
//! parse → features → rules → (lazy model fallback → calibration) → result.
//! One pipeline owns its statistics and is driven from a single thread; the
//! batch processor runs several pipelines that share only read-only artifacts.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::config::PipelineConfig;
use crate::error::{ArtifactError, PipelineError, RuleError};
use crate::features::{FeatureExtractor, QuestionFeatures};
use crate::model::{
    arg_max, CalibratedResult, ClassificationResult, DocumentInput, ModelPrediction,
    ParsedQuestion, ProbabilityMap, QuestionType, RuleDecision,
};
use crate::parser::LayoutParser;
use crate::rules::RuleEngine;
use crate::statistics::PipelineStats;
use crate::traits::{ArtifactLoader, NoArtifacts, ProbabilityCalibrator, TypeClassifier};

// ---------------------------------------------------------------------------
// Lazily resolved artifacts
// ---------------------------------------------------------------------------

/// A model or calibrator as the pipeline sees it.
pub enum Artifact<T: ?Sized> {
    /// Not requested yet.
    Pending,
    Loaded(Arc<T>),
    /// Loading failed; the pipeline degrades instead of retrying.
    Unavailable(String),
}

impl<T: ?Sized> Artifact<T> {
    /// Resolve now with `load`.
    pub fn load<F>(kind: &'static str, load: F) -> Self
    where
        F: FnOnce() -> Result<Arc<T>, ArtifactError>,
    {
        let mut artifact = Artifact::Pending;
        artifact.resolve(kind, load);
        artifact
    }

    /// Run `load` if still pending and return the artifact when loaded.
    pub fn resolve<F>(&mut self, kind: &'static str, load: F) -> Option<Arc<T>>
    where
        F: FnOnce() -> Result<Arc<T>, ArtifactError>,
    {
        if let Artifact::Pending = self {
            *self = match load() {
                Ok(loaded) => {
                    tracing::info!(kind, "artifact loaded");
                    Artifact::Loaded(loaded)
                }
                Err(e) => {
                    tracing::warn!(kind, error = %e, "artifact unavailable, degrading");
                    Artifact::Unavailable(e.to_string())
                }
            };
        }
        self.loaded()
    }

    pub fn loaded(&self) -> Option<Arc<T>> {
        match self {
            Artifact::Loaded(a) => Some(Arc::clone(a)),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Artifact::Pending)
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            Artifact::Unavailable(reason) => Some(reason),
            _ => None,
        }
    }
}

impl<T: ?Sized> Clone for Artifact<T> {
    fn clone(&self) -> Self {
        match self {
            Artifact::Pending => Artifact::Pending,
            Artifact::Loaded(a) => Artifact::Loaded(Arc::clone(a)),
            Artifact::Unavailable(reason) => Artifact::Unavailable(reason.clone()),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Artifact<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Pending => f.write_str("Pending"),
            Artifact::Loaded(_) => f.write_str("Loaded"),
            Artifact::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
        }
    }
}

pub type ModelArtifact = Artifact<dyn TypeClassifier>;
pub type CalibratorArtifact = Artifact<dyn ProbabilityCalibrator>;

/// Resolve both artifacts from `loader` immediately.
pub fn resolve_artifacts(loader: &dyn ArtifactLoader) -> (ModelArtifact, CalibratorArtifact) {
    (
        Artifact::load("model", || loader.load_model()),
        Artifact::load("calibration", || loader.load_calibrator()),
    )
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// What `classify` decided for one question, before timing and ids.
struct Classified {
    rule_decision: Option<RuleDecision>,
    model_prediction: Option<ModelPrediction>,
    final_result: CalibratedResult,
    explanations: Vec<String>,
}

pub struct Pipeline {
    config: PipelineConfig,
    parser: LayoutParser,
    extractor: FeatureExtractor,
    rules: RuleEngine,
    loader: Arc<dyn ArtifactLoader>,
    model: ModelArtifact,
    calibrator: CalibratorArtifact,
    stats: PipelineStats,
}

impl Pipeline {
    /// Build a pipeline whose rule table has the configured overrides applied.
    pub fn new(config: PipelineConfig, loader: Arc<dyn ArtifactLoader>) -> Result<Self, RuleError> {
        let mut rules = RuleEngine::with_default_rules();
        rules.apply_overrides(&config.rules)?;
        Ok(Self {
            parser: LayoutParser::new(config.parsing.clone()),
            extractor: FeatureExtractor::new(),
            rules,
            loader,
            model: Artifact::Pending,
            calibrator: Artifact::Pending,
            stats: PipelineStats::default(),
            config,
        })
    }

    /// Pipeline with no statistical fallback.
    pub fn rules_only(config: PipelineConfig) -> Result<Self, RuleError> {
        Self::new(config, Arc::new(NoArtifacts))
    }

    /// Replace the rule table.
    pub fn with_rule_engine(mut self, rules: RuleEngine) -> Self {
        self.rules = rules;
        self
    }

    /// Use artifacts resolved elsewhere instead of loading them lazily.
    pub fn with_shared(mut self, model: ModelArtifact, calibrator: CalibratorArtifact) -> Self {
        self.model = model;
        self.calibrator = calibrator;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn rule_engine(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn rule_engine_mut(&mut self) -> &mut RuleEngine {
        &mut self.rules
    }

    pub fn model_artifact(&self) -> &ModelArtifact {
        &self.model
    }

    pub fn calibrator_artifact(&self) -> &CalibratorArtifact {
        &self.calibrator
    }

    /// Drop the current artifacts and load them again from the loader.
    pub fn refresh_artifacts(&mut self) {
        let (model, calibrator) = resolve_artifacts(self.loader.as_ref());
        self.model = model;
        self.calibrator = calibrator;
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Hand the accumulated statistics to the caller and start afresh.
    pub fn take_stats(&mut self) -> PipelineStats {
        std::mem::take(&mut self.stats)
    }

    /// Segment and classify one document. Results are in source order and
    /// tagged `{source_id}#q{n}`, n from 1.
    pub fn process_document(&mut self, document: &DocumentInput) -> Vec<ClassificationResult> {
        let questions = self.parser.parse_document(document);
        tracing::debug!(
            source_id = %document.source_id,
            fragments = document.fragments.len(),
            questions = questions.len(),
            "document segmented"
        );
        questions
            .into_iter()
            .enumerate()
            .map(|(i, q)| self.process_question(format!("{}#q{}", document.source_id, i + 1), q))
            .collect()
    }

    /// Classify one parsed question. Never fails: errors and panics become an
    /// "unknown, needs review" result carrying the error text.
    pub fn process_question(
        &mut self,
        source_id: String,
        question: ParsedQuestion,
    ) -> ClassificationResult {
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let features = self.extractor.extract(&question);
            let classified = self.classify(&question, &features);
            (features, classified)
        }));
        let (features, classified) = match outcome {
            Ok(done) => done,
            Err(payload) => (
                QuestionFeatures::default(),
                Err(PipelineError::Panicked(panic_message(payload.as_ref()))),
            ),
        };

        let classified = classified.unwrap_or_else(|e| {
            self.stats.errors += 1;
            tracing::error!(%source_id, error = %e, "question processing failed");
            Classified {
                rule_decision: None,
                model_prediction: None,
                final_result: CalibratedResult::unknown(),
                explanations: vec![e.to_string()],
            }
        });

        let latency_us = start.elapsed().as_micros() as u64;
        self.stats.total_processed += 1;
        self.stats.latencies_us.push(latency_us);
        if classified.final_result.is_low_confidence {
            self.stats.low_confidence += 1;
        }
        if classified.final_result.needs_review {
            self.stats.needs_review += 1;
        }

        ClassificationResult {
            source_id,
            question,
            features,
            rule_decision: classified.rule_decision,
            model_prediction: classified.model_prediction,
            final_result: classified.final_result,
            explanations: classified.explanations,
            latency_us,
            timestamp: Utc::now(),
        }
    }

    fn classify(
        &mut self,
        question: &ParsedQuestion,
        features: &QuestionFeatures,
    ) -> Result<Classified, PipelineError> {
        if let Some(decision) = self.rules.apply(question, features) {
            self.stats.rule_hits += 1;
            let probabilities = ProbabilityMap::from([(decision.question_type, decision.confidence)]);
            let final_result =
                self.finalize(decision.question_type, decision.confidence, probabilities);
            let explanations = vec![format!("rule {}: {}", decision.rule_name, decision.explanation)];
            return Ok(Classified {
                rule_decision: Some(decision),
                model_prediction: None,
                final_result,
                explanations,
            });
        }

        let loader = Arc::clone(&self.loader);
        let Some(model) = self.model.resolve("model", || loader.load_model()) else {
            return Ok(Classified {
                rule_decision: None,
                model_prediction: None,
                final_result: CalibratedResult::unknown(),
                explanations: vec!["no rule matched and no statistical model is available".into()],
            });
        };

        self.stats.model_invocations += 1;
        let raw = model.predict_proba(features).map_err(PipelineError::Prediction)?;
        if raw.is_empty() {
            return Err(PipelineError::EmptyPrediction);
        }

        let calibrated = match self.calibrator.resolve("calibration", || loader.load_calibrator()) {
            Some(calibrator) => {
                self.stats.calibrator_invocations += 1;
                calibrator.calibrate(&raw)
            }
            None => raw.clone(),
        };
        let (question_type, confidence) =
            arg_max(&calibrated).ok_or(PipelineError::EmptyPrediction)?;
        let confidence = confidence.clamp(0.0, 1.0);

        let explanations = vec![format!(
            "model {} predicted {} with confidence {:.2}",
            model.version(),
            question_type,
            confidence
        )];
        let model_prediction = ModelPrediction {
            probabilities: raw,
            features_used: model.feature_names(),
            model_version: model.version().to_string(),
        };
        Ok(Classified {
            rule_decision: None,
            model_prediction: Some(model_prediction),
            final_result: self.finalize(question_type, confidence, calibrated),
            explanations,
        })
    }

    fn finalize(
        &self,
        question_type: QuestionType,
        confidence: f64,
        probabilities: ProbabilityMap,
    ) -> CalibratedResult {
        let thresholds = &self.config.thresholds;
        CalibratedResult {
            question_type,
            confidence,
            probabilities,
            is_low_confidence: confidence < thresholds.min_confidence,
            needs_review: confidence < thresholds.review_threshold(question_type),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
