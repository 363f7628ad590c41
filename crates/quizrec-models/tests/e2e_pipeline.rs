//! End-to-end pipeline tests: fragments in, classified questions out.
//!
//! These tests drive the full parse → features → rules → model → calibration
//! chain, with mocks and with real trained artifacts on disk.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use quizrec_core::calibrator::{CalibrationManager, IsotonicCalibrator};
use quizrec_core::config::{load_config_from, ArtifactPaths, PipelineConfig};
use quizrec_core::engine::{BatchProcessor, NoopReporter};
use quizrec_core::error::ArtifactError;
use quizrec_core::features::{FeatureExtractor, QuestionFeatures};
use quizrec_core::model::{DocumentInput, ParsedQuestion, ProbabilityMap, QuestionType, TextFragment};
use quizrec_core::parser::LayoutParser;
use quizrec_core::pipeline::Pipeline;
use quizrec_core::statistics::expected_calibration_error;
use quizrec_core::traits::{ArtifactLoader, ProbabilityCalibrator, TypeClassifier};
use quizrec_models::{ArtifactStore, MockCalibrator, MockClassifier, SoftmaxModel, TrainConfig};

struct MockLoader {
    model: Arc<MockClassifier>,
    calibrator: Arc<MockCalibrator>,
}

impl ArtifactLoader for MockLoader {
    fn load_model(&self) -> Result<Arc<dyn TypeClassifier>, ArtifactError> {
        Ok(self.model.clone())
    }

    fn load_calibrator(&self) -> Result<Arc<dyn ProbabilityCalibrator>, ArtifactError> {
        Ok(self.calibrator.clone())
    }
}

fn rules_only() -> Pipeline {
    Pipeline::rules_only(PipelineConfig::default()).unwrap()
}

fn classify_lines(lines: &[&str]) -> Vec<quizrec_core::model::ClassificationResult> {
    rules_only().process_document(&DocumentInput::from_lines("doc", lines))
}

fn labelled_questions() -> Vec<(QuestionFeatures, QuestionType)> {
    let extractor = FeatureExtractor::new();
    let mut samples = Vec::new();
    for i in 0..12 {
        let choice = ParsedQuestion::with_stem(format!("Question {i} about the safety rules?"))
            .options(["first", "second", "third", "fourth"])
            .answer(["A", "B", "C", "D"][i % 4]);
        samples.push((extractor.extract(&choice), QuestionType::SingleChoice));

        let multi = ParsedQuestion::with_stem(format!("Select all that apply for case {i}."))
            .options(["first", "second", "third", "fourth"])
            .answer("ABD");
        samples.push((extractor.extract(&multi), QuestionType::MultipleChoice));

        let blank = ParsedQuestion::with_stem(format!("The limit in zone {i} is ____ volts."))
            .answer(format!("{}", 24 + i));
        samples.push((extractor.extract(&blank), QuestionType::FillBlank));

        let essay = ParsedQuestion::with_stem(format!("Describe procedure {i} in detail."))
            .answer("Cut the power, verify isolation, and post warning signs first.");
        samples.push((extractor.extract(&essay), QuestionType::FreeResponse));

        let tf = ParsedQuestion::with_stem(format!("Statement {i} holds for every worker."))
            .answer(if i % 2 == 0 { "对" } else { "错" });
        samples.push((extractor.extract(&tf), QuestionType::TrueFalse));
    }
    samples
}

/// Train a model and fit a calibrator on its predictions, writing both to `dir`.
fn write_artifacts(dir: &Path) -> ArtifactPaths {
    let samples = labelled_questions();
    let (model, report) = SoftmaxModel::train(&samples, &TrainConfig::default()).unwrap();
    assert!(report.train_accuracy > 0.9);

    let predictions: Vec<(ProbabilityMap, QuestionType)> = samples
        .iter()
        .map(|(f, label)| (model.predict_proba(f).unwrap(), *label))
        .collect();
    let calibrator = IsotonicCalibrator::fit(&predictions).unwrap();
    let confidences: Vec<(f64, bool)> = predictions
        .iter()
        .map(|(p, label)| {
            let calibrated = calibrator.calibrate(p);
            let (ty, conf) = quizrec_core::model::arg_max(&calibrated).unwrap();
            (conf, ty == *label)
        })
        .collect();
    let ece = expected_calibration_error(&confidences, 10);

    let paths = ArtifactPaths {
        model_path: Some(dir.join("model.json")),
        calibration_path: Some(dir.join("calibration.json")),
    };
    model.save(paths.model_path.as_deref().unwrap()).unwrap();
    calibrator
        .to_artifact(Some(ece))
        .save(paths.calibration_path.as_deref().unwrap())
        .unwrap();
    paths
}

// --- Rule-decided scenarios ---

#[test]
fn e2e_single_choice() {
    let results = classify_lines(&[
        "1. Which of the following is correct?",
        "A. Work alone on live equipment",
        "B. Skip the lockout step",
        "C. Remove the guard while running",
        "D. Ignore the warning sign",
        "Answer: A",
    ]);

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.question.options.len(), 4);
    assert_eq!(r.question.answer_raw, "A");
    assert_eq!(r.question_type(), QuestionType::SingleChoice);
    assert!(r.confidence() >= 0.8);
    assert_eq!(
        r.rule_decision.as_ref().map(|d| d.rule_name.as_str()),
        Some("single_choice_default")
    );
}

#[test]
fn e2e_tail_true_false() {
    let results = classify_lines(&["Isolation must always be performed by two people.(×)"]);

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.question.answer_raw, "×");
    assert!(r.question.parse_flags.tail_answer_stripped);
    assert!(!r.question.question.contains('×'));
    assert_eq!(r.question_type(), QuestionType::TrueFalse);
}

#[test]
fn e2e_fill_blank() {
    let results = classify_lines(&[
        "3. The safe working voltage does not exceed ____ volts.",
        "Answer: 30",
    ]);

    assert_eq!(results[0].question.answer_raw, "30");
    assert_eq!(results[0].question_type(), QuestionType::FillBlank);
}

#[test]
fn e2e_free_response() {
    let results = classify_lines(&[
        "4. Briefly describe the basic safety requirements.",
        "Answer: Wear protective gear, cut the power, and always work in pairs.",
    ]);

    let r = &results[0];
    assert!(r.question.options.is_empty());
    assert_eq!(r.question_type(), QuestionType::FreeResponse);
    assert!(!r.final_result.needs_review);
}

#[test]
fn e2e_empty_group() {
    let results = rules_only().process_document(&DocumentInput::new("empty", vec![]));
    assert!(results.is_empty());

    let blank_only = DocumentInput::new(
        "blank",
        vec![TextFragment::new("", 1), TextFragment::new("   ", 2)],
    );
    assert!(rules_only().process_document(&blank_only).is_empty());
}

#[test]
fn e2e_boundary_count_is_deterministic() {
    let lines = [
        "1. The earth orbits the sun.",
        "答案：对",
        "2. 下列哪些属于个人防护用品？",
        "A. 安全帽",
        "B. 防护手套",
        "C. 手机",
        "答案：AB",
        "3. 安全电压一般不超过____伏。",
        "答案：36",
        "4. 简述触电急救的基本步骤。",
        "答案：切断电源，使触电者脱离电源，并立即进行心肺复苏。",
    ];
    let doc = DocumentInput::from_lines("doc", &lines);
    let parser = LayoutParser::default();

    let first = parser.parse_document(&doc);
    let second = parser.parse_document(&doc);
    assert_eq!(first.len(), 4);
    assert_eq!(first, second);

    let types: Vec<QuestionType> = rules_only()
        .process_document(&doc)
        .iter()
        .map(|r| r.question_type())
        .collect();
    assert_eq!(
        types,
        [
            QuestionType::TrueFalse,
            QuestionType::MultipleChoice,
            QuestionType::FillBlank,
            QuestionType::FreeResponse,
        ]
    );
}

// --- Statistical fallback ---

#[test]
fn e2e_fallback_invokes_model_and_calibrator_once() {
    let loader = Arc::new(MockLoader {
        model: Arc::new(MockClassifier::with_fixed(ProbabilityMap::from([
            (QuestionType::FreeResponse, 0.6),
            (QuestionType::FillBlank, 0.3),
            (QuestionType::SingleChoice, 0.1),
        ]))),
        calibrator: Arc::new(MockCalibrator::identity()),
    });
    let mut pipeline = Pipeline::new(PipelineConfig::default(), loader.clone()).unwrap();

    let doc = DocumentInput::from_lines("doc", &["1. Name the capital city of France.", "Answer: Paris"]);
    let results = pipeline.process_document(&doc);

    assert_eq!(results.len(), 1);
    assert!(results[0].rule_decision.is_none());
    assert_eq!(loader.model.call_count(), 1);
    assert_eq!(loader.calibrator.call_count(), 1);
    assert_eq!(results[0].question_type(), QuestionType::FreeResponse);
    assert!((0.0..=1.0).contains(&results[0].confidence()));
    assert_eq!(pipeline.stats().model_invocations, 1);
    assert_eq!(pipeline.stats().rule_hits, 0);
}

#[test]
fn e2e_failing_model_needs_review() {
    let loader = Arc::new(MockLoader {
        model: Arc::new(MockClassifier::failing("weights unavailable")),
        calibrator: Arc::new(MockCalibrator::identity()),
    });
    let mut pipeline = Pipeline::new(PipelineConfig::default(), loader.clone()).unwrap();
    let doc = DocumentInput::from_lines("doc", &["1. Name the capital city of France.", "Answer: Paris"]);

    let r = &pipeline.process_document(&doc)[0];
    assert_eq!(r.question_type(), QuestionType::Unknown);
    assert!(r.final_result.needs_review);
    assert!(r.explanations.iter().any(|e| e.contains("weights unavailable")));
    assert_eq!(loader.calibrator.call_count(), 0);
    assert_eq!(pipeline.stats().errors, 1);
}

// --- Real artifacts on disk ---

#[test]
fn e2e_trained_artifacts_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_artifacts(dir.path());

    let config_path = dir.path().join("quizrec.toml");
    std::fs::write(
        &config_path,
        format!(
            "[paths]\nmodel_path = {:?}\ncalibration_path = {:?}\n\n[thresholds]\nmin_confidence = 0.3\n",
            paths.model_path.as_deref().unwrap().display().to_string(),
            paths.calibration_path.as_deref().unwrap().display().to_string(),
        ),
    )
    .unwrap();
    let config = load_config_from(Some(&config_path)).unwrap();
    assert_eq!(config.thresholds.min_confidence, 0.3);

    let store = Arc::new(ArtifactStore::from_config(&config));
    let mut pipeline = Pipeline::new(config, store).unwrap();
    let doc = DocumentInput::from_lines("doc", &["1. Name the capital city of France.", "Answer: Paris"]);
    let r = &pipeline.process_document(&doc)[0];

    let prediction = r.model_prediction.as_ref().expect("model ran");
    assert_eq!(prediction.model_version, "1.0");
    assert_eq!(prediction.features_used.len(), 19);
    assert!((0.0..=1.0).contains(&r.confidence()));
    let total: f64 = r.final_result.probabilities.values().sum();
    assert!((total - 1.0).abs() < 1e-6);
    assert!(pipeline.calibrator_artifact().loaded().is_some());
    assert_eq!(pipeline.stats().calibrator_invocations, 1);
}

#[test]
fn e2e_calibration_hot_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration.json");

    let single = vec![
        (ProbabilityMap::from([(QuestionType::SingleChoice, 0.9)]), QuestionType::SingleChoice),
        (ProbabilityMap::from([(QuestionType::SingleChoice, 0.2)]), QuestionType::FillBlank),
    ];
    IsotonicCalibrator::fit(&single)
        .unwrap()
        .to_artifact(None)
        .save(&path)
        .unwrap();
    let manager = CalibrationManager::open(&path).unwrap();
    assert_eq!(manager.current().classes().count(), 1);

    // Nothing changed on disk.
    assert!(!manager.reload_if_needed());

    let two_classes = vec![
        (
            ProbabilityMap::from([(QuestionType::SingleChoice, 0.8), (QuestionType::FillBlank, 0.2)]),
            QuestionType::SingleChoice,
        ),
        (
            ProbabilityMap::from([(QuestionType::SingleChoice, 0.3), (QuestionType::FillBlank, 0.7)]),
            QuestionType::FillBlank,
        ),
    ];
    IsotonicCalibrator::fit(&two_classes)
        .unwrap()
        .to_artifact(Some(0.0))
        .save(&path)
        .unwrap();
    assert!(manager.reload_if_needed());
    assert_eq!(manager.current().classes().count(), 2);

    // A half-written file keeps the previous mapping.
    std::fs::write(&path, "{\"version\": \"1.0\", \"mapp").unwrap();
    assert!(!manager.reload_if_needed());
    assert_eq!(manager.current().classes().count(), 2);
}

#[test]
fn e2e_calibration_written_after_startup() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_artifacts(dir.path());
    let calibration = paths.calibration_path.clone().unwrap();
    let parked = dir.path().join("calibration.parked");
    std::fs::rename(&calibration, &parked).unwrap();

    let config = PipelineConfig {
        paths: paths.clone(),
        ..PipelineConfig::default()
    };
    let store = Arc::new(ArtifactStore::from_config(&config));
    let mut pipeline = Pipeline::new(config, store).unwrap();
    let doc = DocumentInput::from_lines("doc", &["1. Name the capital city of France.", "Answer: Paris"]);

    pipeline.process_document(&doc);
    let calibrator = pipeline.calibrator_artifact().loaded().expect("watching missing artifact");
    assert!(!calibrator.is_fitted());

    std::fs::rename(&parked, &calibration).unwrap();
    pipeline.process_document(&doc);
    assert!(calibrator.is_fitted());
    assert_eq!(pipeline.stats().calibrator_invocations, 2);
}

#[tokio::test]
async fn e2e_batch_with_artifacts_and_drift() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_artifacts(dir.path());
    let config = PipelineConfig {
        paths,
        parallelism: 2,
        ..Default::default()
    };
    let processor = BatchProcessor::new(config.clone(), Arc::new(ArtifactStore::from_config(&config)));

    let choice_docs: Vec<DocumentInput> = (0..4)
        .map(|i| {
            DocumentInput::from_lines(
                format!("choice-{i}"),
                &[
                    "1. Which of the following is correct?",
                    "A. one",
                    "B. two",
                    "C. three",
                    "Answer: B",
                ],
            )
        })
        .collect();
    let baseline = processor.run(choice_docs, &NoopReporter).await.unwrap();
    assert_eq!(baseline.type_distribution[&QuestionType::SingleChoice], 4);

    let mixed_docs: Vec<DocumentInput> = (0..4)
        .map(|i| {
            DocumentInput::from_lines(
                format!("mixed-{i}"),
                &["1. The limit is ____ volts.", "Answer: 36", "2. The earth is flat.", "Answer: False"],
            )
        })
        .collect();
    let current = processor.run(mixed_docs, &NoopReporter).await.unwrap();
    assert_eq!(current.results.len(), 8);
    assert_eq!(current.results[0].source_id, "mixed-0#q1");

    let drift = current.compare(&baseline, 0.25);
    assert!(drift.has_drift());
    assert!(drift.to_markdown().contains("drift detected"));

    let labels: HashMap<String, QuestionType> = current
        .results
        .iter()
        .map(|r| (r.source_id.clone(), r.question_type()))
        .collect();
    assert_eq!(current.metrics_against(&labels).accuracy, 1.0);

    let saved = dir.path().join("reports/current.json");
    current.save_json(&saved).unwrap();
    let reloaded = quizrec_core::report::BatchReport::load_json(&saved).unwrap();
    assert_eq!(reloaded.type_distribution, current.type_distribution);
}
