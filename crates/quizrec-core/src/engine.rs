//! Batch processor.
//!
//! Runs one pipeline per document on blocking worker tasks, bounded by a
//! semaphore. Workers share only the model and calibrator, which are resolved
//! once up front.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use crate::config::PipelineConfig;
use crate::model::{ClassificationResult, DocumentInput};
use crate::pipeline::{resolve_artifacts, Pipeline};
use crate::report::BatchReport;
use crate::statistics::PipelineStats;
use crate::traits::ArtifactLoader;

/// Progress reporting trait.
pub trait ProgressReporter: Send + Sync {
    fn on_document_start(&self, source_id: &str);
    fn on_document_complete(&self, source_id: &str, results: &[ClassificationResult]);
    fn on_document_error(&self, source_id: &str, error: &str);
    fn on_batch_complete(&self, total: usize, completed: usize, failed: usize, elapsed: Duration);
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_document_start(&self, _: &str) {}
    fn on_document_complete(&self, _: &str, _: &[ClassificationResult]) {}
    fn on_document_error(&self, _: &str, _: &str) {}
    fn on_batch_complete(&self, _: usize, _: usize, _: usize, _: Duration) {}
}

pub struct BatchProcessor {
    config: PipelineConfig,
    loader: Arc<dyn ArtifactLoader>,
}

impl BatchProcessor {
    pub fn new(config: PipelineConfig, loader: Arc<dyn ArtifactLoader>) -> Self {
        Self { config, loader }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Classify every document. Results come back in input-document order
    /// regardless of completion order.
    pub async fn run(
        &self,
        documents: Vec<DocumentInput>,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchReport> {
        let start = Instant::now();
        let total = documents.len();

        // Fail fast on bad rule overrides before spawning anything.
        Pipeline::new(self.config.clone(), Arc::clone(&self.loader))
            .context("invalid rule overrides")?;

        let loader = Arc::clone(&self.loader);
        let (model, calibrator) =
            tokio::task::spawn_blocking(move || resolve_artifacts(loader.as_ref()))
                .await
                .context("artifact loading task failed")?;

        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut futures = FuturesUnordered::new();

        for (index, document) in documents.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let config = self.config.clone();
            let loader = Arc::clone(&self.loader);
            let model = model.clone();
            let calibrator = calibrator.clone();

            futures.push(async move {
                let source_id = document.source_id.clone();
                let outcome: Result<(Vec<ClassificationResult>, PipelineStats)> = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| anyhow::anyhow!("semaphore closed"))?;
                    progress.on_document_start(&source_id);

                    tokio::task::spawn_blocking(move || -> Result<_> {
                        let mut pipeline =
                            Pipeline::new(config, loader)?.with_shared(model, calibrator);
                        let results = pipeline.process_document(&document);
                        Ok((results, pipeline.take_stats()))
                    })
                    .await
                    .context("document worker failed")?
                }
                .await;
                (index, source_id, outcome)
            });
        }

        let mut slots: Vec<Option<Vec<ClassificationResult>>> = vec![None; total];
        let mut stats = PipelineStats::default();
        let mut failed = 0usize;

        while let Some((index, source_id, outcome)) = futures.next().await {
            match outcome {
                Ok((results, worker_stats)) => {
                    progress.on_document_complete(&source_id, &results);
                    stats.merge(&worker_stats);
                    slots[index] = Some(results);
                }
                Err(e) => {
                    failed += 1;
                    let msg = format!("{e:#}");
                    tracing::error!(%source_id, error = %msg, "document failed");
                    progress.on_document_error(&source_id, &msg);
                }
            }
        }

        let results: Vec<ClassificationResult> = slots.into_iter().flatten().flatten().collect();
        let elapsed = start.elapsed();
        progress.on_batch_complete(total, total - failed, failed, elapsed);
        tracing::info!(
            documents = total,
            questions = results.len(),
            failed,
            rule_hit_rate = stats.rule_hit_rate(),
            elapsed_ms = elapsed.as_millis() as u64,
            "batch complete"
        );

        Ok(BatchReport::new(total, results, stats, elapsed.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleOverride;
    use crate::error::ArtifactError;
    use crate::features::QuestionFeatures;
    use crate::model::{ProbabilityMap, QuestionType};
    use crate::traits::{NoArtifacts, ProbabilityCalibrator, TypeClassifier};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct Constant;

    impl TypeClassifier for Constant {
        fn version(&self) -> &str {
            "constant"
        }

        fn predict_proba(&self, _: &QuestionFeatures) -> anyhow::Result<ProbabilityMap> {
            Ok(ProbabilityMap::from([
                (QuestionType::FreeResponse, 0.8),
                (QuestionType::FillBlank, 0.2),
            ]))
        }
    }

    struct CountingLoader {
        loads: AtomicU32,
    }

    impl ArtifactLoader for CountingLoader {
        fn load_model(&self) -> Result<Arc<dyn TypeClassifier>, ArtifactError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Constant))
        }

        fn load_calibrator(&self) -> Result<Arc<dyn ProbabilityCalibrator>, ArtifactError> {
            Err(ArtifactError::NotConfigured("calibration"))
        }
    }

    #[derive(Default)]
    struct Recording {
        started: Mutex<Vec<String>>,
        completed: Mutex<Vec<String>>,
        finished: Mutex<Option<(usize, usize, usize)>>,
    }

    impl ProgressReporter for Recording {
        fn on_document_start(&self, source_id: &str) {
            self.started.lock().unwrap().push(source_id.to_string());
        }
        fn on_document_complete(&self, source_id: &str, _: &[ClassificationResult]) {
            self.completed.lock().unwrap().push(source_id.to_string());
        }
        fn on_document_error(&self, _: &str, _: &str) {}
        fn on_batch_complete(&self, total: usize, completed: usize, failed: usize, _: Duration) {
            *self.finished.lock().unwrap() = Some((total, completed, failed));
        }
    }

    fn documents(n: usize) -> Vec<DocumentInput> {
        (0..n)
            .map(|i| {
                DocumentInput::from_lines(
                    format!("doc-{i}"),
                    &[
                        "1. The earth orbits the sun.",
                        "答案：对",
                        "2. Name the capital city of France.",
                        "答案：Paris",
                    ],
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn results_follow_input_order() {
        let mut config = PipelineConfig::default();
        config.parallelism = 3;
        let processor = BatchProcessor::new(config, Arc::new(NoArtifacts));
        let progress = Recording::default();

        let report = processor.run(documents(8), &progress).await.unwrap();

        assert_eq!(report.documents, 8);
        assert_eq!(report.results.len(), 16);
        let ids: Vec<String> = (0..8)
            .flat_map(|i| [format!("doc-{i}#q1"), format!("doc-{i}#q2")])
            .collect();
        let got: Vec<&String> = report.results.iter().map(|r| &r.source_id).collect();
        assert_eq!(got, ids.iter().collect::<Vec<_>>());

        assert_eq!(report.stats.total_processed, 16);
        assert_eq!(report.stats.rule_hits, 8);
        assert_eq!(report.type_distribution[&QuestionType::TrueFalse], 8);
        assert_eq!(report.type_distribution[&QuestionType::Unknown], 8);
        assert_eq!(progress.started.lock().unwrap().len(), 8);
        assert_eq!(progress.completed.lock().unwrap().len(), 8);
        assert_eq!(*progress.finished.lock().unwrap(), Some((8, 8, 0)));
    }

    #[tokio::test]
    async fn artifacts_are_resolved_once() {
        let loader = Arc::new(CountingLoader {
            loads: AtomicU32::new(0),
        });
        let processor = BatchProcessor::new(PipelineConfig::default(), loader.clone());

        let report = processor.run(documents(5), &NoopReporter).await.unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(report.stats.model_invocations, 5);
        assert_eq!(report.type_distribution[&QuestionType::FreeResponse], 5);
    }

    #[tokio::test]
    async fn empty_batch() {
        let processor = BatchProcessor::new(PipelineConfig::default(), Arc::new(NoArtifacts));
        let report = processor.run(vec![], &NoopReporter).await.unwrap();
        assert_eq!(report.documents, 0);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn bad_overrides_fail_fast() {
        let mut config = PipelineConfig::default();
        config.rules.insert(
            "single_choice_default".into(),
            RuleOverride {
                enabled: None,
                threshold: Some(2.0),
            },
        );
        let processor = BatchProcessor::new(config, Arc::new(NoArtifacts));
        let err = processor.run(documents(1), &NoopReporter).await.unwrap_err();
        assert!(format!("{err:#}").contains("outside [0, 1]"));
    }
}
