//! Batch report types with JSON persistence and distribution-drift detection.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{ClassificationResult, QuestionType};
use crate::statistics::{
    distribution, population_stability_index, ClassificationMetrics, PipelineStats,
};

/// Everything produced by one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Unique report identifier.
    pub id: Uuid,
    /// When the report was created.
    pub created_at: DateTime<Utc>,
    /// Number of input documents.
    pub documents: usize,
    /// Per-question results, in document then source order.
    pub results: Vec<ClassificationResult>,
    /// Statistics merged across workers.
    pub stats: PipelineStats,
    /// Question count per final type.
    pub type_distribution: BTreeMap<QuestionType, usize>,
    /// Results flagged for review.
    pub review_count: usize,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn new(
        documents: usize,
        results: Vec<ClassificationResult>,
        stats: PipelineStats,
        duration_ms: u64,
    ) -> Self {
        let mut type_distribution = BTreeMap::new();
        for r in &results {
            *type_distribution.entry(r.question_type()).or_insert(0) += 1;
        }
        let review_count = results.iter().filter(|r| r.final_result.needs_review).count();
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            documents,
            results,
            stats,
            type_distribution,
            review_count,
            duration_ms,
        }
    }

    pub fn question_count(&self) -> usize {
        self.results.len()
    }

    /// Share of questions per final type.
    pub fn type_shares(&self) -> BTreeMap<QuestionType, f64> {
        distribution(self.type_distribution.iter().map(|(&ty, &n)| (ty, n as f64)))
    }

    pub fn review_rate(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.review_count as f64 / self.results.len() as f64
        }
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: BatchReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    /// Score the final types against gold labels keyed by result id.
    /// Unlabelled results are skipped.
    pub fn metrics_against(&self, labels: &HashMap<String, QuestionType>) -> ClassificationMetrics {
        let pairs: Vec<(QuestionType, QuestionType)> = self
            .results
            .iter()
            .filter_map(|r| labels.get(&r.source_id).map(|&gold| (r.question_type(), gold)))
            .collect();
        ClassificationMetrics::compute(&pairs)
    }

    /// `(confidence, correct)` pairs for labelled results, as fed to a
    /// calibration monitor.
    pub fn calibration_samples(&self, labels: &HashMap<String, QuestionType>) -> Vec<(f64, bool)> {
        self.results
            .iter()
            .filter_map(|r| {
                labels
                    .get(&r.source_id)
                    .map(|&gold| (r.confidence(), r.question_type() == gold))
            })
            .collect()
    }

    /// Compare this report's type distribution against a baseline batch.
    pub fn compare(&self, baseline: &BatchReport, psi_threshold: f64) -> DriftReport {
        let baseline_shares = baseline.type_shares();
        let current_shares = self.type_shares();
        let psi = population_stability_index(&baseline_shares, &current_shares);

        let mut types: Vec<QuestionType> = baseline_shares
            .keys()
            .chain(current_shares.keys())
            .copied()
            .collect();
        types.sort();
        types.dedup();

        let shifts = types
            .into_iter()
            .map(|ty| {
                let baseline_share = baseline_shares.get(&ty).copied().unwrap_or(0.0);
                let current_share = current_shares.get(&ty).copied().unwrap_or(0.0);
                TypeShift {
                    question_type: ty,
                    baseline_share,
                    current_share,
                    delta: current_share - baseline_share,
                }
            })
            .collect();

        let report = DriftReport {
            psi,
            psi_threshold,
            shifts,
            baseline_questions: baseline.question_count(),
            current_questions: self.question_count(),
            baseline_review_rate: baseline.review_rate(),
            current_review_rate: self.review_rate(),
        };
        if report.has_drift() {
            tracing::warn!(psi, psi_threshold, "question type distribution drifted from baseline");
        }
        report
    }
}

/// Result of comparing two batch reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    /// Population Stability Index of the type distribution.
    pub psi: f64,
    pub psi_threshold: f64,
    /// Per-type share change, ordered by type.
    pub shifts: Vec<TypeShift>,
    pub baseline_questions: usize,
    pub current_questions: usize,
    pub baseline_review_rate: f64,
    pub current_review_rate: f64,
}

/// Share change for one question type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeShift {
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub baseline_share: f64,
    pub current_share: f64,
    pub delta: f64,
}

impl DriftReport {
    /// Returns true if the PSI exceeds the threshold.
    pub fn has_drift(&self) -> bool {
        self.psi > self.psi_threshold
    }

    pub fn review_rate_delta(&self) -> f64 {
        self.current_review_rate - self.baseline_review_rate
    }

    /// Format the drift report as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!(
            "**Summary:** PSI {:.4} (threshold {:.2}), {}\n\n",
            self.psi,
            self.psi_threshold,
            if self.has_drift() { "drift detected" } else { "stable" }
        ));
        md.push_str(&format!(
            "Questions: {} baseline, {} current. Review rate: {:.1}% → {:.1}% ({:+.1}%)\n\n",
            self.baseline_questions,
            self.current_questions,
            self.baseline_review_rate * 100.0,
            self.current_review_rate * 100.0,
            self.review_rate_delta() * 100.0
        ));

        if !self.shifts.is_empty() {
            md.push_str("### Type Distribution\n\n");
            md.push_str("| Type | Baseline | Current | Delta |\n");
            md.push_str("|------|----------|---------|-------|\n");
            for s in &self.shifts {
                md.push_str(&format!(
                    "| {} | {:.1}% | {:.1}% | {:+.1}% |\n",
                    s.question_type,
                    s.baseline_share * 100.0,
                    s.current_share * 100.0,
                    s.delta * 100.0
                ));
            }
        }

        md
    }
}
