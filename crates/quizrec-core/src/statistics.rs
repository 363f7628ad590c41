//! Running pipeline statistics and evaluation metrics: calibration error,
//! distribution shift, and per-class classification scores.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::QuestionType;

/// Floor applied to shares before taking logs in the PSI.
const PSI_FLOOR: f64 = 0.001;

/// Counters owned by one pipeline instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_processed: u64,
    pub rule_hits: u64,
    pub model_invocations: u64,
    pub calibrator_invocations: u64,
    pub low_confidence: u64,
    pub needs_review: u64,
    pub errors: u64,
    /// Per-question latency in microseconds.
    pub latencies_us: Vec<u64>,
}

impl PipelineStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold another instance's counters into this one.
    pub fn merge(&mut self, other: &PipelineStats) {
        self.total_processed += other.total_processed;
        self.rule_hits += other.rule_hits;
        self.model_invocations += other.model_invocations;
        self.calibrator_invocations += other.calibrator_invocations;
        self.low_confidence += other.low_confidence;
        self.needs_review += other.needs_review;
        self.errors += other.errors;
        self.latencies_us.extend_from_slice(&other.latencies_us);
    }

    pub fn total_latency_us(&self) -> u64 {
        self.latencies_us.iter().sum()
    }

    pub fn avg_latency_us(&self) -> f64 {
        if self.latencies_us.is_empty() {
            return 0.0;
        }
        self.total_latency_us() as f64 / self.latencies_us.len() as f64
    }

    fn rate(&self, count: u64) -> f64 {
        if self.total_processed == 0 {
            0.0
        } else {
            count as f64 / self.total_processed as f64
        }
    }

    pub fn rule_hit_rate(&self) -> f64 {
        self.rate(self.rule_hits)
    }

    pub fn model_invocation_rate(&self) -> f64 {
        self.rate(self.model_invocations)
    }

    pub fn low_confidence_rate(&self) -> f64 {
        self.rate(self.low_confidence)
    }

    pub fn review_rate(&self) -> f64 {
        self.rate(self.needs_review)
    }

    pub fn error_rate(&self) -> f64 {
        self.rate(self.errors)
    }
}

/// One equal-width confidence bucket of a reliability diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    /// Mean confidence in the bin; the bin centre when empty.
    pub mean_confidence: f64,
    /// Share of correct predictions; 0 when empty.
    pub accuracy: f64,
}

/// Bucket index for `confidence`. Buckets are `(lower, upper]`, except that 0
/// falls into the first.
fn bin_index(confidence: f64, n_bins: usize) -> usize {
    let scaled = (confidence.clamp(0.0, 1.0) * n_bins as f64).ceil() as usize;
    scaled.saturating_sub(1).min(n_bins - 1)
}

/// Reliability-diagram bins over `(confidence, correct)` samples.
pub fn reliability_bins(samples: &[(f64, bool)], n_bins: usize) -> Vec<ReliabilityBin> {
    let n_bins = n_bins.max(1);
    let mut sums = vec![(0usize, 0.0f64, 0usize); n_bins];
    for &(confidence, correct) in samples {
        let slot = &mut sums[bin_index(confidence, n_bins)];
        slot.0 += 1;
        slot.1 += confidence;
        slot.2 += usize::from(correct);
    }

    let width = 1.0 / n_bins as f64;
    sums.into_iter()
        .enumerate()
        .map(|(i, (count, conf_sum, correct))| {
            let lower = i as f64 * width;
            let upper = lower + width;
            let (mean_confidence, accuracy) = if count == 0 {
                ((lower + upper) / 2.0, 0.0)
            } else {
                (conf_sum / count as f64, correct as f64 / count as f64)
            };
            ReliabilityBin {
                lower,
                upper,
                count,
                mean_confidence,
                accuracy,
            }
        })
        .collect()
}

/// Expected Calibration Error: `Σ (bin share) × |mean confidence − accuracy|`.
pub fn expected_calibration_error(samples: &[(f64, bool)], n_bins: usize) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total = samples.len() as f64;
    reliability_bins(samples, n_bins)
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| (b.count as f64 / total) * (b.mean_confidence - b.accuracy).abs())
        .sum()
}

/// Normalize counts (or unnormalized weights) to shares.
pub fn distribution<I>(counts: I) -> BTreeMap<QuestionType, f64>
where
    I: IntoIterator<Item = (QuestionType, f64)>,
{
    let counts: BTreeMap<QuestionType, f64> = counts.into_iter().fold(
        BTreeMap::new(),
        |mut acc, (ty, n)| {
            *acc.entry(ty).or_insert(0.0) += n;
            acc
        },
    );
    let total: f64 = counts.values().sum();
    if total <= 0.0 {
        return BTreeMap::new();
    }
    counts.into_iter().map(|(ty, n)| (ty, n / total)).collect()
}

/// Population Stability Index between a baseline and a current type
/// distribution (shares). Types missing on either side count as 0.1%.
pub fn population_stability_index(
    baseline: &BTreeMap<QuestionType, f64>,
    current: &BTreeMap<QuestionType, f64>,
) -> f64 {
    let types: BTreeSet<QuestionType> = baseline.keys().chain(current.keys()).copied().collect();
    types
        .into_iter()
        .map(|ty| {
            let expected = baseline.get(&ty).copied().unwrap_or(0.0).max(PSI_FLOOR);
            let actual = current.get(&ty).copied().unwrap_or(0.0).max(PSI_FLOOR);
            (actual - expected) * (actual / expected).ln()
        })
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Accuracy and per-class scores for `(predicted, actual)` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub per_class: BTreeMap<QuestionType, ClassMetrics>,
}

impl ClassificationMetrics {
    pub fn compute(pairs: &[(QuestionType, QuestionType)]) -> Self {
        let classes: BTreeSet<QuestionType> =
            pairs.iter().flat_map(|&(p, a)| [p, a]).collect();
        let correct = pairs.iter().filter(|(p, a)| p == a).count();
        let accuracy = if pairs.is_empty() {
            0.0
        } else {
            correct as f64 / pairs.len() as f64
        };

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let per_class: BTreeMap<QuestionType, ClassMetrics> = classes
            .into_iter()
            .map(|class| {
                let tp = pairs.iter().filter(|&&(p, a)| p == class && a == class).count();
                let predicted = pairs.iter().filter(|&&(p, _)| p == class).count();
                let support = pairs.iter().filter(|&&(_, a)| a == class).count();
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                let f1 = if precision + recall == 0.0 {
                    0.0
                } else {
                    2.0 * precision * recall / (precision + recall)
                };
                (
                    class,
                    ClassMetrics {
                        precision,
                        recall,
                        f1,
                        support,
                    },
                )
            })
            .collect();

        let n = per_class.len().max(1) as f64;
        Self {
            accuracy,
            macro_precision: per_class.values().map(|m| m.precision).sum::<f64>() / n,
            macro_recall: per_class.values().map(|m| m.recall).sum::<f64>() / n,
            macro_f1: per_class.values().map(|m| m.f1).sum::<f64>() / n,
            per_class,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_rates_and_merge() {
        let mut a = PipelineStats {
            total_processed: 4,
            rule_hits: 3,
            model_invocations: 1,
            low_confidence: 1,
            latencies_us: vec![10, 30],
            ..Default::default()
        };
        assert_eq!(a.rule_hit_rate(), 0.75);
        assert_eq!(a.avg_latency_us(), 20.0);

        let b = PipelineStats {
            total_processed: 4,
            errors: 2,
            latencies_us: vec![20],
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.total_processed, 8);
        assert_eq!(a.error_rate(), 0.25);
        assert_eq!(a.total_latency_us(), 60);

        a.reset();
        assert_eq!(a, PipelineStats::default());
        assert_eq!(a.rule_hit_rate(), 0.0);
        assert_eq!(a.avg_latency_us(), 0.0);
    }

    #[test]
    fn perfectly_calibrated_data_has_zero_ece() {
        let mut samples = Vec::new();
        // 0.25 confidence, 1 in 4 correct; 0.75 confidence, 3 in 4 correct.
        for i in 0..40 {
            samples.push((0.25, i % 4 == 0));
            samples.push((0.75, i % 4 != 0));
        }
        assert!(expected_calibration_error(&samples, 10) < 1e-9);
    }

    #[test]
    fn overconfident_predictions_have_high_ece() {
        let samples: Vec<(f64, bool)> = (0..10).map(|i| (0.9, i < 5)).collect();
        assert!((expected_calibration_error(&samples, 10) - 0.4).abs() < 1e-9);
        assert_eq!(expected_calibration_error(&[], 10), 0.0);
    }

    #[test]
    fn bins_are_upper_inclusive() {
        assert_eq!(bin_index(0.0, 10), 0);
        assert_eq!(bin_index(0.1, 10), 0);
        assert_eq!(bin_index(0.11, 10), 1);
        assert_eq!(bin_index(1.0, 10), 9);

        let bins = reliability_bins(&[(0.95, true)], 10);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins[9].count, 1);
        assert_eq!(bins[0].mean_confidence, 0.05);
    }

    #[test]
    fn psi_is_zero_for_identical_distributions() {
        let d = distribution([(QuestionType::SingleChoice, 3.0), (QuestionType::TrueFalse, 1.0)]);
        assert_eq!(d[&QuestionType::SingleChoice], 0.75);
        assert!(population_stability_index(&d, &d).abs() < 1e-12);
    }

    #[test]
    fn psi_grows_with_shift() {
        let baseline = distribution([(QuestionType::SingleChoice, 1.0), (QuestionType::TrueFalse, 1.0)]);
        let small = distribution([(QuestionType::SingleChoice, 11.0), (QuestionType::TrueFalse, 9.0)]);
        let large = distribution([(QuestionType::SingleChoice, 1.0), (QuestionType::FillBlank, 1.0)]);
        let psi_small = population_stability_index(&baseline, &small);
        let psi_large = population_stability_index(&baseline, &large);
        assert!(psi_small > 0.0 && psi_small < 0.1);
        assert!(psi_large > 1.0);
    }

    #[test]
    fn classification_metrics() {
        use QuestionType::*;
        let pairs = [
            (SingleChoice, SingleChoice),
            (SingleChoice, MultipleChoice),
            (TrueFalse, TrueFalse),
            (FillBlank, FillBlank),
        ];
        let m = ClassificationMetrics::compute(&pairs);
        assert_eq!(m.accuracy, 0.75);
        assert_eq!(m.per_class[&SingleChoice].precision, 0.5);
        assert_eq!(m.per_class[&SingleChoice].recall, 1.0);
        assert_eq!(m.per_class[&MultipleChoice].f1, 0.0);
        assert_eq!(m.per_class[&MultipleChoice].support, 1);
        assert!(m.macro_f1 > 0.5 && m.macro_f1 < 1.0);
    }
}
